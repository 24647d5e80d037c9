use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::chat::{self, ChatScope, MessageId, StorageId, WorkspaceId};
use crate::remote::{Backend, CreateMessage, RemoteError};

pub use editor::Editor;

mod editor;

/// Where a send is in its pipeline. Uploading only occurs when an image
/// is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerPhase {
    Idle,
    Uploading,
    Sending,
}

/// Image staged for upload-then-attach.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum ComposerTarget {
    Create {
        workspace_id: WorkspaceId,
        scope: ChatScope,
    },
    /// Edit of an existing message; only the body is mutable.
    Update { message_id: MessageId },
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Sent(MessageId),
    Failed(RemoteError),
}

enum ComposerEvent {
    Phase(ComposerPhase),
    Done(Result<MessageId, RemoteError>),
}

/// One composer instance: an owned editor, a staged attachment, and the
/// send pipeline. `submit` spawns the remote work and returns at once;
/// the outcome lands through [`Composer::pump`] on the next tick, which
/// is where the pending phase and the editor's disabled state are reset
/// on every exit path. Success remounts a fresh editor (generation key
/// bumped) instead of clearing the old one in place.
pub struct Composer {
    target: ComposerTarget,
    editor: Editor,
    editor_key: u64,
    phase: ComposerPhase,
    attachment: Option<Attachment>,
    event_tx: mpsc::UnboundedSender<ComposerEvent>,
    event_rx: mpsc::UnboundedReceiver<ComposerEvent>,
}

impl Composer {
    pub fn new(target: ComposerTarget) -> Self {
        let mut editor = Editor::new();
        editor.focus();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            target,
            editor,
            editor_key: 0,
            phase: ComposerPhase::Idle,
            attachment: None,
            event_tx,
            event_rx,
        }
    }

    /// Edit composer prefilled with the message's current text.
    pub fn for_edit(message_id: MessageId, current_text: &str) -> Self {
        let mut composer = Self::new(ComposerTarget::Update { message_id });
        composer.editor.set_contents(current_text);
        composer
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut Editor {
        &mut self.editor
    }

    pub fn editor_key(&self) -> u64 {
        self.editor_key
    }

    pub fn phase(&self) -> ComposerPhase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.phase != ComposerPhase::Idle
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Stage an image. Edits carry no attachments; staging one there is
    /// rejected.
    pub fn attach(&mut self, attachment: Attachment) -> bool {
        match self.target {
            ComposerTarget::Create { .. } => {
                self.attachment = Some(attachment);
                true
            }
            ComposerTarget::Update { .. } => false,
        }
    }

    /// Start the pipeline on a spawned task: optional upload-then-attach,
    /// then the create or update mutation. No-op while a send is pending
    /// or when there is nothing to send. The editor is disabled until the
    /// outcome comes back through `pump`.
    pub fn submit(&mut self, backend: &Arc<dyn Backend>) {
        if self.is_pending() {
            return;
        }
        let text = self.editor.get_text().trim().to_string();
        if text.is_empty() && self.attachment.is_none() {
            return;
        }

        self.phase = if self.attachment.is_some() {
            ComposerPhase::Uploading
        } else {
            ComposerPhase::Sending
        };
        self.editor.set_enabled(false);

        let backend = Arc::clone(backend);
        let target = self.target.clone();
        let attachment = self.attachment.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = run_pipeline(backend, target, text, attachment, tx.clone()).await;
            let _ = tx.send(ComposerEvent::Done(result));
        });
    }

    /// Drain pipeline events. Whatever the result, the pending phase and
    /// the editor's disabled state are reset before the outcome is
    /// returned; failures keep content and attachment for a retry.
    pub fn pump(&mut self) -> Option<SubmitOutcome> {
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                ComposerEvent::Phase(phase) => self.phase = phase,
                ComposerEvent::Done(result) => {
                    self.phase = ComposerPhase::Idle;
                    self.editor.set_enabled(true);
                    return Some(match result {
                        Ok(id) => {
                            self.attachment = None;
                            self.remount_editor();
                            SubmitOutcome::Sent(id)
                        }
                        Err(err) => SubmitOutcome::Failed(err),
                    });
                }
            }
        }
        None
    }

    fn remount_editor(&mut self) {
        self.editor.dispose();
        self.editor = Editor::new();
        self.editor.focus();
        self.editor_key += 1;
    }
}

async fn run_pipeline(
    backend: Arc<dyn Backend>,
    target: ComposerTarget,
    text: String,
    attachment: Option<Attachment>,
    tx: mpsc::UnboundedSender<ComposerEvent>,
) -> Result<MessageId, RemoteError> {
    let image = match attachment {
        Some(attachment) => Some(upload(&backend, attachment).await?),
        None => None,
    };

    let _ = tx.send(ComposerEvent::Phase(ComposerPhase::Sending));
    let body = chat::encode_body(&text);
    match target {
        ComposerTarget::Create {
            workspace_id,
            scope,
        } => {
            let mut request = CreateMessage {
                workspace_id,
                channel_id: None,
                conversation_id: None,
                parent_message_id: None,
                body,
                image,
            };
            match scope {
                ChatScope::Channel(id) => request.channel_id = Some(id),
                ChatScope::Thread {
                    channel_id,
                    parent_message_id,
                } => {
                    request.channel_id = Some(channel_id);
                    request.parent_message_id = Some(parent_message_id);
                }
                ChatScope::Conversation(id) => request.conversation_id = Some(id),
            }
            backend.create_message(request).await
        }
        ComposerTarget::Update { message_id } => {
            backend.update_message(&message_id, &body).await?;
            Ok(message_id)
        }
    }
}

async fn upload(
    backend: &Arc<dyn Backend>,
    attachment: Attachment,
) -> Result<StorageId, RemoteError> {
    let url = backend
        .generate_upload_url()
        .await?
        .ok_or(RemoteError::UploadTargetMissing)?;
    debug!(filename = %attachment.filename, "uploading attachment");
    backend
        .upload(&url, &attachment.content_type, attachment.bytes)
        .await
}

/// Declared content type for an attachment, from its file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
