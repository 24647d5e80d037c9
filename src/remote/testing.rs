use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::chat::{
    fixtures, Channel, ChannelId, ChatScope, Conversation, Member, MemberId, Message, MessageId,
    StorageId, WorkspaceId,
};

use super::{Backend, CreateMessage, MessagePage, RemoteError};

/// Scriptable in-memory backend for feed and composer tests. Records
/// every mutation so tests can assert exactly which calls were made.
#[derive(Default)]
pub struct StubBackend {
    pub pages: Mutex<VecDeque<MessagePage>>,
    pub page_requests: AtomicUsize,
    pub fail_next_page: AtomicBool,

    /// `None` reproduces the upload-target-missing failure.
    pub upload_url: Mutex<Option<String>>,
    pub fail_upload: AtomicBool,
    pub fail_mutations: AtomicBool,

    pub created: Mutex<Vec<CreateMessage>>,
    pub updated: Mutex<Vec<(MessageId, String)>>,
    pub deleted: Mutex<Vec<MessageId>>,
    pub reactions: Mutex<Vec<(MessageId, String)>>,
    pub channels: Mutex<Vec<Channel>>,
    pub members: Mutex<Vec<Member>>,
}

impl StubBackend {
    pub fn with_pages(pages: Vec<MessagePage>) -> Self {
        let stub = Self::default();
        *stub.pages.lock().unwrap() = pages.into();
        stub
    }

    pub fn page(messages: Vec<Message>, cursor: Option<&str>, is_done: bool) -> MessagePage {
        MessagePage {
            messages,
            cursor: cursor.map(str::to_string),
            is_done,
        }
    }

    fn rejected_if_scripted(&self) -> Result<(), RemoteError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            Err(RemoteError::MutationRejected("scripted rejection".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn load_page(
        &self,
        _scope: &ChatScope,
        _cursor: Option<&str>,
        _num_items: u32,
    ) -> Result<MessagePage, RemoteError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_page.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::MutationRejected("scripted page failure".into()));
        }
        Ok(self.pages.lock().unwrap().pop_front().unwrap_or(MessagePage {
            messages: Vec::new(),
            cursor: None,
            is_done: true,
        }))
    }

    async fn get_message(&self, _id: &MessageId) -> Result<Option<Message>, RemoteError> {
        Ok(None)
    }

    async fn create_message(&self, request: CreateMessage) -> Result<MessageId, RemoteError> {
        self.rejected_if_scripted()?;
        self.created.lock().unwrap().push(request);
        Ok("m-created".into())
    }

    async fn update_message(&self, id: &MessageId, body: &str) -> Result<(), RemoteError> {
        self.rejected_if_scripted()?;
        self.updated
            .lock()
            .unwrap()
            .push((id.clone(), body.to_string()));
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), RemoteError> {
        self.rejected_if_scripted()?;
        self.deleted.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn toggle_reaction(&self, id: &MessageId, value: &str) -> Result<(), RemoteError> {
        self.rejected_if_scripted()?;
        self.reactions
            .lock()
            .unwrap()
            .push((id.clone(), value.to_string()));
        Ok(())
    }

    async fn list_channels(&self, _workspace: &WorkspaceId) -> Result<Vec<Channel>, RemoteError> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn create_channel(
        &self,
        _workspace: &WorkspaceId,
        _name: &str,
    ) -> Result<ChannelId, RemoteError> {
        self.rejected_if_scripted()?;
        Ok("c-created".into())
    }

    async fn list_members(&self, _workspace: &WorkspaceId) -> Result<Vec<Member>, RemoteError> {
        Ok(self.members.lock().unwrap().clone())
    }

    async fn current_member(&self, _workspace: &WorkspaceId) -> Result<Member, RemoteError> {
        Ok(fixtures::member("me", "Test User"))
    }

    async fn create_or_get_conversation(
        &self,
        workspace: &WorkspaceId,
        other: &MemberId,
    ) -> Result<Conversation, RemoteError> {
        self.rejected_if_scripted()?;
        Ok(Conversation {
            id: "conv-1".into(),
            workspace_id: workspace.clone(),
            member_one_id: "me".into(),
            member_two_id: other.clone(),
        })
    }

    async fn generate_upload_url(&self) -> Result<Option<String>, RemoteError> {
        Ok(self.upload_url.lock().unwrap().clone())
    }

    async fn upload(
        &self,
        _url: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> Result<StorageId, RemoteError> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(RemoteError::UploadTransferFailed("scripted refusal".into()));
        }
        Ok("stored-1".into())
    }
}
