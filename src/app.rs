use anyhow::Result;
use crossterm::event::{Event, KeyCode, KeyEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chat::feed::{sentinel_visible, MessageFeed};
use crate::chat::{
    self, Channel, ChatScope, Conversation, ConversationId, Member, MemberId, Message, MessageId,
    WorkspaceId,
};
use crate::composer::{
    guess_content_type, Attachment, Composer, ComposerTarget, Editor, SubmitOutcome,
};
use crate::remote::{Backend, LiveUpdate, RemoteError};

const MAX_NOTICES: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Connected,
    /// The workspace event stream gave up; data may be stale.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
    Confirm,
}

/// Which side panel is open. A tagged variant instead of two optional
/// ids, so "both set" is unrepresentable; opening either slot replaces
/// the other (last-opened wins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelState {
    Closed,
    Thread(MessageId),
    Profile(MemberId),
}

impl PanelState {
    pub fn is_closed(&self) -> bool {
        matches!(self, PanelState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Main,
    Panel,
}

#[derive(Debug, Clone)]
pub enum PendingAction {
    DeleteMessage(MessageId),
}

/// Blocking yes/no prompt; the pending action runs only on confirm.
pub struct ConfirmPrompt {
    pub message: String,
    pub action: PendingAction,
}

/// Outcome of a spawned remote call, applied on the next tick. Keeps the
/// key handler free of awaits on the network.
enum AppAction {
    Notice(String),
    MessageDeleted(MessageId),
    ChannelsRefreshed {
        channels: Vec<Channel>,
        open: Option<String>,
    },
    OpenConversation {
        member: Member,
        conversation: Conversation,
    },
}

/// What the renderer saw last frame, used for the load-more sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStats {
    pub total_rows: usize,
    pub viewport_rows: usize,
}

/// In-place edit of one message. At most one exists per list; starting
/// another replaces it wholesale.
pub struct EditState {
    pub id: MessageId,
    pub composer: Composer,
}

/// A rendered message list: the feed, selection cursor, scroll position
/// and the list's single edit-in-progress.
pub struct ListView {
    pub feed: MessageFeed,
    pub selected: Option<usize>,
    pub scroll_from_bottom: usize,
    pub editing: Option<EditState>,
    pub render: RenderStats,
}

impl ListView {
    pub fn new(scope: ChatScope, backend: Arc<dyn Backend>) -> Self {
        Self {
            feed: MessageFeed::new(scope, backend),
            selected: None,
            scroll_from_bottom: 0,
            editing: None,
            render: RenderStats::default(),
        }
    }

    pub fn selected_message(&self) -> Option<&Message> {
        self.selected.and_then(|i| self.feed.results().get(i))
    }

    /// Results are newest-first, so "older" walks the index up.
    pub fn select_older(&mut self) {
        let len = self.feed.results().len();
        if len == 0 {
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) => (i + 1).min(len - 1),
            None => 0,
        });
    }

    pub fn select_newer(&mut self) {
        self.selected = match self.selected {
            Some(0) | None => None,
            Some(i) => Some(i - 1),
        };
    }

    pub fn begin_edit(&mut self, message: &Message) {
        self.editing = Some(EditState {
            id: message.id.clone(),
            composer: Composer::for_edit(message.id.clone(), &message.text()),
        });
    }

    pub fn editing_id(&self) -> Option<&MessageId> {
        self.editing.as_ref().map(|e| &e.id)
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn scroll_back(&mut self, rows: usize) {
        self.scroll_from_bottom = (self.scroll_from_bottom + rows).min(self.render.total_rows);
    }

    pub fn scroll_forward(&mut self, rows: usize) {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(rows);
    }

    fn clamp_selection(&mut self) {
        let len = self.feed.results().len();
        self.selected = match self.selected {
            Some(_) if len == 0 => None,
            Some(i) => Some(i.min(len - 1)),
            None => None,
        };
    }

    fn maybe_load_more(&mut self) {
        if sentinel_visible(
            self.scroll_from_bottom,
            self.render.viewport_rows,
            self.render.total_rows,
        ) {
            self.feed.load_more();
        }
    }

    fn discard(&mut self, id: &MessageId) {
        self.feed.remove(id);
        if self.editing_id() == Some(id) {
            self.editing = None;
        }
        self.clamp_selection();
    }
}

/// The main chat surface: a channel stream or a direct conversation.
/// The scope lives on the feed; `list.feed.scope()` is authoritative.
pub struct ChatView {
    pub title: String,
    pub list: ListView,
    pub composer: Composer,
}

/// Thread side panel: the root message plus its reply feed and composer.
pub struct ThreadView {
    pub root_id: MessageId,
    pub root: Option<Message>,
    pub list: ListView,
    pub composer: Composer,
}

pub struct App {
    pub should_quit: bool,
    pub state: AppState,
    pub input_mode: InputMode,
    pub focus: Focus,
    pub panel: PanelState,
    pub confirm: Option<ConfirmPrompt>,

    backend: Arc<dyn Backend>,
    pub workspace_id: WorkspaceId,
    pub me: Member,
    pub channels: Vec<Channel>,
    pub members: Vec<Member>,

    pub view: Option<ChatView>,
    pub thread: Option<ThreadView>,

    /// Command line for when no channel or conversation is open yet;
    /// `/join`, `/create` and friends still need somewhere to be typed.
    lobby: Editor,

    pub notices: Vec<String>,
    action_tx: mpsc::UnboundedSender<AppAction>,
    action_rx: mpsc::UnboundedReceiver<AppAction>,
    update_rx: mpsc::UnboundedReceiver<LiveUpdate>,
}

impl App {
    pub async fn new(
        backend: Arc<dyn Backend>,
        workspace_id: WorkspaceId,
        update_rx: mpsc::UnboundedReceiver<LiveUpdate>,
        auto_channel: Option<&str>,
    ) -> Result<Self> {
        let me = backend.current_member(&workspace_id).await?;
        let channels = backend.list_channels(&workspace_id).await?;
        let members = backend.list_members(&workspace_id).await?;

        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let mut lobby = Editor::new();
        lobby.focus();

        let mut app = Self {
            should_quit: false,
            state: AppState::Connected,
            input_mode: InputMode::Normal,
            focus: Focus::Main,
            panel: PanelState::Closed,
            confirm: None,

            backend,
            workspace_id,
            me,
            channels,
            members,

            view: None,
            thread: None,

            lobby,

            notices: Vec::new(),
            action_tx,
            action_rx,
            update_rx,
        };

        app.add_notice(format!(
            "Connected as {} ({} channels)",
            app.me.user.name,
            app.channels.len()
        ));

        if let Some(name) = auto_channel {
            match app.channels.iter().find(|c| c.name == name).cloned() {
                Some(channel) => app.open_channel(channel),
                None => app.add_notice(format!("No channel named {name}")),
            }
        }

        Ok(app)
    }

    pub async fn handle_input(&mut self, event: Event) -> Result<()> {
        if let Event::Key(key) = event {
            self.handle_key_event(key).await?;
        }
        Ok(())
    }

    async fn handle_key_event(&mut self, key: KeyEvent) -> Result<()> {
        match self.input_mode {
            InputMode::Normal => match key.code {
                KeyCode::Char('q') => {
                    self.should_quit = true;
                }
                KeyCode::Char('i') => {
                    self.input_mode = InputMode::Editing;
                }
                KeyCode::Tab => {
                    if self.thread.is_some() {
                        self.focus = match self.focus {
                            Focus::Main => Focus::Panel,
                            Focus::Panel => Focus::Main,
                        };
                    }
                }
                KeyCode::Up => {
                    if let Some(list) = self.active_list_mut() {
                        list.select_older();
                    }
                }
                KeyCode::Down => {
                    if let Some(list) = self.active_list_mut() {
                        list.select_newer();
                    }
                }
                KeyCode::PageUp => {
                    if let Some(list) = self.active_list_mut() {
                        list.scroll_back(10);
                    }
                }
                KeyCode::PageDown => {
                    if let Some(list) = self.active_list_mut() {
                        list.scroll_forward(10);
                    }
                }
                KeyCode::Esc => {
                    if !self.panel.is_closed() {
                        self.close_panel();
                    }
                }
                _ => {}
            },
            InputMode::Editing => match key.code {
                KeyCode::Enter => {
                    self.input_mode = InputMode::Normal;
                    self.submit_input().await?;
                }
                KeyCode::Esc => {
                    let cancelled = self
                        .active_list_mut()
                        .map(|list| {
                            let editing = list.editing.is_some();
                            list.cancel_edit();
                            editing
                        })
                        .unwrap_or(false);
                    if !cancelled {
                        self.input_mode = InputMode::Normal;
                    }
                }
                KeyCode::Char(c) => {
                    self.active_editor_mut().insert_char(c);
                }
                KeyCode::Backspace => {
                    self.active_editor_mut().backspace();
                }
                KeyCode::Delete => {
                    self.active_editor_mut().delete_forward();
                }
                KeyCode::Left => {
                    self.active_editor_mut().move_left();
                }
                KeyCode::Right => {
                    self.active_editor_mut().move_right();
                }
                KeyCode::Home => {
                    self.active_editor_mut().move_home();
                }
                KeyCode::End => {
                    self.active_editor_mut().move_end();
                }
                _ => {}
            },
            InputMode::Confirm => match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.run_confirmed();
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.confirm = None;
                    self.input_mode = InputMode::Normal;
                }
                _ => {}
            },
        }
        Ok(())
    }

    fn active_list_mut(&mut self) -> Option<&mut ListView> {
        match self.focus {
            Focus::Panel => self.thread.as_mut().map(|t| &mut t.list),
            Focus::Main => self.view.as_mut().map(|v| &mut v.list),
        }
    }

    fn active_list(&self) -> Option<&ListView> {
        match self.focus {
            Focus::Panel => self.thread.as_ref().map(|t| &t.list),
            Focus::Main => self.view.as_ref().map(|v| &v.list),
        }
    }

    pub fn active_composer(&self) -> Option<&Composer> {
        match self.focus {
            Focus::Panel => {
                let thread = self.thread.as_ref()?;
                match thread.list.editing.as_ref() {
                    Some(edit) => Some(&edit.composer),
                    None => Some(&thread.composer),
                }
            }
            Focus::Main => {
                let view = self.view.as_ref()?;
                match view.list.editing.as_ref() {
                    Some(edit) => Some(&edit.composer),
                    None => Some(&view.composer),
                }
            }
        }
    }

    /// The editor keystrokes land in. An in-progress edit shadows the
    /// scope composer; with no view open, the lobby command line takes
    /// the input.
    pub fn active_editor(&self) -> &Editor {
        match self.focus {
            Focus::Panel => match self.thread.as_ref() {
                Some(thread) => match thread.list.editing.as_ref() {
                    Some(edit) => edit.composer.editor(),
                    None => thread.composer.editor(),
                },
                None => &self.lobby,
            },
            Focus::Main => match self.view.as_ref() {
                Some(view) => match view.list.editing.as_ref() {
                    Some(edit) => edit.composer.editor(),
                    None => view.composer.editor(),
                },
                None => &self.lobby,
            },
        }
    }

    fn active_editor_mut(&mut self) -> &mut Editor {
        match self.focus {
            Focus::Panel => match self.thread.as_mut() {
                Some(thread) => match thread.list.editing.as_mut() {
                    Some(edit) => edit.composer.editor_mut(),
                    None => thread.composer.editor_mut(),
                },
                None => &mut self.lobby,
            },
            Focus::Main => match self.view.as_mut() {
                Some(view) => match view.list.editing.as_mut() {
                    Some(edit) => edit.composer.editor_mut(),
                    None => view.composer.editor_mut(),
                },
                None => &mut self.lobby,
            },
        }
    }

    async fn submit_input(&mut self) -> Result<()> {
        let editing = self
            .active_list()
            .map(|list| list.editing.is_some())
            .unwrap_or(false);
        let text = self.active_editor().get_text().trim().to_string();

        if !editing && text.starts_with('/') {
            self.active_editor_mut().set_contents("");
            self.handle_command(&text).await?;
        } else if self.active_composer().is_some() {
            self.submit_active_composer();
        } else if !text.is_empty() {
            self.add_notice("Open a channel or conversation first (/join <name>)");
        }
        Ok(())
    }

    /// Kicks off the composer pipeline; the outcome lands through
    /// `pump_composers` on a later tick.
    fn submit_active_composer(&mut self) {
        let backend = Arc::clone(&self.backend);
        match self.focus {
            Focus::Panel => {
                if let Some(thread) = self.thread.as_mut() {
                    match thread.list.editing.as_mut() {
                        Some(edit) => edit.composer.submit(&backend),
                        None => thread.composer.submit(&backend),
                    }
                }
            }
            Focus::Main => {
                if let Some(view) = self.view.as_mut() {
                    match view.list.editing.as_mut() {
                        Some(edit) => edit.composer.submit(&backend),
                        None => view.composer.submit(&backend),
                    }
                }
            }
        }
    }

    fn pump_composers(&mut self) {
        let mut notices: Vec<&'static str> = Vec::new();
        if let Some(view) = &mut self.view {
            if let Some(SubmitOutcome::Failed(err)) = view.composer.pump() {
                warn!("send failed: {err}");
                notices.push("Failed to send message");
            }
            let mut edit_done = false;
            if let Some(edit) = view.list.editing.as_mut() {
                match edit.composer.pump() {
                    Some(SubmitOutcome::Sent(_)) => edit_done = true,
                    Some(SubmitOutcome::Failed(err)) => {
                        warn!("edit failed: {err}");
                        notices.push("Failed to update message");
                    }
                    None => {}
                }
            }
            if edit_done {
                view.list.cancel_edit();
            }
        }
        if let Some(thread) = &mut self.thread {
            if let Some(SubmitOutcome::Failed(err)) = thread.composer.pump() {
                warn!("send failed: {err}");
                notices.push("Failed to send message");
            }
            let mut edit_done = false;
            if let Some(edit) = thread.list.editing.as_mut() {
                match edit.composer.pump() {
                    Some(SubmitOutcome::Sent(_)) => edit_done = true,
                    Some(SubmitOutcome::Failed(err)) => {
                        warn!("edit failed: {err}");
                        notices.push("Failed to update message");
                    }
                    None => {}
                }
            }
            if edit_done {
                thread.list.cancel_edit();
            }
        }
        for notice in notices {
            self.add_notice(notice);
        }
    }

    async fn handle_command(&mut self, input: &str) -> Result<()> {
        let parts: Vec<&str> = input[1..].split_whitespace().collect();
        if parts.is_empty() {
            return Ok(());
        }

        match parts[0].to_lowercase().as_str() {
            "join" | "j" => {
                if parts.len() != 2 {
                    self.add_notice("Usage: /join <channel>");
                    return Ok(());
                }
                match self.channels.iter().find(|c| c.name == parts[1]).cloned() {
                    Some(channel) => self.open_channel(channel),
                    None => self.add_notice(format!("No channel named {}", parts[1])),
                }
            }
            "channels" | "list" => {
                self.list_channels();
            }
            "create" => {
                if parts.len() < 2 {
                    self.add_notice("Usage: /create <channel name>");
                    return Ok(());
                }
                self.create_channel(&parts[1..].join(" "));
            }
            "dm" | "msg" => {
                if parts.len() < 2 {
                    self.add_notice("Usage: /dm <member name>");
                    return Ok(());
                }
                self.start_conversation(&parts[1..].join(" "));
            }
            "members" => {
                self.list_members();
            }
            "thread" | "t" => {
                match self
                    .view
                    .as_ref()
                    .and_then(|v| v.list.selected_message())
                    .cloned()
                {
                    Some(message) => self.open_thread(message),
                    None => self.add_notice("Select a message first (Up/Down in normal mode)"),
                }
            }
            "profile" => {
                self.open_profile_command(&parts[1..]);
            }
            "close" => {
                self.close_panel();
            }
            "edit" | "e" => {
                self.begin_edit_selected();
            }
            "delete" | "del" => {
                self.request_delete_selected();
            }
            "react" => {
                if parts.len() != 2 {
                    self.add_notice("Usage: /react <emoji>");
                    return Ok(());
                }
                self.toggle_reaction_on_selected(parts[1]);
            }
            "attach" => {
                if parts.len() != 2 {
                    self.add_notice("Usage: /attach <path to image>");
                    return Ok(());
                }
                self.attach_file(parts[1]).await;
            }
            "help" | "h" | "commands" => {
                self.show_help();
            }
            "quit" | "q" | "exit" => {
                self.should_quit = true;
            }
            _ => {
                self.add_notice(format!(
                    "Unknown command: {}. Type /help for available commands.",
                    parts[0]
                ));
            }
        }

        Ok(())
    }

    pub fn open_channel(&mut self, channel: Channel) {
        info!(channel = %channel.name, "opening channel");
        self.close_panel();
        let scope = ChatScope::Channel(channel.id.clone());
        self.view = Some(ChatView {
            title: format!("#{}", channel.name),
            list: ListView::new(scope.clone(), Arc::clone(&self.backend)),
            composer: Composer::new(ComposerTarget::Create {
                workspace_id: self.workspace_id.clone(),
                scope,
            }),
        });
    }

    pub fn open_conversation(&mut self, member: &Member, id: ConversationId) {
        info!(member = %member.user.name, "opening conversation");
        self.close_panel();
        let scope = ChatScope::Conversation(id);
        self.view = Some(ChatView {
            title: format!("@{}", member.user.name),
            list: ListView::new(scope.clone(), Arc::clone(&self.backend)),
            composer: Composer::new(ComposerTarget::Create {
                workspace_id: self.workspace_id.clone(),
                scope,
            }),
        });
    }

    pub fn open_thread(&mut self, root: Message) {
        let Some(channel_id) = root.channel_id.clone() else {
            self.add_notice("Threads are only available in channels");
            return;
        };
        let scope = ChatScope::Thread {
            channel_id,
            parent_message_id: root.id.clone(),
        };
        self.panel = PanelState::Thread(root.id.clone());
        self.thread = Some(ThreadView {
            root_id: root.id.clone(),
            root: Some(root),
            list: ListView::new(scope.clone(), Arc::clone(&self.backend)),
            composer: Composer::new(ComposerTarget::Create {
                workspace_id: self.workspace_id.clone(),
                scope,
            }),
        });
        self.focus = Focus::Panel;
    }

    pub fn open_profile(&mut self, member_id: MemberId) {
        self.panel = PanelState::Profile(member_id);
        self.thread = None;
        self.focus = Focus::Main;
    }

    pub fn close_panel(&mut self) {
        self.panel = PanelState::Closed;
        self.thread = None;
        self.focus = Focus::Main;
    }

    fn open_profile_command(&mut self, args: &[&str]) {
        if args.is_empty() {
            match self
                .active_list()
                .and_then(|list| list.selected_message())
                .map(|m| m.member_id.clone())
            {
                Some(id) => self.open_profile(id),
                None => self.add_notice("Usage: /profile <member name>, or select a message"),
            }
            return;
        }
        let name = args.join(" ");
        match self.find_member(&name).map(|m| m.id.clone()) {
            Some(id) => self.open_profile(id),
            None => self.add_notice(format!("No member named {name}")),
        }
    }

    fn create_channel(&mut self, raw: &str) {
        let name = chat::normalize_channel_name(raw);
        // Validation failures block before any remote call.
        if let Err(err) = chat::validate_channel_name(&name).map_err(RemoteError::Validation) {
            self.add_notice(err.to_string());
            return;
        }
        let backend = Arc::clone(&self.backend);
        let workspace = self.workspace_id.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            match backend.create_channel(&workspace, &name).await {
                Ok(_) => {
                    let _ = tx.send(AppAction::Notice("Channel created".to_string()));
                    match backend.list_channels(&workspace).await {
                        Ok(channels) => {
                            let _ = tx.send(AppAction::ChannelsRefreshed {
                                channels,
                                open: Some(name),
                            });
                        }
                        Err(err) => warn!("channel refresh failed: {err}"),
                    }
                }
                Err(err) => {
                    warn!("channel create failed: {err}");
                    let _ = tx.send(AppAction::Notice("Failed to create channel".to_string()));
                }
            }
        });
    }

    fn start_conversation(&mut self, name: &str) {
        let Some(member) = self.find_member(name).cloned() else {
            self.add_notice(format!("No member named {name}"));
            return;
        };
        let backend = Arc::clone(&self.backend);
        let workspace = self.workspace_id.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            match backend
                .create_or_get_conversation(&workspace, &member.id)
                .await
            {
                Ok(conversation) => {
                    let _ = tx.send(AppAction::OpenConversation {
                        member,
                        conversation,
                    });
                }
                Err(err) => {
                    warn!("conversation create failed: {err}");
                    let _ = tx.send(AppAction::Notice("Failed to open conversation".to_string()));
                }
            }
        });
    }

    fn find_member(&self, name: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.user.name.eq_ignore_ascii_case(name))
    }

    fn begin_edit_selected(&mut self) {
        let me = self.me.id.clone();
        let Some(message) = self
            .active_list()
            .and_then(|list| list.selected_message())
            .cloned()
        else {
            self.add_notice("Select a message first (Up/Down in normal mode)");
            return;
        };
        if message.member_id != me {
            self.add_notice("You can only edit your own messages");
            return;
        }
        if let Some(list) = self.active_list_mut() {
            list.begin_edit(&message);
        }
        self.input_mode = InputMode::Editing;
    }

    fn request_delete_selected(&mut self) {
        let Some(message) = self
            .active_list()
            .and_then(|list| list.selected_message())
            .cloned()
        else {
            self.add_notice("Select a message first (Up/Down in normal mode)");
            return;
        };
        if message.member_id != self.me.id {
            self.add_notice("You can only delete your own messages");
            return;
        }
        self.confirm = Some(ConfirmPrompt {
            message: "Delete this message? It cannot be undone.".to_string(),
            action: PendingAction::DeleteMessage(message.id),
        });
        self.input_mode = InputMode::Confirm;
    }

    /// Fire-and-forget: the server decides add-vs-remove and the feed
    /// converges through the event stream, so only failures surface.
    fn toggle_reaction_on_selected(&mut self, value: &str) {
        let Some(message) = self.active_list().and_then(|list| list.selected_message()) else {
            self.add_notice("Select a message first (Up/Down in normal mode)");
            return;
        };
        let backend = Arc::clone(&self.backend);
        let id = message.id.clone();
        let value = value.to_string();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.toggle_reaction(&id, &value).await {
                warn!("reaction toggle failed: {err}");
                let _ = tx.send(AppAction::Notice("Failed to toggle reaction".to_string()));
            }
        });
    }

    async fn attach_file(&mut self, path: &str) {
        let path = std::path::PathBuf::from(path);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.add_notice(format!("Failed to read {}: {err}", path.display()));
                return;
            }
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let attachment = Attachment {
            content_type: guess_content_type(&path).to_string(),
            filename: filename.clone(),
            bytes,
        };

        let attached = match self.focus {
            Focus::Panel => self
                .thread
                .as_mut()
                .map(|t| t.composer.attach(attachment))
                .unwrap_or(false),
            Focus::Main => self
                .view
                .as_mut()
                .map(|v| v.composer.attach(attachment))
                .unwrap_or(false),
        };
        if attached {
            self.add_notice(format!("Attached {filename}"));
        } else {
            self.add_notice("Open a channel or conversation first");
        }
    }

    /// Spawns the confirmed action; the result is applied on a later
    /// tick via the action channel.
    fn run_confirmed(&mut self) {
        let Some(prompt) = self.confirm.take() else {
            return;
        };
        self.input_mode = InputMode::Normal;
        match prompt.action {
            PendingAction::DeleteMessage(id) => {
                let backend = Arc::clone(&self.backend);
                let tx = self.action_tx.clone();
                tokio::spawn(async move {
                    match backend.delete_message(&id).await {
                        Ok(()) => {
                            let _ = tx.send(AppAction::MessageDeleted(id));
                        }
                        Err(err) => {
                            warn!("delete failed: {err}");
                            let _ =
                                tx.send(AppAction::Notice("Failed to delete message".to_string()));
                        }
                    }
                });
            }
        }
    }

    fn apply_action(&mut self, action: AppAction) {
        match action {
            AppAction::Notice(notice) => self.add_notice(notice),
            AppAction::MessageDeleted(id) => {
                // Feeds converge via the event stream too; drop local
                // copies immediately so the UI doesn't lag behind.
                self.discard_message(&id);
                if matches!(&self.panel, PanelState::Thread(root) if *root == id) {
                    self.close_panel();
                }
            }
            AppAction::ChannelsRefreshed { channels, open } => {
                self.channels = channels;
                if let Some(name) = open {
                    if let Some(channel) = self.channels.iter().find(|c| c.name == name).cloned() {
                        self.open_channel(channel);
                    }
                }
            }
            AppAction::OpenConversation {
                member,
                conversation,
            } => {
                self.open_conversation(&member, conversation.id);
            }
        }
    }

    fn discard_message(&mut self, id: &MessageId) {
        if let Some(view) = &mut self.view {
            view.list.discard(id);
        }
        if let Some(thread) = &mut self.thread {
            thread.list.discard(id);
        }
    }

    pub fn apply_update(&mut self, update: LiveUpdate) {
        match update {
            LiveUpdate::MessageCreated { message } | LiveUpdate::MessageUpdated { message } => {
                if let Some(view) = &mut self.view {
                    view.list.feed.upsert(message.clone());
                }
                if let Some(thread) = &mut self.thread {
                    if thread.root_id == message.id {
                        thread.root = Some(message.clone());
                    }
                    thread.list.feed.upsert(message);
                }
            }
            LiveUpdate::MessageDeleted { id } => {
                self.discard_message(&id);
                if matches!(&self.panel, PanelState::Thread(root) if *root == id) {
                    self.close_panel();
                }
            }
            LiveUpdate::ChannelCreated { channel } => {
                if !self.channels.iter().any(|c| c.id == channel.id) {
                    self.channels.push(channel);
                }
            }
        }
    }

    pub async fn on_tick(&mut self) -> Result<()> {
        loop {
            match self.update_rx.try_recv() {
                Ok(update) => self.apply_update(update),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.state = AppState::Disconnected;
                    break;
                }
            }
        }
        while let Ok(action) = self.action_rx.try_recv() {
            self.apply_action(action);
        }
        self.pump_composers();

        let mut notices = Vec::new();
        if let Some(view) = &mut self.view {
            if let Some(notice) = view.list.feed.pump() {
                notices.push(notice);
            }
            view.list.clamp_selection();
            view.list.maybe_load_more();
        }
        if let Some(thread) = &mut self.thread {
            if let Some(notice) = thread.list.feed.pump() {
                notices.push(notice);
            }
            thread.list.clamp_selection();
            thread.list.maybe_load_more();
        }
        for notice in notices {
            self.add_notice(notice);
        }

        Ok(())
    }

    fn list_channels(&mut self) {
        if self.channels.is_empty() {
            self.add_notice("No channels yet. /create <name> to add one.");
            return;
        }
        let current = self.view.as_ref().map(|v| v.list.feed.scope().clone());
        let lines: Vec<String> = self
            .channels
            .iter()
            .map(|channel| {
                let marker = if current == Some(ChatScope::Channel(channel.id.clone())) {
                    "*"
                } else {
                    " "
                };
                format!("{marker}#{}", channel.name)
            })
            .collect();
        self.add_notice("Channels:");
        for line in lines {
            self.add_notice(line);
        }
    }

    fn list_members(&mut self) {
        let lines: Vec<String> = self
            .members
            .iter()
            .map(|member| format!("{} ({:?})", member.user.name, member.role))
            .collect();
        self.add_notice("Members:");
        for line in lines {
            self.add_notice(line);
        }
    }

    fn show_help(&mut self) {
        let help = [
            "Commands:",
            "/join <channel> - Open a channel",
            "/channels - List channels",
            "/create <name> - Create a channel",
            "/dm <member> - Open a direct conversation",
            "/members - List workspace members",
            "/thread - Open the selected message's thread",
            "/profile [member] - Open a member profile",
            "/close - Close the side panel",
            "/edit - Edit the selected message",
            "/delete - Delete the selected message",
            "/react <emoji> - Toggle a reaction",
            "/attach <path> - Stage an image for the next send",
            "/quit - Exit",
            "",
            "Keys: i=input, Esc=normal/cancel, Tab=switch panel focus,",
            "Up/Down=select, PageUp/PageDown=scroll, Enter=send",
        ];
        for line in help {
            self.add_notice(line);
        }
    }

    pub fn add_notice(&mut self, notice: impl Into<String>) {
        self.notices.push(format!(
            "[{}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            notice.into()
        ));
        if self.notices.len() > MAX_NOTICES {
            self.notices.remove(0);
        }
    }

    pub fn last_notice(&self) -> Option<&str> {
        self.notices.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fixtures;
    use crate::remote::testing::StubBackend;
    use chrono::Utc;
    use crossterm::event::KeyModifiers;

    fn channel(id: &str, name: &str) -> Channel {
        Channel {
            id: id.into(),
            name: name.to_string(),
            workspace_id: "w1".into(),
            created_at: Utc::now(),
        }
    }

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    async fn app_with(stub: StubBackend) -> (App, mpsc::UnboundedSender<LiveUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = App::new(Arc::new(stub), "w1".into(), rx, None)
            .await
            .unwrap();
        (app, tx)
    }

    /// Gives spawned remote calls a chance to finish, then applies
    /// their outcomes.
    async fn settle(app: &mut App) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
            app.on_tick().await.unwrap();
        }
    }

    fn root_message(id: &str) -> Message {
        let mut message = fixtures::message(id, "me", Utc::now());
        message.channel_id = Some("c1".into());
        message
    }

    #[tokio::test]
    async fn panel_slots_are_exclusive_and_last_opened_wins() {
        let (mut app, _tx) = app_with(StubBackend::default()).await;

        app.open_thread(root_message("m1"));
        assert_eq!(app.panel, PanelState::Thread("m1".into()));
        assert!(app.thread.is_some());
        assert_eq!(app.focus, Focus::Panel);

        app.open_profile("u2".into());
        assert_eq!(app.panel, PanelState::Profile("u2".into()));
        assert!(app.thread.is_none());

        app.open_thread(root_message("m2"));
        assert_eq!(app.panel, PanelState::Thread("m2".into()));

        app.close_panel();
        assert!(app.panel.is_closed());
        assert!(app.thread.is_none());
        assert_eq!(app.focus, Focus::Main);
    }

    #[tokio::test]
    async fn thread_on_conversation_message_is_refused() {
        let (mut app, _tx) = app_with(StubBackend::default()).await;
        let mut message = fixtures::message("m1", "me", Utc::now());
        message.conversation_id = Some("conv-1".into());

        app.open_thread(message);
        assert!(app.panel.is_closed());
        assert!(app.thread.is_none());
    }

    #[tokio::test]
    async fn deleting_the_thread_root_closes_the_panel() {
        let (mut app, _tx) = app_with(StubBackend::default()).await;
        app.open_thread(root_message("m1"));

        app.apply_update(LiveUpdate::MessageDeleted { id: "m1".into() });
        assert!(app.panel.is_closed());
        assert!(app.thread.is_none());
    }

    #[tokio::test]
    async fn at_most_one_message_is_in_edit_mode_per_list() {
        let backend: Arc<dyn Backend> = Arc::new(StubBackend::default());
        let mut list = ListView::new(ChatScope::Channel("c1".into()), backend);

        list.begin_edit(&root_message("m1"));
        assert_eq!(list.editing_id(), Some(&"m1".into()));

        // A second edit replaces the first wholesale.
        list.begin_edit(&root_message("m2"));
        assert_eq!(list.editing_id(), Some(&"m2".into()));

        list.cancel_edit();
        assert_eq!(list.editing_id(), None);
    }

    #[tokio::test]
    async fn auto_join_opens_the_configured_channel() {
        let stub = StubBackend::default();
        *stub.channels.lock().unwrap() = vec![channel("c1", "general")];
        let (_tx, rx) = mpsc::unbounded_channel::<LiveUpdate>();
        let app = App::new(Arc::new(stub), "w1".into(), rx, Some("general"))
            .await
            .unwrap();

        let view = app.view.as_ref().expect("view should be open");
        assert_eq!(view.title, "#general");
        assert_eq!(view.list.feed.scope(), &ChatScope::Channel("c1".into()));
    }

    #[tokio::test]
    async fn live_updates_route_into_open_feeds() {
        let stub = StubBackend::default();
        *stub.channels.lock().unwrap() = vec![channel("c1", "general")];
        let (mut app, _tx) = app_with(stub).await;
        let general = app.channels[0].clone();
        app.open_channel(general);

        app.apply_update(LiveUpdate::MessageCreated {
            message: root_message("m1"),
        });
        assert_eq!(app.view.as_ref().unwrap().list.feed.results().len(), 1);

        app.apply_update(LiveUpdate::MessageDeleted { id: "m1".into() });
        assert!(app.view.as_ref().unwrap().list.feed.results().is_empty());
    }

    #[tokio::test]
    async fn commands_work_before_any_view_is_open() {
        let stub = StubBackend::default();
        *stub.channels.lock().unwrap() = vec![channel("c1", "general")];
        let (mut app, _tx) = app_with(stub).await;
        assert!(app.view.is_none());

        // Fresh start: no channel open yet, commands still have to land.
        app.handle_input(key(KeyCode::Char('i'))).await.unwrap();
        assert_eq!(app.input_mode, InputMode::Editing);
        for c in "/join general".chars() {
            app.handle_input(key(KeyCode::Char(c))).await.unwrap();
        }
        app.handle_input(key(KeyCode::Enter)).await.unwrap();

        let view = app.view.as_ref().expect("channel should open");
        assert_eq!(view.title, "#general");
        assert_eq!(app.active_editor().get_text(), "");
    }

    #[tokio::test]
    async fn plain_text_without_a_view_gets_a_hint_not_a_send() {
        let (mut app, _tx) = app_with(StubBackend::default()).await;

        app.handle_input(key(KeyCode::Char('i'))).await.unwrap();
        for c in "hello".chars() {
            app.handle_input(key(KeyCode::Char(c))).await.unwrap();
        }
        app.handle_input(key(KeyCode::Enter)).await.unwrap();

        assert!(app.view.is_none());
        assert!(app
            .last_notice()
            .is_some_and(|n| n.contains("Open a channel or conversation first")));
    }

    #[tokio::test]
    async fn sending_a_message_does_not_block_the_key_handler() {
        let stub = Arc::new(StubBackend::default());
        *stub.channels.lock().unwrap() = vec![channel("c1", "general")];
        let (_tx, rx) = mpsc::unbounded_channel::<LiveUpdate>();
        let backend: Arc<dyn Backend> = stub.clone();
        let mut app = App::new(backend, "w1".into(), rx, Some("general"))
            .await
            .unwrap();

        app.handle_input(key(KeyCode::Char('i'))).await.unwrap();
        for c in "hello".chars() {
            app.handle_input(key(KeyCode::Char(c))).await.unwrap();
        }
        app.handle_input(key(KeyCode::Enter)).await.unwrap();
        // Enter only kicks off the pipeline; completion comes on a tick.
        assert!(app.view.as_ref().unwrap().composer.is_pending());

        settle(&mut app).await;
        assert!(!app.view.as_ref().unwrap().composer.is_pending());
        assert_eq!(stub.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirmed_delete_runs_in_the_background() {
        let stub = Arc::new(StubBackend::default());
        *stub.channels.lock().unwrap() = vec![channel("c1", "general")];
        let (_tx, rx) = mpsc::unbounded_channel::<LiveUpdate>();
        let backend: Arc<dyn Backend> = stub.clone();
        let mut app = App::new(backend, "w1".into(), rx, Some("general"))
            .await
            .unwrap();
        app.apply_update(LiveUpdate::MessageCreated {
            message: root_message("m1"),
        });
        app.view.as_mut().unwrap().list.selected = Some(0);

        app.request_delete_selected();
        assert_eq!(app.input_mode, InputMode::Confirm);
        app.handle_input(key(KeyCode::Char('y'))).await.unwrap();
        assert_eq!(app.input_mode, InputMode::Normal);

        settle(&mut app).await;
        assert_eq!(stub.deleted.lock().unwrap().len(), 1);
        assert!(app.view.as_ref().unwrap().list.feed.results().is_empty());
    }

    #[tokio::test]
    async fn losing_the_event_stream_marks_the_app_disconnected() {
        let (mut app, tx) = app_with(StubBackend::default()).await;
        assert_eq!(app.state, AppState::Connected);

        drop(tx);
        app.on_tick().await.unwrap();
        assert_eq!(app.state, AppState::Disconnected);
    }
}
