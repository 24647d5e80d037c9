use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::{
    Channel, ChannelId, ChatScope, Conversation, ConversationId, Member, MemberId, Message,
    MessageId, StorageId, WorkspaceId,
};

pub use http::HttpBackend;

mod http;
#[cfg(test)]
pub mod testing;

/// Failure classes surfaced by the remote service. Everything here
/// degrades to a transient notice; nothing is fatal to the client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The upload-url request returned no usable target.
    #[error("no upload target returned")]
    UploadTargetMissing,
    /// The byte transfer to the storage target did not succeed.
    #[error("upload transfer failed: {0}")]
    UploadTransferFailed(String),
    /// A create/update/delete/reaction call was rejected server-side.
    #[error("{0}")]
    MutationRejected(String),
    /// Local-only check failed before any remote call was made.
    #[error("{0}")]
    Validation(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One page of a paginated message query, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub cursor: Option<String>,
    pub is_done: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMessage {
    pub workspace_id: WorkspaceId,
    pub channel_id: Option<ChannelId>,
    pub conversation_id: Option<ConversationId>,
    pub parent_message_id: Option<MessageId>,
    pub body: String,
    pub image: Option<StorageId>,
}

/// Push event from the backend's realtime fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveUpdate {
    MessageCreated { message: Message },
    MessageUpdated { message: Message },
    MessageDeleted { id: MessageId },
    ChannelCreated { channel: Channel },
}

/// The remote data service. The backend owns identity, timestamps, write
/// ordering, and authorization; the client only holds snapshots.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn load_page(
        &self,
        scope: &ChatScope,
        cursor: Option<&str>,
        num_items: u32,
    ) -> Result<MessagePage, RemoteError>;

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, RemoteError>;

    async fn create_message(&self, request: CreateMessage) -> Result<MessageId, RemoteError>;

    /// Only the body is mutable after creation.
    async fn update_message(&self, id: &MessageId, body: &str) -> Result<(), RemoteError>;

    async fn delete_message(&self, id: &MessageId) -> Result<(), RemoteError>;

    /// The server decides add-vs-remove; the client never guesses.
    async fn toggle_reaction(&self, id: &MessageId, value: &str) -> Result<(), RemoteError>;

    async fn list_channels(&self, workspace: &WorkspaceId) -> Result<Vec<Channel>, RemoteError>;

    async fn create_channel(
        &self,
        workspace: &WorkspaceId,
        name: &str,
    ) -> Result<ChannelId, RemoteError>;

    async fn list_members(&self, workspace: &WorkspaceId) -> Result<Vec<Member>, RemoteError>;

    async fn current_member(&self, workspace: &WorkspaceId) -> Result<Member, RemoteError>;

    /// Find-or-create the two-party conversation with `other`.
    async fn create_or_get_conversation(
        &self,
        workspace: &WorkspaceId,
        other: &MemberId,
    ) -> Result<Conversation, RemoteError>;

    /// `None` means the service produced no target; callers treat that as
    /// `RemoteError::UploadTargetMissing`.
    async fn generate_upload_url(&self) -> Result<Option<String>, RemoteError>;

    async fn upload(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StorageId, RemoteError>;
}
