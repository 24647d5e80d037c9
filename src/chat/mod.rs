use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use feed::{LoadStatus, MessageFeed};

pub mod feed;
pub mod grouping;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// Server-assigned workspace identifier. The client never mints ids.
    WorkspaceId
);
opaque_id!(ChannelId);
opaque_id!(MemberId);
opaque_id!(MessageId);
opaque_id!(ConversationId);
opaque_id!(
    /// Reference to an uploaded blob in the backend's file storage.
    StorageId
);

/// Per-value reaction aggregate as delivered by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub value: String,
    pub count: usize,
    pub member_ids: Vec<MemberId>,
}

/// Reply rollup shown under a thread root message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub count: usize,
    pub image: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub member_id: MemberId,
    pub author_name: String,
    pub author_image: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub conversation_id: Option<ConversationId>,
    pub parent_message_id: Option<MessageId>,
    /// Rich-text op sequence serialized as JSON text.
    pub body: String,
    pub image: Option<StorageId>,
    pub created_at: DateTime<Utc>,
    /// Absent until the first edit; presence marks the message as edited.
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<ReactionSummary>,
    pub thread: Option<ThreadSummary>,
}

impl Message {
    pub fn is_edited(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Plain text extracted from the op-sequence body.
    pub fn text(&self) -> String {
        body_text(&self.body)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub workspace_id: WorkspaceId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub workspace_id: WorkspaceId,
    pub role: MemberRole,
    pub user: UserProfile,
}

/// Two-party direct-message container, created lazily by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub workspace_id: WorkspaceId,
    pub member_one_id: MemberId,
    pub member_two_id: MemberId,
}

/// What a message feed is looking at: a channel's top-level stream, the
/// replies under one root message, or a direct conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    Channel(ChannelId),
    Thread {
        channel_id: ChannelId,
        parent_message_id: MessageId,
    },
    Conversation(ConversationId),
}

impl ChatScope {
    /// Whether a live message belongs in this scope's feed.
    pub fn contains(&self, message: &Message) -> bool {
        match self {
            ChatScope::Channel(id) => {
                message.parent_message_id.is_none() && message.channel_id.as_ref() == Some(id)
            }
            ChatScope::Thread {
                parent_message_id, ..
            } => message.parent_message_id.as_ref() == Some(parent_message_id),
            ChatScope::Conversation(id) => {
                message.parent_message_id.is_none() && message.conversation_id.as_ref() == Some(id)
            }
        }
    }
}

pub const CHANNEL_NAME_MIN: usize = 3;
pub const CHANNEL_NAME_MAX: usize = 80;

/// Collapse whitespace runs to hyphens and lowercase, matching what the
/// backend expects for channel names.
pub fn normalize_channel_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Local check run before the create mutation is ever attempted.
pub fn validate_channel_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if len < CHANNEL_NAME_MIN || len > CHANNEL_NAME_MAX {
        return Err(format!(
            "Channel names must be {CHANNEL_NAME_MIN}-{CHANNEL_NAME_MAX} characters"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("Channel names may only contain a-z, 0-9 and hyphens".to_string());
    }
    Ok(())
}

/// Encode outgoing plain text as a one-op rich-text document.
pub fn encode_body(text: &str) -> String {
    serde_json::json!({ "ops": [{ "insert": format!("{text}\n") }] }).to_string()
}

/// Extract display text from an op-sequence body. Bodies that are not
/// valid op documents are shown verbatim.
pub fn body_text(body: &str) -> String {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(body);
    let text = match parsed {
        Ok(value) => match value.get("ops").and_then(|ops| ops.as_array()) {
            Some(ops) => ops
                .iter()
                .filter_map(|op| op.get("insert").and_then(|i| i.as_str()))
                .collect::<String>(),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    };
    text.trim_end_matches('\n').to_string()
}
