use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chat::{
    Channel, ChannelId, ChatScope, Conversation, Member, MemberId, Message, MessageId, StorageId,
    WorkspaceId,
};

use super::{Backend, CreateMessage, LiveUpdate, MessagePage, RemoteError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const EVENT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_RETRY_DELAY: Duration = Duration::from_secs(3);
const EVENT_MAX_FAILURES: u32 = 5;

/// HTTP binding for the remote data service: JSON mutations and queries
/// with a bearer token, plus a long-polled workspace event stream.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct CreatedId<T> {
    id: T,
}

#[derive(Deserialize)]
struct UploadUrl {
    url: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "storageId")]
    storage_id: StorageId,
}

#[derive(Deserialize)]
struct EventEnvelope {
    seq: u64,
    #[serde(flatten)]
    update: LiveUpdate,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: &str) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RemoteError::MutationRejected(format!(
                "{status}: {}",
                detail.trim()
            )));
        }
        Ok(response.json().await?)
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RemoteError::MutationRejected(format!(
                "{status}: {}",
                detail.trim()
            )));
        }
        Ok(())
    }

    /// Forward workspace events to `update_tx` until the app side hangs
    /// up. Transient transport failures back off and retry; the stream
    /// resumes from the last seen sequence number. After
    /// `EVENT_MAX_FAILURES` consecutive failures the watcher gives up
    /// and drops its sender, which the app observes as a disconnect.
    pub fn spawn_watch(
        self: &Arc<Self>,
        workspace: WorkspaceId,
        update_tx: mpsc::UnboundedSender<LiveUpdate>,
    ) {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut after: u64 = 0;
            let mut failures: u32 = 0;
            loop {
                match backend.poll_events(&workspace, after).await {
                    Ok(batch) => {
                        failures = 0;
                        for envelope in batch {
                            after = after.max(envelope.seq);
                            if update_tx.send(envelope.update).is_err() {
                                debug!("event receiver dropped, stopping watch");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        if failures >= EVENT_MAX_FAILURES {
                            warn!("event stream lost after {failures} consecutive failures: {e}");
                            return;
                        }
                        warn!("event poll failed: {e}");
                        tokio::time::sleep(EVENT_RETRY_DELAY).await;
                    }
                }
            }
        });
    }

    async fn poll_events(
        &self,
        workspace: &WorkspaceId,
        after: u64,
    ) -> Result<Vec<EventEnvelope>, RemoteError> {
        let response = self
            .http
            .get(self.url(&format!("api/workspaces/{workspace}/events")))
            .bearer_auth(&self.token)
            .query(&[("after", after.to_string())])
            .timeout(EVENT_POLL_TIMEOUT)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn load_page(
        &self,
        scope: &ChatScope,
        cursor: Option<&str>,
        num_items: u32,
    ) -> Result<MessagePage, RemoteError> {
        let mut query: Vec<(&str, String)> = vec![("num_items", num_items.to_string())];
        match scope {
            ChatScope::Channel(id) => query.push(("channel_id", id.to_string())),
            ChatScope::Thread {
                channel_id,
                parent_message_id,
            } => {
                query.push(("channel_id", channel_id.to_string()));
                query.push(("parent_message_id", parent_message_id.to_string()));
            }
            ChatScope::Conversation(id) => query.push(("conversation_id", id.to_string())),
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        self.get_json("api/messages", &query).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, RemoteError> {
        let response = self
            .http
            .get(self.url(&format!("api/messages/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::read_json(response).await?))
    }

    async fn create_message(&self, request: CreateMessage) -> Result<MessageId, RemoteError> {
        let created: CreatedId<MessageId> = self.post_json("api/messages", &request).await?;
        Ok(created.id)
    }

    async fn update_message(&self, id: &MessageId, body: &str) -> Result<(), RemoteError> {
        let response = self
            .http
            .patch(self.url(&format!("api/messages/{id}")))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), RemoteError> {
        let response = self
            .http
            .delete(self.url(&format!("api/messages/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn toggle_reaction(&self, id: &MessageId, value: &str) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(self.url(&format!("api/messages/{id}/reactions")))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn list_channels(&self, workspace: &WorkspaceId) -> Result<Vec<Channel>, RemoteError> {
        self.get_json(&format!("api/workspaces/{workspace}/channels"), &[])
            .await
    }

    async fn create_channel(
        &self,
        workspace: &WorkspaceId,
        name: &str,
    ) -> Result<ChannelId, RemoteError> {
        let created: CreatedId<ChannelId> = self
            .post_json(
                &format!("api/workspaces/{workspace}/channels"),
                &serde_json::json!({ "name": name }),
            )
            .await?;
        Ok(created.id)
    }

    async fn list_members(&self, workspace: &WorkspaceId) -> Result<Vec<Member>, RemoteError> {
        self.get_json(&format!("api/workspaces/{workspace}/members"), &[])
            .await
    }

    async fn current_member(&self, workspace: &WorkspaceId) -> Result<Member, RemoteError> {
        self.get_json(&format!("api/workspaces/{workspace}/members/me"), &[])
            .await
    }

    async fn create_or_get_conversation(
        &self,
        workspace: &WorkspaceId,
        other: &MemberId,
    ) -> Result<Conversation, RemoteError> {
        self.post_json(
            &format!("api/workspaces/{workspace}/conversations"),
            &serde_json::json!({ "member_id": other }),
        )
        .await
    }

    async fn generate_upload_url(&self) -> Result<Option<String>, RemoteError> {
        let target: UploadUrl = self
            .post_json("api/uploads", &serde_json::json!({}))
            .await?;
        Ok(target.url.filter(|url| !url.is_empty()))
    }

    /// Raw-byte POST straight to the storage target, outside the JSON
    /// API surface. The declared content type rides along unchanged.
    async fn upload(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StorageId, RemoteError> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| RemoteError::UploadTransferFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::UploadTransferFailed(format!(
                "storage target returned {status}"
            )));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::UploadTransferFailed(e.to_string()))?;
        Ok(parsed.storage_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelopes_flatten_the_update_payload() {
        let raw = r#"{
            "seq": 42,
            "type": "message_deleted",
            "id": "m-9"
        }"#;
        let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.seq, 42);
        assert!(matches!(
            envelope.update,
            LiveUpdate::MessageDeleted { ref id } if id.0 == "m-9"
        ));
    }

    #[test]
    fn joins_base_url_and_path_without_double_slashes() {
        let backend = HttpBackend::new("https://chat.example.com/", "tok").unwrap();
        assert_eq!(
            backend.url("/api/messages"),
            "https://chat.example.com/api/messages"
        );
    }
}
