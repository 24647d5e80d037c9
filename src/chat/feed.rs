use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::remote::{Backend, MessagePage, RemoteError};

use super::{ChatScope, Message, MessageId};

pub const INITIAL_PAGE_SIZE: u32 = 20;
pub const PAGE_SIZE_INCREMENT: u32 = 25;

/// Load state of a paginated feed. `load_more` only fires from
/// `CanLoadMore`, which is what keeps rapid repeated triggers from
/// issuing duplicate page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    LoadingFirstPage,
    LoadingMore,
    CanLoadMore,
    Exhausted,
}

enum FeedEvent {
    Page(MessagePage),
    Failed(RemoteError),
}

/// Lazily-extended message sequence for one scope, newest first. Page
/// fetches run on spawned tasks and land through an mpsc channel that
/// the app drains on tick; live subscription updates are merged in
/// through [`MessageFeed::upsert`] and [`MessageFeed::remove`].
pub struct MessageFeed {
    scope: ChatScope,
    backend: Arc<dyn Backend>,
    results: Vec<Message>,
    status: LoadStatus,
    cursor: Option<String>,
    event_tx: mpsc::UnboundedSender<FeedEvent>,
    event_rx: mpsc::UnboundedReceiver<FeedEvent>,
}

impl MessageFeed {
    pub fn new(scope: ChatScope, backend: Arc<dyn Backend>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let feed = Self {
            scope,
            backend,
            results: Vec::new(),
            status: LoadStatus::LoadingFirstPage,
            cursor: None,
            event_tx,
            event_rx,
        };
        feed.spawn_fetch(INITIAL_PAGE_SIZE);
        feed
    }

    pub fn scope(&self) -> &ChatScope {
        &self.scope
    }

    /// Newest-first results; display grouping reorders only within a day.
    pub fn results(&self) -> &[Message] {
        &self.results
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    /// Request the next page. No-op in every state except `CanLoadMore`.
    pub fn load_more(&mut self) {
        if self.status != LoadStatus::CanLoadMore {
            return;
        }
        self.status = LoadStatus::LoadingMore;
        self.spawn_fetch(PAGE_SIZE_INCREMENT);
    }

    fn spawn_fetch(&self, num_items: u32) {
        let backend = Arc::clone(&self.backend);
        let scope = self.scope.clone();
        let cursor = self.cursor.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match backend.load_page(&scope, cursor.as_deref(), num_items).await {
                Ok(page) => {
                    let _ = tx.send(FeedEvent::Page(page));
                }
                Err(e) => {
                    let _ = tx.send(FeedEvent::Failed(e));
                }
            }
        });
    }

    /// Drain completed fetches. Returns a notice for the status line when
    /// a page load failed; the feed stays retryable.
    pub fn pump(&mut self) -> Option<String> {
        let mut notice = None;
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                FeedEvent::Page(page) => self.apply_page(page),
                FeedEvent::Failed(err) => {
                    warn!("page load failed: {err}");
                    self.status = LoadStatus::CanLoadMore;
                    notice = Some("Failed to load messages".to_string());
                }
            }
        }
        notice
    }

    fn apply_page(&mut self, page: MessagePage) {
        debug!(
            count = page.messages.len(),
            is_done = page.is_done,
            "applying page"
        );
        // Pages walk backwards in time, so older messages extend the tail.
        self.results.extend(page.messages);
        self.cursor = page.cursor;
        self.status = if page.is_done {
            LoadStatus::Exhausted
        } else {
            LoadStatus::CanLoadMore
        };
    }

    /// Merge a live create/update into the feed, keeping newest-first
    /// order. Messages outside this feed's scope are ignored.
    pub fn upsert(&mut self, message: Message) {
        if !self.scope.contains(&message) {
            return;
        }
        if let Some(existing) = self.results.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return;
        }
        let position = self
            .results
            .iter()
            .position(|m| m.created_at <= message.created_at)
            .unwrap_or(self.results.len());
        self.results.insert(position, message);
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.results.len();
        self.results.retain(|m| &m.id != id);
        self.results.len() != before
    }
}

/// Terminal analog of the intersection check that auto-triggers
/// `load_more`: the sentinel row sits just above the oldest rendered
/// message, and must be fully inside the viewport to fire.
///
/// `scroll_from_bottom` counts rows scrolled back from the newest end.
pub fn sentinel_visible(scroll_from_bottom: usize, viewport_rows: usize, total_rows: usize) -> bool {
    scroll_from_bottom + viewport_rows > total_rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fixtures::message;
    use crate::remote::testing::StubBackend;
    use chrono::{Duration, Utc};
    use std::sync::atomic::Ordering;

    async fn settle(feed: &mut MessageFeed) {
        // Let spawned fetch tasks run to completion on the test runtime.
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        feed.pump();
    }

    fn channel_message(id: &str, minutes_ago: i64) -> crate::chat::Message {
        let mut m = message(id, "a", Utc::now() - Duration::minutes(minutes_ago));
        m.channel_id = Some("c1".into());
        m
    }

    fn feed_with(stub: StubBackend) -> MessageFeed {
        MessageFeed::new(ChatScope::Channel("c1".into()), Arc::new(stub))
    }

    #[tokio::test]
    async fn first_page_then_exhausted() {
        let stub = StubBackend::with_pages(vec![StubBackend::page(
            vec![channel_message("m1", 0)],
            None,
            true,
        )]);
        let mut feed = feed_with(stub);
        assert_eq!(feed.status(), LoadStatus::LoadingFirstPage);

        settle(&mut feed).await;
        assert_eq!(feed.status(), LoadStatus::Exhausted);
        assert_eq!(feed.results().len(), 1);

        // Exhausted feeds ignore further load requests.
        feed.load_more();
        assert_eq!(feed.status(), LoadStatus::Exhausted);
    }

    #[tokio::test]
    async fn load_more_is_gated_against_reentry() {
        let stub = StubBackend::with_pages(vec![
            StubBackend::page(vec![channel_message("m2", 1)], Some("cur-1"), false),
            StubBackend::page(vec![channel_message("m1", 10)], None, true),
        ]);
        let mut feed = feed_with(stub);

        // Triggers while the first page is in flight are no-ops.
        feed.load_more();
        settle(&mut feed).await;
        assert_eq!(feed.status(), LoadStatus::CanLoadMore);

        feed.load_more();
        let in_flight = feed.status();
        // Rapid repeated intersection events while a load is in flight.
        feed.load_more();
        feed.load_more();
        assert_eq!(in_flight, LoadStatus::LoadingMore);

        settle(&mut feed).await;
        assert_eq!(feed.status(), LoadStatus::Exhausted);
        assert_eq!(feed.results().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_triggers_issue_one_request() {
        let stub = Arc::new(StubBackend::with_pages(vec![
            StubBackend::page(vec![channel_message("m2", 1)], Some("cur-1"), false),
            StubBackend::page(vec![channel_message("m1", 10)], None, true),
        ]));
        let mut feed = MessageFeed::new(
            ChatScope::Channel("c1".into()),
            Arc::clone(&stub) as Arc<dyn crate::remote::Backend>,
        );

        settle(&mut feed).await;
        assert_eq!(stub.page_requests.load(Ordering::SeqCst), 1);

        feed.load_more();
        feed.load_more();
        feed.load_more();
        settle(&mut feed).await;
        assert_eq!(stub.page_requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_page_leaves_feed_retryable() {
        let stub = StubBackend::default();
        stub.fail_next_page.store(true, Ordering::SeqCst);
        let mut feed = feed_with(stub);

        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        let notice = feed.pump();
        assert_eq!(notice.as_deref(), Some("Failed to load messages"));
        assert_eq!(feed.status(), LoadStatus::CanLoadMore);
    }

    #[tokio::test]
    async fn upsert_keeps_newest_first_and_replaces_by_id() {
        let stub = StubBackend::with_pages(vec![StubBackend::page(
            vec![channel_message("m2", 5), channel_message("m1", 10)],
            None,
            true,
        )]);
        let mut feed = feed_with(stub);
        settle(&mut feed).await;

        feed.upsert(channel_message("m3", 0));
        let ids: Vec<&str> = feed.results().iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(ids, ["m3", "m2", "m1"]);

        let mut edited = channel_message("m2", 5);
        edited.updated_at = Some(Utc::now());
        feed.upsert(edited);
        assert_eq!(feed.results().len(), 3);
        assert!(feed.results()[1].is_edited());

        // Replies never land in a channel feed.
        let mut reply = channel_message("m4", 0);
        reply.parent_message_id = Some("m1".into());
        feed.upsert(reply);
        assert_eq!(feed.results().len(), 3);

        assert!(feed.remove(&"m3".into()));
        assert!(!feed.remove(&"m3".into()));
    }

    #[test]
    fn sentinel_requires_full_visibility() {
        // Long list scrolled to the newest end: sentinel off-screen.
        assert!(!sentinel_visible(0, 30, 100));
        // Scrolled all the way back: the row above the oldest is visible.
        assert!(sentinel_visible(71, 30, 100));
        // Short lists expose the sentinel immediately.
        assert!(sentinel_visible(0, 30, 10));
    }
}
