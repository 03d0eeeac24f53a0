//! REST collaborators, consumed as opaque async operations.
//!
//! The forum's HTTP API is out of scope for the sync core; this trait
//! is the seam it is consumed through. Production wires a real HTTP
//! client here; tests use [`NullApi`] or a recording fake.

use std::future::Future;

use murmur_shared::protocol::{MessagePayload, ProfileUpdate};
use murmur_shared::{CorrelationId, UserId};

/// Async REST surface the session depends on.
///
/// Failures are surfaced to the user only for explicit actions
/// ([`ForumApi::send_message`]); everything else degrades silently.
pub trait ForumApi: Send + Sync + 'static {
    /// Full message history of one conversation.
    fn fetch_history(
        &self,
        me: UserId,
        partner: UserId,
    ) -> impl Future<Output = anyhow::Result<Vec<MessagePayload>>> + Send;

    /// Send a message; resolves to the authoritative server copy.
    /// The correlation id is threaded through so the echo can be
    /// matched to the optimistic entry.
    fn send_message(
        &self,
        receiver: UserId,
        content: Option<String>,
        media: Option<String>,
        correlation_id: CorrelationId,
    ) -> impl Future<Output = anyhow::Result<MessagePayload>> + Send;

    /// Mark the conversation with `partner` as seen.
    fn mark_seen(&self, partner: UserId) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Inbox summary: the latest message of every conversation.
    fn fetch_inbox(&self) -> impl Future<Output = anyhow::Result<Vec<MessagePayload>>> + Send;

    /// Profile data for the chat info panel.
    fn fetch_profile(
        &self,
        user: UserId,
    ) -> impl Future<Output = anyhow::Result<ProfileUpdate>> + Send;
}

/// An API that answers everything with empty data. Useful when the
/// REST layer is unavailable and for tests that only exercise the
/// socket path.
#[derive(Debug, Clone, Default)]
pub struct NullApi;

impl ForumApi for NullApi {
    async fn fetch_history(
        &self,
        _me: UserId,
        _partner: UserId,
    ) -> anyhow::Result<Vec<MessagePayload>> {
        Ok(Vec::new())
    }

    async fn send_message(
        &self,
        _receiver: UserId,
        _content: Option<String>,
        _media: Option<String>,
        _correlation_id: CorrelationId,
    ) -> anyhow::Result<MessagePayload> {
        anyhow::bail!("no REST backend configured")
    }

    async fn mark_seen(&self, _partner: UserId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn fetch_inbox(&self) -> anyhow::Result<Vec<MessagePayload>> {
        Ok(Vec::new())
    }

    async fn fetch_profile(&self, _user: UserId) -> anyhow::Result<ProfileUpdate> {
        anyhow::bail!("no REST backend configured")
    }
}
