//! Chat unread counts served over the REST API rather than the event stream.

use async_trait::async_trait;

use crate::error::Result;

/// Source of the authoritative chat unread count.
#[async_trait]
pub trait ChatCountSource: Send + Sync {
    /// Unread chat messages for `user_id`.
    async fn unread_count(&self, user_id: &str) -> Result<u32>;

    /// Marks every message of a conversation as read.
    async fn mark_conversation_read(&self, user_id: &str, conversation_id: &str) -> Result<()>;
}
