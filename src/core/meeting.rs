//! Meeting resource provisioning seam.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// A joinable meeting room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRoom {
    /// Provider-side room name
    pub room: String,
    /// Link participants open to join
    pub link: String,
}

/// External provider that creates or returns the room for a session.
///
/// Implementations should be idempotent per session id; a retry after a failure
/// may return the room created by the failed attempt.
pub trait MeetingProvider {
    /// Provisions the room for `session_id`.
    fn provision(&self, session_id: i64) -> impl Future<Output = Result<MeetingRoom>> + Send;
}
