//! Fan-out transport boundary. Message-queue adapters are external
//! collaborators; only the trait and an in-memory stand-in (for tests and
//! local demos) live here.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::ReplicatorError;

/// One frame is `"{topic} {pk} {pk} ..."`: whitespace-separated tokens,
/// where token 0 is the topic and tokens 1..N are stringified primary keys.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receive the next frame, or `None` on a clean end of stream.
    async fn recv_frame(&mut self) -> Result<Option<String>, ReplicatorError>;
}

/// Queue-backed transport used by tests and local demos in place of a real
/// message-queue adapter.
pub struct InMemoryTransport {
    frames: VecDeque<String>,
}

impl InMemoryTransport {
    pub fn new(frames: impl IntoIterator<Item = String>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn recv_frame(&mut self) -> Result<Option<String>, ReplicatorError> {
        Ok(self.frames.pop_front())
    }
}
