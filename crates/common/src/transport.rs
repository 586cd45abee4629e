use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel {0} is closed")]
    Closed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound side of whatever carries frames between peers
pub trait Transport: Send + Sync {
    fn send(&self, channel: &str, text: &str) -> Result<(), TransportError>;
}

/// Records every frame instead of sending it
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    closed: Arc<Mutex<BTreeSet<String>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every later send on `channel`
    pub fn close(&self, channel: &str) {
        self.closed.lock().insert(channel.to_string());
    }

    /// `(channel, text)` pairs in send order
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        if self.closed.lock().contains(channel) {
            return Err(TransportError::Closed(channel.to_string()));
        }
        self.sent.lock().push((channel.to_string(), text.to_string()));
        Ok(())
    }
}
