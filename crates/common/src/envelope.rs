//! Transport framing around a single wire message.
//!
//! An envelope is a small JSON object carrying routing addresses
//!  and the (optionally transformed) message text:
//!
//! ```text
//! {"from": "<addr>", "to": "<addr>", "payload": "<text>", "comment": "<optional>"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialized envelopes above this size are logged, never rejected
pub const MAX_ENVELOPE_SIZE: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum CouldNotReadEnvelope {
    /// Packet transports routinely cut frames short
    #[error("the message of length {0} appears truncated")]
    Truncated(usize),
    #[error("could not read envelope of length {len}: {source}")]
    Malformed {
        len: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not decode payload: {0}")]
    Payload(String),
}

/// Hook point for obfuscating payloads on the wire
pub trait PayloadCodec: Send + Sync + fmt::Debug {
    fn encode(&self, payload: &str) -> String;
    fn decode(&self, payload: &str) -> Result<String, CouldNotReadEnvelope>;
}

/// The null transform
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PayloadCodec for Identity {
    fn encode(&self, payload: &str) -> String {
        payload.to_string()
    }

    fn decode(&self, payload: &str) -> Result<String, CouldNotReadEnvelope> {
        Ok(payload.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Envelope {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            payload: payload.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn to_json(&self) -> String {
        self.to_json_with(&Identity)
    }

    pub fn to_json_with(&self, codec: &dyn PayloadCodec) -> String {
        let framed = Envelope {
            payload: codec.encode(&self.payload),
            ..self.clone()
        };
        // serializing plain strings cannot fail
        let json = serde_json::to_string(&framed).unwrap_or_default();
        if json.len() > MAX_ENVELOPE_SIZE {
            tracing::warn!(size = json.len(), to = %self.to, "envelope exceeds maximum size");
        }
        json
    }

    pub fn from_json(s: &str) -> Result<Self, CouldNotReadEnvelope> {
        Self::from_json_with(s, &Identity)
    }

    pub fn from_json_with(s: &str, codec: &dyn PayloadCodec) -> Result<Self, CouldNotReadEnvelope> {
        let s = s.trim();
        if !s.starts_with('{') || !s.ends_with('}') {
            return Err(CouldNotReadEnvelope::Truncated(s.len()));
        }
        let mut envelope: Envelope =
            serde_json::from_str(s).map_err(|source| CouldNotReadEnvelope::Malformed {
                len: s.len(),
                source,
            })?;
        envelope.payload = codec.decode(&envelope.payload)?;
        Ok(envelope)
    }

    /// Multi-line rendering for operator logs
    pub fn verbose(&self) -> String {
        let mut lines = vec![
            "Envelope".to_string(),
            format!("  from:    {:?}", self.from),
            format!("  to:      {:?}", self.to),
            format!("  payload: {:?}", self.payload),
        ];
        if let Some(comment) = &self.comment {
            lines.push(format!("  comment: {:?}", comment));
        }
        lines.join("\n")
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_at = |s: &str| if s.is_empty() { "@".to_string() } else { s.to_string() };
        write!(
            f,
            "Envelope(from: {}, to: {}, {}, {})",
            or_at(&self.from),
            or_at(&self.to),
            self.comment.as_deref().unwrap_or("(nc)"),
            self.payload
        )
    }
}
