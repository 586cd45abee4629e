use std::io::{ErrorKind, Write};

use common::prelude::{Transport, TransportError};

/// Writes every outbound frame as one line on stdout. The channel is
///  carried inside the envelope, so a supervisor can route on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutTransport;

impl Transport for StdoutTransport {
    fn send(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", text)
            .and_then(|()| out.flush())
            .map_err(|e| match e.kind() {
                // the reading side went away
                ErrorKind::BrokenPipe => TransportError::Closed(channel.to_string()),
                _ => TransportError::Io(e),
            })
    }
}
