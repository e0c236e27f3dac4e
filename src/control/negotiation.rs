//! Per-connection negotiation state.

use super::info::{Encoding, InfoDirective};

/// Compression flags and the log of directives received on one connection.
///
/// `gzip_enabled` is sticky once set. `gzip_pending_inbound` is one-shot:
/// it is consumed by the next frame that is not an `info` directive, and
/// only a `(gzip, _)` frame may use it.
#[derive(Debug, Default)]
pub struct Negotiation {
    gzip_enabled: bool,
    gzip_pending_inbound: bool,
    log: Vec<InfoDirective>,
}

impl Negotiation {
    /// Fresh state: nothing negotiated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a directive and update the flags.
    pub fn apply(&mut self, directive: InfoDirective) {
        match &directive {
            InfoDirective::Encoding(Encoding::Gzip) => {
                self.gzip_pending_inbound = true;
                self.gzip_enabled = true;
            }
            InfoDirective::AcceptEncoding(Encoding::Gzip) => {
                self.gzip_enabled = true;
            }
            InfoDirective::Other { command, .. } => {
                tracing::debug!(command = %command, "ignoring unknown info directive");
            }
        }
        self.log.push(directive);
    }

    /// True if responses may be gzip-compressed.
    #[inline]
    pub fn gzip_enabled(&self) -> bool {
        self.gzip_enabled
    }

    /// True if the next frame is expected to be gzip-wrapped.
    #[inline]
    pub fn gzip_pending_inbound(&self) -> bool {
        self.gzip_pending_inbound
    }

    /// Consume the pending-inbound flag, returning its previous value.
    pub fn take_pending_inbound(&mut self) -> bool {
        std::mem::take(&mut self.gzip_pending_inbound)
    }

    /// Directives received so far, oldest first.
    pub fn log(&self) -> &[InfoDirective] {
        &self.log
    }
}
