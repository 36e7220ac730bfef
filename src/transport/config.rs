use std::time::Duration;

use crate::error::{Error, Result};

/// Size of the probe's receive buffer.
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub default_timeout: Duration,
    pub max_response_len: usize,
    pub drain_before_request: bool,
    pub drain_timeout: Duration,
    pub max_drain_reads: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(1000),
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
            drain_before_request: true,
            drain_timeout: Duration::from_millis(1),
            max_drain_reads: 64,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_response_len(mut self, len: usize) -> Self {
        self.max_response_len = len;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_max_drain_reads(mut self, reads: usize) -> Self {
        self.max_drain_reads = reads;
        self
    }

    /// Skip draining stale input before each request.
    ///
    /// Requests after a timeout or an abandoned wait are still drained.
    pub fn no_drain(mut self) -> Self {
        self.drain_before_request = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(Error::Configuration("default timeout must be non-zero".into()));
        }

        if self.max_response_len == 0 {
            return Err(Error::Configuration("response buffer must be non-empty".into()));
        }

        if self.drain_timeout.is_zero() {
            return Err(Error::Configuration("drain timeout must be non-zero".into()));
        }

        // A forced drain after a timeout must read at least once.
        if self.max_drain_reads == 0 {
            return Err(Error::Configuration("drain read limit must be non-zero".into()));
        }

        Ok(())
    }
}
