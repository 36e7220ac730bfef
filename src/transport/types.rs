use std::time::Duration;
use tokio::time::Instant;

/// Where a transport instance is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Sending,
    AwaitingResponse,
}

impl TransportState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TransportState::Idle)
    }
}

/// A request that has been written and is waiting for its reply.
///
/// Lives only inside one `send_and_await_response` call.
#[derive(Debug)]
pub struct PendingRequest<'a> {
    pub issued_at: Instant,
    pub timeout: Duration,
    pub payload: &'a [u8],
}

impl<'a> PendingRequest<'a> {
    pub fn new(payload: &'a [u8], timeout: Duration) -> Self {
        Self {
            issued_at: Instant::now(),
            timeout,
            payload,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.issued_at + self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.issued_at.elapsed()
    }
}
