use crate::error::{ChatError, ChatResult};
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Request lifecycle of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    // Request sent, no response yet
    AwaitingFirstByte,
    // Response headers received, buffer growing
    Streaming,
    // Stream ended, writing the result to the store
    Committing,
}

impl SessionState {
    pub fn is_busy(&self) -> bool {
        *self != SessionState::Idle
    }
}

/// Observable request state shared between the session and UI bindings.
/// At most one request is in flight; `begin` refuses a second one.
pub struct SessionStatus {
    state: watch::Sender<SessionState>,
    streaming: watch::Sender<String>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(SessionState::Idle),
            streaming: watch::Sender::new(String::new()),
            cancel: Mutex::new(None),
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn streaming_content(&self) -> String {
        self.streaming.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_streaming(&self) -> watch::Receiver<String> {
        self.streaming.subscribe()
    }

    /// Moves Idle -> AwaitingFirstByte, or fails if a request is in flight.
    pub fn begin(&self) -> ChatResult<InFlight<'_>> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::AwaitingFirstByte;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ChatError::State(
                "A response is already being generated.".into(),
            ));
        }

        self.streaming.send_replace(String::new());
        let token = CancellationToken::new();
        *self.cancel_slot() = Some(token.clone());
        Ok(InFlight {
            status: self,
            token,
        })
    }

    /// Cancels the in-flight request, if any.
    pub fn stop(&self) -> bool {
        match self.cancel_slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the duration of one request. Dropping it returns the session
/// to Idle and discards the streaming buffer, on success or failure alike.
pub struct InFlight<'a> {
    status: &'a SessionStatus,
    token: CancellationToken,
}

impl InFlight<'_> {
    pub fn advance(&self, next: SessionState) {
        log::debug!("Session state -> {:?}", next);
        self.status.state.send_replace(next);
    }

    pub fn publish(&self, buffer: &str) {
        self.status.streaming.send_replace(buffer.to_string());
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.status.cancel_slot().take();
        self.status.streaming.send_replace(String::new());
        self.status.state.send_replace(SessionState::Idle);
    }
}
