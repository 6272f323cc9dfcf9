//! Retry-once state machine for outbound actions.
//!
//! ```text
//! Idle -> Sending -> Succeeded
//!            |
//!            +-> Reconnecting -> RetrySending -> Succeeded
//!                     |                |
//!                     +-> Failed       +-> Failed
//! ```

use docket_core::event::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitState {
    Idle,
    Sending,
    Reconnecting,
    RetrySending,
    Succeeded,
    Failed,
}

/// Outcome of the work done in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStep {
    Start,
    Sent,
    SendFailed,
    Reconnected,
    ReconnectFailed,
}

impl EmitState {
    /// Pure transition function. Steps that do not apply leave the state unchanged.
    pub fn next(self, step: EmitStep) -> EmitState {
        use EmitState::*;
        use EmitStep::*;

        match (self, step) {
            (Idle, Start) => Sending,
            (Sending, Sent) | (RetrySending, Sent) => Succeeded,
            (Sending, SendFailed) => Reconnecting,
            (Reconnecting, Reconnected) => RetrySending,
            (Reconnecting, ReconnectFailed) | (RetrySending, SendFailed) => Failed,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EmitState::Succeeded | EmitState::Failed)
    }
}

/// One outbound event in flight, plus the error that sent it down the retry path.
#[derive(Debug, Clone)]
pub(crate) struct PendingEmit {
    pub event: RawEvent,
    pub state: EmitState,
    pub last_error: Option<String>,
}

impl PendingEmit {
    pub fn new(event: RawEvent) -> Self {
        Self {
            event,
            state: EmitState::Idle,
            last_error: None,
        }
    }

    pub fn advance(&mut self, step: EmitStep) -> EmitState {
        self.state = self.state.next(step);
        self.state
    }

    pub fn fail_step(&mut self, step: EmitStep, error: impl ToString) -> EmitState {
        self.last_error = Some(error.to_string());
        self.advance(step)
    }
}
