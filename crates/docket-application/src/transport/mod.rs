//! Transport adapter and its typed event router.
//!
//! - `router`: single-owner and shared inbound channels
//! - `outbound`: retry-once state machine used by `emit`
//! - `adapter`: one live connection per user

mod adapter;
mod outbound;
mod router;

pub use adapter::TransportAdapter;
pub use outbound::{EmitState, EmitStep};
pub use router::{EventRouter, Handler};
