//! core-buffering: the buffering engine.
//!
//! Interprets a stream of timestamped physical key events into logical
//! press/repeat/release events plus layout transitions. The engine is either
//! between interpretations (no flow active) or driving exactly one of four
//! flows, each a small state machine with lookahead over the pending event
//! buffer:
//!
//! * immediate: single-shot keys,
//! * deferred: key sequences within a timeout window growing a chord,
//! * simul: overlapping presses judged as simultaneous within half the
//!   window,
//! * dual: keys that act as modifier when held, trigger when tapped.
//!
//! The engine owns its [`State`] exclusively; the only cross-thread data are
//! the channels it reads from and writes to.

mod engine;
mod flow;
mod state;

pub use engine::{Engine, ImProbe};
pub use flow::{DeferredKeyFlow, DualKeyFlow, FlowResult, ImmediateKeyFlow, SimulKeyFlow};
pub use state::State;
