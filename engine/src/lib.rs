//! The Yarra engine: durable facts behind a superannuation chat assistant.
//!
//! Conversation turns arrive with whatever the NLU extracted; this crate
//! owns everything that has to be right about them afterwards. Profile
//! fields merge last-value-wins without ever letting silence erase a fact,
//! consent versions gate protected operations, every mutation lands in an
//! append-only audit trail, and account deletion degrades data instead of
//! destroying the evidence trail.
//!
//! Storage is behind the traits in [`store`]; [`store::memory`] is the
//! embedded reference implementation the test suite runs against.

pub mod audit;
pub mod classify;
pub mod config;
pub mod consent;
pub mod error;
pub mod intent;
pub mod lifecycle;
pub mod merge;
pub mod pipeline;
pub mod relationship;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use pipeline::Engine;
