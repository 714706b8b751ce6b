//! Approval-gate decision logic for dbgate.
//!
//! Everything in this crate is pure: callers hand in message and reaction
//! snapshots fetched from the chat platform and get back parse results,
//! admission decisions, and marker transitions to apply.
pub mod authorization;
pub mod command;
pub mod command_parser;
pub mod idempotency;
pub mod markers;
pub mod policy;
pub mod safety;

pub use authorization::*;
pub use command::*;
pub use command_parser::*;
pub use idempotency::*;
pub use markers::*;
pub use policy::*;
pub use safety::*;
