//! Operator control of a running simulation.
//!
//! Commands are read line by line, parsed into `OperatorCommand`s, and
//! executed against the shared network between broadcast rounds.

pub mod command;
pub mod handler;
pub mod session;

pub use session::run_session;
