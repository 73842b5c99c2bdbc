//! Demo handshake invokers
//!
//! Neither of these talks to a ledger: `LoopbackHandshake` plays the accept
//! protocol against an in-memory feed, `DryRunHandshake` only reports what it
//! would have done.

pub mod dry_run;
pub mod loopback;

pub use dry_run::{DryRunHandshake, PLACEHOLDER_CHANNEL};
pub use loopback::{Connection, LoopbackHandshake};
