// crates/host/src/lib.rs

//! Process roles of the agent shim.
//!
//! `agent-shim` is the supervisor: it owns credentials and the real
//! capability client, and launches `agent-worker`, which loads the agent
//! and reaches the outside world only through its stdin/stdout.

pub mod log;
pub mod supervisor;
pub mod worker;
