//! taskq - optimistic task mutations over a keyed serial queue
//!
//! A task client has to keep its list responsive while create, toggle,
//! rename and delete calls travel to a remote service. This library provides
//! the part of such a client with real ordering and failure guarantees.
//!
//! # Core Concepts
//!
//! - **Lanes**: mutations sharing a key (`{task}-{kind}`) reach the remote one
//!   at a time, in the order the user issued them
//! - **Tentative state**: toggles, renames, priority and tag changes show up
//!   before the remote answers
//! - **Snapshots**: the value before the earliest unsettled mutation of a lane,
//!   put back when the remote refuses
//! - **Deferred kinds**: create and delete only change the view once confirmed
//!
//! # Module Organization
//!
//! - `queue`: keyed serial queue
//! - `mutation`: mutation keys, tentative values and the settlement state machine
//! - `controller`: optimistic update controller tying queue, remote and view together
//! - `task`: task entity and payloads
//! - `remote`: remote service trait and a scripted in-memory remote
//! - `board`: view sink trait and an in-memory task board
//! - `script`: scenario files replayed by `taskq run`
//! - `cli`: command-line interface using clap
//! - `config`: configuration loading from `.taskq.toml`
//! - `error`: error types and result aliases
//! - `events`: JSONL event output
//! - `output`: shared human/JSON output formatting

pub mod board;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod mutation;
pub mod output;
pub mod queue;
pub mod remote;
pub mod script;
pub mod task;

pub use controller::{MutationOutcome, OptimisticController, PendingMutation, Submission};
pub use error::{Error, Result};
pub use queue::{KeyedQueue, Settlement};
