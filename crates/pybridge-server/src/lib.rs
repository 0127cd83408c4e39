//! pybridge-server library crate.
//!
//! Exposes a host application's embedded Python execution engine to exactly
//! one remote client at a time, over length-prefixed JSON frames on a TCP
//! stream socket (codec in `pybridge-core`).
//!
//! # Architecture
//!
//! ```text
//! Remote client  (length-prefixed JSON over TCP)
//!         ↕
//! [pybridge-server]
//!   ├── domain/           ServerConfig validation, operator events
//!   ├── application/      RequestRouter, ExecutionEngine contract
//!   └── infrastructure/
//!         ├── session/    the single attached connection's state
//!         └── bridge/     listener, admission, run loop
//!         ↕
//! ExecutionEngine  (embedded Python scripting / pipeline inspection)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O types beyond the event channel handed to the console.
//! - `application` is pure request/response logic against the engine trait.
//! - `infrastructure` owns the sockets and the single-task run loop.

pub mod application;
pub mod domain;
pub mod infrastructure;
