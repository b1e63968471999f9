//! dbspy - cross-session profiler control for an embeddable database engine
//!
//! One attachment can start, pause, resume, flush, finish, cancel or discard
//! a profiling session owned by another attachment of the same database,
//! while the profiler observes the execution of the engine's access-path
//! tree.
//!
//! The moving parts:
//! - [`engine`]: databases, attachments, the engine-context guard, the lock
//!   manager backing liveness probes and listener wakeup, the flush timer.
//! - [`recsrc`]: the access-path tree (scans, sorts, unions, joins, locked
//!   and singular streams) with the profiler hooks at the trait boundary.
//! - [`profiler`]: the per-attachment manager, the plugin surface, the
//!   built-in JSON Lines backend, and the seven-operation command surface.
//! - [`ipc`]: the shared channel, wire protocol, client and listener for
//!   cross-attachment commands.
//!
//! # Example
//!
//! ```no_run
//! use dbspy::engine::Database;
//! use dbspy::ipc::protocol::StartSessionInput;
//! use dbspy::profiler::package;
//!
//! let db = Database::open("/data/app.db");
//! let attachment = db.attach("alice");
//!
//! let output = package::start_session(
//!     &attachment,
//!     &StartSessionInput {
//!         description: Some("nightly batch".into()),
//!         flush_interval: Some(10),
//!         ..Default::default()
//!     },
//! )
//! .unwrap();
//! assert!(output.session_id.is_some());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod ipc;
pub mod profiler;
pub mod recsrc;

pub use error::{Error, Result};
