#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The search driver: worker pool, remote-server sessions, fair seed
//! dispatch, output writing, and cancellation.
//!
//! Unlike the in-process engine this crate was adapted from, scheduling
//! here runs on plain OS threads talking over `crossbeam_channel`, not
//! `tokio` tasks: the driver's concurrency model is a dedicated worker
//! thread per local core plus a reader/writer thread pair per remote
//! server, all blocking on channel recv/send, which maps directly onto
//! `std::thread` rather than an async runtime.

pub mod auth;
pub mod jobdir;
pub mod local;
pub mod output;
pub mod printer;
pub mod profiler;
pub mod remote;
pub mod run;
pub mod shutdown;

pub use jobdir::{JobDirectory, JobDirectoryError};
pub use run::{Coordinator, CoordinatorConfig, CoordinatorOutcome};
