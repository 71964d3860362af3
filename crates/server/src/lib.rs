#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The evaluator host: accepts client connections, hands added permuters
//! off to sandboxed evaluator subprocesses, and fairly schedules seeds
//! across however many clients are currently connected.
//!
//! Layering: [`session`] owns one client connection's reader/writer
//! threads; [`evaluator`] owns one evaluator subprocess's lifecycle; both
//! report into [`server::Server`]'s single-threaded main loop via the
//! [`activity::Activity`] tagged union, mirroring the reference design's
//! single-threaded dispatch over `Activity`/`Output`/`IoMessage`.

pub mod activity;
pub mod evaluator;
pub mod scheduler;
pub mod server;
pub mod session;

pub use activity::Activity;
pub use server::{Server, ServerConfig};
