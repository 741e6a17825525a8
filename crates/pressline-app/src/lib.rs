#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! pressline server wiring.
//!
//! Layout: `bootstrap.rs` (arguments and startup), `channel.rs` (inbound FIFO),
//! `server.rs` (request loop and drain), `journal.rs` (event log),
//! `error.rs` (server errors).

/// Server bootstrap and argument parsing.
pub mod bootstrap;
/// Shared inbound channel.
pub mod channel;
/// Server-level errors.
pub mod error;
/// Lifecycle event log.
pub mod journal;
/// Request loop.
pub mod server;

pub use bootstrap::{ServerArgs, prepare, run_app};
pub use channel::InboundChannel;
pub use error::{AppError, AppResult};
pub use server::{Server, ServerState};
