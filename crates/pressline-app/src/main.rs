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

//! Binary entrypoint for the pressline server.

use clap::Parser;
use pressline_app::{AppResult, ServerArgs, run_app};

/// Parse arguments, serve requests, and return once shutdown has drained.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app(ServerArgs::parse()).await
}
