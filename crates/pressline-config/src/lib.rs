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

//! Startup configuration for the pressline server.
//!
//! Layout: `capacity.rs` (per-transformation concurrency caps read from the
//! capacity file), `settings.rs` (paths and toggles with environment overlay).

pub mod capacity;
pub mod error;
pub mod settings;

pub use capacity::CapacityConfig;
pub use error::{ConfigError, ConfigResult};
pub use settings::{
    DEFAULT_INBOUND_PATH, DEFAULT_REPLY_DIR, ServerSettings, env_flag_value,
};
