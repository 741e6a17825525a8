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
#![allow(clippy::module_name_repetitions)]

//! Pipeline execution for pressline requests.
//!
//! Layout: `catalog.rs` (transformation executables), `admission.rs`
//! (per-transformation concurrency quotas), `registry.rs` (in-flight
//! pipelines), `executor.rs` (stage spawning and wiring), `notify.rs`
//! (completion notices to clients), `error.rs` (failure taxonomy).

pub mod admission;
pub mod catalog;
pub mod error;
pub mod executor;
pub mod notify;
pub mod registry;

pub use admission::{AdmissionController, AdmissionPermit, CapacityEntry, CapacitySnapshot};
pub use catalog::Catalog;
pub use error::{
    AdmissionError, AdmissionResult, NotifyError, NotifyResult, PipelineError, PipelineResult,
};
pub use executor::{PipelineExecutor, PipelineOutcome, PipelineSummary};
pub use notify::{ClientNotifier, NotifyReport};
pub use registry::{TaskEntry, TaskHandle, TaskRegistry};
