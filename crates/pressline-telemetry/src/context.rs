//! Process-wide span carrying the server state.

use tracing::{Span, span::EnteredSpan};

use crate::init::build_sha;

/// Keeps the `pressline` span entered until dropped.
pub struct GlobalContextGuard {
    _span: EnteredSpan,
}

impl GlobalContextGuard {
    /// Enter the process span, starting in `mode`.
    #[must_use]
    pub fn new(mode: &str) -> Self {
        let span = tracing::info_span!(
            "pressline",
            mode = %mode,
            pid = std::process::id(),
            build_sha = %build_sha()
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Overwrite the `mode` field of the current span.
///
/// A no-op outside the process span.
pub fn record_mode(mode: &str) {
    Span::current().record("mode", tracing::field::display(mode));
}
