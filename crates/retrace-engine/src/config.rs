//! Process-wide default bypass flags.
//!
//! These are the initial values copied into every new [`Session`](crate::session::Session);
//! nothing reads them afterwards, so scoped overrides in one pipeline
//! invocation are invisible to any other.

use std::sync::atomic::{AtomicBool, Ordering};

/// The pair of suppression switches: a set flag demotes that constraint
/// kind's failures to logged successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BypassFlags {
    pub hard: bool,
    pub soft: bool,
}

static DEFAULT_BYPASS_HARD: AtomicBool = AtomicBool::new(false);
static DEFAULT_BYPASS_SOFT: AtomicBool = AtomicBool::new(false);

/// Set the process-start defaults. Intended to be called once during
/// application startup; sessions created afterwards pick up the new values.
pub fn set_default_bypass(hard: bool, soft: bool) {
    DEFAULT_BYPASS_HARD.store(hard, Ordering::SeqCst);
    DEFAULT_BYPASS_SOFT.store(soft, Ordering::SeqCst);
}

/// The current process-wide defaults.
pub fn default_flags() -> BypassFlags {
    BypassFlags {
        hard: DEFAULT_BYPASS_HARD.load(Ordering::SeqCst),
        soft: DEFAULT_BYPASS_SOFT.load(Ordering::SeqCst),
    }
}
