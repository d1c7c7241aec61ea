//! Constraint enforcement and backtracking retry for multi-step pipelines.
//!
//! Pipelines invoke [`Step`]s and check their outputs with hard or soft
//! constraints. A failed hard constraint aborts the run; a failed soft
//! constraint hands control to the [`BacktrackController`], which traces the
//! failure back to the responsible step, extends that step's input schema
//! with the feedback gathered so far, and reruns the pipeline from the start
//! up to a configured budget. When the budget is spent, a final pass runs
//! with soft violations suppressed so the caller still gets a value.
//!
//! All invocation-scoped state (the execution trace and the bypass flags)
//! lives in a [`Session`] threaded explicitly through the pipeline callable;
//! concurrent pipeline invocations are isolated by construction.

pub mod augment;
pub mod backtrack;
pub mod config;
pub mod constraint;
pub mod feedback;
pub mod session;
pub mod step;

pub use augment::{
    strip_injected_fields, Augmenter, COUNTER_EXAMPLES_FIELD, FEEDBACK_FIELD,
};
pub use backtrack::{
    run_bypassing_hard, run_bypassing_soft, run_tolerating_hard, run_unchecked,
    BacktrackController,
};
pub use config::{default_flags, set_default_bypass, BypassFlags};
pub use constraint::{check_hard, check_hard_for, check_soft, check_soft_for, Constraint};
pub use feedback::{Exemplar, FeedbackLog};
pub use session::{BypassScope, Session};
pub use step::{FnStep, Step};
