//! Bounded backtracking over soft-constraint violations.
//!
//! The controller drives a pipeline callable through up to `max_attempts`
//! retries. Each soft violation is traced back to the step that produced the
//! failing output; that step is augmented with the feedback accumulated so
//! far and the whole pipeline is rerun from the start. When the budget runs
//! out, one final pass is made with soft violations suppressed, so the
//! caller always gets either a value or a fatal error.

use std::future::Future;
use std::sync::Arc;

use retrace_types::{ConstraintId, Result, RetraceError, StepId, TraceSnapshot};

use crate::augment::{strip_injected_fields, Augmenter};
use crate::feedback::{Exemplar, FeedbackLog};
use crate::session::Session;

/// Orchestrates the retry loop for one pipeline callable.
pub struct BacktrackController {
    max_attempts: usize,
    target: Option<StepId>,
}

impl BacktrackController {
    /// A controller allowing `max_attempts` feedback-augmented reruns before
    /// forcing completion.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            target: None,
        }
    }

    /// Always backtrack to `target` instead of the most recent traced step.
    pub fn with_target(mut self, target: StepId) -> Self {
        self.target = Some(target);
        self
    }

    /// Run `pipeline` to completion.
    ///
    /// Each attempt gets a structurally fresh [`Session`] carrying the
    /// process-wide default flags. Hard violations and configuration errors
    /// propagate immediately; soft violations drive the retry loop. Every
    /// step augmented during the run is reverted before this returns, on
    /// every path.
    pub async fn run<F, Fut, T>(&self, pipeline: F) -> Result<T>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut feedback = FeedbackLog::new();
        let mut augmenter = Augmenter::new();
        let result = self.drive(&pipeline, &mut feedback, &mut augmenter).await;
        augmenter.revert_all();
        result
    }

    async fn drive<F, Fut, T>(
        &self,
        pipeline: &F,
        feedback: &mut FeedbackLog,
        augmenter: &mut Augmenter,
    ) -> Result<T>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 0..self.max_attempts {
            let session = Session::new();
            match pipeline(Arc::clone(&session)).await {
                Ok(value) => return Ok(value),
                Err(RetraceError::SoftViolation { id, message, trace }) => {
                    tracing::info!(attempt, constraint = %id, "soft violation, backtracking");
                    self.note_failure(&session, feedback, augmenter, id, message, trace)?;
                }
                Err(other) => return Err(other),
            }
        }

        // Budget exhausted (or zero to begin with): one pass with soft
        // violations suppressed for the duration of the call.
        let session = Session::new();
        let _scope = session.scoped(None, Some(true));
        tracing::info!(
            max_attempts = self.max_attempts,
            "retry budget exhausted, forcing completion"
        );
        pipeline(Arc::clone(&session)).await
    }

    /// Record the violation against the step it is traced back to and
    /// augment that step for the next attempt. Failing to identify a step is
    /// unrecoverable: the original violation is re-raised rather than
    /// silently rerunning an unmodified pipeline.
    fn note_failure(
        &self,
        session: &Session,
        feedback: &mut FeedbackLog,
        augmenter: &mut Augmenter,
        id: ConstraintId,
        message: String,
        trace: TraceSnapshot,
    ) -> Result<()> {
        let resolved = match trace.resolve_backtrack_step(self.target) {
            Some(step) => step,
            None => {
                tracing::warn!(constraint = %id, "no step in the trace matches the backtrack target");
                return Err(RetraceError::SoftViolation { id, message, trace });
            }
        };
        let step = match session.step_handle(resolved) {
            Some(step) => step,
            None => {
                tracing::warn!(step = %resolved, "no live handle for the resolved backtrack step");
                return Err(RetraceError::SoftViolation { id, message, trace });
            }
        };

        feedback.record_message(resolved, &message);
        if let Some(last) = trace.latest() {
            feedback.record_exemplar(
                resolved,
                id,
                Exemplar {
                    inputs: last.inputs.clone(),
                    outputs: strip_injected_fields(&last.outputs),
                    message: message.clone(),
                },
            );
        }

        augmenter.apply(
            &step,
            &feedback.feedback_text(resolved),
            &feedback.exemplar_lines(resolved),
        )
    }
}

// ---------------------------------------------------------------------------
// Bypass runners
// ---------------------------------------------------------------------------

/// Run `pipeline` with both constraint kinds suppressed: every failed check
/// is logged and treated as passing.
pub async fn run_unchecked<F, Fut, T>(pipeline: F) -> Result<T>
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = Session::new();
    let _scope = session.scoped(Some(true), Some(true));
    pipeline(Arc::clone(&session)).await
}

/// Run `pipeline` with soft violations suppressed and hard violations
/// enforced.
pub async fn run_bypassing_soft<F, Fut, T>(pipeline: F) -> Result<T>
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = Session::new();
    let _scope = session.scoped(Some(false), Some(true));
    pipeline(Arc::clone(&session)).await
}

/// Run `pipeline` with hard violations suppressed.
pub async fn run_bypassing_hard<F, Fut, T>(pipeline: F) -> Result<T>
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = Session::new();
    let _scope = session.scoped(Some(true), None);
    pipeline(Arc::clone(&session)).await
}

/// Run `pipeline`, swallowing a hard violation into `Ok(None)`. Other
/// errors propagate unchanged.
pub async fn run_tolerating_hard<F, Fut, T>(pipeline: F) -> Result<Option<T>>
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = Session::new();
    match pipeline(Arc::clone(&session)).await {
        Ok(value) => Ok(Some(value)),
        Err(RetraceError::HardViolation { id, message, .. }) => {
            tracing::warn!(constraint = %id, "hard violation tolerated: {message}");
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{check_hard, check_soft};

    // Controller behavior is exercised end-to-end in tests/integration.rs;
    // here only the bypass runners, which force their own flags.

    #[tokio::test]
    async fn run_unchecked_suppresses_both_kinds() {
        let result = run_unchecked(|session| async move {
            check_hard(&session, false, "runner: hard suppressed")?;
            check_soft(&session, false, "runner: soft suppressed")?;
            Ok(11)
        })
        .await;
        assert_eq!(result.unwrap(), 11);
    }

    #[tokio::test]
    async fn run_bypassing_soft_still_enforces_hard() {
        let result: Result<()> = run_bypassing_soft(|session| async move {
            check_soft(&session, false, "runner: soft only suppressed")?;
            check_hard(&session, false, "runner: hard still enforced")?;
            Ok(())
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            RetraceError::HardViolation { .. }
        ));
    }

    #[tokio::test]
    async fn run_bypassing_hard_suppresses_hard_only() {
        let result = run_bypassing_hard(|session| async move {
            check_hard(&session, false, "runner: hard bypassed")?;
            Ok("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn run_tolerating_hard_swallows_the_violation() {
        let result = run_tolerating_hard(|session| async move {
            check_hard(&session, false, "runner: hard tolerated")?;
            Ok(5)
        })
        .await;
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn run_tolerating_hard_passes_values_and_soft_errors_through() {
        let ok = run_tolerating_hard(|_session| async move { Ok(3) }).await;
        assert_eq!(ok.unwrap(), Some(3));

        let err: Result<Option<()>> = run_tolerating_hard(|session| async move {
            check_soft(&session, false, "runner: soft not tolerated")?;
            Ok(())
        })
        .await;
        assert!(err.unwrap_err().is_retryable());
    }
}
