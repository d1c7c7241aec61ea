//! Invocation-scoped session state: bypass flags and the execution trace.
//!
//! Each top-level pipeline invocation owns one [`Session`], shared via `Arc`
//! between the controller and the pipeline callable. Concurrent invocations
//! each hold their own session, so scoped overrides and trace entries never
//! leak across them. Interior state sits behind short non-awaiting mutexes,
//! which lets the [`BypassScope`] guard restore flags synchronously on drop.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use retrace_types::{FieldMap, StepId, TraceRecord, TraceSnapshot};

use crate::config::{default_flags, BypassFlags};
use crate::step::Step;

/// Per-invocation state read by constraint evaluation and the backtracking
/// controller.
pub struct Session {
    flags: Mutex<BypassFlags>,
    trace: Mutex<TraceLog>,
}

#[derive(Default)]
struct TraceLog {
    records: Vec<TraceRecord>,
    // Live handles for the steps seen this attempt, so the controller can
    // recover an augmentation target from a data-only snapshot.
    handles: HashMap<StepId, Arc<dyn Step>>,
}

impl Session {
    /// A fresh session carrying the process-wide default flags.
    pub fn new() -> Arc<Self> {
        Self::with_flags(default_flags())
    }

    /// A fresh session with explicit initial flags.
    pub fn with_flags(flags: BypassFlags) -> Arc<Self> {
        Arc::new(Self {
            flags: Mutex::new(flags),
            trace: Mutex::new(TraceLog::default()),
        })
    }

    // --- bypass flags ---

    pub fn bypass_hard(&self) -> bool {
        self.flags.lock().hard
    }

    pub fn bypass_soft(&self) -> bool {
        self.flags.lock().soft
    }

    /// Apply overrides for the lifetime of the returned guard. `None` leaves
    /// a flag untouched. Dropping the guard restores exactly the values seen
    /// at entry, so guards nest correctly and survive error propagation.
    pub fn scoped(self: &Arc<Self>, hard: Option<bool>, soft: Option<bool>) -> BypassScope {
        let saved = {
            let mut flags = self.flags.lock();
            let saved = *flags;
            if let Some(hard) = hard {
                flags.hard = hard;
            }
            if let Some(soft) = soft {
                flags.soft = soft;
            }
            saved
        };
        BypassScope {
            session: Arc::clone(self),
            saved,
        }
    }

    // --- execution trace ---

    /// Append a `(step, inputs, outputs)` record to this invocation's trace.
    pub fn record(&self, step: &Arc<dyn Step>, inputs: FieldMap, outputs: FieldMap) {
        let record = TraceRecord {
            step: step.id(),
            step_name: step.name().to_string(),
            inputs,
            outputs,
            recorded_at: chrono::Utc::now(),
        };
        let mut trace = self.trace.lock();
        trace
            .handles
            .entry(step.id())
            .or_insert_with(|| Arc::clone(step));
        trace.records.push(record);
    }

    /// An immutable copy of the trace as it stands now.
    pub fn trace_snapshot(&self) -> TraceSnapshot {
        TraceSnapshot::new(self.trace.lock().records.clone())
    }

    /// The most recent trace entry, if any.
    pub fn latest_entry(&self) -> Option<TraceRecord> {
        self.trace.lock().records.last().cloned()
    }

    /// The live handle for a step recorded this attempt.
    pub(crate) fn step_handle(&self, step: StepId) -> Option<Arc<dyn Step>> {
        self.trace.lock().handles.get(&step).cloned()
    }
}

/// RAII guard for a scoped bypass override; see [`Session::scoped`].
pub struct BypassScope {
    session: Arc<Session>,
    saved: BypassFlags,
}

impl Drop for BypassScope {
    fn drop(&mut self) {
        *self.session.flags.lock() = self.saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::FnStep;
    use retrace_types::FieldSpec;
    use serde_json::json;

    fn step(name: &str) -> Arc<dyn Step> {
        Arc::new(FnStep::new(
            name,
            vec![FieldSpec::new("question", "Question:", "input").as_primary()],
            |inputs| async move { Ok(inputs) },
        ))
    }

    fn map(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn scoped_override_applies_and_restores() {
        let session = Session::with_flags(BypassFlags::default());
        assert!(!session.bypass_hard());
        assert!(!session.bypass_soft());

        {
            let _scope = session.scoped(Some(true), Some(true));
            assert!(session.bypass_hard());
            assert!(session.bypass_soft());
        }

        assert!(!session.bypass_hard());
        assert!(!session.bypass_soft());
    }

    #[test]
    fn scoped_overrides_nest() {
        let session = Session::with_flags(BypassFlags {
            hard: false,
            soft: true,
        });

        let outer = session.scoped(Some(true), None);
        assert!(session.bypass_hard());
        assert!(session.bypass_soft());

        {
            let _inner = session.scoped(None, Some(false));
            assert!(session.bypass_hard());
            assert!(!session.bypass_soft());
        }

        // Inner restored the values seen at its entry, not the defaults.
        assert!(session.bypass_hard());
        assert!(session.bypass_soft());

        drop(outer);
        assert!(!session.bypass_hard());
        assert!(session.bypass_soft());
    }

    #[test]
    fn scoped_override_restores_on_error_paths() {
        let session = Session::with_flags(BypassFlags::default());

        fn failing(session: &Arc<Session>) -> Result<(), String> {
            let _scope = session.scoped(Some(true), Some(true));
            Err("boom".into())
        }

        assert!(failing(&session).is_err());
        assert!(!session.bypass_hard());
        assert!(!session.bypass_soft());
    }

    #[test]
    fn none_leaves_a_flag_untouched() {
        let session = Session::with_flags(BypassFlags {
            hard: true,
            soft: false,
        });
        let _scope = session.scoped(None, Some(true));
        assert!(session.bypass_hard());
        assert!(session.bypass_soft());
    }

    #[test]
    fn record_appends_in_order() {
        let session = Session::with_flags(BypassFlags::default());
        let a = step("a");
        let b = step("b");

        session.record(&a, map(&[("question", json!("q1"))]), map(&[]));
        session.record(&b, map(&[]), map(&[("answer", json!("x"))]));

        let snap = session.trace_snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.records()[0].step, a.id());
        assert_eq!(snap.records()[1].step, b.id());
        assert_eq!(session.latest_entry().unwrap().step, b.id());
    }

    #[test]
    fn snapshot_is_detached_from_later_records() {
        let session = Session::with_flags(BypassFlags::default());
        let a = step("a");

        session.record(&a, map(&[]), map(&[]));
        let snap = session.trace_snapshot();
        session.record(&a, map(&[]), map(&[]));

        assert_eq!(snap.len(), 1);
        assert_eq!(session.trace_snapshot().len(), 2);
    }

    #[test]
    fn step_handles_are_recoverable_by_id() {
        let session = Session::with_flags(BypassFlags::default());
        let a = step("a");

        session.record(&a, map(&[]), map(&[]));
        let handle = session.step_handle(a.id()).unwrap();
        assert_eq!(handle.id(), a.id());
        assert!(session.step_handle(StepId::new()).is_none());
    }

    #[tokio::test]
    async fn concurrent_sessions_are_isolated() {
        let first = Session::with_flags(BypassFlags::default());
        let second = Session::with_flags(BypassFlags::default());

        let first_clone = Arc::clone(&first);
        let task = tokio::spawn(async move {
            let _scope = first_clone.scoped(Some(true), Some(true));
            let s = step("only-in-first");
            first_clone.record(&s, FieldMap::new(), FieldMap::new());
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            assert!(first_clone.bypass_hard());
        });

        // The second invocation must observe neither the override nor the
        // trace entry of the first.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(!second.bypass_hard());
        assert!(second.trace_snapshot().is_empty());

        task.await.unwrap();
        assert!(!first.bypass_hard());
        assert_eq!(first.trace_snapshot().len(), 1);
    }
}
