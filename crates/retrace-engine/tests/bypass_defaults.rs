//! Process-wide bypass defaults, exercised in isolation.
//!
//! These tests mutate process-global state, so they live in their own test
//! binary and run strictly one after another.

use retrace_engine::config::{default_flags, set_default_bypass, BypassFlags};
use retrace_engine::constraint::{check_hard, check_soft};
use retrace_engine::session::Session;

#[test]
fn defaults_follow_configuration_and_seed_new_sessions() {
    assert_eq!(default_flags(), BypassFlags::default());

    set_default_bypass(true, false);
    assert_eq!(
        default_flags(),
        BypassFlags {
            hard: true,
            soft: false
        }
    );

    // A session created now inherits the configured defaults.
    let session = Session::new();
    assert!(session.bypass_hard());
    assert!(!session.bypass_soft());
    assert!(check_hard(&session, false, "defaults: hard suppressed by default").unwrap());
    assert!(check_soft(&session, false, "defaults: soft still enforced").is_err());

    set_default_bypass(false, false);
    assert_eq!(default_flags(), BypassFlags::default());

    // The already-created session keeps its own copy; only new sessions see
    // the restored defaults.
    assert!(session.bypass_hard());
    assert!(!Session::new().bypass_hard());
}
