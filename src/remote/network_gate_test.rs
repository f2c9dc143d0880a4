use super::*;

/// # Case 1: The gate starts closed and follows explicit intent
#[test]
fn test_gate_follows_intent() {
    let (mut gate, enabled_rx) = NetworkGate::new();
    assert!(!gate.is_enabled());
    assert!(!*enabled_rx.borrow());

    gate.set_enabled(true);
    assert!(gate.is_enabled());
    assert!(*enabled_rx.borrow());

    gate.set_enabled(false);
    assert!(!gate.is_enabled());
    assert!(!*enabled_rx.borrow());
}

/// # Case 2: Setting the same intent twice is a no-op
#[test]
fn test_gate_set_is_idempotent() {
    let (mut gate, mut enabled_rx) = NetworkGate::new();
    gate.set_enabled(true);
    assert!(enabled_rx.has_changed().expect("sender alive"));
    enabled_rx.mark_unchanged();

    gate.set_enabled(true);
    assert!(!enabled_rx.has_changed().expect("sender alive"));
}
