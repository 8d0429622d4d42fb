//! Integration tests for the `#[testkit_context::test]` macro.

#![cfg(feature = "macros")]

use std::thread;
use std::time::Duration;

use testkit_context::context::TestContext;

/// Synchronous test without a context.
#[testkit_context::test]
fn test_basic_sync() {
    assert_eq!(2 + 2, 4);
}

/// Test completed from another thread.
#[testkit_context::test]
fn test_with_context(context: TestContext) {
    thread::spawn(move || context.complete_now());
}

/// Checkpoints flagged by two workers.
#[testkit_context::test(timeout_ms = 1000)]
fn test_checkpoints(context: TestContext) {
    let checkpoint = context.checkpoints(2);
    for _ in 0..2 {
        let checkpoint = checkpoint.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            checkpoint.flag();
        });
    }
}

/// Every repetition gets its own context.
#[testkit_context::test(repeat = 3, timeout_ms = 500)]
fn test_repeated(context: TestContext) {
    assert!(!context.is_completed());
    context.complete_now();
}

/// A failed verification fails the generated test.
#[testkit_context::test(timeout_ms = 500)]
#[should_panic(expected = "Assertion failed")]
fn test_verify_failure_panics(context: TestContext) {
    let worker = context.clone();
    thread::spawn(move || {
        worker.verify(|| assert_eq!(1, 2));
    });
}

/// A context that never completes times out.
#[testkit_context::test(timeout_ms = 50)]
#[should_panic(expected = "timed out after 50ms")]
fn test_timeout_panics(context: TestContext) {
    let _never = context.checkpoint();
}

/// Early returns from the body are allowed.
#[testkit_context::test]
fn test_early_return(context: TestContext) {
    context.complete_now();
    if context.completed() {
        return;
    }
    unreachable!();
}
