//! Example: Completing tests from callbacks and worker threads
//!
//! This example shows how a `TestContext` collects one verdict from code
//! running on other threads: explicit completion, checkpoints, result
//! adapters and assertions made away from the test thread.

use std::io;
use std::thread;
use std::time::Duration;

use testkit_context::prelude::*;

fn main() {
    println!("🧰 testkit-context - Callbacks & Checkpoints\n");

    example_complete_from_worker();
    example_checkpoints();
    example_result_adapters();
    example_verify_on_worker();
    example_timeout_call_sites();

    println!("\n✅ All callback examples completed!");
}

/// Completing a context from another thread
fn example_complete_from_worker() {
    println!("📌 Example 1: Complete From a Worker");

    let context = TestContext::new();
    let handle = context.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        handle.complete_now();
    });

    let finished = context.await_completion(Duration::from_secs(1));
    println!("   Finished in time: {finished}, state: {}\n", context.state());
}

/// Checkpoints complete the context once every one is flagged
fn example_checkpoints() {
    println!("📌 Example 2: Checkpoints");

    let context = TestContext::new();
    let requests = context.checkpoint_named("requests", 3);
    let shutdown = context.checkpoint();

    for i in 0..3 {
        let requests = requests.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5 * (i + 1)));
            requests.flag();
        });
    }
    thread::spawn(move || shutdown.flag());

    context.await_completion(Duration::from_secs(1));
    println!(
        "   {} remaining on '{}', state: {}\n",
        requests.remaining(),
        requests.name(),
        context.state()
    );
}

fn lookup(key: &'static str, callback: impl FnOnce(std::result::Result<u32, io::Error>) + Send + 'static) {
    thread::spawn(move || {
        if key == "answer" {
            callback(Ok(42));
        } else {
            callback(Err(io::Error::new(io::ErrorKind::NotFound, key)));
        }
    });
}

/// Turning callback results into verdicts
fn example_result_adapters() {
    println!("📌 Example 3: Result Adapters");

    let context = TestContext::new();
    let handle = context.clone();
    lookup(
        "answer",
        context.succeeding_with(move |value| {
            assert_eq!(value, 42);
            handle.complete_now();
        }),
    );
    context.await_completion(Duration::from_secs(1));
    println!("   Expected success: {}", context.state());

    let context = TestContext::new();
    lookup("missing", context.failing_then_complete());
    context.await_completion(Duration::from_secs(1));
    println!("   Expected failure: {}", context.state());

    let context = TestContext::new();
    lookup("missing", context.succeeding_then_complete());
    context.await_completion(Duration::from_secs(1));
    if let Some(cause) = context.cause() {
        println!("   Unexpected failure recorded: {cause}\n");
    }
}

/// Assertions on a worker become the test's failure
fn example_verify_on_worker() {
    println!("📌 Example 4: Verify on a Worker");

    let context = TestContext::new();
    let handle = context.clone();
    thread::spawn(move || {
        handle.verify(|| assert_eq!(2 + 2, 5, "arithmetic is broken"));
    });

    context.await_completion(Duration::from_secs(1));
    if let Some(cause) = context.cause() {
        println!("   Failed with: {cause}\n");
    }
}

/// A test that never reaches a verdict reports where its checkpoints came from
fn example_timeout_call_sites() {
    println!("📌 Example 5: Timeouts");

    let report = run_test(
        TestCase::new("forgets-a-checkpoint", |invocation| {
            let _forgotten = invocation.context().checkpoint();
            Ok(())
        })
        .with_timeout(Duration::from_millis(50)),
        &RunnerConfig::default(),
    );

    println!("   {}: {}", report.name, report.outcome);
}
