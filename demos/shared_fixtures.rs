//! Example: Shared and per-test fixtures
//!
//! This example runs a small group of tests against a fake server. The
//! server is shared by the whole group and stopped once; each test gets its
//! own client, released when the test ends.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use testkit_context::prelude::*;

#[derive(Clone, Debug)]
struct Server {
    port: u16,
}

#[derive(Clone, Debug)]
struct Client {
    id: u16,
    port: u16,
}

fn main() {
    println!("🧰 testkit-context - Shared Fixtures\n");

    let clients = Arc::new(AtomicU16::new(0));

    let report = TestGroup::new("server")
        .with_timeout(Duration::from_secs(2))
        .fixture(FixtureScope::Shared, || {
            println!("   🚀 Starting server on 8080");
            Ok(Resource::with_release(Server { port: 8080 }, |server| {
                println!("   🛑 Stopping server on {}", server.port);
                Ok::<_, Error>(())
            }))
        })
        .fixture(FixtureScope::Invocation, move || {
            let id = clients.fetch_add(1, Ordering::SeqCst) + 1;
            println!("   🔌 Connecting client {id}");
            Ok(Resource::with_release(Client { id, port: 8080 }, |client| {
                println!("   👋 Closing client {}", client.id);
                Ok::<_, Error>(())
            }))
        })
        .test(
            TestCase::new("ping", |invocation| {
                let server: Server = invocation.resolve()?;
                let client: Client = invocation.resolve()?;
                assert_eq!(client.port, server.port);

                let context = invocation.context();
                let replies = context.checkpoints(2);
                for _ in 0..2 {
                    let replies = replies.clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(10));
                        replies.flag();
                    });
                }
                Ok(())
            })
            .repeat(2),
        )
        .test(TestCase::new("stats", |invocation| {
            let client: Client = invocation.resolve()?;
            let context = invocation.context();
            thread::spawn(move || {
                context.verify(|| assert!(client.id > 0));
                context.complete_now();
            });
            Ok(())
        }))
        .run();

    println!();
    for test in report.all_tests() {
        println!("   {} ... {}", test.name, test.outcome);
    }

    if report.passed() {
        println!("\n✅ All fixture examples completed!");
    } else {
        println!("\n❌ {} test(s) failed", report.failures().len());
    }
}
