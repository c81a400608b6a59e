// Author: Jacques Murray

use futures::future::BoxFuture;
use futures::FutureExt;
use resilient_request::{
    ClassifiedError, DispatchOptions, Operation, RawFailure, ResilientClient, Response, Transport,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// A mock backend that answers 503 twice before succeeding.
#[derive(Default)]
struct FlakyBackend {
    attempts: AtomicU32,
}

impl Transport for FlakyBackend {
    fn send(&self, operation: Operation) -> BoxFuture<'_, Result<Response, RawFailure>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        println!("Attempt {}: {} {}", attempt, operation.method, operation.url);

        async move {
            if attempt <= 2 {
                println!("Attempt {}: Failed.", attempt);
                Ok(Response::new(503))
            } else {
                println!("Attempt {}: Succeeded.", attempt);
                Ok(Response::ok(json!({"campaigns": ["Spring", "Summer"]})))
            }
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() {
    println!("--- Running Simple Dispatch Example ---");

    let client = ResilientClient::new(Arc::new(FlakyBackend::default())).with_retry_listener(
        |error: &ClassifiedError, delay: Duration| {
            println!(
                "  {} error (retry {}), waiting {:?}",
                error.category,
                error.retry_count(),
                delay
            );
        },
    );

    let options = DispatchOptions::default()
        .with_max_retries(3)
        .with_base_delay(Duration::from_millis(100));

    let start = Instant::now();
    let result = client
        .dispatch_with(Operation::get("list_campaigns", "/campaigns"), options, None)
        .await;

    println!("\n--- Result ---");
    match result {
        Ok(response) => println!("Success: {:?}", response.body),
        Err(e) => println!("Failed: {}", e),
    }
    println!("Total time: {:?}", start.elapsed());
}
