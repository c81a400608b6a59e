// Author: Jacques Murray

use futures::future::BoxFuture;
use futures::FutureExt;
use resilient_request::{
    ConnectivityMonitor, DispatchError, MemoryStorage, OfflineQueue, Operation, RawFailure,
    ResilienceConfig, ResilientClient, Response, Transport,
};
use serde_json::json;
use std::sync::Arc;

// A mock backend that is unreachable while the monitor says we are offline.
struct Backend {
    monitor: Arc<ConnectivityMonitor>,
}

impl Transport for Backend {
    fn send(&self, operation: Operation) -> BoxFuture<'_, Result<Response, RawFailure>> {
        let online = self.monitor.is_online();
        async move {
            if online {
                println!("Sent {} {}", operation.method, operation.url);
                Ok(Response::new(201).with_body(json!({"saved": operation.name})))
            } else {
                Err(RawFailure::connection("network unreachable"))
            }
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() {
    println!("--- Running Offline Replay Example ---");

    let config = ResilienceConfig::default();
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let queue = Arc::new(OfflineQueue::new(
        Arc::new(MemoryStorage::new()),
        config.queue_key.clone(),
    ));

    let client = ResilientClient::new(Arc::new(Backend {
        monitor: monitor.clone(),
    }))
    .with_config(config)
    .with_connectivity(monitor)
    .with_offline_queue(queue.clone());

    for name in ["Spring", "Summer"] {
        let save = Operation::post("create_campaign", "/campaigns", json!({ "name": name }));
        match client.dispatch(save).await {
            Err(DispatchError::Queued { id, .. }) => println!("Queued {} as {}", name, id),
            other => println!("Unexpected: {:?}", other),
        }
    }
    println!("Pending: {:?}", queue.len());

    println!("\n--- Back online ---");
    match client.connectivity_changed(true).await {
        Ok(results) => {
            for result in results {
                println!("{}: {:?}", result.id, result.status);
            }
        }
        Err(e) => println!("Replay failed: {}", e),
    }
    println!("Pending: {:?}", queue.len());
}
