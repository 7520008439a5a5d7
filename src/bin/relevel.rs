//! relevel CLI: run the reconciliation engine against a demo source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use relevel::config::Config;
use relevel::controller::{Controller, ControllerConfig, Reconcile};
use relevel::key::ObjectKey;
use relevel::record::Record;
use relevel::store::Store;
use relevel::telemetry::{TelemetryConfig, init_telemetry};
use relevel::watch::{MemorySource, MemorySourceHandle};
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "relevel", about = "Level-triggered reconciliation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine against a scripted in-memory record collection
    Demo {
        /// Worker loops (overrides RELEVEL_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Records in the initial listing
        #[arg(long, default_value_t = 5)]
        records: usize,
        /// Fail each key's first two reconcile attempts to show backoff
        #[arg(long)]
        flaky: bool,
    },
    /// Parse and normalize an object key
    Key {
        /// Key text, "namespace/name" or bare "name"
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Demo {
            workers,
            records,
            flaky,
        } => cmd_demo(workers, records, flaky).await,
        Command::Key { key } => {
            let parsed: ObjectKey = key.parse()?;
            println!("namespace: {:?}", parsed.namespace);
            println!("name:      {:?}", parsed.name);
            println!("canonical: {parsed}");
            Ok(())
        }
    }
}

/// Demo reconciler: reads the record back from the local cache and logs
/// what convergence would do. With `flaky`, the first two attempts per
/// key fail so the backoff requeue path is visible.
struct DemoReconciler {
    store: Store,
    flaky: bool,
    attempts: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl Reconcile for DemoReconciler {
    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let key = ObjectKey::try_from_parts(namespace, name)?;

        let Some(record) = self.store.get(&key) else {
            info!(%key, "record gone, nothing to converge");
            return Ok(());
        };

        if self.flaky {
            let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
            let n = attempts.entry(key.to_string()).or_insert(0);
            *n += 1;
            if *n <= 2 {
                return Err(format!("simulated failure, attempt {n}").into());
            }
        }

        info!(
            %key,
            resource_version = record.resource_version,
            payload = %record.payload,
            "converged"
        );
        Ok(())
    }
}

async fn cmd_demo(workers: Option<usize>, records: usize, flaky: bool) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "relevel".to_string(),
    })?;

    let listing: Vec<Record> = (0..records)
        .map(|i| {
            Record::new("demo", format!("record-{i}"), 1)
                .with_payload(json!({ "replicas": i + 1 }))
        })
        .collect();

    let (source, handle) = MemorySource::new(listing);

    let store = Store::new();
    let reconciler = DemoReconciler {
        store: store.clone(),
        flaky,
        attempts: Mutex::new(HashMap::new()),
    };

    let controller = Controller::new(
        Arc::new(source),
        store,
        Arc::new(reconciler),
        ControllerConfig {
            sync_timeout: config.sync_timeout,
            ..ControllerConfig::default()
        },
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = stop_tx.send(true);
    });

    tokio::spawn(churn(handle, records));

    let worker_count = workers.unwrap_or(config.workers);
    controller.run(worker_count, stop_rx).await?;
    Ok(())
}

/// Background churn: modify a record, replay a resync, delete one.
async fn churn(handle: MemorySourceHandle, records: usize) {
    tokio::time::sleep(Duration::from_secs(2)).await;

    handle
        .modify(Record::new("demo", "record-0", 2).with_payload(json!({ "replicas": 9 })))
        .await;

    // Resync replay: same resource version, should never reach a worker.
    handle
        .modify(Record::new("demo", "record-0", 2).with_payload(json!({ "replicas": 9 })))
        .await;

    if records > 1 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        if let Ok(key) = ObjectKey::try_from_parts("demo", "record-1") {
            handle.delete(&key).await;
        }
    }
}
