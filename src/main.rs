use distributed_mutex::cluster::config::ClusterConfig;
use distributed_mutex::mutex::engine::ProtocolEngine;
use distributed_mutex::mutex::types::Token;
use distributed_mutex::node::handlers::router;
use distributed_mutex::node::registry::ProcedureRegistry;
use distributed_mutex::node::runtime::{Node, NodeHandle};
use distributed_mutex::transport::Outbox;
use distributed_mutex::transport::udp::UdpTransport;
use std::time::Duration;
use tokio::sync::oneshot;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --id <n> --bind <addr:port> [--peer <id>=<addr:port>]... [--size <n>] \
             [--holder <id>] [--http <addr:port>] [--jobs <n>] [--verbose]",
            args[0]
        );
        eprintln!(
            "Example: {} --id 1 --bind 127.0.0.1:5001 --peer 2=127.0.0.1:5002 --peer 3=127.0.0.1:5003",
            args[0]
        );
        eprintln!(
            "Example: {} --id 2 --bind 127.0.0.1:5002 --peer 1=127.0.0.1:5001 --peer 3=127.0.0.1:5003 --jobs 5",
            args[0]
        );

        std::process::exit(1);
    }

    let config = ClusterConfig::from_args(&args[1..])?;

    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!(
        "Starting {} of {} on {}",
        config.local_id,
        config.cluster_size,
        config.bind_addr
    );
    if config.is_initial_holder() {
        tracing::info!("Creating the token (initial holder)");
    } else {
        tracing::info!("Initial token holder: {}", config.initial_holder);
    }

    // 1. Transport (UDP):
    let transport = UdpTransport::bind(config.local_id, config.bind_addr).await?;
    for (id, addr) in &config.peers {
        transport.add_peer(*id, *addr);
        tracing::info!("  - peer {} at {}", id, addr);
    }

    // 2. Protocol engine and node actor:
    let (outbox, outbound) = Outbox::channel();
    let engine = ProtocolEngine::from_config(&config, outbox);
    let node = Node::start(engine, transport.clone(), outbound);
    transport.spawn_receiver(node.inbox());

    // 3. Named procedures:
    let registry = ProcedureRegistry::new();
    registry.register("log_job", |token, payload| {
        log_job(token, payload);
        Ok(())
    });

    // 4. Spawn demo jobs:
    if config.jobs > 0 {
        let jobs_node = node.clone();
        let jobs = config.jobs;
        tokio::spawn(async move {
            if let Err(e) = run_jobs(jobs_node, jobs).await {
                tracing::error!("Demo jobs aborted: {}", e);
            }
        });
    }

    // 5. Spawn stats reporter:
    let stats_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            let stats = stats_node.snapshot();
            tracing::info!(
                "Node stats: idle_token={} pending={} executed={} failed={} forwarded={}",
                stats.holds_idle_token(),
                stats.pending_procedures,
                stats.executed,
                stats.failed,
                stats.tokens_forwarded
            );
            for (id, number) in stats.request_table.iter() {
                tracing::info!("  - {} requested={}", id, number);
            }
        }
    });

    // 6. Start HTTP server:
    let http_addr = config.http_addr()?;
    let app = router(node, registry);

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn log_job(token: &Token, payload: &serde_json::Value) {
    let grants: Vec<String> = token
        .last_granted
        .iter()
        .map(|(id, granted)| format!("{}={}", id, granted))
        .collect();

    tracing::info!(
        "Critical section entered: job={} grants=[{}] queued={}",
        payload,
        grants.join(", "),
        token.queue.len()
    );
}

/// Submits `jobs` procedures one after another, waiting for each to finish before the next.
async fn run_jobs(node: NodeHandle, jobs: usize) -> anyhow::Result<()> {
    for job in 1..=jobs {
        let (done_tx, done_rx) = oneshot::channel();
        let payload = serde_json::json!({ "node": node.local_id(), "job": job });

        node.submit(move |token| {
            log_job(token, &payload);
            let _ = done_tx.send(());
            Ok(())
        })?;

        done_rx.await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    tracing::info!("Finished {} demo jobs", jobs);
    Ok(())
}
