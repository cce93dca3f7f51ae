use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use tsq::config::NodeConfig;
use tsq::metrics;
use tsq::page::DataType;
use tsq::query::analyzer::Session;
use tsq::query::ast::{BinaryOperator, Expr, Query, Relation};
use tsq::rpc::InProcessTransport;
use tsq::server::{Coordinator, Node};
use tsq::spi::{ColumnKind, ColumnSchema, MemoryStorage, TableHandle, TableSchema};

const SHARD_0: &str = "time,host,region,value
2024-05-01T00:00:00Z,web-1,us-east,0.42
2024-05-01T00:00:10Z,web-1,us-east,0.57
2024-05-01T00:00:00Z,web-2,us-east,0.13
";

const SHARD_1: &str = "time,host,region,value
2024-05-01T00:00:00Z,db-1,eu-west,0.91
2024-05-01T00:00:10Z,db-1,eu-west,0.88
";

const SHARD_2: &str = "time,host,region,value
2024-05-01T00:00:00Z,web-3,eu-west,0.35
2024-05-01T00:00:10Z,web-2,us-east,0.21
";

fn demo_storage() -> Result<Arc<MemoryStorage>, Box<dyn std::error::Error>> {
    let storage = MemoryStorage::default();
    let cpu = TableHandle::new("db", "public", "cpu");
    storage.create_table(
        cpu.clone(),
        TableSchema::new(vec![
            ColumnSchema::new("time", DataType::Timestamp, ColumnKind::Timestamp),
            ColumnSchema::new("host", DataType::Varchar, ColumnKind::Tag),
            ColumnSchema::new("region", DataType::Varchar, ColumnKind::Tag),
            ColumnSchema::new("value", DataType::Double, ColumnKind::Field),
        ]),
    )?;
    for (shard, node, csv) in [(0, "node-1", SHARD_0), (1, "node-1", SHARD_1), (2, "node-2", SHARD_2)] {
        storage.add_shard(&cpu, shard, node)?;
        storage.load_csv(&cpu, shard, csv.as_bytes())?;
    }
    Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(true)
        .pretty()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::from_json_file(path)?,
        None => NodeConfig::default(),
    };

    // Initialize metrics
    let metrics_addr = config
        .metrics_addr
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 9090)));
    if let Err(e) = metrics::init_metrics(metrics_addr) {
        error!("Failed to initialize metrics: {}", e);
    } else {
        info!("Metrics server listening on {}", metrics_addr);
    }

    info!("Starting TSQ demo cluster...");
    let storage = demo_storage()?;
    let transport = Arc::new(InProcessTransport::new());
    let coordinator_node = Arc::new(Node::new(config.clone(), Arc::clone(&storage), Arc::clone(&transport)));
    let worker_node = Arc::new(Node::new(
        NodeConfig {
            node_id: "node-2".to_string(),
            ..config.clone()
        },
        storage,
        Arc::clone(&transport),
    ));
    coordinator_node.start()?;
    worker_node.start()?;

    let coordinator = Coordinator::new(coordinator_node, Session::default());
    let query = Query::new(Relation::table("cpu"))
        .select(Expr::column("region"))
        .select_as(Expr::count_star(), "samples")
        .select_as(Expr::function("max", vec![Expr::column("value")]), "peak")
        .filter(Expr::binary(Expr::column("value"), BinaryOperator::Gt, Expr::float(0.2)))
        .group_by(Expr::column("region"));

    let result = coordinator.execute(&query).await?;
    info!("{}", result.columns.join(" | "));
    for row in result.rows() {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        info!("{}", cells.join(" | "));
    }

    info!("Shutting down...");
    Ok(())
}
