//! Block Propagation Visualization Server
//!
//! Start a flooding run and serve it to the visualization frontend.

use blockprop_vis::{StartRequest, VisServer};
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blockprop_vis=info,blockprop_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line args: [request.json] [port]
    let args: Vec<String> = env::args().collect();

    let request = match args.get(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<StartRequest>(&raw)?
        }
        None => StartRequest::default(),
    };

    let port: u16 = args.get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(3000);

    println!("Block Propagation Visualizer");
    println!("============================");
    println!();
    println!("Nodes: {}", request.settings.node_count);
    println!("Seed: {}", request.settings.seed);
    println!("Open http://localhost:{} to watch the run.", port);
    println!();

    let server = VisServer::new();
    server.state().start(request).await?;
    server.serve(port).await?;

    Ok(())
}
