//! Block Propagation Visualization
//!
//! Serves a running simulation to a browser frontend.
//!
//! # Architecture
//!
//! - **Run task**: Drains the simulation in logical-time windows and
//!   publishes a snapshot after each window
//! - **WebSocket**: Streams telemetry events as they are emitted
//! - **REST API**: Start, pause and resume runs, get network state
//!
//! # Usage
//!
//! ```ignore
//! let server = VisServer::new();
//! server.state().start(StartRequest::default()).await?;
//! server.serve(3000).await?;
//! ```

mod server;

pub use server::{AppState, StartRequest, StatusResponse, VisServer, DEFAULT_WINDOW};
