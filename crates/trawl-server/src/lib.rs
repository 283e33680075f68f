//! # Trawl Server
//!
//! WebSocket front end of the Trawl aggregation gateway. Each connection
//! is a session speaking a JSON request/response protocol: searches fan
//! out to every requested datasource, results are deduplicated into graph
//! nodes and streamed back in batches, and pushed documents are broadcast
//! to every connected session.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod error;
pub mod fields;
pub mod guard;
pub mod hub;
pub mod items;
pub mod metrics;
pub mod outbound;
pub mod protocol;
pub mod request;
pub mod search;
pub mod server;
pub mod session;

pub use config::{ServerConfig, SessionConfig};
pub use error::{ConfigError, GatewayError};
pub use hub::Hub;
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{router, BuildInfo, Gateway};
pub use session::SessionContext;
