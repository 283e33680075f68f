//! # Trawl Datasources
//!
//! Datasource registry and the built-in datasources shipped with the
//! gateway.
//!
//! - **memory**: searches a fixed record set loaded from configuration or
//!   a JSON-lines file.
//! - **live**: accepts pushed documents and broadcasts deduplicated graph
//!   nodes to every connected session.
//!
//! External backends plug in by registering a factory under their type
//! name with [`DatasourceRegistry::register`].

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod flatten;
pub mod live;
pub mod memory;
pub mod registry;

pub use flatten::{flatten, type_name};
pub use live::LiveDatasource;
pub use memory::MemoryDatasource;
pub use registry::{DatasourceFactory, DatasourceRegistry, DatasourceSpec, RegistryError};
