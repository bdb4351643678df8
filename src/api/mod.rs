//! Control-plane API - typed client for the core's local REST interface

mod client;
mod models;

pub use client::{ApiError, ControlPlaneClient};
pub use models::{ConnectionData, ConnectionMetadata, ConnectionsResponse, VersionResponse};
