//! Gateway: the TAXII HTTP server.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Open the database and sync configured services, collections, accounts
//! 3. Build the service registry from stored services
//! 4. Start the HTTP server (TAXII catch-all route, health, token issue)
//!
//! Each request is routed to a service by path and run through the message
//! pipeline in `dispatch.rs`; the per-service handlers live in `handlers/`.

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod state;
pub mod sync;

pub use {
    error::{Error, HandlerError, Result},
    registry::{Service, ServiceRegistry},
    server::{build_gateway_app, start_gateway},
    state::{GatewaySettings, GatewayState},
    sync::{SyncReport, open_database, sync_config},
};
