//! Shoe store order service library
//!
//! Catalog, persistent shopping carts, the order lifecycle with its stock
//! accounting, tracking codes and the sales ledger.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tracing::info;

use crate::{
    errors::ServiceError,
    events::EventSender,
    services::{ServiceContainer, ServiceFactory},
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub services: ServiceContainer,
}

impl AppState {
    /// Connects to the database, applies migrations when `auto_migrate` is
    /// set and starts the background event consumer.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(config: config::AppConfig) -> Result<Self, ServiceError> {
        let db = Arc::new(db::establish_connection_from_app_config(&config).await?);
        if config.auto_migrate {
            db::run_migrations(&db).await?;
        }

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        let factory = ServiceFactory::new(db.clone(), Some(event_sender.clone()));
        let services = ServiceContainer::new(&factory);

        info!(environment = %config.environment, "Application state initialized");
        Ok(Self {
            db,
            config,
            event_sender,
            services,
        })
    }
}
