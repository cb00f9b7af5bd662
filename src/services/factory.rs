use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventSender,
    services::{
        cart::CartService, catalog::CatalogService, orders::OrderService, sales::SalesLedger,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
}

impl ServiceFactory {
    /// Creates a new service factory. Without an event sender, services skip
    /// event publication.
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    pub fn catalog_service(&self) -> CatalogService {
        CatalogService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn sales_ledger(&self) -> SalesLedger {
        SalesLedger::new(self.db_pool.clone())
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub sales: Arc<SalesLedger>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            catalog: Arc::new(factory.catalog_service()),
            carts: Arc::new(factory.cart_service()),
            orders: Arc::new(factory.order_service()),
            sales: Arc::new(factory.sales_ledger()),
        }
    }
}
