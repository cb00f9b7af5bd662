#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use sos_store::{
    config::AppConfig,
    db,
    entities::ProductModel,
    events::{Event, EventSender},
    services::{
        AddToCartInput, CartService, CatalogService, NewProduct, OrderService, SalesLedger,
        ServiceFactory, ShopperSession,
    },
};
use tokio::sync::mpsc;

/// Helper harness backed by an in-memory SQLite database.
pub struct TestApp {
    pub db: Arc<db::DbPool>,
    pub catalog: CatalogService,
    pub carts: CartService,
    pub orders: OrderService,
    pub sales: SalesLedger,
    events: mpsc::Receiver<Event>,
}

impl TestApp {
    /// Construct a new test application with a fresh, migrated database.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // Every pooled connection to sqlite::memory: would see its own database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (sender, events) = EventSender::channel(1024);
        let factory = ServiceFactory::new(db.clone(), Some(sender));

        Self {
            catalog: factory.catalog_service(),
            carts: factory.cart_service(),
            orders: factory.order_service(),
            sales: factory.sales_ledger(),
            db,
            events,
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> ProductModel {
        self.catalog
            .create_product(NewProduct {
                name: name.to_string(),
                price,
                stock,
                colors: "Black,White".to_string(),
                sizes: "40,41,42,43".to_string(),
                image: String::new(),
            })
            .await
            .expect("seed product")
    }

    pub async fn stock_of(&self, product_id: i32) -> i32 {
        self.catalog
            .get_product(product_id)
            .await
            .expect("product exists")
            .stock
    }

    /// A signed-in session for `user_id` with whatever cart they had stored.
    pub async fn shopper(&self, user_id: i32) -> ShopperSession {
        let mut session = ShopperSession::guest();
        self.carts
            .login(&mut session, user_id)
            .await
            .expect("login");
        session
    }

    pub async fn add(&self, session: &mut ShopperSession, product_id: i32, quantity: i32) {
        self.add_variant(session, product_id, "Black", "42", quantity)
            .await;
    }

    pub async fn add_variant(
        &self,
        session: &mut ShopperSession,
        product_id: i32,
        color: &str,
        size: &str,
        quantity: i32,
    ) {
        self.carts
            .add_item(
                session,
                AddToCartInput {
                    product_id,
                    color: color.to_string(),
                    size: size.to_string(),
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    /// Makes every later `operation` (`INSERT`, `UPDATE`, `DELETE`) on `table`
    /// fail with a storage error.
    pub async fn fail_writes(&self, operation: &str, table: &str) {
        let sql = format!(
            "CREATE TRIGGER fail_{op}_{table} BEFORE {op} ON {table} \
             BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END;",
            op = operation,
            table = table
        );
        self.db
            .execute(Statement::from_string(DatabaseBackend::Sqlite, sql))
            .await
            .expect("create failing trigger");
    }

    /// Events published so far, in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
