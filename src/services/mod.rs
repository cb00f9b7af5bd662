// Storefront
pub mod cart;
pub mod catalog;

// Order lifecycle
pub mod order_status;
pub mod orders;
pub mod tracking;

// Reporting
pub mod sales;

// Service factory for dependency injection
pub mod factory;

pub use cart::{merge, AddToCartInput, Cart, CartLine, CartService, LineKey, ShopperSession};
pub use catalog::{CatalogService, NewProduct, ProductFilter, ProductUpdate, Removal};
pub use factory::{ServiceContainer, ServiceFactory};
pub use order_status::Actor;
pub use orders::{OrderDetails, OrderService, PlacedOrder};
pub use sales::{SalesLedger, SalesSummary};
pub use tracking::{format_tracking_code, parse_tracking_code};
