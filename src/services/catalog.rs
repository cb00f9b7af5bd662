use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::{Validate, ValidationError};

use crate::{
    db::unit_of_work,
    entities::{cart_item, order_item, product, CartItem, OrderItem, Product, ProductModel},
    errors::ServiceError,
    events::{publish, Event, EventSender},
};

fn validate_positive_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price <= Decimal::ZERO {
        return Err(ValidationError::new("price_must_be_positive"));
    }
    Ok(())
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(format!(
            "Stock quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}

/// Input for adding a product to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    #[validate(custom = "validate_positive_price")]
    pub price: Decimal,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    pub colors: String,
    pub sizes: String,
    #[serde(default)]
    pub image: String,
}

/// Partial product edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProductUpdate {
    #[validate(length(min = 1, max = 255, message = "Product name cannot be empty"))]
    pub name: Option<String>,
    #[validate(custom = "validate_positive_price")]
    pub price: Option<Decimal>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: Option<i32>,
    pub colors: Option<String>,
    pub sizes: Option<String>,
    pub image: Option<String>,
    pub available: Option<bool>,
}

/// Browse filters for the storefront listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductFilter {
    pub name_contains: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub max_price: Option<Decimal>,
}

impl ProductFilter {
    fn matches_options(&self, product: &ProductModel) -> bool {
        let color_ok = self.color.as_deref().map_or(true, |wanted| {
            product
                .color_options()
                .iter()
                .any(|c| c.eq_ignore_ascii_case(wanted))
        });
        let size_ok = self.size.as_deref().map_or(true, |wanted| {
            product
                .size_options()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(wanted))
        });
        color_ok && size_ok
    }
}

/// How a product left the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Removal {
    /// Still referenced by orders; only marked unavailable.
    Soft,
    Hard,
}

/// Catalog store: product reads for the storefront, staff inventory edits and
/// the stock primitives the order engine calls inside its transactions.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Loads a product regardless of availability.
    pub async fn find_product<C: ConnectionTrait>(
        conn: &C,
        product_id: i32,
    ) -> Result<Option<ProductModel>, ServiceError> {
        Ok(Product::find_by_id(product_id).one(conn).await?)
    }

    /// Loads a product, failing with `NotFound` when it does not exist.
    pub async fn get_product(&self, product_id: i32) -> Result<ProductModel, ServiceError> {
        Self::find_product(&*self.db, product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Takes `quantity` units out of stock.
    ///
    /// The update is guarded by `stock >= quantity`, so a concurrent sale that
    /// got there first makes this return `Ok(false)` instead of driving stock
    /// negative.
    pub async fn decrement_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: i32,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        ensure_positive(quantity)?;
        let result = Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Puts `quantity` units back into stock.
    pub async fn increment_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        ensure_positive(quantity)?;
        let result = Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }
        Ok(())
    }

    /// Available products matching `filter`, ordered by name.
    #[instrument(skip(self))]
    pub async fn list_available(
        &self,
        filter: &ProductFilter,
    ) -> Result<Vec<ProductModel>, ServiceError> {
        let mut query = Product::find().filter(product::Column::Available.eq(true));

        if let Some(name) = filter.name_contains.as_deref().filter(|n| !n.trim().is_empty()) {
            query = query.filter(product::Column::Name.contains(name.trim()));
        }
        if let Some(max_price) = filter.max_price {
            query = query.filter(product::Column::Price.lte(max_price));
        }

        let products = query
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(products
            .into_iter()
            .filter(|p| filter.matches_options(p))
            .collect())
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: NewProduct) -> Result<ProductModel, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let model = product::ActiveModel {
            name: Set(input.name.trim().to_string()),
            price: Set(input.price),
            stock: Set(input.stock),
            colors: Set(input.colors),
            sizes: Set(input.sizes),
            image: Set(input.image),
            available: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = model.id, "Product created");
        publish(self.event_sender.as_ref(), Event::ProductUpdated(model.id)).await;
        Ok(model)
    }

    #[instrument(skip(self, update))]
    pub async fn update_product(
        &self,
        product_id: i32,
        update: ProductUpdate,
    ) -> Result<ProductModel, ServiceError> {
        update.validate()?;

        let existing = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = update.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(price) = update.price {
            active.price = Set(price);
        }
        if let Some(stock) = update.stock {
            active.stock = Set(stock);
        }
        if let Some(colors) = update.colors {
            active.colors = Set(colors);
        }
        if let Some(sizes) = update.sizes {
            active.sizes = Set(sizes);
        }
        if let Some(image) = update.image {
            active.image = Set(image);
        }
        if let Some(available) = update.available {
            active.available = Set(available);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        info!(product_id, "Product updated");
        publish(self.event_sender.as_ref(), Event::ProductUpdated(product_id)).await;
        Ok(updated)
    }

    /// Adds delivered units to stock.
    #[instrument(skip(self))]
    pub async fn restock(&self, product_id: i32, quantity: i32) -> Result<ProductModel, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Restock quantity must be positive, got {}",
                quantity
            )));
        }

        Self::increment_stock(&*self.db, product_id, quantity).await?;
        let product = self.get_product(product_id).await?;
        info!(product_id, quantity, stock = product.stock, "Product restocked");
        publish(self.event_sender.as_ref(), Event::ProductUpdated(product_id)).await;
        Ok(product)
    }

    /// Removes a product from the catalog.
    ///
    /// Products referenced by any order item are kept for history and only
    /// marked unavailable; everything else is deleted along with cart lines
    /// pointing at it.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: i32) -> Result<Removal, ServiceError> {
        let removal = unit_of_work(&self.db, move |txn| {
            Box::pin(async move {
                let existing = Self::find_product(txn, product_id).await?.ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", product_id))
                })?;

                let referenced = OrderItem::find()
                    .filter(order_item::Column::ProductId.eq(product_id))
                    .count(txn)
                    .await?
                    > 0;

                if referenced {
                    let mut active: product::ActiveModel = existing.into();
                    active.available = Set(false);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await?;
                    Ok(Removal::Soft)
                } else {
                    CartItem::delete_many()
                        .filter(cart_item::Column::ProductId.eq(product_id))
                        .exec(txn)
                        .await?;
                    Product::delete_by_id(product_id).exec(txn).await?;
                    Ok(Removal::Hard)
                }
            })
        })
        .await?;

        match removal {
            Removal::Soft => warn!(product_id, "Product referenced by orders; marked unavailable"),
            Removal::Hard => info!(product_id, "Product deleted"),
        }
        publish(
            self.event_sender.as_ref(),
            Event::ProductDeleted {
                product_id,
                soft: removal == Removal::Soft,
            },
        )
        .await;
        Ok(removal)
    }
}
