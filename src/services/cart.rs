use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    db::unit_of_work,
    entities::{cart, cart_item, Cart as CartRecord, CartItem, Product},
    errors::ServiceError,
    events::{publish, Event, EventSender},
    services::catalog::CatalogService,
};

/// Identity of a cart line: one row per (product, color, size).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineKey {
    pub product_id: i32,
    pub color: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: i32,
    pub product_name: String,
    pub color: String,
    pub size: String,
    pub quantity: i32,
    /// Price captured when the line was first added.
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn key(&self) -> LineKey {
        LineKey {
            product_id: self.product_id,
            color: self.color.clone(),
            size: self.size.clone(),
        }
    }

    fn same_line(&self, key: &LineKey) -> bool {
        self.product_id == key.product_id && self.color == key.color && self.size == key.size
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// In-memory shopping cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, key: &LineKey) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.same_line(key))
    }

    pub fn total_quantity(&self) -> i32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Adds a line, summing quantities when the same line already exists.
    pub fn add_line(&mut self, line: CartLine) {
        match self.lines.iter_mut().find(|l| l.same_line(&line.key())) {
            Some(existing) => existing.quantity += line.quantity,
            None => self.lines.push(line),
        }
    }

    fn set_quantity(&mut self, key: &LineKey, quantity: i32) -> bool {
        if quantity == 0 {
            return self.remove_line(key);
        }
        match self.lines.iter_mut().find(|l| l.same_line(key)) {
            Some(line) => {
                line.quantity = quantity;
                true
            }
            None => false,
        }
    }

    fn remove_line(&mut self, key: &LineKey) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| !line.same_line(key));
        self.lines.len() != before
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl FromIterator<CartLine> for Cart {
    fn from_iter<I: IntoIterator<Item = CartLine>>(iter: I) -> Self {
        let mut cart = Cart::new();
        for line in iter {
            cart.add_line(line);
        }
        cart
    }
}

/// Combines two carts without touching either input.
///
/// Lines of `first` keep their order; lines of `second` either add to a
/// matching line or are appended in their own order.
pub fn merge(first: &Cart, second: &Cart) -> Cart {
    if second.is_empty() {
        return first.clone();
    }
    if first.is_empty() {
        return second.clone();
    }

    let mut merged = first.clone();
    for line in second.lines() {
        merged.add_line(line.clone());
    }
    merged
}

/// Per-session shopping state, passed explicitly to every cart and checkout
/// call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShopperSession {
    user_id: Option<i32>,
    pub cart: Cart,
}

impl ShopperSession {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<i32> {
        self.user_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddToCartInput {
    pub product_id: i32,
    pub color: String,
    pub size: String,
    pub quantity: i32,
}

/// Keeps session carts and their stored copies in step.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds `quantity` units of a product variant to the session cart.
    ///
    /// Fails with `NotFound` for missing or unavailable products and with
    /// `OutOfStock` when the quantity is below one or the resulting line would
    /// exceed live stock. On failure the cart is left untouched.
    #[instrument(skip(self, session), fields(user_id = ?session.user_id()))]
    pub async fn add_item(
        &self,
        session: &mut ShopperSession,
        input: AddToCartInput,
    ) -> Result<Cart, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::OutOfStock(format!(
                "Quantity must be at least 1, got {}",
                input.quantity
            )));
        }

        let product = CatalogService::find_product(&*self.db, input.product_id)
            .await?
            .filter(|p| p.available)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let key = LineKey {
            product_id: product.id,
            color: input.color.clone(),
            size: input.size.clone(),
        };
        let already = session.cart.line(&key).map_or(0, |line| line.quantity);
        already
            .checked_add(input.quantity)
            .filter(|wanted| *wanted <= product.stock)
            .ok_or_else(|| {
                ServiceError::OutOfStock(format!(
                    "{} ({}, {}): requested {} with {} already in cart, only {} in stock",
                    product.name, input.color, input.size, input.quantity, already, product.stock
                ))
            })?;

        let mut updated = session.cart.clone();
        updated.add_line(CartLine {
            product_id: product.id,
            product_name: product.name,
            color: input.color,
            size: input.size,
            quantity: input.quantity,
            unit_price: product.price,
        });

        self.commit(session, updated).await
    }

    /// Replaces a line's quantity; zero removes the line.
    #[instrument(skip(self, session), fields(user_id = ?session.user_id()))]
    pub async fn set_quantity(
        &self,
        session: &mut ShopperSession,
        key: &LineKey,
        quantity: i32,
    ) -> Result<Cart, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity cannot be negative, got {}",
                quantity
            )));
        }
        if session.cart.line(key).is_none() {
            return Err(ServiceError::NotFound(format!(
                "Cart line for product {} ({}, {}) not found",
                key.product_id, key.color, key.size
            )));
        }

        if quantity > 0 {
            let product = CatalogService::find_product(&*self.db, key.product_id)
                .await?
                .filter(|p| p.available)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", key.product_id))
                })?;
            if quantity > product.stock {
                return Err(ServiceError::OutOfStock(format!(
                    "{} ({}, {}): requested {}, only {} in stock",
                    product.name, key.color, key.size, quantity, product.stock
                )));
            }
        }

        let mut updated = session.cart.clone();
        updated.set_quantity(key, quantity);
        self.commit(session, updated).await
    }

    /// Drops one line from the session cart.
    pub async fn remove_line(
        &self,
        session: &mut ShopperSession,
        key: &LineKey,
    ) -> Result<Cart, ServiceError> {
        let mut updated = session.cart.clone();
        if !updated.remove_line(key) {
            return Ok(updated);
        }
        self.commit(session, updated).await
    }

    /// Empties the session cart and its stored copy.
    pub async fn remove_all(&self, session: &mut ShopperSession) -> Result<Cart, ServiceError> {
        session.cart.clear();
        if let Some(user_id) = session.user_id {
            self.clear_persisted(user_id).await?;
        }
        Ok(session.cart.clone())
    }

    /// Authenticates the session: the stored cart is merged with whatever the
    /// guest collected and the result is saved.
    #[instrument(skip(self, session))]
    pub async fn login(
        &self,
        session: &mut ShopperSession,
        user_id: i32,
    ) -> Result<Cart, ServiceError> {
        let stored = self.load(user_id).await?;
        let merged = merge(&stored, &session.cart);
        self.persist(user_id, &merged).await?;

        session.user_id = Some(user_id);
        session.cart = merged;
        info!(user_id, lines = session.cart.lines().len(), "Shopper logged in");
        Ok(session.cart.clone())
    }

    /// Saves the cart and resets the session to an empty guest session. The
    /// stored cart outlives the session.
    #[instrument(skip(self, session), fields(user_id = ?session.user_id()))]
    pub async fn logout(&self, session: &mut ShopperSession) -> Result<(), ServiceError> {
        if let Some(user_id) = session.user_id {
            self.persist(user_id, &session.cart).await?;
        }
        *session = ShopperSession::guest();
        Ok(())
    }

    async fn commit(
        &self,
        session: &mut ShopperSession,
        updated: Cart,
    ) -> Result<Cart, ServiceError> {
        if let Some(user_id) = session.user_id {
            self.persist(user_id, &updated).await?;
        }
        session.cart = updated;
        Ok(session.cart.clone())
    }

    /// Replaces the stored lines of the user's cart with `cart` in one
    /// transaction.
    #[instrument(skip(self, cart), fields(lines = cart.lines().len()))]
    pub async fn persist(&self, user_id: i32, cart: &Cart) -> Result<(), ServiceError> {
        let lines = cart.lines().to_vec();
        let line_count = lines.len();

        unit_of_work(&self.db, move |txn| {
            Box::pin(async move {
                let cart_id = find_or_create_cart(txn, user_id).await?;

                CartItem::delete_many()
                    .filter(cart_item::Column::CartId.eq(cart_id))
                    .exec(txn)
                    .await?;

                if !lines.is_empty() {
                    let rows = lines.into_iter().map(|line| cart_item::ActiveModel {
                        cart_id: Set(cart_id),
                        product_id: Set(line.product_id),
                        color: Set(line.color),
                        size: Set(line.size),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        ..Default::default()
                    });
                    CartItem::insert_many(rows).exec(txn).await?;
                }
                Ok(())
            })
        })
        .await?;

        debug!(user_id, lines = line_count, "Cart persisted");
        publish(
            self.event_sender.as_ref(),
            Event::CartSaved {
                user_id,
                lines: line_count,
            },
        )
        .await;
        Ok(())
    }

    /// Rebuilds the user's cart from storage.
    ///
    /// Lines whose product has been withdrawn or no longer has enough stock are
    /// dropped without error.
    #[instrument(skip(self))]
    pub async fn load(&self, user_id: i32) -> Result<Cart, ServiceError> {
        let Some(record) = CartRecord::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(Cart::new());
        };

        let rows = CartItem::find()
            .filter(cart_item::Column::CartId.eq(record.id))
            .order_by_asc(cart_item::Column::Id)
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let stored = rows.len();
        let cart: Cart = rows
            .into_iter()
            .filter_map(|(item, product)| {
                let product = product.filter(|p| p.can_supply(item.quantity))?;
                Some(CartLine {
                    product_id: item.product_id,
                    product_name: product.name,
                    color: item.color,
                    size: item.size,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
            })
            .collect();

        let dropped = stored - cart.lines().len();
        if dropped > 0 {
            info!(user_id, dropped, "Dropped stale cart lines on load");
        }
        Ok(cart)
    }

    /// Deletes every stored line of the user's cart.
    pub async fn clear_persisted(&self, user_id: i32) -> Result<(), ServiceError> {
        clear_stored_lines(&*self.db, user_id).await?;
        debug!(user_id, "Stored cart cleared");
        Ok(())
    }
}

async fn find_or_create_cart<C: ConnectionTrait>(conn: &C, user_id: i32) -> Result<i32, ServiceError> {
    let now = Utc::now();
    let existing = CartRecord::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    let record = match existing {
        Some(record) => {
            let mut active: cart::ActiveModel = record.into();
            active.updated_at = Set(now);
            active.update(conn).await?
        }
        None => {
            cart::ActiveModel {
                user_id: Set(user_id),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?
        }
    };
    Ok(record.id)
}

/// Deletes the stored lines of a user's cart on any connection, so checkout
/// can clear the cart inside its own transaction.
pub(crate) async fn clear_stored_lines<C: ConnectionTrait>(
    conn: &C,
    user_id: i32,
) -> Result<(), ServiceError> {
    let record = CartRecord::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    if let Some(record) = record {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(record.id))
            .exec(conn)
            .await?;
    }
    Ok(())
}
