use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{
    db::{unit_of_work, DbPool},
    entities::{
        order::{self, OrderStatus},
        order_item, Order, OrderItem, OrderItemModel, OrderModel, SalesRecordModel,
    },
    errors::{ServiceError, StockShortfall},
    events::{publish, Event, EventSender},
    services::{
        cart::{clear_stored_lines, Cart, CartLine, ShopperSession},
        catalog::CatalogService,
        order_status::{is_valid_transition, Actor},
        sales::SalesLedger,
        tracking::{format_tracking_code, parse_tracking_code},
    },
};

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order_id: i32,
    pub tracking_code: String,
    pub total: Decimal,
    pub status: OrderStatus,
}

/// An order with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetails {
    pub tracking_code: String,
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

impl OrderDetails {
    /// Sum of the item line totals; equals `order.total_price`.
    pub fn items_total(&self) -> Decimal {
        self.items.iter().map(OrderItemModel::line_total).sum()
    }
}

/// Order lifecycle engine: checkout, the staff fulfillment pipeline,
/// cancellation with stock restoration, and completion into the sales ledger.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Checks out the session cart. On success the cart is emptied in memory
    /// and in storage.
    pub async fn place_order(
        &self,
        session: &mut ShopperSession,
    ) -> Result<PlacedOrder, ServiceError> {
        let user_id = session.user_id().ok_or_else(|| {
            ServiceError::ValidationError("Sign in before placing an order".to_string())
        })?;

        let placed = self.place_order_for(user_id, &session.cart).await?;
        session.cart.clear();
        Ok(placed)
    }

    /// Turns `cart` into a pending order for `customer_id`.
    ///
    /// Stock is re-read and decremented inside one transaction together with
    /// the order and item inserts and the stored-cart cleanup. When any line
    /// exceeds live stock nothing is written and every offending line is
    /// reported.
    #[instrument(skip(self, cart), fields(lines = cart.lines().len()))]
    pub async fn place_order_for(
        &self,
        customer_id: i32,
        cart: &Cart,
    ) -> Result<PlacedOrder, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        if let Some(bad) = cart.lines().iter().find(|line| line.quantity < 1) {
            return Err(ServiceError::ValidationError(format!(
                "{} ({}, {}): quantity must be at least 1, got {}",
                bad.product_name, bad.color, bad.size, bad.quantity
            )));
        }

        let lines = cart.lines().to_vec();
        let total = cart.subtotal();

        let result = unit_of_work(&self.db_pool, move |txn| {
            Box::pin(async move {
                let shortfalls = find_shortfalls(txn, &lines).await?;
                if !shortfalls.is_empty() {
                    return Err(ServiceError::InsufficientStock(shortfalls));
                }

                let now = Utc::now();
                let order = order::ActiveModel {
                    customer_id: Set(customer_id),
                    status: Set(OrderStatus::Pending),
                    total_price: Set(total),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let items = lines.iter().map(|line| order_item::ActiveModel {
                    order_id: Set(order.id),
                    product_id: Set(line.product_id),
                    quantity: Set(line.quantity),
                    color: Set(line.color.clone()),
                    size: Set(line.size.clone()),
                    unit_price: Set(line.unit_price),
                    ..Default::default()
                });
                OrderItem::insert_many(items).exec(txn).await?;

                for line in &lines {
                    if !CatalogService::decrement_stock(txn, line.product_id, line.quantity).await? {
                        // Another checkout took the stock after validation.
                        let available = CatalogService::find_product(txn, line.product_id)
                            .await?
                            .map_or(0, |p| p.stock);
                        return Err(ServiceError::InsufficientStock(vec![shortfall_for(
                            line, available,
                        )]));
                    }
                }

                clear_stored_lines(txn, customer_id).await?;
                Ok(order)
            })
        })
        .await;

        let order = match result {
            Ok(order) => order,
            Err(err) => {
                if let ServiceError::InsufficientStock(lines) = &err {
                    counter!("sos_checkout_rejected_total", 1, "reason" => "insufficient_stock");
                    warn!(customer_id, offending_lines = lines.len(), "Checkout rejected");
                } else {
                    error!(customer_id, error = %err, "Checkout failed");
                }
                return Err(err);
            }
        };

        counter!("sos_orders_placed_total", 1);
        let tracking_code = format_tracking_code(order.id);
        info!(order_id = order.id, %tracking_code, total = %order.total_price, "Order placed");

        publish(
            self.event_sender.as_ref(),
            Event::OrderPlaced {
                order_id: order.id,
                customer_id,
                total: order.total_price,
            },
        )
        .await;

        Ok(PlacedOrder {
            order_id: order.id,
            tracking_code,
            total: order.total_price,
            status: order.status,
        })
    }

    /// Cancels an order and restores its stock in one transaction.
    ///
    /// Customers may cancel their own `Pending` orders; staff may cancel any
    /// order that is `Pending` or `Processing`.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: i32,
        actor: Actor,
    ) -> Result<OrderModel, ServiceError> {
        let (order, from, restored_units) = unit_of_work(&self.db_pool, move |txn| {
            Box::pin(async move {
                let current = load_for_actor(txn, order_id, actor).await?;
                ensure_transition(&current, OrderStatus::Cancelled, actor)?;

                swap_status(txn, &current, OrderStatus::Cancelled).await?;

                let items = items_of(txn, order_id).await?;
                let mut restored = 0;
                for item in &items {
                    CatalogService::increment_stock(txn, item.product_id, item.quantity).await?;
                    restored += item.quantity;
                }

                let updated = reload(txn, order_id).await?;
                Ok((updated, current.status, restored))
            })
        })
        .await?;

        counter!("sos_orders_cancelled_total", 1);
        info!(order_id, %from, restored_units, "Order cancelled");

        publish(
            self.event_sender.as_ref(),
            Event::OrderStatusChanged {
                order_id,
                from,
                to: OrderStatus::Cancelled,
            },
        )
        .await;
        publish(
            self.event_sender.as_ref(),
            Event::OrderCancelled {
                order_id,
                restored_units,
            },
        )
        .await;

        Ok(order)
    }

    /// Completes a shipped order and appends its sale to the ledger in the
    /// same transaction.
    #[instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        order_id: i32,
    ) -> Result<(OrderModel, SalesRecordModel), ServiceError> {
        let (order, sale) = unit_of_work(&self.db_pool, move |txn| {
            Box::pin(async move {
                let current = load_for_actor(txn, order_id, Actor::Staff).await?;
                ensure_transition(&current, OrderStatus::Completed, Actor::Staff)?;

                swap_status(txn, &current, OrderStatus::Completed).await?;
                let sale = SalesLedger::record(txn, order_id, current.total_price).await?;

                let updated = reload(txn, order_id).await?;
                Ok((updated, sale))
            })
        })
        .await?;

        counter!("sos_orders_completed_total", 1);
        info!(order_id, amount = %sale.amount, "Order completed");

        publish(
            self.event_sender.as_ref(),
            Event::OrderStatusChanged {
                order_id,
                from: OrderStatus::Shipped,
                to: OrderStatus::Completed,
            },
        )
        .await;
        publish(
            self.event_sender.as_ref(),
            Event::SaleRecorded {
                order_id,
                amount: sale.amount,
                recorded_at: sale.recorded_at,
            },
        )
        .await;

        Ok((order, sale))
    }

    /// Moves an order to `target`, running the cancellation or completion
    /// algorithm when the target calls for it.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: i32,
        target: OrderStatus,
        actor: Actor,
    ) -> Result<OrderModel, ServiceError> {
        match target {
            OrderStatus::Cancelled => return self.cancel_order(order_id, actor).await,
            OrderStatus::Completed if actor.is_staff() => {
                return self.mark_completed(order_id).await.map(|(order, _)| order)
            }
            _ => {}
        }

        let (order, from) = unit_of_work(&self.db_pool, move |txn| {
            Box::pin(async move {
                let current = load_for_actor(txn, order_id, actor).await?;
                ensure_transition(&current, target, actor)?;
                swap_status(txn, &current, target).await?;
                let updated = reload(txn, order_id).await?;
                Ok((updated, current.status))
            })
        })
        .await?;

        info!(order_id, %from, to = %target, "Order status updated");
        publish(
            self.event_sender.as_ref(),
            Event::OrderStatusChanged {
                order_id,
                from,
                to: target,
            },
        )
        .await;
        Ok(order)
    }

    /// Staff action: move the order one step along the fulfillment path.
    pub async fn advance_order(&self, order_id: i32) -> Result<OrderModel, ServiceError> {
        let current = self.get_order(order_id).await?.order;
        let next = current
            .status
            .next()
            .ok_or(ServiceError::OrderClosed {
                order_id,
                status: current.status,
            })?;
        self.transition(order_id, next, Actor::Staff).await
    }

    /// Retrieves an order with its items.
    pub async fn get_order(&self, order_id: i32) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db_pool;
        let order = Order::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| not_found(order_id))?;
        let items = items_of(db, order_id).await?;

        Ok(OrderDetails {
            tracking_code: format_tracking_code(order.id),
            order,
            items,
        })
    }

    /// Looks an order up by its tracking code. Customers only see their own.
    pub async fn find_by_tracking_code(
        &self,
        code: &str,
        actor: Actor,
    ) -> Result<OrderDetails, ServiceError> {
        let order_id = parse_tracking_code(code)?;
        let details = self.get_order(order_id).await?;
        if !actor.may_access(details.order.customer_id) {
            return Err(not_found(order_id));
        }
        Ok(details)
    }

    /// A customer's orders, newest first.
    pub async fn list_customer_orders(
        &self,
        customer_id: i32,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::Id)
            .all(&*self.db_pool)
            .await?)
    }

    /// Staff queue, oldest first, optionally narrowed to one status.
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = Order::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        Ok(query
            .order_by_asc(order::Column::Id)
            .all(&*self.db_pool)
            .await?)
    }

    /// Units of a product held by orders that have not reached a terminal
    /// state.
    pub async fn reserved_quantity(&self, product_id: i32) -> Result<i64, ServiceError> {
        let rows = OrderItem::find()
            .filter(order_item::Column::ProductId.eq(product_id))
            .find_also_related(Order)
            .all(&*self.db_pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter(|(_, order)| order.as_ref().is_some_and(|o| o.status.reserves_stock()))
            .map(|(item, _)| i64::from(item.quantity))
            .sum())
    }
}

fn not_found(order_id: i32) -> ServiceError {
    ServiceError::NotFound(format!(
        "Order {} not found",
        format_tracking_code(order_id)
    ))
}

fn shortfall_for(line: &CartLine, available: i32) -> StockShortfall {
    StockShortfall {
        product_id: line.product_id,
        product_name: line.product_name.clone(),
        color: line.color.clone(),
        size: line.size.clone(),
        requested: line.quantity,
        available,
    }
}

/// Every line whose product is gone, withdrawn, or short of the quantity the
/// whole cart asks for. Lines sharing a product draw on the same stock.
async fn find_shortfalls<C: ConnectionTrait>(
    conn: &C,
    lines: &[CartLine],
) -> Result<Vec<StockShortfall>, ServiceError> {
    let mut requested: HashMap<i32, i32> = HashMap::new();
    for line in lines {
        let total = requested.entry(line.product_id).or_insert(0);
        // An overflowing request can never be met.
        *total = total.checked_add(line.quantity).unwrap_or(i32::MAX);
    }

    let mut available: HashMap<i32, i32> = HashMap::new();
    for product_id in requested.keys() {
        let stock = CatalogService::find_product(conn, *product_id)
            .await?
            .filter(|p| p.available)
            .map_or(0, |p| p.stock);
        available.insert(*product_id, stock);
    }

    Ok(lines
        .iter()
        .filter_map(|line| {
            let stock = available.get(&line.product_id).copied().unwrap_or(0);
            let wanted = requested.get(&line.product_id).copied().unwrap_or(0);
            (wanted > stock).then(|| shortfall_for(line, stock))
        })
        .collect())
}

async fn load_for_actor<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
    actor: Actor,
) -> Result<OrderModel, ServiceError> {
    Order::find_by_id(order_id)
        .one(conn)
        .await?
        .filter(|order| actor.may_access(order.customer_id))
        .ok_or_else(|| not_found(order_id))
}

fn ensure_transition(
    order: &OrderModel,
    to: OrderStatus,
    actor: Actor,
) -> Result<(), ServiceError> {
    if is_valid_transition(order.status, to, actor) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition {
            order_id: order.id,
            from: order.status,
            to,
        })
    }
}

/// Writes the new status only if the row still holds the status that was
/// validated, so two racing transitions cannot both apply.
async fn swap_status<C: ConnectionTrait>(
    conn: &C,
    current: &OrderModel,
    to: OrderStatus,
) -> Result<(), ServiceError> {
    let result = Order::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(current.id))
        .filter(order::Column::Status.eq(current.status))
        .exec(conn)
        .await?;

    if result.rows_affected != 1 {
        let now = reload(conn, current.id).await?;
        return Err(ServiceError::InvalidTransition {
            order_id: current.id,
            from: now.status,
            to,
        });
    }
    Ok(())
}

async fn reload<C: ConnectionTrait>(conn: &C, order_id: i32) -> Result<OrderModel, ServiceError> {
    Order::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| not_found(order_id))
}

async fn items_of<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?)
}
