mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sos_store::{
    entities::OrderStatus,
    errors::ServiceError,
    events::Event,
    services::{Actor, Cart, CartLine},
};

fn line(product_id: i32, name: &str, quantity: i32, unit_price: rust_decimal::Decimal) -> CartLine {
    CartLine {
        product_id,
        product_name: name.to_string(),
        color: "Black".to_string(),
        size: "42".to_string(),
        quantity,
        unit_price,
    }
}

#[tokio::test]
async fn checkout_rejects_every_short_line_and_writes_nothing() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 5).await;
    let loafer = app.seed_product("Loafer", dec!(120.00), 0).await;

    let cart: Cart = vec![
        line(runner.id, "Runner", 2, runner.price),
        line(loafer.id, "Loafer", 1, loafer.price),
    ]
    .into_iter()
    .collect();

    let err = app
        .orders
        .place_order_for(11, &cart)
        .await
        .expect_err("loafer is sold out");

    let shortfalls = err.shortfalls();
    assert_eq!(shortfalls.len(), 1);
    assert_eq!(shortfalls[0].product_id, loafer.id);
    assert_eq!(shortfalls[0].requested, 1);
    assert_eq!(shortfalls[0].available, 0);

    assert_eq!(app.stock_of(runner.id).await, 5);
    assert!(app.orders.list_orders(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn checkout_rejects_non_positive_line_quantities() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(10.00), 5).await;

    for quantity in [-3, 0] {
        let cart: Cart = vec![line(runner.id, "Runner", quantity, runner.price)]
            .into_iter()
            .collect();
        assert_matches!(
            app.orders.place_order_for(12, &cart).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    assert_eq!(app.stock_of(runner.id).await, 5);
    assert!(app.orders.list_orders(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_requests_are_shortfalls_not_overflows() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 5).await;

    let mut white = line(runner.id, "Runner", 1, runner.price);
    white.color = "White".to_string();
    let cart: Cart = vec![line(runner.id, "Runner", i32::MAX, runner.price), white]
        .into_iter()
        .collect();

    let err = app.orders.place_order_for(13, &cart).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(ref lines) if lines.len() == 2);
    assert_eq!(app.stock_of(runner.id).await, 5);
}

#[tokio::test]
async fn storage_failure_mid_checkout_rolls_everything_back() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 5).await;

    let mut session = app.shopper(14).await;
    app.add(&mut session, runner.id, 2).await;
    // Order and item inserts succeed; the stock decrement that follows fails.
    app.fail_writes("UPDATE", "products").await;

    assert_matches!(
        app.orders.place_order(&mut session).await,
        Err(ServiceError::TransactionFailure(_))
    );

    assert_eq!(app.stock_of(runner.id).await, 5);
    assert!(app.orders.list_orders(None).await.unwrap().is_empty());
    assert_eq!(session.cart.total_quantity(), 2);
    assert_eq!(app.carts.load(14).await.unwrap(), session.cart);
}

#[tokio::test]
async fn lines_of_one_product_share_its_stock() {
    let app = TestApp::new().await;
    let boot = app.seed_product("Chelsea Boot", dec!(150.00), 3).await;

    let mut session = app.shopper(4).await;
    app.add_variant(&mut session, boot.id, "Black", "42", 2).await;
    app.add_variant(&mut session, boot.id, "White", "42", 2).await;

    let err = app.orders.place_order(&mut session).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(ref lines) if lines.len() == 2);
    assert_eq!(app.stock_of(boot.id).await, 3);
    assert_eq!(session.cart.total_quantity(), 4);
}

#[tokio::test]
async fn successful_checkout_creates_pending_order_and_clears_cart() {
    let mut app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 5).await;
    let sandal = app.seed_product("Sandal", dec!(62.50), 4).await;

    let mut session = app.shopper(21).await;
    app.add(&mut session, runner.id, 2).await;
    app.add(&mut session, sandal.id, 1).await;

    let placed = app.orders.place_order(&mut session).await.unwrap();

    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.total, dec!(222.50));
    assert_eq!(placed.tracking_code, format!("SOS{:03}", placed.order_id));
    assert!(session.cart.is_empty());
    assert!(app.carts.load(21).await.unwrap().is_empty());

    assert_eq!(app.stock_of(runner.id).await, 3);
    assert_eq!(app.stock_of(sandal.id).await, 3);

    let details = app.orders.get_order(placed.order_id).await.unwrap();
    assert_eq!(details.items.len(), 2);
    assert_eq!(details.items_total(), details.order.total_price);
    assert_eq!(details.order.customer_id, 21);

    let events = app.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::OrderPlaced { order_id, customer_id: 21, .. } if *order_id == placed.order_id
    )));
}

#[tokio::test]
async fn empty_cart_and_guest_checkout_are_rejected() {
    let app = TestApp::new().await;

    let mut session = app.shopper(5).await;
    assert_matches!(
        app.orders.place_order(&mut session).await,
        Err(ServiceError::EmptyCart)
    );

    let runner = app.seed_product("Runner", dec!(80.00), 5).await;
    let mut guest = sos_store::services::ShopperSession::guest();
    app.add(&mut guest, runner.id, 1).await;
    assert_matches!(
        app.orders.place_order(&mut guest).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(guest.cart.total_quantity(), 1);
}

#[tokio::test]
async fn seventh_order_walks_the_pipeline_into_the_ledger() {
    let mut app = TestApp::new().await;
    let sandal = app.seed_product("Sandal", dec!(62.50), 20).await;

    let mut last = None;
    for customer in 1..=7 {
        let mut session = app.shopper(customer).await;
        app.add(&mut session, sandal.id, 1).await;
        last = Some(app.orders.place_order(&mut session).await.unwrap());
    }
    let seventh = last.unwrap();
    assert_eq!(seventh.tracking_code, "SOS007");

    let tracked = app
        .orders
        .find_by_tracking_code("SOS007", Actor::Staff)
        .await
        .unwrap();
    assert_eq!(tracked.order.customer_id, 7);

    let mut seen = vec![tracked.order.status];
    for _ in 0..4 {
        let order = app.orders.advance_order(seventh.order_id).await.unwrap();
        seen.push(order.status);
    }
    assert_eq!(
        seen,
        vec![
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::ToShip,
            OrderStatus::Shipped,
            OrderStatus::Completed,
        ]
    );

    let sale = app
        .sales
        .for_order(seventh.order_id)
        .await
        .unwrap()
        .expect("completion records a sale");
    assert_eq!(sale.amount, dec!(62.50));

    assert_matches!(
        app.orders.advance_order(seventh.order_id).await,
        Err(ServiceError::OrderClosed {
            status: OrderStatus::Completed,
            ..
        })
    );

    let events = app.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::SaleRecorded { order_id, .. } if *order_id == seventh.order_id)));
}

#[tokio::test]
async fn states_cannot_be_skipped() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 5).await;
    let mut session = app.shopper(3).await;
    app.add(&mut session, runner.id, 1).await;
    let placed = app.orders.place_order(&mut session).await.unwrap();

    assert_matches!(
        app.orders
            .transition(placed.order_id, OrderStatus::Shipped, Actor::Staff)
            .await,
        Err(ServiceError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Shipped,
            ..
        })
    );
    assert_matches!(
        app.orders
            .transition(placed.order_id, OrderStatus::Completed, Actor::Staff)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_matches!(
        app.orders
            .transition(placed.order_id, OrderStatus::Processing, Actor::Customer(3))
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );

    let details = app.orders.get_order(placed.order_id).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn cancellation_restores_stock_exactly_once() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 5).await;

    let mut session = app.shopper(8).await;
    app.add(&mut session, runner.id, 3).await;
    let placed = app.orders.place_order(&mut session).await.unwrap();
    assert_eq!(app.stock_of(runner.id).await, 2);

    let cancelled = app
        .orders
        .cancel_order(placed.order_id, Actor::Customer(8))
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(app.stock_of(runner.id).await, 5);

    assert_matches!(
        app.orders.cancel_order(placed.order_id, Actor::Staff).await,
        Err(ServiceError::InvalidTransition {
            from: OrderStatus::Cancelled,
            ..
        })
    );
    assert_eq!(app.stock_of(runner.id).await, 5);
}

#[tokio::test]
async fn who_may_cancel_depends_on_status() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 10).await;

    let mut session = app.shopper(9).await;
    app.add(&mut session, runner.id, 2).await;
    let processing = app.orders.place_order(&mut session).await.unwrap();
    app.orders.advance_order(processing.order_id).await.unwrap();

    assert_matches!(
        app.orders
            .cancel_order(processing.order_id, Actor::Customer(9))
            .await,
        Err(ServiceError::InvalidTransition {
            from: OrderStatus::Processing,
            ..
        })
    );
    app.orders
        .cancel_order(processing.order_id, Actor::Staff)
        .await
        .unwrap();
    assert_eq!(app.stock_of(runner.id).await, 10);

    app.add(&mut session, runner.id, 1).await;
    let shipped = app.orders.place_order(&mut session).await.unwrap();
    for _ in 0..3 {
        app.orders.advance_order(shipped.order_id).await.unwrap();
    }
    assert_matches!(
        app.orders.cancel_order(shipped.order_id, Actor::Staff).await,
        Err(ServiceError::InvalidTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Cancelled,
            ..
        })
    );
    assert_eq!(app.stock_of(runner.id).await, 9);
}

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 5).await;

    let mut owner = app.shopper(30).await;
    app.add(&mut owner, runner.id, 1).await;
    let placed = app.orders.place_order(&mut owner).await.unwrap();

    assert_matches!(
        app.orders
            .find_by_tracking_code(&placed.tracking_code, Actor::Customer(31))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.orders
            .cancel_order(placed.order_id, Actor::Customer(31))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert!(app
        .orders
        .find_by_tracking_code(&placed.tracking_code, Actor::Customer(30))
        .await
        .is_ok());

    assert_eq!(app.orders.list_customer_orders(30).await.unwrap().len(), 1);
    assert!(app.orders.list_customer_orders(31).await.unwrap().is_empty());
    assert_matches!(
        app.orders.find_by_tracking_code("ORD001", Actor::Staff).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn stock_is_conserved_across_the_lifecycle() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 10).await;

    let mut ids = Vec::new();
    for (customer, quantity) in [(1, 2), (2, 3), (3, 1)] {
        let mut session = app.shopper(customer).await;
        app.add(&mut session, runner.id, quantity).await;
        ids.push(app.orders.place_order(&mut session).await.unwrap().order_id);
    }

    app.orders.cancel_order(ids[1], Actor::Staff).await.unwrap();
    for _ in 0..4 {
        app.orders.advance_order(ids[0]).await.unwrap();
    }

    let stock = i64::from(app.stock_of(runner.id).await);
    let reserved = app.orders.reserved_quantity(runner.id).await.unwrap();
    let sold: i64 = app
        .orders
        .list_orders(Some(OrderStatus::Completed))
        .await
        .unwrap()
        .len() as i64
        * 2;

    assert_eq!(stock, 7);
    assert_eq!(reserved, 1);
    assert_eq!(stock + reserved + sold, 10);
}

#[tokio::test]
async fn last_unit_goes_to_exactly_one_checkout() {
    let app = TestApp::new().await;
    let runner = app.seed_product("Runner", dec!(80.00), 1).await;
    let cart: Cart = vec![line(runner.id, "Runner", 1, runner.price)]
        .into_iter()
        .collect();

    let mut tasks = Vec::new();
    for customer in [41, 42] {
        let orders = app.orders.clone();
        let cart = cart.clone();
        tasks.push(tokio::spawn(async move {
            orders.place_order_for(customer, &cart).await
        }));
    }

    let mut placed = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(_) => placed += 1,
            Err(ServiceError::InsufficientStock(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((placed, rejected), (1, 1));
    assert_eq!(app.stock_of(runner.id).await, 0);
}
