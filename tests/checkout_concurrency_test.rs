mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{shipping_json, TestApp};
use shoe_shop_api::{
    entities::PaymentMethod,
    errors::ServiceError,
    services::{cart::AddToCartInput, orders::CheckoutInput},
};
use tokio::sync::Barrier;
use uuid::Uuid;

const POOL_SIZE: u32 = 8;

fn checkout_input() -> CheckoutInput {
    CheckoutInput {
        shipping_info: serde_json::from_value(shipping_json()).expect("shipping info"),
        payment_method: PaymentMethod::Cod,
        shipping_fee: 0,
        items_subtotal: None,
        total_price: None,
    }
}

async fn fill_cart(app: &TestApp, user_id: Uuid, product_id: Uuid, size: i32, quantity: i32) {
    app.state
        .services
        .cart
        .add_item(
            user_id,
            AddToCartInput {
                product_id,
                size,
                quantity,
            },
        )
        .await
        .expect("add to cart");
}

/// Runs one checkout per user, all released at the same moment.
async fn checkout_together(
    app: &TestApp,
    users: Vec<Uuid>,
) -> Vec<Result<shoe_shop_api::services::orders::OrderView, ServiceError>> {
    let barrier = Arc::new(Barrier::new(users.len()));
    let tasks: Vec<_> = users
        .into_iter()
        .map(|user_id| {
            let orders = app.state.services.orders.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                orders.checkout(user_id, checkout_input()).await
            })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.expect("task panicked"));
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_for_the_last_unit_let_exactly_one_through() {
    let app = TestApp::with_pool_size(POOL_SIZE).await;
    let product = app.seed_product("Last Pair", 1_000_000, &[(42, 1)]).await;

    // Both shoppers can hold the last unit in their carts.
    let second = app.register_user("Second", "second@example.com").await;
    let shoppers = vec![app.user.user.id, second.user.id];
    for user_id in &shoppers {
        fill_cart(&app, *user_id, product.id, 42, 1).await;
    }

    let mut succeeded = 0;
    let mut out_of_stock = 0;
    for result in checkout_together(&app, shoppers).await {
        match result {
            Ok(_) => succeeded += 1,
            Err(ServiceError::InsufficientStock { available, .. }) => {
                assert_eq!(available, 0);
                out_of_stock += 1;
            }
            Err(other) => panic!("unexpected checkout error: {other}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(out_of_stock, 1);
    assert_eq!(app.stock(product.id, 42).await, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_reservations_never_oversell() {
    let app = TestApp::with_pool_size(POOL_SIZE).await;
    let product = app.seed_product("Limited", 500_000, &[(40, 3)]).await;

    let mut shoppers = Vec::new();
    for i in 0..6 {
        let session = app
            .register_user(&format!("Shopper {i}"), &format!("shopper{i}@example.com"))
            .await;
        fill_cart(&app, session.user.id, product.id, 40, 1).await;
        shoppers.push(session.user.id);
    }

    let results = checkout_together(&app, shoppers).await;
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, ServiceError::InsufficientStock { available: 0, .. });
    }

    assert_eq!(succeeded, 3);
    assert_eq!(app.stock(product.id, 40).await, Some(0));

    let placed = app
        .state
        .services
        .orders
        .list_all_orders()
        .await
        .expect("list orders");
    assert_eq!(placed.count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn double_submitting_one_cart_places_a_single_order() {
    let app = TestApp::with_pool_size(POOL_SIZE).await;
    let product = app.seed_product("Double Click", 300_000, &[(43, 5)]).await;
    let user_id = app.user.user.id;
    fill_cart(&app, user_id, product.id, 43, 2).await;

    let results = checkout_together(&app, vec![user_id, user_id]).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, ServiceError::InvalidArgument(_));
    }

    assert_eq!(app.stock(product.id, 43).await, Some(3));
    let mine = app
        .state
        .services
        .orders
        .list_my_orders(user_id)
        .await
        .expect("my orders");
    assert_eq!(mine.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_restore_stock_once() {
    let app = TestApp::with_pool_size(POOL_SIZE).await;
    let product = app.seed_product("Cancel Race", 200_000, &[(41, 2)]).await;
    let user_id = app.user.user.id;

    fill_cart(&app, user_id, product.id, 41, 2).await;
    let order = app
        .state
        .services
        .orders
        .checkout(user_id, checkout_input())
        .await
        .expect("checkout");
    assert_eq!(app.stock(product.id, 41).await, Some(0));

    let caller = app
        .state
        .services
        .auth
        .authenticate(app.user_token())
        .await
        .expect("caller");

    let barrier = Arc::new(Barrier::new(2));
    let results = futures::future::join_all((0..2).map(|_| {
        let orders = app.state.services.orders.clone();
        let caller = caller.clone();
        let barrier = barrier.clone();
        let order_id = order.order.id;
        tokio::spawn(async move {
            barrier.wait().await;
            orders.cancel_order(&caller, order_id).await
        })
    }))
    .await;

    let results: Vec<_> = results
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, ServiceError::InvalidState(_));
    }
    assert_eq!(app.stock(product.id, 41).await, Some(2));
}
