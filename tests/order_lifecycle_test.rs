mod common;

use axum::http::{Method, StatusCode};
use common::{shipping_json, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

async fn add_to_cart(app: &TestApp, token: &str, product_id: Uuid, size: i32, quantity: i32) {
    let (status, _) = app
        .json(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "productId": product_id, "size": size, "quantity": quantity })),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

async fn checkout(app: &TestApp, token: &str, extra: Value) -> (StatusCode, Value) {
    let mut body = json!({ "shippingInfo": shipping_json(), "paymentMethod": "cod" });
    if let (Some(target), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        target.extend(extra.clone());
    }
    app.json(Method::POST, "/api/orders", Some(body), Some(token))
        .await
}

#[tokio::test]
async fn checkout_reserves_stock_clears_cart_and_cancel_restores_it() {
    let app = TestApp::new().await;
    let product = app.seed_product("Air Zoom", 1_000_000, &[(42, 3)]).await;

    add_to_cart(&app, app.user_token(), product.id, 42, 2).await;

    let (status, body) = checkout(&app, app.user_token(), json!({ "shippingFee": 30_000 })).await;
    assert_eq!(status, StatusCode::CREATED);
    let order = &body["data"];
    assert_eq!(order["status"], "pending_confirmation");
    assert_eq!(order["itemsSubtotal"], 2_000_000);
    assert_eq!(order["grandTotal"], 2_030_000);
    assert_eq!(order["items"][0]["name"], "Air Zoom");
    assert_eq!(order["items"][0]["quantity"], 2);
    assert_eq!(app.stock(product.id, 42).await, Some(1));

    let (_, cart) = app
        .json(Method::GET, "/api/cart", None, Some(app.user_token()))
        .await;
    assert!(cart["data"]["items"].as_array().unwrap().is_empty());
    assert_eq!(cart["data"]["totalPrice"], 0);

    let order_id = order["id"].as_str().unwrap().to_string();
    let (status, body) = app
        .json(
            Method::PUT,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(app.user_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
    assert!(body["data"]["cancelledAt"].is_string());
    assert_eq!(app.stock(product.id, 42).await, Some(3));

    // A second cancel must not restore stock again.
    let (status, _) = app
        .json(
            Method::PUT,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(app.user_token()),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.stock(product.id, 42).await, Some(3));
}

#[tokio::test]
async fn checkout_with_empty_cart_is_invalid() {
    let app = TestApp::new().await;
    let (status, _) = checkout(&app, app.user_token(), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn declared_total_mismatch_is_rejected_without_touching_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Samba", 500_000, &[(40, 2)]).await;
    add_to_cart(&app, app.user_token(), product.id, 40, 1).await;

    let (status, _) = checkout(
        &app,
        app.user_token(),
        json!({ "shippingFee": 20_000, "totalPrice": 500_000 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.stock(product.id, 40).await, Some(2));

    let (status, _) = checkout(
        &app,
        app.user_token(),
        json!({ "shippingFee": 20_000, "itemsSubtotal": 500_000, "totalPrice": 520_000 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn stock_shortfall_at_checkout_fails_and_keeps_cart() {
    let app = TestApp::new().await;
    let product = app.seed_product("Suede", 400_000, &[(41, 2)]).await;
    add_to_cart(&app, app.user_token(), product.id, 41, 2).await;

    // Admin lowers stock after the shopper filled the cart.
    app.json(
        Method::PUT,
        &format!("/api/products/{}", product.id),
        Some(json!({ "sizes": [{ "size": 41, "stock": 1 }] })),
        Some(app.admin_token()),
    )
    .await;

    let (status, _) = checkout(&app, app.user_token(), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.stock(product.id, 41).await, Some(1));

    let (_, cart) = app
        .json(Method::GET, "/api/cart", None, Some(app.user_token()))
        .await;
    assert_eq!(cart["data"]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn order_items_are_snapshots() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pegasus", 2_000_000, &[(43, 5)]).await;
    add_to_cart(&app, app.user_token(), product.id, 43, 1).await;
    let (_, body) = checkout(&app, app.user_token(), json!({})).await;
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    app.json(
        Method::PUT,
        &format!("/api/products/{}", product.id),
        Some(json!({ "name": "Pegasus Renamed", "price": 9 })),
        Some(app.admin_token()),
    )
    .await;
    app.json(
        Method::DELETE,
        &format!("/api/products/{}", product.id),
        None,
        Some(app.admin_token()),
    )
    .await;

    let (status, body) = app
        .json(
            Method::GET,
            &format!("/api/orders/{}", order_id),
            None,
            Some(app.user_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"][0]["name"], "Pegasus");
    assert_eq!(body["data"]["items"][0]["unitPrice"], 2_000_000);

    // Cancelling skips lines whose product is gone.
    let (status, body) = app
        .json(
            Method::PUT,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(app.user_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
}

#[tokio::test]
async fn other_shoppers_cannot_read_or_cancel_an_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Gazelle", 800_000, &[(42, 2)]).await;
    add_to_cart(&app, app.user_token(), product.id, 42, 1).await;
    let (_, body) = checkout(&app, app.user_token(), json!({})).await;
    let uri = format!("/api/orders/{}", body["data"]["id"].as_str().unwrap());

    let other = app.register_user("Other", "other@example.com").await;
    let (status, _) = app.json(Method::GET, &uri, None, Some(&other.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(Method::PUT, &format!("{}/cancel", uri), None, Some(&other.token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.json(Method::GET, &uri, None, Some(app.admin_token())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .json(
            Method::GET,
            &format!("/api/orders/{}", Uuid::new_v4()),
            None,
            Some(app.user_token()),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_status_updates_follow_the_transition_table() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ultraboost", 1_500_000, &[(44, 3)]).await;
    add_to_cart(&app, app.user_token(), product.id, 44, 1).await;
    let (_, body) = checkout(&app, app.user_token(), json!({})).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let status_uri = format!("/api/orders/admin/{}/status", id);

    let (status, _) = app
        .json(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "delivered" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    for next in ["confirmed", "shipping", "delivered"] {
        let (status, body) = app
            .json(
                Method::PUT,
                &status_uri,
                Some(json!({ "status": next })),
                Some(app.admin_token()),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "transition to {}", next);
        assert_eq!(body["data"]["status"], next);
    }

    let (_, body) = app
        .json(Method::GET, &format!("/api/orders/{}", id), None, Some(app.user_token()))
        .await;
    assert_eq!(body["data"]["paymentStatus"], "paid");
    assert!(body["data"]["deliveredAt"].is_string());

    // Delivered orders can no longer be cancelled by anyone.
    let (status, _) = app
        .json(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "cancelled" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.stock(product.id, 44).await, Some(2));
}

#[tokio::test]
async fn admin_cancel_restores_stock_and_shopper_cannot_cancel_confirmed() {
    let app = TestApp::new().await;
    let product = app.seed_product("NMD", 1_100_000, &[(39, 4)]).await;
    add_to_cart(&app, app.user_token(), product.id, 39, 3).await;
    let (_, body) = checkout(&app, app.user_token(), json!({})).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let status_uri = format!("/api/orders/admin/{}/status", id);

    app.json(
        Method::PUT,
        &status_uri,
        Some(json!({ "status": "confirmed" })),
        Some(app.admin_token()),
    )
    .await;

    let (status, _) = app
        .json(
            Method::PUT,
            &format!("/api/orders/{}/cancel", id),
            None,
            Some(app.user_token()),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.stock(product.id, 39).await, Some(1));

    let (status, _) = app
        .json(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "cancelled" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.stock(product.id, 39).await, Some(4));
}

#[tokio::test]
async fn order_listings() {
    let app = TestApp::new().await;
    let product = app.seed_product("Stan Smith", 100_000, &[(40, 10)]).await;
    for quantity in [1, 2] {
        add_to_cart(&app, app.user_token(), product.id, 40, quantity).await;
        let (status, _) = checkout(&app, app.user_token(), json!({ "shippingFee": 10 })).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, mine) = app
        .json(Method::GET, "/api/orders/my-orders", None, Some(app.user_token()))
        .await;
    let mine = mine["data"].as_array().unwrap();
    assert_eq!(mine.len(), 2);
    // Newest first.
    assert_eq!(mine[0]["itemsSubtotal"], 200_000);

    let (status, _) = app
        .json(Method::GET, "/api/orders/admin/all", None, Some(app.user_token()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, all) = app
        .json(Method::GET, "/api/orders/admin/all", None, Some(app.admin_token()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["data"]["count"], 2);
    assert_eq!(all["data"]["totalAmount"], 300_020);
}
