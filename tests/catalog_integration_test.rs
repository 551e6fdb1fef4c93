mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn brands_are_public_to_read_and_admin_only_to_write() {
    let app = TestApp::new().await;

    let (status, _) = app
        .json(Method::POST, "/api/brands", Some(json!({ "name": "Nike" })), Some(app.user_token()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app
        .json(Method::POST, "/api/brands", Some(json!({ "name": "Nike" })), Some(app.admin_token()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .json(Method::POST, "/api/brands", Some(json!({ "name": "Nike" })), Some(app.admin_token()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, listed) = app.json(Method::GET, "/api/brands", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|b| b["name"] == "Nike"));

    let (status, renamed) = app
        .json(
            Method::PUT,
            &format!("/api/brands/{}", id),
            Some(json!({ "name": "Nike Inc" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["data"]["name"], "Nike Inc");

    let (status, _) = app
        .json(Method::DELETE, &format!("/api/brands/{}", id), None, Some(app.admin_token()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .json(Method::GET, &format!("/api/brands/{}", id), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_creates_product_with_sizes() {
    let app = TestApp::new().await;
    let (_, brand) = app
        .json(Method::POST, "/api/brands", Some(json!({ "name": "Adidas" })), Some(app.admin_token()))
        .await;

    let payload = json!({
        "brandId": brand["data"]["id"],
        "name": "Ultraboost",
        "price": 4_500_000,
        "description": "Running shoe",
        "images": ["/uploads/a.jpg", "/uploads/b.jpg"],
        "category": "running",
        "gender": "female",
        "sizes": [{ "size": 38, "stock": 2 }, { "size": 39, "stock": 0 }]
    });

    let (status, _) = app
        .json(Method::POST, "/api/products", Some(payload.clone()), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, created) = app
        .json(Method::POST, "/api/products", Some(payload), Some(app.admin_token()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let product = &created["data"];
    assert_eq!(product["brand"]["name"], "Adidas");
    assert_eq!(product["sizes"].as_array().unwrap().len(), 2);

    let (status, fetched) = app
        .json(
            Method::GET,
            &format!("/api/products/{}", product["id"].as_str().unwrap()),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["data"]["images"][0], "/uploads/a.jpg");
    assert_eq!(fetched["data"]["category"], "running");
}

#[tokio::test]
async fn product_validation() {
    let app = TestApp::new().await;
    let (_, brand) = app
        .json(Method::POST, "/api/brands", Some(json!({ "name": "Puma" })), Some(app.admin_token()))
        .await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/products",
            Some(json!({
                "brandId": uuid::Uuid::new_v4(),
                "name": "Ghost",
                "price": 100,
                "sizes": [{ "size": 40, "stock": 1 }]
            })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .json(
            Method::POST,
            "/api/products",
            Some(json!({
                "brandId": brand["data"]["id"],
                "name": "Dupes",
                "price": 100,
                "sizes": [{ "size": 40, "stock": 1 }, { "size": 40, "stock": 2 }]
            })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            Method::POST,
            "/api/products",
            Some(json!({
                "brandId": brand["data"]["id"],
                "name": "Negative",
                "price": 100,
                "sizes": [{ "size": 40, "stock": -1 }]
            })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn listing_filters_sorts_and_paginates() {
    let app = TestApp::new().await;
    app.seed_product("Runner Alpha", 300, &[(40, 1)]).await;
    app.seed_product("Runner Beta", 100, &[(41, 0), (42, 2)]).await;
    app.seed_product("Court Gamma", 200, &[(40, 5)]).await;

    let (status, body) = app
        .json(Method::GET, "/api/products?search=runner&sort=price_asc", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Runner Beta", "Runner Alpha"]);

    let (_, body) = app
        .json(Method::GET, "/api/products?size=41", None, None)
        .await;
    assert_eq!(body["data"]["total"], 0);

    let (_, body) = app
        .json(Method::GET, "/api/products?size=40&min_price=150&max_price=250", None, None)
        .await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["name"], "Court Gamma");

    let (_, body) = app
        .json(Method::GET, "/api/products?sort=name&limit=2&page=2", None, None)
        .await;
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["totalPages"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["items"][0]["name"], "Runner Beta");
}

#[tokio::test]
async fn deleting_a_brand_keeps_its_products() {
    let app = TestApp::new().await;
    let product = app.seed_product("Orphan", 100, &[(40, 1)]).await;

    let (status, _) = app
        .json(
            Method::DELETE,
            &format!("/api/brands/{}", product.brand_id),
            None,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(Method::GET, &format!("/api/products/{}", product.id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["brand"].is_null());
    assert_eq!(body["data"]["brandId"], product.brand_id.to_string());
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let app = TestApp::new().await;

    let (status, body) = app.json(Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["database"], "up");

    let response = app
        .request(Method::GET, "/metrics", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
}
