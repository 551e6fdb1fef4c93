/*!
 * # Metrics Module
 *
 * Business counters for the storefront, exported in Prometheus text format
 * at `/metrics`.
 */

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    static ref ORDERS_CREATED: IntCounter =
        IntCounter::new("orders_created_total", "Total number of orders placed")
            .expect("metric can be created");
    static ref ORDERS_CANCELLED: IntCounter = IntCounter::new(
        "orders_cancelled_total",
        "Total number of orders cancelled (stock restored)"
    )
    .expect("metric can be created");
    static ref STOCK_RESERVATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_reservation_failures_total",
            "Order lines rejected while reserving stock"
        ),
        &["reason"]
    )
    .expect("metric can be created");
    static ref CHAT_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("chat_requests_total", "Chat relay requests by outcome"),
        &["outcome"]
    )
    .expect("metric can be created");
    static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry
            .register(Box::new(ORDERS_CREATED.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(ORDERS_CANCELLED.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(STOCK_RESERVATION_FAILURES.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(CHAT_REQUESTS.clone()))
            .expect("metric can be registered");
        registry
    };
}

pub fn record_order_created() {
    ORDERS_CREATED.inc();
}

pub fn record_order_cancelled() {
    ORDERS_CANCELLED.inc();
}

/// `reason` is `insufficient_stock` or `unknown_size`.
pub fn record_stock_reservation_failure(reason: &str) {
    STOCK_RESERVATION_FAILURES.with_label_values(&[reason]).inc();
}

pub fn record_chat_request(outcome: &str) {
    CHAT_REQUESTS.with_label_values(&[outcome]).inc();
}

/// Renders every registered metric in the Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub async fn metrics_handler() -> Response {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
