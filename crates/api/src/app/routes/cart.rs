//! Cart routes: identity required, mutations additionally pass the
//! anti-forgery check upstream.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::app::{errors, services::AppServices};
use crate::context::CurrentUser;
use crate::middleware;

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_to_cart))
        .layer(axum::middleware::from_fn(middleware::require_identity))
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

pub async fn add_to_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<AddToCartRequest>,
) -> axum::response::Response {
    if body.quantity == 0 {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "quantity must be positive",
        );
    }
    if services.catalog.get(&body.product_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found");
    }

    let items = services
        .carts
        .add(user.user_id(), &body.product_id, body.quantity);

    (
        StatusCode::OK,
        Json(serde_json::json!({ "success": true, "items": items })),
    )
        .into_response()
}

pub async fn get_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<CurrentUser>,
) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "items": services.carts.items(user.user_id()) })),
    )
        .into_response()
}
