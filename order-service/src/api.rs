use axum::{
    extract::{FromRequest, FromRequestParts, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;
use uuid::Uuid;

use crate::auth::{CurrentUser, TokenVerifier};
use crate::checkout::CreateOrderRequest;
use crate::error::{AppError, MessageResponse};
use crate::lifecycle::{CheckoutReceipt, OrderLifecycle};
use crate::models::{Order, OrderDetails, Product};
use crate::store::{OrderQuery, SortField};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
    pub tokens: TokenVerifier,
}

/// `Json` whose rejections answer with the usual `{message}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    #[serde(rename = "MerchantReference")]
    pub merchant_reference: Option<String>,
    #[serde(rename = "PaymentStatus")]
    pub payment_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IpnNotification {
    #[serde(rename = "OrderTrackingId")]
    pub order_tracking_id: String,
    #[serde(rename = "OrderMerchantReference")]
    pub order_merchant_reference: String,
    #[serde(rename = "OrderNotificationType")]
    pub order_notification_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpnAck {
    pub order_notification_type: String,
    pub order_tracking_id: String,
    pub order_merchant_reference: String,
    pub status: u16,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusUpdateResponse {
    pub message: String,
    pub order: Order,
}

#[derive(Debug, Deserialize)]
pub struct StockUpdate {
    pub stock: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrdersParams {
    pub search: Option<String>,
    pub payment_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl AdminOrdersParams {
    fn into_query(self) -> Result<OrderQuery, AppError> {
        let payment_status = non_empty(self.payment_status)
            .map(|s| s.parse::<PaymentStatus>())
            .transpose()
            .map_err(|e| AppError::validation(e.to_string()))?;
        let fulfillment_status = non_empty(self.fulfillment_status)
            .map(|s| s.parse::<FulfillmentStatus>())
            .transpose()
            .map_err(|e| AppError::validation(e.to_string()))?;
        let sort_by = match non_empty(self.sort_by).as_deref() {
            None | Some("createdAt") => SortField::CreatedAt,
            Some("total") => SortField::Total,
            Some("paymentStatus") => SortField::PaymentStatus,
            Some("fulfillmentStatus") => SortField::FulfillmentStatus,
            Some(other) => return Err(AppError::validation(format!("Cannot sort by {}.", other))),
        };
        let ascending = match non_empty(self.sort_order).as_deref() {
            None | Some("desc") => false,
            Some("asc") => true,
            Some(other) => return Err(AppError::validation(format!("Invalid sort order {}.", other))),
        };
        Ok(OrderQuery {
            search: non_empty(self.search),
            payment_status,
            fulfillment_status,
            sort_by,
            ascending,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/payment-callback", post(payment_callback))
        .route("/orders/ipn", get(ipn_query).post(ipn_body))
        .route("/orders/my", get(farmer_orders))
        .route("/orders/my-consumer", get(consumer_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/payment", post(retry_payment))
        .route("/admin/orders", get(admin_orders))
        .route("/admin/orders/:id", get(admin_order).delete(delete_order))
        .route("/products/:id/stock", put(update_stock))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateOrderRequest>,
) -> Result<Json<CheckoutReceipt>, AppError> {
    Ok(Json(state.lifecycle.create_order(request).await?))
}

pub async fn retry_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(order_id): ApiPath<Uuid>,
) -> Result<Json<CheckoutReceipt>, AppError> {
    Ok(Json(state.lifecycle.retry_payment(user, order_id).await?))
}

pub async fn payment_callback(
    State(state): State<AppState>,
    ApiJson(callback): ApiJson<PaymentCallback>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = state
        .lifecycle
        .payment_callback(callback.merchant_reference.as_deref(), callback.payment_status.as_deref())
        .await?;
    Ok(MessageResponse::new(message))
}

async fn acknowledge_ipn(state: &AppState, notification: IpnNotification) -> Response {
    let result = state
        .lifecycle
        .instant_payment_notification(
            &notification.order_tracking_id,
            &notification.order_merchant_reference,
            &notification.order_notification_type,
        )
        .await;

    let status = match result {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(
                tracking_id = %notification.order_tracking_id,
                reference = %notification.order_merchant_reference,
                error = %e,
                "IPN processing failed"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let ack = IpnAck {
        order_notification_type: notification.order_notification_type,
        order_tracking_id: notification.order_tracking_id,
        order_merchant_reference: notification.order_merchant_reference,
        status: status.as_u16(),
    };
    (status, Json(ack)).into_response()
}

pub async fn ipn_query(State(state): State<AppState>, ApiQuery(notification): ApiQuery<IpnNotification>) -> Response {
    acknowledge_ipn(&state, notification).await
}

pub async fn ipn_body(State(state): State<AppState>, ApiJson(notification): ApiJson<IpnNotification>) -> Response {
    acknowledge_ipn(&state, notification).await
}

pub async fn update_status(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(order_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<StatusUpdateRequest>,
) -> Result<Json<StatusUpdateResponse>, AppError> {
    let order = state
        .lifecycle
        .update_fulfillment(user, order_id, &request.status)
        .await?;
    Ok(Json(StatusUpdateResponse {
        message: "Order status updated successfully.".to_string(),
        order,
    }))
}

pub async fn consumer_orders(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<OrderDetails>>, AppError> {
    Ok(Json(state.lifecycle.consumer_orders(user).await?))
}

pub async fn farmer_orders(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<OrderDetails>>, AppError> {
    Ok(Json(state.lifecycle.farmer_orders(user).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(order_id): ApiPath<Uuid>,
) -> Result<Json<OrderDetails>, AppError> {
    Ok(Json(state.lifecycle.order_for(user, order_id).await?))
}

pub async fn admin_orders(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(params): ApiQuery<AdminOrdersParams>,
) -> Result<Json<Vec<OrderDetails>>, AppError> {
    let query = params.into_query()?;
    Ok(Json(state.lifecycle.search_orders(user, &query).await?))
}

pub async fn admin_order(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(order_id): ApiPath<Uuid>,
) -> Result<Json<OrderDetails>, AppError> {
    Ok(Json(state.lifecycle.admin_order(user, order_id).await?))
}

pub async fn delete_order(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(order_id): ApiPath<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state.lifecycle.delete_order(user, order_id).await?;
    Ok(MessageResponse::new("Order deleted successfully."))
}

pub async fn update_stock(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(product_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<StockUpdate>,
) -> Result<Json<Product>, AppError> {
    Ok(Json(state.lifecycle.set_stock(user, product_id, update.stock).await?))
}

pub async fn health_check() -> &'static str {
    "OK"
}
