//! Persistence for the catalog and the order ledger.
//!
//! Every read goes to the backing store; nothing here caches stock or
//! balances between calls.

mod postgres;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use diesel_async::pooled_connection::PoolError;
use shared::{FulfillmentStatus, PaymentStatus, UnknownVariant};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Order, OrderDetails, OrderItem, Product, User};
use crate::settlement::SettlementOutcome;

pub use postgres::{DbPool, PgStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
    #[error("connection pool: {0}")]
    Pool(String),
    #[error("stored row is invalid: {0}")]
    Corrupt(#[from] UnknownVariant),
}

impl From<bb8::RunError<PoolError>> for StoreError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        StoreError::Pool(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    Total,
    PaymentStatus,
    FulfillmentStatus,
}

#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Matches an exact order id, or a case-insensitive fragment of the
    /// customer's name or email.
    pub search: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub fulfillment_status: Option<FulfillmentStatus>,
    pub sort_by: SortField,
    pub ascending: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError>;

    async fn set_product_stock(&self, id: Uuid, stock: i32) -> Result<Option<Product>, StoreError>;

    /// Writes the order and all of its items, or nothing.
    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError>;

    /// Stores the outcome of a payment request. Returns `None` when the order
    /// is missing or has already been paid; a paid order is never reopened.
    async fn record_payment_request(
        &self,
        order_id: Uuid,
        tracking_id: Option<&str>,
        status: PaymentStatus,
    ) -> Result<Option<Order>, StoreError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError>;

    /// Marks the order paid, decrements stock and credits farmers in one
    /// atomic step. Settling an already paid order changes nothing.
    async fn settle_order(&self, id: Uuid) -> Result<SettlementOutcome, StoreError>;

    /// Moves the fulfillment status only if it still equals `from`.
    async fn transition_fulfillment(
        &self,
        id: Uuid,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<Option<Order>, StoreError>;

    async fn orders_for_customer(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, StoreError>;

    /// Orders containing at least one of the farmer's products, unfiltered.
    async fn orders_for_farmer(&self, farmer_id: Uuid) -> Result<Vec<OrderDetails>, StoreError>;

    async fn search_orders(&self, query: &OrderQuery) -> Result<Vec<OrderDetails>, StoreError>;

    async fn delete_order(&self, id: Uuid) -> Result<bool, StoreError>;
}
