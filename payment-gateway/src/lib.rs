//! Outbound payment requests and the transaction-status lookups that back
//! inbound notifications.
//!
//! [`PaymentGateway`] is the seam the order service talks to. [`PesapalGateway`]
//! speaks the Pesapal v3 API; [`FakeGateway`] answers in-process and is what
//! the test suites inject.

mod fake;
mod pesapal;

use async_trait::async_trait;
use shared::{PaymentRequest, PaymentSubmission, TransactionStatus};
use std::time::Duration;
use thiserror::Error;

pub use fake::FakeGateway;
pub use pesapal::{PesapalConfig, PesapalGateway};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway did not answer within {0:?}")]
    Timeout(Duration),
    #[error("payment gateway authentication failed: {0}")]
    Auth(String),
    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("payment gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submits a payment request; the merchant reference is echoed back on
    /// the later notification.
    async fn submit(&self, request: &PaymentRequest) -> Result<PaymentSubmission, GatewayError>;

    async fn transaction_status(&self, tracking_id: &str) -> Result<TransactionStatus, GatewayError>;
}
