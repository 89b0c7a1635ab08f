use async_trait::async_trait;
use num_traits::ToPrimitive;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::{PaymentRequest, PaymentSubmission, TransactionStatus};
use std::time::Duration;
use tracing::{error, info};

use crate::{GatewayError, PaymentGateway};

#[derive(Debug, Clone)]
pub struct PesapalConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub callback_url: String,
    pub notification_id: Option<String>,
    pub timeout: Duration,
}

pub struct PesapalGateway {
    client: Client,
    config: PesapalConfig,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    consumer_key: &'a str,
    consumer_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (_, Some(message)) => message.clone(),
            (Some(code), None) => code.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    error: Option<ApiError>,
}

#[derive(Serialize)]
struct BillingAddress<'a> {
    email_address: Option<&'a str>,
    phone_number: Option<&'a str>,
}

#[derive(Serialize)]
struct SubmitOrderRequest<'a> {
    id: String,
    currency: &'a str,
    amount: f64,
    description: &'a str,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_id: Option<&'a str>,
    billing_address: BillingAddress<'a>,
}

#[derive(Debug, Deserialize)]
struct SubmitOrderResponse {
    order_tracking_id: Option<String>,
    redirect_url: Option<String>,
    status: Option<String>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct TransactionStatusResponse {
    payment_status_description: Option<String>,
    merchant_reference: Option<String>,
    error: Option<ApiError>,
}

impl PesapalGateway {
    pub fn new(config: PesapalConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn classify(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.config.timeout)
        } else {
            GatewayError::Transport(e)
        }
    }

    async fn request_token(&self) -> Result<String, GatewayError> {
        let response: TokenResponse = self
            .client
            .post(self.url("Auth/RequestToken"))
            .json(&TokenRequest {
                consumer_key: &self.config.consumer_key,
                consumer_secret: &self.config.consumer_secret,
            })
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .json()
            .await
            .map_err(|e| self.classify(e))?;

        if let Some(err) = response.error {
            error!("Pesapal token request failed: {}", err.describe());
            return Err(GatewayError::Auth(err.describe()));
        }
        response
            .token
            .ok_or_else(|| GatewayError::Auth("token missing from response".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for PesapalGateway {
    async fn submit(&self, request: &PaymentRequest) -> Result<PaymentSubmission, GatewayError> {
        let token = self.request_token().await?;
        let amount = request
            .amount
            .to_f64()
            .ok_or_else(|| GatewayError::Rejected(format!("amount {} is not representable", request.amount)))?;

        let body = SubmitOrderRequest {
            id: request.merchant_reference.to_string(),
            currency: &request.currency,
            amount,
            description: &request.description,
            callback_url: &self.config.callback_url,
            notification_id: self.config.notification_id.as_deref(),
            billing_address: BillingAddress {
                email_address: request.email.as_deref(),
                phone_number: request.phone_number.as_deref(),
            },
        };

        let response: SubmitOrderResponse = self
            .client
            .post(self.url("Transactions/SubmitOrderRequest"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .json()
            .await
            .map_err(|e| self.classify(e))?;

        if let Some(err) = response.error {
            return Err(GatewayError::Rejected(err.describe()));
        }
        let tracking_id = response
            .order_tracking_id
            .ok_or_else(|| GatewayError::Rejected("tracking id missing from response".to_string()))?;

        info!(
            merchant_reference = %request.merchant_reference,
            tracking_id = %tracking_id,
            "Submitted payment request to Pesapal"
        );

        Ok(PaymentSubmission {
            tracking_id,
            redirect_url: response.redirect_url,
            status: response.status,
        })
    }

    async fn transaction_status(&self, tracking_id: &str) -> Result<TransactionStatus, GatewayError> {
        let token = self.request_token().await?;
        let response: TransactionStatusResponse = self
            .client
            .get(self.url("Transactions/GetTransactionStatus"))
            .query(&[("orderTrackingId", tracking_id)])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .json()
            .await
            .map_err(|e| self.classify(e))?;

        if let Some(err) = response.error {
            return Err(GatewayError::Rejected(err.describe()));
        }

        Ok(TransactionStatus {
            tracking_id: tracking_id.to_string(),
            merchant_reference: response.merchant_reference,
            description: response.payment_status_description.unwrap_or_default(),
        })
    }
}
