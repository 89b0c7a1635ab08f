use async_trait::async_trait;
use shared::{PaymentRequest, PaymentSubmission, TransactionStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::{GatewayError, PaymentGateway};

/// In-process gateway that records every request. It never calls back into
/// the service; tests deliver notifications themselves.
#[derive(Default)]
pub struct FakeGateway {
    failing: AtomicBool,
    submissions: Mutex<Vec<PaymentRequest>>,
    statuses: Mutex<HashMap<String, String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let gateway = Self::default();
        gateway.set_failing(true);
        gateway
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<PaymentRequest> {
        self.submissions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn tracking_id_for(request: &PaymentRequest) -> String {
        format!("fake-{}", request.merchant_reference)
    }

    /// Sets the description `transaction_status` reports for a tracking id.
    pub fn set_status(&self, tracking_id: &str, description: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(tracking_id.to_string(), description.to_string());
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn submit(&self, request: &PaymentRequest) -> Result<PaymentSubmission, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("gateway unavailable".to_string()));
        }
        if let Ok(mut submissions) = self.submissions.lock() {
            submissions.push(request.clone());
        }
        Ok(PaymentSubmission {
            tracking_id: Self::tracking_id_for(request),
            redirect_url: Some(format!("https://pay.example/redirect/{}", request.merchant_reference)),
            status: Some("PENDING".to_string()),
        })
    }

    async fn transaction_status(&self, tracking_id: &str) -> Result<TransactionStatus, GatewayError> {
        let description = self
            .statuses
            .lock()
            .ok()
            .and_then(|s| s.get(tracking_id).cloned())
            .ok_or_else(|| GatewayError::Rejected(format!("unknown tracking id {}", tracking_id)))?;
        let merchant_reference = tracking_id.strip_prefix("fake-").map(str::to_string);
        Ok(TransactionStatus {
            tracking_id: tracking_id.to_string(),
            merchant_reference,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn records_submissions_and_derives_tracking_ids() {
        let gateway = FakeGateway::new();
        let order_id = Uuid::new_v4();
        let submission = gateway
            .submit(&PaymentRequest::for_order(order_id, 200.into()))
            .await
            .unwrap();
        assert_eq!(submission.tracking_id, format!("fake-{}", order_id));
        assert_eq!(gateway.submissions().len(), 1);
    }

    #[tokio::test]
    async fn failing_gateway_rejects_without_recording() {
        let gateway = FakeGateway::failing();
        let result = gateway.submit(&PaymentRequest::for_order(Uuid::new_v4(), 1.into())).await;
        assert!(matches!(result, Err(GatewayError::Rejected(_))));
        assert!(gateway.submissions().is_empty());
    }

    #[tokio::test]
    async fn reports_configured_status() {
        let gateway = FakeGateway::new();
        let order_id = Uuid::new_v4();
        let tracking = format!("fake-{}", order_id);
        gateway.set_status(&tracking, "Completed");
        let status = gateway.transaction_status(&tracking).await.unwrap();
        assert!(status.is_completed());
        assert_eq!(status.merchant_reference, Some(order_id.to_string()));
        assert!(gateway.transaction_status("other").await.is_err());
    }
}
