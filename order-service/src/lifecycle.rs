//! Order lifecycle: checkout, payment requests, settlement on payment
//! notifications, fulfillment transitions and role-scoped reads.

use payment_gateway::{GatewayError, PaymentGateway};
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::checkout::{price_lines, CreateOrderRequest};
use crate::error::AppError;
use crate::models::{Order, OrderDetails, Product, User};
use crate::settlement::SettlementOutcome;
use crate::store::{OrderQuery, Store};

pub const IPN_CHANGE: &str = "IPNCHANGE";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub payment: PaymentSubmission,
}

pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    gateway_timeout: Duration,
}

fn require_admin(actor: &CurrentUser) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("Access denied. Admin only."))
    }
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, gateway_timeout: Duration) -> Self {
        Self {
            store,
            gateway,
            gateway_timeout,
        }
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CheckoutReceipt, AppError> {
        let checkout = request.validate()?;

        let user = self
            .store
            .find_user(checkout.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found."))?;

        let product_ids: Vec<Uuid> = checkout.lines.iter().map(|line| line.product_id).collect();
        let products = self.store.find_products(&product_ids).await?;
        let priced = price_lines(&checkout.lines, &products)?;

        let (order, items) = priced.into_order(user.id, checkout.shipping_address);
        self.store.insert_order(&order, &items).await?;
        info!(order_id = %order.id, user_id = %user.id, total = %order.total, items = items.len(), "Order created");

        let payment = self.request_payment(&order, &user).await?;
        Ok(CheckoutReceipt {
            order_id: order.id,
            payment,
        })
    }

    /// The order row is already committed when this runs. A failed or timed
    /// out request leaves the order in place with `payment_status = FAILED`
    /// so the customer can retry.
    async fn request_payment(&self, order: &Order, user: &User) -> Result<PaymentSubmission, AppError> {
        let mut request = PaymentRequest::for_order(order.id, order.total.clone());
        request.email = Some(user.email.clone());
        request.phone_number = user.phone.clone();

        let result = match timeout(self.gateway_timeout, self.gateway.submit(&request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.gateway_timeout)),
        };

        match result {
            Ok(submission) => {
                let recorded = self
                    .store
                    .record_payment_request(order.id, Some(&submission.tracking_id), PaymentStatus::Pending)
                    .await?;
                if recorded.is_none() {
                    info!(order_id = %order.id, "Order was settled while the payment request was in flight");
                } else {
                    info!(order_id = %order.id, tracking_id = %submission.tracking_id, "Payment requested");
                }
                Ok(submission)
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Payment request failed");
                let recorded = self
                    .store
                    .record_payment_request(order.id, None, PaymentStatus::Failed)
                    .await?;
                if recorded.is_none() {
                    return Err(AppError::conflict("Order has already been paid."));
                }
                Err(AppError::Upstream(format!(
                    "Order {} was saved but the payment request failed ({}). Retry the payment for this order.",
                    order.id, e
                )))
            }
        }
    }

    pub async fn retry_payment(&self, actor: CurrentUser, order_id: Uuid) -> Result<CheckoutReceipt, AppError> {
        let details = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order not found."))?;

        if details.order.user_id != actor.id && !actor.is_admin() {
            return Err(AppError::forbidden("Only the customer who placed this order can pay for it."));
        }
        if details.order.payment_status == PaymentStatus::Completed {
            return Err(AppError::conflict("Order has already been paid."));
        }
        if details.order.fulfillment_status == FulfillmentStatus::Cancelled {
            return Err(AppError::conflict("Order has been cancelled."));
        }

        let user = self
            .store
            .find_user(details.order.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found."))?;

        let payment = self.request_payment(&details.order, &user).await?;
        Ok(CheckoutReceipt { order_id, payment })
    }

    pub async fn settle(&self, order_id: Uuid) -> Result<SettlementOutcome, AppError> {
        let outcome = self.store.settle_order(order_id).await?;
        match &outcome {
            SettlementOutcome::Settled(plan) => info!(
                order_id = %order_id,
                products = plan.decrements.len(),
                farmers = plan.credits.len(),
                "Payment settled"
            ),
            SettlementOutcome::AlreadySettled => info!(order_id = %order_id, "Duplicate payment notification ignored"),
            SettlementOutcome::NotFound => warn!(order_id = %order_id, "Payment notification for unknown order"),
            SettlementOutcome::Cancelled => warn!(
                order_id = %order_id,
                "Settlement held back: order was cancelled before payment, refund manually"
            ),
            SettlementOutcome::InsufficientStock { product_name } => warn!(
                order_id = %order_id,
                product = %product_name,
                "Settlement held back for manual reconciliation"
            ),
        }
        Ok(outcome)
    }

    /// Handles the generic `{MerchantReference, PaymentStatus}` callback and
    /// returns the acknowledgement message.
    pub async fn payment_callback(
        &self,
        merchant_reference: Option<&str>,
        payment_status: Option<&str>,
    ) -> Result<String, AppError> {
        let reference = merchant_reference
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppError::validation("Missing MerchantReference."))?;
        let order_id = Uuid::parse_str(reference).map_err(|_| AppError::not_found("Order not found."))?;

        if payment_status != Some(PAYMENT_COMPLETED) {
            if self.store.find_order(order_id).await?.is_none() {
                return Err(AppError::not_found("Order not found."));
            }
            info!(order_id = %order_id, status = ?payment_status, "Payment notification acknowledged");
            return Ok("Callback received.".to_string());
        }

        match self.settle(order_id).await? {
            SettlementOutcome::Settled(_) => Ok("Callback processed.".to_string()),
            SettlementOutcome::AlreadySettled => Ok("Order already settled.".to_string()),
            SettlementOutcome::NotFound => Err(AppError::not_found("Order not found.")),
            SettlementOutcome::Cancelled => {
                Ok("Payment recorded but the order was cancelled; it will be refunded.".to_string())
            }
            SettlementOutcome::InsufficientStock { product_name } => Ok(format!(
                "Payment recorded but settlement is on hold: insufficient stock for {}.",
                product_name
            )),
        }
    }

    /// Pesapal's instant payment notification: the notification itself carries
    /// no status, so the transaction is looked up before settling.
    pub async fn instant_payment_notification(
        &self,
        tracking_id: &str,
        merchant_reference: &str,
        notification_type: &str,
    ) -> Result<(), AppError> {
        if notification_type != IPN_CHANGE {
            return Ok(());
        }

        let status = match timeout(self.gateway_timeout, self.gateway.transaction_status(tracking_id)).await {
            Ok(result) => result?,
            Err(_) => return Err(GatewayError::Timeout(self.gateway_timeout).into()),
        };
        // Redelivery cannot fix a mismatch, so it is acknowledged and left for review.
        if let Some(reported) = status.merchant_reference.as_deref() {
            if reported != merchant_reference {
                warn!(
                    tracking_id,
                    notified = merchant_reference,
                    reported,
                    "IPN merchant reference does not match the transaction"
                );
                return Ok(());
            }
        }
        if !status.is_completed() {
            info!(tracking_id, description = %status.description, "Transaction not completed yet");
            return Ok(());
        }

        let order_id = Uuid::parse_str(merchant_reference).map_err(|_| AppError::not_found("Order not found."))?;
        match self.settle(order_id).await? {
            SettlementOutcome::NotFound => Err(AppError::not_found("Order not found.")),
            _ => Ok(()),
        }
    }

    pub async fn update_fulfillment(
        &self,
        actor: CurrentUser,
        order_id: Uuid,
        requested: &str,
    ) -> Result<Order, AppError> {
        let next: FulfillmentStatus = requested
            .parse()
            .map_err(|_| AppError::validation("Invalid order status provided."))?;

        let details = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order not found."))?;

        let owning_farmer = actor.role == Role::Farmer && details.is_owned_by(actor.id);
        if !actor.is_admin() && !owning_farmer {
            return Err(AppError::forbidden(
                "Forbidden: You do not have permission to update this order.",
            ));
        }

        let current = details.order.fulfillment_status;
        current
            .transition_to(next)
            .map_err(|e| AppError::conflict(e.to_string()))?;

        let order = self
            .store
            .transition_fulfillment(order_id, current, next)
            .await?
            .ok_or_else(|| AppError::conflict("Order status changed in the meantime. Reload and try again."))?;

        info!(order_id = %order_id, from = %current, to = %next, actor = %actor.id, "Fulfillment status updated");
        Ok(order)
    }

    pub async fn consumer_orders(&self, actor: CurrentUser) -> Result<Vec<OrderDetails>, AppError> {
        Ok(self.store.orders_for_customer(actor.id).await?)
    }

    pub async fn farmer_orders(&self, actor: CurrentUser) -> Result<Vec<OrderDetails>, AppError> {
        if actor.role != Role::Farmer {
            return Err(AppError::forbidden("Only farmers have farm orders."));
        }
        let orders = self.store.orders_for_farmer(actor.id).await?;
        Ok(orders
            .into_iter()
            .filter_map(|details| details.scoped_to_farmer(actor.id))
            .collect())
    }

    pub async fn order_for(&self, actor: CurrentUser, order_id: Uuid) -> Result<OrderDetails, AppError> {
        let details = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order not found."))?;

        if actor.is_admin() || details.order.user_id == actor.id {
            return Ok(details);
        }
        if actor.role == Role::Farmer {
            if let Some(scoped) = details.scoped_to_farmer(actor.id) {
                return Ok(scoped);
            }
        }
        Err(AppError::forbidden("You do not have access to this order."))
    }

    pub async fn search_orders(&self, actor: CurrentUser, query: &OrderQuery) -> Result<Vec<OrderDetails>, AppError> {
        require_admin(&actor)?;
        Ok(self.store.search_orders(query).await?)
    }

    pub async fn admin_order(&self, actor: CurrentUser, order_id: Uuid) -> Result<OrderDetails, AppError> {
        require_admin(&actor)?;
        self.store
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order not found."))
    }

    pub async fn delete_order(&self, actor: CurrentUser, order_id: Uuid) -> Result<(), AppError> {
        require_admin(&actor)?;
        if !self.store.delete_order(order_id).await? {
            return Err(AppError::not_found("Order not found."));
        }
        info!(order_id = %order_id, admin = %actor.id, "Order deleted");
        Ok(())
    }

    pub async fn set_stock(&self, actor: CurrentUser, product_id: Uuid, stock: i32) -> Result<Product, AppError> {
        if stock < 0 {
            return Err(AppError::validation("Stock cannot be negative."));
        }
        let product = self
            .store
            .find_product(product_id)
            .await?
            .ok_or_else(|| AppError::not_found("Product not found."))?;

        if !actor.is_admin() && product.farmer_id != actor.id {
            return Err(AppError::forbidden("You can only edit stock for your own products."));
        }

        let updated = self
            .store
            .set_product_stock(product_id, stock)
            .await?
            .ok_or_else(|| AppError::not_found("Product not found."))?;
        info!(product_id = %product_id, from = product.stock, to = stock, "Stock updated");
        Ok(updated)
    }
}
