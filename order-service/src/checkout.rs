use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use shared::*;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Order, OrderItem, Product};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub items: Vec<CheckoutLine>,
    #[serde(default)]
    pub shipping_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidCheckout {
    pub user_id: Uuid,
    pub lines: Vec<CheckoutLine>,
    pub shipping_address: String,
}

impl CreateOrderRequest {
    pub fn validate(self) -> Result<ValidCheckout, AppError> {
        let shipping_address = self
            .shipping_address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .ok_or_else(|| AppError::validation("Shipping address is required."))?
            .to_string();

        if self.items.is_empty() {
            return Err(AppError::validation("Order must contain at least one item."));
        }
        if let Some(bad) = self.items.iter().find(|line| line.quantity <= 0) {
            return Err(AppError::validation(format!(
                "Quantity for product {} must be a positive integer.",
                bad.product_id
            )));
        }

        let lines = merge_lines(&self.items).map_err(|e| AppError::validation(e.to_string()))?;

        Ok(ValidCheckout {
            user_id: self.user_id,
            lines,
            shipping_address,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedCheckout {
    pub lines: Vec<PricedLine>,
    pub total: BigDecimal,
}

/// Checks every line against current stock and captures the live price.
/// Fails on the first missing or under-stocked product, before anything is
/// written.
pub fn price_lines(lines: &[CheckoutLine], products: &[Product]) -> Result<PricedCheckout, AppError> {
    let by_id: HashMap<Uuid, &Product> = products.iter().map(|p| (p.id, p)).collect();

    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        let product = by_id
            .get(&line.product_id)
            .ok_or_else(|| AppError::not_found(format!("Product {} not found.", line.product_id)))?;
        if product.stock < line.quantity {
            return Err(AppError::conflict(format!(
                "Stock for {} is outdated. Please refresh and try again.",
                product.name
            )));
        }
        priced.push(PricedLine {
            product_id: product.id,
            quantity: line.quantity,
            price: product.price.clone(),
        });
    }

    let total = sum_lines(priced.iter().map(|line| (&line.price, line.quantity)));
    Ok(PricedCheckout { lines: priced, total })
}

impl PricedCheckout {
    pub fn into_order(self, user_id: Uuid, shipping_address: String) -> (Order, Vec<OrderItem>) {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let items = self
            .lines
            .into_iter()
            .map(|line| OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                price: line.price,
            })
            .collect();
        let order = Order {
            id: order_id,
            user_id,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::Pending,
            total: self.total,
            shipping_address,
            tracking_id: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        (order, items)
    }
}
