use bigdecimal::BigDecimal;
use shared::line_total;
use uuid::Uuid;

use crate::models::OrderLine;

#[derive(Debug, Clone, PartialEq)]
pub struct StockDecrement {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceCredit {
    pub farmer_id: Uuid,
    pub amount: BigDecimal,
}

/// Effects a completed payment applies, grouped per product and per farmer.
/// Credits always use the price captured on the order item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettlementPlan {
    pub decrements: Vec<StockDecrement>,
    pub credits: Vec<BalanceCredit>,
}

impl SettlementPlan {
    pub fn for_lines(lines: &[OrderLine]) -> Self {
        let mut plan = SettlementPlan::default();
        for line in lines {
            match plan
                .decrements
                .iter_mut()
                .find(|d| d.product_id == line.item.product_id)
            {
                Some(decrement) => decrement.quantity += line.item.quantity,
                None => plan.decrements.push(StockDecrement {
                    product_id: line.item.product_id,
                    product_name: line.product.name.clone(),
                    quantity: line.item.quantity,
                }),
            }

            let amount = line_total(&line.item.price, line.item.quantity);
            match plan
                .credits
                .iter_mut()
                .find(|c| c.farmer_id == line.product.farmer_id)
            {
                Some(credit) => credit.amount += amount,
                None => plan.credits.push(BalanceCredit {
                    farmer_id: line.product.farmer_id,
                    amount,
                }),
            }
        }
        plan
    }

    /// First decrement the given stock levels cannot cover.
    pub fn shortfall<F>(&self, stock_of: F) -> Option<&StockDecrement>
    where
        F: Fn(Uuid) -> Option<i32>,
    {
        self.decrements
            .iter()
            .find(|d| stock_of(d.product_id).map_or(true, |stock| stock < d.quantity))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(SettlementPlan),
    AlreadySettled,
    NotFound,
    /// The order was cancelled before the payment arrived; nothing is applied.
    Cancelled,
    InsufficientStock { product_name: String },
}
