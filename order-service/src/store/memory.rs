use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use shared::{FulfillmentStatus, PaymentStatus, Role};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{OrderQuery, SortField, Store, StoreError};
use crate::models::*;
use crate::settlement::{SettlementOutcome, SettlementPlan};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    items: Vec<OrderItem>,
}

impl State {
    fn details(&self, order: &Order) -> OrderDetails {
        let customer = self
            .users
            .get(&order.user_id)
            .map(Customer::from)
            .unwrap_or_else(|| Customer {
                id: order.user_id,
                name: String::new(),
                email: String::new(),
                phone: None,
            });
        let items = self
            .items
            .iter()
            .filter(|item| item.order_id == order.id)
            .filter_map(|item| {
                self.products.get(&item.product_id).map(|product| OrderLine {
                    item: item.clone(),
                    product: product.clone(),
                })
            })
            .collect();
        OrderDetails {
            order: order.clone(),
            customer,
            items,
        }
    }

    fn newest_first(&self, mut orders: Vec<&Order>) -> Vec<OrderDetails> {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.into_iter().map(|o| self.details(o)).collect()
    }
}

/// Single-mutex store backing the unit tests. Holding the lock for a whole
/// call gives the same all-or-nothing behaviour as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_user(&self, name: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: Some("0700000000".to_string()),
            role,
            balance: BigDecimal::from(0),
            created_at: Utc::now(),
        };
        self.lock().users.insert(user.id, user.clone());
        user
    }

    pub fn add_product(&self, name: &str, farmer_id: Uuid, price: i32, stock: i32) -> Product {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price: BigDecimal::from(price),
            stock,
            category_id: Uuid::new_v4(),
            farmer_id,
            created_at: now,
            updated_at: now,
        };
        self.lock().products.insert(product.id, product.clone());
        product
    }

    pub fn set_price(&self, product_id: Uuid, price: i32) {
        if let Some(product) = self.lock().products.get_mut(&product_id) {
            product.price = BigDecimal::from(price);
        }
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.lock().users.get(&id).cloned()
    }

    pub fn product(&self, id: Uuid) -> Option<Product> {
        self.lock().products.get(&id).cloned()
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.lock().orders.get(&id).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.user(id))
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.product(id))
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let state = self.lock();
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn set_product_stock(&self, id: Uuid, stock: i32) -> Result<Option<Product>, StoreError> {
        let mut state = self.lock();
        Ok(state.products.get_mut(&id).map(|product| {
            product.stock = stock;
            product.updated_at = Utc::now();
            product.clone()
        }))
    }

    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.orders.insert(order.id, order.clone());
        state.items.extend_from_slice(items);
        Ok(())
    }

    async fn record_payment_request(
        &self,
        order_id: Uuid,
        tracking_id: Option<&str>,
        status: PaymentStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut state = self.lock();
        Ok(state
            .orders
            .get_mut(&order_id)
            .filter(|order| order.payment_status != PaymentStatus::Completed)
            .map(|order| {
                order.tracking_id = tracking_id.map(str::to_string);
                order.payment_status = status;
                order.updated_at = Utc::now();
                order.clone()
            }))
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError> {
        let state = self.lock();
        Ok(state.orders.get(&id).map(|order| state.details(order)))
    }

    async fn settle_order(&self, id: Uuid) -> Result<SettlementOutcome, StoreError> {
        let mut state = self.lock();
        let order = match state.orders.get(&id) {
            Some(order) => order.clone(),
            None => return Ok(SettlementOutcome::NotFound),
        };
        if order.payment_status == PaymentStatus::Completed {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if order.fulfillment_status == FulfillmentStatus::Cancelled {
            return Ok(SettlementOutcome::Cancelled);
        }

        let plan = SettlementPlan::for_lines(&state.details(&order).items);
        if let Some(short) = plan.shortfall(|product_id| state.products.get(&product_id).map(|p| p.stock)) {
            return Ok(SettlementOutcome::InsufficientStock {
                product_name: short.product_name.clone(),
            });
        }

        let now = Utc::now();
        for decrement in &plan.decrements {
            if let Some(product) = state.products.get_mut(&decrement.product_id) {
                product.stock -= decrement.quantity;
                product.updated_at = now;
            }
        }
        for credit in &plan.credits {
            if let Some(farmer) = state.users.get_mut(&credit.farmer_id) {
                farmer.balance += credit.amount.clone();
            }
        }
        if let Some(order) = state.orders.get_mut(&id) {
            order.payment_status = PaymentStatus::Completed;
            order.paid_at = Some(now);
            order.updated_at = now;
        }
        Ok(SettlementOutcome::Settled(plan))
    }

    async fn transition_fulfillment(
        &self,
        id: Uuid,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut state = self.lock();
        Ok(state
            .orders
            .get_mut(&id)
            .filter(|order| order.fulfillment_status == from)
            .map(|order| {
                order.fulfillment_status = to;
                order.updated_at = Utc::now();
                order.clone()
            }))
    }

    async fn orders_for_customer(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, StoreError> {
        let state = self.lock();
        let orders = state.orders.values().filter(|o| o.user_id == user_id).collect();
        Ok(state.newest_first(orders))
    }

    async fn orders_for_farmer(&self, farmer_id: Uuid) -> Result<Vec<OrderDetails>, StoreError> {
        let state = self.lock();
        let orders = state.orders.values().collect();
        Ok(state
            .newest_first(orders)
            .into_iter()
            .filter(|details| details.is_owned_by(farmer_id))
            .collect())
    }

    async fn search_orders(&self, query: &OrderQuery) -> Result<Vec<OrderDetails>, StoreError> {
        let state = self.lock();
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut matches: Vec<OrderDetails> = state
            .orders
            .values()
            .filter(|o| query.payment_status.map_or(true, |s| o.payment_status == s))
            .filter(|o| query.fulfillment_status.map_or(true, |s| o.fulfillment_status == s))
            .map(|o| state.details(o))
            .filter(|d| match &search {
                Some(needle) => {
                    d.order.id.to_string() == *needle
                        || d.customer.name.to_lowercase().contains(needle.as_str())
                        || d.customer.email.to_lowercase().contains(needle.as_str())
                }
                None => true,
            })
            .collect();

        matches.sort_by(|a, b| {
            let ordering = match query.sort_by {
                SortField::CreatedAt => a.order.created_at.cmp(&b.order.created_at),
                SortField::Total => a.order.total.cmp(&b.order.total),
                SortField::PaymentStatus => a.order.payment_status.as_str().cmp(b.order.payment_status.as_str()),
                SortField::FulfillmentStatus => a
                    .order
                    .fulfillment_status
                    .as_str()
                    .cmp(b.order.fulfillment_status.as_str()),
            };
            if query.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        Ok(matches)
    }

    async fn delete_order(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let removed = state.orders.remove(&id).is_some();
        if removed {
            state.items.retain(|item| item.order_id != id);
        }
        Ok(removed)
    }
}
