use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{FulfillmentStatus, PaymentStatus};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use super::{OrderQuery, SortField, Store, StoreError};
use crate::models::*;
use crate::schema::*;
use crate::settlement::{SettlementOutcome, SettlementPlan};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load_lines(conn: &mut AsyncPgConnection, order_ids: Vec<Uuid>) -> Result<Vec<OrderLine>, StoreError> {
    let rows = order_items::table
        .inner_join(products::table)
        .filter(order_items::order_id.eq_any(order_ids))
        .select((OrderItem::as_select(), Product::as_select()))
        .load::<(OrderItem, Product)>(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(item, product)| OrderLine { item, product })
        .collect())
}

/// Attaches customers and item lines, preserving the order of `db_orders`.
async fn load_details(conn: &mut AsyncPgConnection, db_orders: Vec<DbOrder>) -> Result<Vec<OrderDetails>, StoreError> {
    if db_orders.is_empty() {
        return Ok(Vec::new());
    }

    let order_ids: Vec<Uuid> = db_orders.iter().map(|o| o.id).collect();
    let user_ids: Vec<Uuid> = db_orders.iter().map(|o| o.user_id).collect();

    let mut lines_by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
    for line in load_lines(conn, order_ids).await? {
        lines_by_order.entry(line.item.order_id).or_default().push(line);
    }

    let customers: HashMap<Uuid, Customer> = users::table
        .filter(users::id.eq_any(user_ids))
        .select(DbUser::as_select())
        .load::<DbUser>(conn)
        .await?
        .into_iter()
        .map(|u| User::try_from(u).map(|u| (u.id, Customer::from(&u))))
        .collect::<Result<_, _>>()?;

    db_orders
        .into_iter()
        .map(|db_order| -> Result<OrderDetails, StoreError> {
            let order = Order::try_from(db_order)?;
            let customer = customers
                .get(&order.user_id)
                .cloned()
                .ok_or(StoreError::Query(diesel::result::Error::NotFound))?;
            let items = lines_by_order.remove(&order.id).unwrap_or_default();
            Ok(OrderDetails { order, customer, items })
        })
        .collect()
}

/// `ILIKE` pattern matching `needle` literally anywhere in the column.
/// Postgres treats backslash as the default escape character.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl Store for PgStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user = users::table
            .find(id)
            .select(DbUser::as_select())
            .first::<DbUser>(&mut conn)
            .await
            .optional()?;
        Ok(user.map(User::try_from).transpose()?)
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let mut conn = self.pool.get().await?;
        let product = products::table
            .find(id)
            .select(Product::as_select())
            .first::<Product>(&mut conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let mut conn = self.pool.get().await?;
        let products = products::table
            .filter(products::id.eq_any(ids.to_vec()))
            .select(Product::as_select())
            .load::<Product>(&mut conn)
            .await?;
        Ok(products)
    }

    async fn set_product_stock(&self, id: Uuid, stock: i32) -> Result<Option<Product>, StoreError> {
        let mut conn = self.pool.get().await?;
        let product = diesel::update(products::table.find(id))
            .set((products::stock.eq(stock), products::updated_at.eq(Utc::now())))
            .returning(Product::as_returning())
            .get_result::<Product>(&mut conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let new_order = DbOrder::from(order.clone());
        let new_items = items.to_vec();

        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                diesel::insert_into(orders::table)
                    .values(&new_order)
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .execute(conn)
                    .await?;

                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    async fn record_payment_request(
        &self,
        order_id: Uuid,
        tracking_id: Option<&str>,
        status: PaymentStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        // A settlement that lands while the gateway call is in flight wins.
        let updated = diesel::update(
            orders::table
                .find(order_id)
                .filter(orders::payment_status.ne(PaymentStatus::Completed.as_str())),
        )
        .set((
            orders::tracking_id.eq(tracking_id),
            orders::payment_status.eq(status.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .returning(DbOrder::as_returning())
        .get_result::<DbOrder>(&mut conn)
        .await
        .optional()?;
        Ok(updated.map(Order::try_from).transpose()?)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError> {
        let mut conn = self.pool.get().await?;
        let db_order = orders::table
            .find(id)
            .select(DbOrder::as_select())
            .first::<DbOrder>(&mut conn)
            .await
            .optional()?;

        match db_order {
            Some(db_order) => Ok(load_details(&mut conn, vec![db_order]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn settle_order(&self, id: Uuid) -> Result<SettlementOutcome, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                // Row lock serialises duplicate notifications for the same order.
                let order = orders::table
                    .find(id)
                    .select(DbOrder::as_select())
                    .for_update()
                    .first::<DbOrder>(conn)
                    .await
                    .optional()?;

                let order = match order {
                    Some(order) => Order::try_from(order)?,
                    None => return Ok(SettlementOutcome::NotFound),
                };
                if order.payment_status == PaymentStatus::Completed {
                    return Ok(SettlementOutcome::AlreadySettled);
                }
                if order.fulfillment_status == FulfillmentStatus::Cancelled {
                    warn!(order_id = %id, "Payment received for a cancelled order");
                    return Ok(SettlementOutcome::Cancelled);
                }

                let lines = load_lines(conn, vec![id]).await?;
                let plan = SettlementPlan::for_lines(&lines);

                // Lock products in id order so concurrent settlements cannot deadlock.
                let product_ids: Vec<Uuid> = plan.decrements.iter().map(|d| d.product_id).collect();
                let locked: HashMap<Uuid, i32> = products::table
                    .filter(products::id.eq_any(product_ids))
                    .order(products::id.asc())
                    .select((products::id, products::stock))
                    .for_update()
                    .load::<(Uuid, i32)>(conn)
                    .await?
                    .into_iter()
                    .collect();

                if let Some(short) = plan.shortfall(|product_id| locked.get(&product_id).copied()) {
                    warn!(
                        order_id = %id,
                        product_id = %short.product_id,
                        requested = short.quantity,
                        "Insufficient stock at settlement"
                    );
                    return Ok(SettlementOutcome::InsufficientStock {
                        product_name: short.product_name.clone(),
                    });
                }

                let now = Utc::now();
                for decrement in &plan.decrements {
                    let updated = diesel::update(
                        products::table
                            .find(decrement.product_id)
                            .filter(products::stock.ge(decrement.quantity)),
                    )
                    .set((
                        products::stock.eq(products::stock - decrement.quantity),
                        products::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;
                    if updated != 1 {
                        // Rolls back the decrements already applied.
                        return Err(StoreError::Query(diesel::result::Error::RollbackTransaction));
                    }
                }

                for credit in &plan.credits {
                    diesel::update(users::table.find(credit.farmer_id))
                        .set(users::balance.eq(users::balance + credit.amount.clone()))
                        .execute(conn)
                        .await?;
                }

                diesel::update(orders::table.find(id))
                    .set((
                        orders::payment_status.eq(PaymentStatus::Completed.as_str()),
                        orders::paid_at.eq(Some(now)),
                        orders::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                info!(order_id = %id, items = lines.len(), "Order settled");
                Ok(SettlementOutcome::Settled(plan))
            }
            .scope_boxed()
        })
        .await
    }

    async fn transition_fulfillment(
        &self,
        id: Uuid,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(id))
                .filter(orders::fulfillment_status.eq(from.as_str())),
        )
        .set((
            orders::fulfillment_status.eq(to.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .returning(DbOrder::as_returning())
        .get_result::<DbOrder>(&mut conn)
        .await
        .optional()?;
        Ok(updated.map(Order::try_from).transpose()?)
    }

    async fn orders_for_customer(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, StoreError> {
        let mut conn = self.pool.get().await?;
        let db_orders = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::created_at.desc())
            .select(DbOrder::as_select())
            .load::<DbOrder>(&mut conn)
            .await?;
        load_details(&mut conn, db_orders).await
    }

    async fn orders_for_farmer(&self, farmer_id: Uuid) -> Result<Vec<OrderDetails>, StoreError> {
        let mut conn = self.pool.get().await?;
        let owned = order_items::table
            .inner_join(products::table)
            .filter(products::farmer_id.eq(farmer_id))
            .select(order_items::order_id);

        let db_orders = orders::table
            .filter(orders::id.eq_any(owned))
            .order(orders::created_at.desc())
            .select(DbOrder::as_select())
            .load::<DbOrder>(&mut conn)
            .await?;
        load_details(&mut conn, db_orders).await
    }

    async fn search_orders(&self, query: &OrderQuery) -> Result<Vec<OrderDetails>, StoreError> {
        let mut conn = self.pool.get().await?;
        let mut select = orders::table
            .inner_join(users::table)
            .select(DbOrder::as_select())
            .into_boxed();

        if let Some(status) = query.payment_status {
            select = select.filter(orders::payment_status.eq(status.as_str()));
        }
        if let Some(status) = query.fulfillment_status {
            select = select.filter(orders::fulfillment_status.eq(status.as_str()));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = contains_pattern(search);
            let by_customer = users::name
                .ilike(pattern.clone())
                .or(users::email.ilike(pattern));
            select = match Uuid::parse_str(search) {
                Ok(order_id) => select.filter(orders::id.eq(order_id).or(by_customer)),
                Err(_) => select.filter(by_customer),
            };
        }

        select = match (query.sort_by, query.ascending) {
            (SortField::CreatedAt, true) => select.order(orders::created_at.asc()),
            (SortField::CreatedAt, false) => select.order(orders::created_at.desc()),
            (SortField::Total, true) => select.order(orders::total.asc()),
            (SortField::Total, false) => select.order(orders::total.desc()),
            (SortField::PaymentStatus, true) => select.order(orders::payment_status.asc()),
            (SortField::PaymentStatus, false) => select.order(orders::payment_status.desc()),
            (SortField::FulfillmentStatus, true) => select.order(orders::fulfillment_status.asc()),
            (SortField::FulfillmentStatus, false) => select.order(orders::fulfillment_status.desc()),
        };

        let db_orders = select.load::<DbOrder>(&mut conn).await?;
        load_details(&mut conn, db_orders).await
    }

    async fn delete_order(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        // order_items rows go with the order (ON DELETE CASCADE)
        let deleted = diesel::delete(orders::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_wildcards_are_matched_literally() {
        assert_eq!(contains_pattern("kamau"), "%kamau%");
        assert_eq!(contains_pattern("100%_off"), r"%100\%\_off%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }
}
