use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::products)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
    pub category_id: Uuid,
    pub farmer_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::order_items)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct DbOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_status: String,
    pub fulfillment_status: String,
    pub total: BigDecimal,
    pub shipping_address: String,
    pub tracking_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub total: BigDecimal,
    pub shipping_address: String,
    pub tracking_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for DbOrder {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            payment_status: order.payment_status.to_string(),
            fulfillment_status: order.fulfillment_status.to_string(),
            total: order.total,
            shipping_address: order.shipping_address,
            tracking_id: order.tracking_id,
            paid_at: order.paid_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl TryFrom<DbOrder> for Order {
    type Error = UnknownVariant;

    fn try_from(db_order: DbOrder) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db_order.id,
            user_id: db_order.user_id,
            payment_status: db_order.payment_status.parse()?,
            fulfillment_status: db_order.fulfillment_status.parse()?,
            total: db_order.total,
            shipping_address: db_order.shipping_address,
            tracking_id: db_order.tracking_id,
            paid_at: db_order.paid_at,
            created_at: db_order.created_at,
            updated_at: db_order.updated_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
pub struct DbUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub balance: BigDecimal,
    pub created_at: DateTime<Utc>,
}

/// A marketplace account. The password hash never leaves the database layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub balance: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbUser> for User {
    type Error = UnknownVariant;

    fn try_from(db_user: DbUser) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db_user.id,
            name: db_user.name,
            email: db_user.email,
            phone: db_user.phone,
            role: db_user.role.parse()?,
            balance: db_user.balance,
            created_at: db_user.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl From<&User> for Customer {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    #[serde(flatten)]
    pub item: OrderItem,
    pub product: Product,
}

/// An order with its customer and item lines, as returned by every listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub customer: Customer,
    pub items: Vec<OrderLine>,
}

impl OrderDetails {
    pub fn is_owned_by(&self, farmer_id: Uuid) -> bool {
        self.items.iter().any(|line| line.product.farmer_id == farmer_id)
    }

    /// Keeps only the farmer's own lines and recomputes the total over them.
    /// Returns `None` when the farmer has nothing in this order.
    pub fn scoped_to_farmer(mut self, farmer_id: Uuid) -> Option<OrderDetails> {
        self.items.retain(|line| line.product.farmer_id == farmer_id);
        if self.items.is_empty() {
            return None;
        }
        self.order.total = sum_lines(self.items.iter().map(|line| (&line.item.price, line.item.quantity)));
        Some(self)
    }
}
