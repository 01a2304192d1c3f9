use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entity::OrderStatus,
    models::{Order, OrderItem},
};

/// One line of an incoming order. The unit price is the price the
/// customer saw at purchase time; the lines must add up to the
/// submitted total.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewOrderItem {
    pub product_id: i32,
    pub quantity: i32,
    #[schema(value_type = String, example = "5.00")]
    pub price_at_purchase: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<NewOrderItem>,
    #[schema(value_type = String, example = "10.00")]
    pub total_amount: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Order line joined with its product name for display.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemDetail {
    #[serde(flatten)]
    pub item: OrderItem,
    pub product_name: Option<String>,
}

/// Customer fields staff see next to an order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderCustomer {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItemDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<OrderCustomer>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<OrderWithItems>,
}

/// One line of a previous order, priced at today's catalog so the client
/// can rebuild its cart.
#[derive(Debug, Serialize, ToSchema)]
pub struct RepeatOrderItem {
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String, example = "5.00")]
    pub price: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RepeatOrderResponse {
    pub order_id: i32,
    pub items: Vec<RepeatOrderItem>,
}
