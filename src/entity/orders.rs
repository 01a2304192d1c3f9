use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: String,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    Users,
    #[sea_orm(has_many = "super::order_items::Entity")]
    OrderItems,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "in_preparation")]
    InPreparation,
    #[sea_orm(string_value = "ready_for_delivery")]
    ReadyForDelivery,
    #[sea_orm(string_value = "delivered")]
    Delivered,
}

impl OrderStatus {
    /// The single-step successor in the declared fulfilment flow, if any.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::InPreparation),
            OrderStatus::InPreparation => Some(OrderStatus::ReadyForDelivery),
            OrderStatus::ReadyForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => None,
        }
    }

    /// Whether `self` directly follows `prev` in the declared flow.
    pub fn is_next_of(self, prev: OrderStatus) -> bool {
        prev.next() == Some(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InPreparation => "in_preparation",
            OrderStatus::ReadyForDelivery => "ready_for_delivery",
            OrderStatus::Delivered => "delivered",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfilment_flow_is_linear() {
        assert!(OrderStatus::InPreparation.is_next_of(OrderStatus::Pending));
        assert!(OrderStatus::ReadyForDelivery.is_next_of(OrderStatus::InPreparation));
        assert!(OrderStatus::Delivered.is_next_of(OrderStatus::ReadyForDelivery));
        assert_eq!(OrderStatus::Delivered.next(), None);
    }

    #[test]
    fn skipping_a_step_is_not_a_direct_transition() {
        assert!(!OrderStatus::ReadyForDelivery.is_next_of(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.is_next_of(OrderStatus::Delivered));
    }
}
