use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};

use crate::{
    audit::log_audit,
    dto::orders::{
        CreateOrderRequest, OrderCustomer, OrderItemDetail, OrderList, OrderWithItems,
        RepeatOrderItem, RepeatOrderResponse, UpdateOrderStatusRequest,
    },
    entity::{
        OrderStatus,
        order_items::{ActiveModel as OrderItemActive, Model as OrderItemModel},
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::{Column as ProdCol, Entity as Products},
        users::{Column as UserCol, Entity as Users},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_staff},
    models::{Order, OrderItem},
    notify,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// Order line with product name, as read back from the database.
#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: i32,
    order_id: i32,
    product_id: i32,
    quantity: i32,
    price_at_purchase: Decimal,
    product_name: Option<String>,
}

/// Gate on incoming order money values: quantities at least one, prices
/// within the money columns, and the submitted total equal to the sum of
/// its lines. Anything off is a client error, not a database one.
fn verify_order_amounts(payload: &CreateOrderRequest) -> AppResult<()> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("Order has no items".into()));
    }

    // Money columns are NUMERIC(10, 2), so 99999999.99 is the ceiling.
    let max_amount = Decimal::new(9_999_999_999, 2);
    let mut expected = Decimal::ZERO;
    for item in &payload.items {
        if item.quantity < 1 {
            return Err(AppError::BadRequest("Quantity must be at least 1".into()));
        }
        if item.price_at_purchase < Decimal::ZERO {
            return Err(AppError::BadRequest("Price must not be negative".into()));
        }
        if item.price_at_purchase > max_amount {
            return Err(AppError::BadRequest("Price is out of range".into()));
        }
        expected = item
            .price_at_purchase
            .checked_mul(Decimal::from(item.quantity))
            .and_then(|line| expected.checked_add(line))
            .ok_or_else(|| AppError::BadRequest("Order total is out of range".into()))?;
    }
    if expected > max_amount {
        return Err(AppError::BadRequest("Order total is out of range".into()));
    }

    // The submitted total must equal the sum of its lines; the snapshot
    // prices themselves are stored verbatim, never recomputed later.
    if expected != payload.total_amount {
        return Err(AppError::BadRequest(
            "Order total does not match its items".into(),
        ));
    }
    Ok(())
}

pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    verify_order_amounts(&payload)?;

    let txn = state.orm.begin().await?;

    let product_ids: Vec<i32> = payload.items.iter().map(|item| item.product_id).collect();
    let products = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .all(&txn)
        .await?;
    let products_by_id: HashMap<i32, _> = products.into_iter().map(|p| (p.id, p)).collect();

    for item in &payload.items {
        match products_by_id.get(&item.product_id) {
            None => {
                return Err(AppError::BadRequest(format!(
                    "Unknown product {}",
                    item.product_id
                )));
            }
            Some(product) if !product.is_active => {
                return Err(AppError::BadRequest(format!(
                    "Product {} is no longer available",
                    product.name
                )));
            }
            Some(_) => {}
        }
    }

    let order = OrderActive {
        id: NotSet,
        user_id: Set(user.user_id.clone()),
        total_amount: Set(payload.total_amount),
        status: Set(OrderStatus::Pending),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItemDetail> = Vec::new();
    for item in &payload.items {
        let inserted = OrderItemActive {
            id: NotSet,
            order_id: Set(order.id),
            product_id: Set(item.product_id),
            quantity: Set(item.quantity),
            price_at_purchase: Set(item.price_at_purchase),
        }
        .insert(&txn)
        .await?;

        items.push(OrderItemDetail {
            item: order_item_from_entity(inserted),
            product_name: products_by_id.get(&item.product_id).map(|p| p.name.clone()),
        });
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total": order.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems {
            order: order_from_entity(order),
            items,
            customer: None,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_user_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id.clone()));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let mut items_by_order = load_items(state, &orders).await?;
    let items = orders
        .into_iter()
        .map(|order| OrderWithItems {
            items: items_by_order.remove(&order.id).unwrap_or_default(),
            order: order_from_entity(order),
            customer: None,
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(meta),
    ))
}

/// Back-office listing: every order, with customer contact info attached.
pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_staff(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let mut items_by_order = load_items(state, &orders).await?;

    let user_ids: Vec<String> = orders.iter().map(|o| o.user_id.clone()).collect();
    let customers: HashMap<String, OrderCustomer> = Users::find()
        .filter(UserCol::Id.is_in(user_ids))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|u| {
            (
                u.id.clone(),
                OrderCustomer {
                    first_name: u.first_name,
                    last_name: u.last_name,
                    email: u.email,
                    phone_number: u.phone_number,
                },
            )
        })
        .collect();

    let items = orders
        .into_iter()
        .map(|order| OrderWithItems {
            items: items_by_order.remove(&order.id).unwrap_or_default(),
            customer: customers.get(&order.user_id).cloned(),
            order: order_from_entity(order),
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items },
        Some(meta),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: i32,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_staff(user)?;

    let existing = Orders::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if state.config.strict_order_status_flow
        && !payload.status.is_next_of(existing.status)
    {
        return Err(AppError::BadRequest(format!(
            "Cannot move order from {} to {}",
            existing.status.as_str(),
            payload.status.as_str()
        )));
    }

    let mut active: OrderActive = existing.into();
    active.status = Set(payload.status);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    if order.status == OrderStatus::ReadyForDelivery {
        notify_order_ready(state, &order).await;
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Line items of a previous order joined with today's catalog entry, so
/// the caller can rebuild a cart. Owner only.
pub async fn repeat_order(
    state: &AppState,
    user: &AuthUser,
    id: i32,
) -> AppResult<ApiResponse<RepeatOrderResponse>> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    #[derive(Debug, sqlx::FromRow)]
    struct RepeatRow {
        product_id: i32,
        product_name: String,
        quantity: i32,
        price: Decimal,
        is_active: bool,
    }

    let rows: Vec<RepeatRow> = sqlx::query_as(
        r#"
        SELECT oi.product_id, p.name AS product_name, oi.quantity,
               p.price, p.is_active
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = $1
        ORDER BY oi.id
        "#,
    )
    .bind(order.id)
    .fetch_all(&state.pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| RepeatOrderItem {
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
            price: row.price,
            is_active: row.is_active,
        })
        .collect();

    Ok(ApiResponse::success(
        "Ok",
        RepeatOrderResponse {
            order_id: order.id,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Fetch the items of a page of orders in one query, grouped by order.
async fn load_items(
    state: &AppState,
    orders: &[OrderModel],
) -> AppResult<HashMap<i32, Vec<OrderItemDetail>>> {
    if orders.is_empty() {
        return Ok(HashMap::new());
    }
    let order_ids: Vec<i32> = orders.iter().map(|o| o.id).collect();

    let rows: Vec<ItemRow> = sqlx::query_as(
        r#"
        SELECT oi.id, oi.order_id, oi.product_id, oi.quantity,
               oi.price_at_purchase, p.name AS product_name
        FROM order_items oi
        LEFT JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = ANY($1)
        ORDER BY oi.id
        "#,
    )
    .bind(&order_ids)
    .fetch_all(&state.pool)
    .await?;

    let mut grouped: HashMap<i32, Vec<OrderItemDetail>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.order_id)
            .or_default()
            .push(OrderItemDetail {
                item: OrderItem {
                    id: row.id,
                    order_id: row.order_id,
                    product_id: row.product_id,
                    quantity: row.quantity,
                    price_at_purchase: row.price_at_purchase,
                },
                product_name: row.product_name,
            });
    }
    Ok(grouped)
}

/// Best effort: a missing phone or a lookup failure never blocks the
/// status transition.
async fn notify_order_ready(state: &AppState, order: &OrderModel) {
    match Users::find_by_id(order.user_id.clone()).one(&state.orm).await {
        Ok(Some(owner)) => {
            if let Some(phone) = owner.phone_number.as_deref() {
                notify::send_order_ready_sms(
                    phone,
                    owner.first_name.as_deref(),
                    order.id,
                    order.total_amount,
                );
            }
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "owner lookup for sms failed"),
    }
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        total_amount: model.total_amount,
        status: model.status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price_at_purchase: model.price_at_purchase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::orders::NewOrderItem;

    fn line(product_id: i32, price: Decimal, quantity: i32) -> NewOrderItem {
        NewOrderItem {
            product_id,
            quantity,
            price_at_purchase: price,
        }
    }

    fn order(items: Vec<NewOrderItem>, total_amount: Decimal) -> CreateOrderRequest {
        CreateOrderRequest {
            items,
            total_amount,
        }
    }

    #[test]
    fn accepts_matching_lines_and_total() {
        let payload = order(
            vec![
                line(1, Decimal::new(450, 2), 2),
                line(2, Decimal::new(500, 2), 1),
            ],
            Decimal::new(1400, 2),
        );
        assert!(verify_order_amounts(&payload).is_ok());
    }

    #[test]
    fn rejects_empty_and_zero_quantity_orders() {
        let empty = order(vec![], Decimal::ZERO);
        assert!(matches!(
            verify_order_amounts(&empty),
            Err(AppError::BadRequest(_))
        ));

        let zero_qty = order(vec![line(1, Decimal::new(450, 2), 0)], Decimal::ZERO);
        assert!(matches!(
            verify_order_amounts(&zero_qty),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_total_mismatch() {
        let payload = order(vec![line(1, Decimal::new(450, 2), 2)], Decimal::new(1000, 2));
        assert!(matches!(
            verify_order_amounts(&payload),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_negative_prices_even_when_the_total_agrees() {
        let payload = order(
            vec![line(1, Decimal::new(-500, 2), 1)],
            Decimal::new(-500, 2),
        );
        assert!(matches!(
            verify_order_amounts(&payload),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_extreme_prices_without_panicking() {
        // Built from JSON to show the extreme value survives deserialization.
        let payload: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "items": [{
                "product_id": 1,
                "quantity": 2,
                "price_at_purchase": "79228162514264337593543950335"
            }],
            "total_amount": "79228162514264337593543950335"
        }))
        .expect("payload deserializes");
        assert!(matches!(
            verify_order_amounts(&payload),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_totals_past_the_money_columns() {
        // Two max-priced lines; each is storable, their sum is not.
        let max = Decimal::new(9_999_999_999, 2);
        let payload = order(vec![line(1, max, 1), line(2, max, 1)], max + max);
        assert!(matches!(
            verify_order_amounts(&payload),
            Err(AppError::BadRequest(_))
        ));
    }
}
