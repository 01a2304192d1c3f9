use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{CallbackRequest, LoginResponse},
        orders::{
            CreateOrderRequest, NewOrderItem, OrderCustomer, OrderItemDetail, OrderList,
            OrderWithItems, RepeatOrderItem, RepeatOrderResponse, UpdateOrderStatusRequest,
        },
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
        reviews::{CreateReviewRequest, EligibilityResponse, ReviewAuthor, ReviewList, ReviewWithAuthor},
        users::{
            CreatePreassignedRoleRequest, PreassignedRoleList, UpdateProfileRequest,
            UpdateUserRoleRequest, UserList,
        },
    },
    entity::{OrderStatus, Role},
    models::{Order, OrderItem, PreassignedRole, Product, ProductWithRating, Review, User},
    response::{ApiResponse, Meta},
    routes::{
        admin, auth, dashboard, health, orders, params, products as product_routes, reviews,
        users as user_routes,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::callback,
        auth::current_user,
        user_routes::update_profile,
        product_routes::list_products,
        product_routes::get_product,
        product_routes::create_product,
        product_routes::update_product,
        product_routes::delete_product,
        reviews::list_reviews,
        reviews::can_review,
        reviews::create_review,
        orders::list_orders,
        orders::create_order,
        orders::repeat_order,
        orders::update_order_status,
        dashboard::list_all_orders,
        admin::list_users,
        admin::update_user_role,
        admin::delete_user,
        admin::list_preassigned_roles,
        admin::create_preassigned_role,
        admin::delete_preassigned_role
    ),
    components(
        schemas(
            User,
            Role,
            Product,
            ProductWithRating,
            Order,
            OrderStatus,
            OrderItem,
            Review,
            PreassignedRole,
            CallbackRequest,
            LoginResponse,
            UpdateProfileRequest,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            CreateReviewRequest,
            EligibilityResponse,
            ReviewAuthor,
            ReviewWithAuthor,
            ReviewList,
            CreateOrderRequest,
            NewOrderItem,
            UpdateOrderStatusRequest,
            OrderItemDetail,
            OrderCustomer,
            OrderWithItems,
            OrderList,
            RepeatOrderItem,
            RepeatOrderResponse,
            UpdateUserRoleRequest,
            CreatePreassignedRoleRequest,
            UserList,
            PreassignedRoleList,
            health::HealthData,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<User>,
            ApiResponse<LoginResponse>,
            ApiResponse<ProductWithRating>,
            ApiResponse<ProductList>,
            ApiResponse<ReviewList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<UserList>,
            ApiResponse<PreassignedRoleList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Login callback and session endpoints"),
        (name = "Users", description = "Self-service profile endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Reviews", description = "Review and eligibility endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Dashboard", description = "Staff order dashboard"),
        (name = "Admin", description = "User and role administration"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
