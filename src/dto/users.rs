use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entity::Role,
    models::{PreassignedRole, User},
};

/// Self-service profile update. Every field is optional; absent fields
/// are left untouched.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePreassignedRoleRequest {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub role: Role,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct UserList {
    #[schema(value_type = Vec<User>)]
    pub items: Vec<User>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct PreassignedRoleList {
    #[schema(value_type = Vec<PreassignedRole>)]
    pub items: Vec<PreassignedRole>,
}
