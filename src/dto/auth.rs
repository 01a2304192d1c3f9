use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{entity::Role, models::User};

/// Provider-issued identity token handed over by the frontend after the
/// provider redirect.
#[derive(Deserialize, Debug, ToSchema)]
pub struct CallbackRequest {
    pub id_token: String,
}

/// Claims we read from a verified provider identity token. Expiry and
/// audience are checked by the decoder, not carried here.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

/// Claims carried by our own session token.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct SessionClaims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}
