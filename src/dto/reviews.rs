use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Review;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReviewRequest {
    /// 1 to 5 stars.
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EligibilityResponse {
    pub can_review: bool,
}

/// The public-facing author fields shown next to a review.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewAuthor {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewWithAuthor {
    #[serde(flatten)]
    pub review: Review,
    pub author: ReviewAuthor,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ReviewList {
    #[schema(value_type = Vec<ReviewWithAuthor>)]
    pub items: Vec<ReviewWithAuthor>,
}
