//! Principal extraction.
//!
//! Token validation happens upstream; this layer trusts the verified
//! principal headers the gateway attaches and rejects requests without them.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use clipforge_models::{PlanTier, Principal};

use crate::error::ApiError;

/// Header carrying the verified principal id.
pub const PRINCIPAL_HEADER: &str = "x-principal-id";
/// Header carrying the principal's subscription plan.
pub const PLAN_HEADER: &str = "x-principal-plan";

/// Extractor for the authenticated principal.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthenticated("missing principal"))?;

        let plan = parts
            .headers
            .get(PLAN_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<PlanTier>().ok())
            .unwrap_or_default();

        Ok(AuthPrincipal(Principal::new(id, plan)))
    }
}
