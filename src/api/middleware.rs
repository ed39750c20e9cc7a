use crate::error::{AppError, Result};
use crate::services::auth::Claims;
use crate::state::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

/// Extracts and verifies the bearer token, rejecting the request before the
/// handler body runs if it is missing or invalid.
pub struct RequireAuth(pub Claims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let claims = state.auth_service.verify_token(token).await?;

        Ok(RequireAuth(claims))
    }
}
