use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    routes::AppState,
};

/// Rejects requests without the configured admin bearer token
///
/// Passes everything through when no token is configured.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    if let Some(expected) = state.admin_token.as_deref() {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);

        if provided != Some(expected) {
            tracing::warn!(uri = %request.uri(), "Rejected admin request");
            return Err(AppError::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}
