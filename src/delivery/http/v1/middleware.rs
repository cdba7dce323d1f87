use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::{usecase::jwt::TokenType, AppState};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    let Some(token) = token else {
        tracing::warn!("missing or invalid authorization header");
        return Err((
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header".to_string(),
        ));
    };

    let claims = match state.jwt_service.validate_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(?e, "invalid token");
            return Err((StatusCode::UNAUTHORIZED, format!("Invalid token: {}", e)));
        }
    };

    // Refresh tokens must not authorize API calls
    if claims.token_type != TokenType::Access {
        tracing::warn!("attempted to use non-access token for authentication");
        return Err((
            StatusCode::UNAUTHORIZED,
            "Invalid token type".to_string(),
        ));
    }

    if claims.sub.is_empty() {
        tracing::warn!("token has empty subject");
        return Err((StatusCode::UNAUTHORIZED, "Invalid user ID in token".to_string()));
    }

    let authenticated_user = AuthenticatedUser { user_id: claims.sub };

    tracing::debug!(?authenticated_user, "user authenticated successfully");
    request.extensions_mut().insert(authenticated_user);

    Ok(next.run(request).await)
}
