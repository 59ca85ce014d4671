pub mod stats;
pub mod users;

use axum::http::StatusCode;

use crate::auth::middleware::Claims;
use crate::error::{api_error, ApiError};

/// Admin endpoints are role-gated on the token claims.
pub fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::FORBIDDEN,
            "Se requiere rol de administrador",
        ))
    }
}
