use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::http::{AppState, ErrorBody};

/// The single shared admin credential.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    password: String,
}

impl AdminAuth {
    pub fn new(password: String) -> Self {
        Self { password }
    }

    /// Accepts `Authorization: Bearer <password>`.
    pub fn verify(&self, authorization: Option<&str>) -> bool {
        let Some(token) = authorization.and_then(|v| v.strip_prefix("Bearer ")) else {
            return false;
        };
        constant_time_eq(token.trim().as_bytes(), self.password.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !state.admin.verify(authorization) {
        tracing::warn!(path = %req.uri().path(), "rejected admin request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("Unauthorized", "unauthorized")),
        )
            .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_password_verifies() {
        let auth = AdminAuth::new("s3cret".into());
        assert!(auth.verify(Some("Bearer s3cret")));
        assert!(!auth.verify(Some("Bearer s3cre")));
        assert!(!auth.verify(Some("s3cret")));
        assert!(!auth.verify(None));
    }
}
