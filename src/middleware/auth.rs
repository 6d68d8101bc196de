use crate::{config::Security, errors::AppError, models::access::Access, state::AppState};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

/// Bearer token middleware for the `/files` routes.
/// Resolves the caller's [`Access`] and stores it as a request extension.
pub async fn authorize(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| AppError::unauthorized("missing or invalid Authorization header"))?;

    let access = resolve_access(&state.security, token)
        .ok_or_else(|| AppError::unauthorized("invalid token"))?;

    request.extensions_mut().insert(access);
    Ok(next.run(request).await)
}

/// Token of an `Authorization: Bearer <token>` header. The scheme is
/// matched case-insensitively and any run of whitespace separates it from
/// the token.
pub fn bearer_token(header: &str) -> Option<&str> {
    let mut fields = header.split_whitespace();
    let scheme = fields.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    fields.last()
}

/// Map a bearer token to the access it grants, `None` for unknown tokens.
pub fn resolve_access(security: &Security, token: &str) -> Option<Access> {
    if token.is_empty() {
        None
    } else if token == security.write_token {
        Some(Access::read_write())
    } else if token == security.read_token {
        Some(Access::read_only())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security() -> Security {
        Security {
            read_token: "reader".into(),
            write_token: "writer".into(),
        }
    }

    #[test]
    fn bearer_header_parsing_is_lenient_about_case_and_spacing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("BEARER \t abc  "), Some("abc"));
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn tokens_resolve_to_their_scope() {
        let sec = security();
        assert_eq!(resolve_access(&sec, "writer"), Some(Access::read_write()));
        assert_eq!(resolve_access(&sec, "reader"), Some(Access::read_only()));
        assert_eq!(resolve_access(&sec, "other"), None);
        assert_eq!(resolve_access(&sec, ""), None);
    }
}
