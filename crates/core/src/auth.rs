//! Bearer token check shared by the server and agent HTTP endpoints

/// Whether a request may proceed
///
/// With no token configured every request is allowed. Otherwise the
/// `Authorization` header value must be exactly `Bearer <token>`.
pub fn bearer_authorized(authorization: Option<&str>, token: Option<&str>) -> bool {
    let Some(token) = token else {
        return true;
    };

    authorization
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented == token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_token() {
        assert!(bearer_authorized(None, None));
        assert!(bearer_authorized(Some("Bearer anything"), None));
    }

    #[test]
    fn test_requires_exact_bearer() {
        let token = Some("s3cret");
        assert!(bearer_authorized(Some("Bearer s3cret"), token));
        assert!(!bearer_authorized(None, token));
        assert!(!bearer_authorized(Some("s3cret"), token));
        assert!(!bearer_authorized(Some("Bearer wrong"), token));
        assert!(!bearer_authorized(Some("Basic s3cret"), token));
    }
}
