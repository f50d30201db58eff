//! Access token checks for inbound connections.

use onegate_core::ActionError;

/// Extracts the token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` and `Token <token>` (case-insensitive scheme).
pub fn parse_authorization(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token") {
        Some(token.trim()).filter(|t| !t.is_empty())
    } else {
        None
    }
}

/// Checks a provided token against the expected one.
///
/// No expected token means the endpoint is open. A missing token yields
/// [`ActionError::Unauthorized`], a wrong one [`ActionError::Forbidden`].
pub fn authorize(expected: Option<&str>, provided: Option<&str>) -> Result<(), ActionError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match provided {
        None => Err(ActionError::Unauthorized),
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        Some(_) => Err(ActionError::Forbidden),
    }
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authorization() {
        assert_eq!(parse_authorization("Bearer abc"), Some("abc"));
        assert_eq!(parse_authorization("token abc"), Some("abc"));
        assert_eq!(parse_authorization("Basic abc"), None);
        assert_eq!(parse_authorization("abc"), None);
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(None, None).is_ok());
        assert!(authorize(Some("s3cret"), Some("s3cret")).is_ok());
        assert!(matches!(
            authorize(Some("s3cret"), None),
            Err(ActionError::Unauthorized)
        ));
        assert!(matches!(
            authorize(Some("s3cret"), Some("guess")),
            Err(ActionError::Forbidden)
        ));
    }
}
