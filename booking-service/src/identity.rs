use axum::http::HeaderMap;
use shared::BookingError;
use uuid::Uuid;

pub const DEFAULT_USER_ID_HEADER: &str = "x-user-id";

/// Resolves the calling user from an incoming request.
pub trait IdentityProvider: Send + Sync {
    fn user_id(&self, headers: &HeaderMap) -> Result<Uuid, BookingError>;
}

/// Trusts a user id header set by the authenticating gateway.
#[derive(Debug, Clone)]
pub struct GatewayHeaderIdentity {
    header: String,
}

impl GatewayHeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl Default for GatewayHeaderIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_USER_ID_HEADER)
    }
}

impl IdentityProvider for GatewayHeaderIdentity {
    fn user_id(&self, headers: &HeaderMap) -> Result<Uuid, BookingError> {
        headers
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or(BookingError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_configured_header() {
        let user = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_str(&user.to_string()).unwrap());

        let identity = GatewayHeaderIdentity::new("X-Forwarded-User");
        assert_eq!(identity.user_id(&headers), Ok(user));
    }

    #[test]
    fn missing_or_malformed_header_is_unauthorized() {
        let identity = GatewayHeaderIdentity::default();
        assert_eq!(identity.user_id(&HeaderMap::new()), Err(BookingError::Unauthorized));

        let mut headers = HeaderMap::new();
        headers.insert(DEFAULT_USER_ID_HEADER, HeaderValue::from_static("user-7"));
        assert_eq!(identity.user_id(&headers), Err(BookingError::Unauthorized));
    }
}
