//! Caller identity extractor.
//!
//! Authentication happens upstream: the identity provider (or gateway in
//! front of the storefront) forwards who is calling in trusted headers. This
//! module only parses them.
//!
//! | Header              | Meaning                         |
//! |---------------------|---------------------------------|
//! | `x-admin-id`        | Store administrator             |
//! | `x-user-id`         | Authenticated customer          |
//! | `x-session-token`   | Anonymous shopper               |

use axum::{extract::FromRequestParts, http::request::Parts};
use guardline_core::{Actor, AdminId, Owner, SessionToken, UserId};

use crate::error::AppError;

/// Header carrying an administrator id.
pub const ADMIN_ID_HEADER: &str = "x-admin-id";
/// Header carrying an authenticated customer id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying an anonymous session token.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Who is making the request.
///
/// At least one identity is present. A logged-in shopper may send both a
/// user id and their pre-login session token, which is what cart merging
/// needs.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(caller: Caller) -> Result<Json<CartView>> {
///     let owner = caller.owner()?;
///     // ...
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub admin: Option<AdminId>,
    pub user: Option<UserId>,
    pub session: Option<SessionToken>,
}

impl Caller {
    /// The owner whose cart and orders this request addresses. A user id
    /// wins over a session token.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for an admin-only caller.
    pub fn owner(&self) -> Result<Owner, AppError> {
        if let Some(user) = self.user {
            return Ok(Owner::User(user));
        }
        self.session
            .clone()
            .map(Owner::Session)
            .ok_or_else(|| AppError::Unauthorized("a customer identity is required".to_string()))
    }

    /// The actor recorded against state changes made by this request.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` when the caller carries no identity at all.
    pub fn actor(&self) -> Result<Actor, AppError> {
        if let Some(admin) = self.admin {
            return Ok(Actor::Admin(admin));
        }
        self.owner().map(Actor::Customer)
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_id<T: std::str::FromStr>(parts: &Parts, name: &str) -> Result<Option<T>, AppError> {
    header(parts, name)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| AppError::Validation(format!("malformed {name} header")))
        })
        .transpose()
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let admin = parse_id::<AdminId>(parts, ADMIN_ID_HEADER)?;
        let user = parse_id::<UserId>(parts, USER_ID_HEADER)?;
        let session = header(parts, SESSION_TOKEN_HEADER)
            .map(|v| {
                SessionToken::parse(v).map_err(|e| AppError::Validation(format!("{e}")))
            })
            .transpose()?;

        if admin.is_none() && user.is_none() && session.is_none() {
            return Err(AppError::Unauthorized(
                "missing caller identity".to_string(),
            ));
        }

        if let Some(user) = user {
            tracing::Span::current().record("user_id", user.as_i32());
        }

        Ok(Self {
            admin,
            user,
            session,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(headers: &[(&str, &str)]) -> Result<Caller, AppError> {
        let mut builder = Request::builder().uri("/cart");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_user_wins_over_session() {
        let caller = extract(&[(USER_ID_HEADER, "7"), (SESSION_TOKEN_HEADER, "anon-1")])
            .await
            .unwrap();
        assert_eq!(caller.owner().unwrap(), Owner::User(UserId::new(7)));
        assert_eq!(
            caller.actor().unwrap(),
            Actor::Customer(Owner::User(UserId::new(7)))
        );
        assert!(caller.session.is_some());
    }

    #[tokio::test]
    async fn test_session_only() {
        let caller = extract(&[(SESSION_TOKEN_HEADER, "anon-1")]).await.unwrap();
        assert_eq!(
            caller.owner().unwrap(),
            Owner::Session(SessionToken::parse("anon-1").unwrap())
        );
    }

    #[tokio::test]
    async fn test_admin_has_no_owner() {
        let caller = extract(&[(ADMIN_ID_HEADER, "1")]).await.unwrap();
        assert_eq!(caller.actor().unwrap(), Actor::Admin(AdminId::new(1)));
        assert!(matches!(caller.owner(), Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_missing_identity() {
        assert!(matches!(extract(&[]).await, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_empty_caller_is_not_an_actor() {
        let caller = Caller {
            admin: None,
            user: None,
            session: None,
        };
        assert!(matches!(caller.actor(), Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_malformed_headers() {
        assert!(matches!(
            extract(&[(USER_ID_HEADER, "abc")]).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            extract(&[(SESSION_TOKEN_HEADER, "has space")]).await,
            Err(AppError::Validation(_))
        ));
    }
}
