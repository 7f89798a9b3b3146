//! Ownership and actor identities.
//!
//! A cart or order belongs to exactly one [`Owner`]: an authenticated user
//! or an anonymous session. Every state change records the [`Actor`] that
//! performed it.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::id::{AdminId, UserId};

/// Errors that can occur when parsing a [`SessionToken`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionTokenError {
    /// The token is empty.
    #[error("session token cannot be empty")]
    Empty,
    /// The token is longer than allowed.
    #[error("session token must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The token contains characters outside `[A-Za-z0-9_-]`.
    #[error("session token contains invalid characters")]
    InvalidCharacters,
}

/// Opaque token identifying an anonymous shopper.
///
/// Issued by the identity provider; the storefront only checks its shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    /// Maximum token length.
    pub const MAX_LENGTH: usize = 128;

    /// Parse a session token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty, too long, or contains
    /// characters other than ASCII alphanumerics, `-` and `_`.
    pub fn parse(s: &str) -> Result<Self, SessionTokenError> {
        if s.is_empty() {
            return Err(SessionTokenError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(SessionTokenError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(SessionTokenError::InvalidCharacters);
        }
        Ok(Self(s.to_owned()))
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = SessionTokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0
    }
}

/// The owner of a cart or order.
///
/// Exactly one of user or session, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Owner {
    /// An authenticated customer.
    User(UserId),
    /// An anonymous shopper identified by session token.
    Session(SessionToken),
}

impl Owner {
    /// The user ID, if this is an authenticated owner.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Session(_) => None,
        }
    }

    /// The session token, if this is an anonymous owner.
    #[must_use]
    pub const fn session_token(&self) -> Option<&SessionToken> {
        match self {
            Self::User(_) => None,
            Self::Session(token) => Some(token),
        }
    }

    /// Whether this owner is an anonymous session.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Session(token) => write!(f, "session:{token}"),
        }
    }
}

/// Error returned when an actor string cannot be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid actor: {0}")]
pub struct ActorParseError(String);

/// Who performed a state change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Actor {
    /// The cart/order owner acting on their own resources.
    Customer(Owner),
    /// A store administrator.
    Admin(AdminId),
    /// The storefront itself (payment reconciliation, scheduled jobs).
    System,
}

impl Actor {
    /// Whether this actor may act on resources belonging to `owner`.
    ///
    /// Admins and the system may act on anything; customers only on their own.
    #[must_use]
    pub fn may_act_for(&self, owner: &Owner) -> bool {
        match self {
            Self::Customer(me) => me == owner,
            Self::Admin(_) | Self::System => true,
        }
    }

    /// Whether this actor has administrative privileges.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin(_) | Self::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer(owner) => write!(f, "{owner}"),
            Self::Admin(id) => write!(f, "admin:{id}"),
            Self::System => f.write_str("system"),
        }
    }
}

impl core::str::FromStr for Actor {
    type Err = ActorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Self::System);
        }
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| ActorParseError(s.to_owned()))?;
        let invalid = |_| ActorParseError(s.to_owned());
        match kind {
            "user" => Ok(Self::Customer(Owner::User(value.parse().map_err(invalid)?))),
            "session" => Ok(Self::Customer(Owner::Session(
                SessionToken::parse(value).map_err(|_| ActorParseError(s.to_owned()))?,
            ))),
            "admin" => Ok(Self::Admin(value.parse().map_err(invalid)?)),
            _ => Err(ActorParseError(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Actor {
    type Error = ActorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_validation() {
        assert!(SessionToken::parse("abc-DEF_123").is_ok());
        assert_eq!(SessionToken::parse(""), Err(SessionTokenError::Empty));
        assert_eq!(
            SessionToken::parse("has space"),
            Err(SessionTokenError::InvalidCharacters)
        );
        assert!(matches!(
            SessionToken::parse(&"a".repeat(129)),
            Err(SessionTokenError::TooLong { .. })
        ));
    }

    #[test]
    fn test_owner_accessors() {
        let user = Owner::User(UserId::new(3));
        assert_eq!(user.user_id(), Some(UserId::new(3)));
        assert!(!user.is_anonymous());

        let session = Owner::Session(SessionToken::parse("tok").unwrap());
        assert_eq!(session.user_id(), None);
        assert!(session.is_anonymous());
    }

    #[test]
    fn test_actor_roundtrip_through_string() {
        let actors = [
            Actor::System,
            Actor::Admin(AdminId::new(9)),
            Actor::Customer(Owner::User(UserId::new(12))),
            Actor::Customer(Owner::Session(SessionToken::parse("s-1").unwrap())),
        ];
        for actor in actors {
            let parsed: Actor = actor.to_string().parse().unwrap();
            assert_eq!(parsed, actor);
        }
    }

    #[test]
    fn test_actor_parse_rejects_unknown() {
        assert!("robot:1".parse::<Actor>().is_err());
        assert!("user:abc".parse::<Actor>().is_err());
        assert!("nobody".parse::<Actor>().is_err());
    }

    #[test]
    fn test_may_act_for() {
        let alice = Owner::User(UserId::new(1));
        let bob = Owner::User(UserId::new(2));
        assert!(Actor::Customer(alice.clone()).may_act_for(&alice));
        assert!(!Actor::Customer(bob).may_act_for(&alice));
        assert!(Actor::Admin(AdminId::new(1)).may_act_for(&alice));
        assert!(Actor::System.may_act_for(&alice));
    }
}
