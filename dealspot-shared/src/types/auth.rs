use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles issued by the identity service. Chat only reads them; every
/// moderation operation goes through `can_moderate` / `can_administer`
/// rather than comparing role strings at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Verified,
    Moderator,
    Admin,
    SuperAdmin,
}

impl UserRole {
    /// Moderator and above: delete messages, issue/lift bans, review
    /// unban requests, see real ban reasons.
    pub fn can_moderate(&self) -> bool {
        matches!(self, UserRole::Moderator | UserRole::Admin | UserRole::SuperAdmin)
    }

    /// Admin and above: manage the banned-word list.
    pub fn can_administer(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::SuperAdmin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::User => write!(f, "user"),
            UserRole::Verified => write!(f, "verified"),
            UserRole::Moderator => write!(f, "moderator"),
            UserRole::Admin => write!(f, "admin"),
            UserRole::SuperAdmin => write!(f, "super_admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "verified" => Ok(UserRole::Verified),
            "moderator" => Ok(UserRole::Moderator),
            "admin" => Ok(UserRole::Admin),
            "super_admin" => Ok(UserRole::SuperAdmin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(user_id: Uuid, role: UserRole, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            role,
            iat: now,
            exp: now + duration_secs,
            jti: Uuid::now_v7(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
    pub token_id: Uuid,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            token_id: claims.jti,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn moderation_policy_covers_moderator_and_above() {
        assert!(!UserRole::User.can_moderate());
        assert!(!UserRole::Verified.can_moderate());
        assert!(UserRole::Moderator.can_moderate());
        assert!(UserRole::Admin.can_moderate());
        assert!(UserRole::SuperAdmin.can_moderate());
    }

    #[test]
    fn admin_policy_excludes_moderators() {
        assert!(!UserRole::Moderator.can_administer());
        assert!(UserRole::Admin.can_administer());
        assert!(UserRole::SuperAdmin.can_administer());
    }

    #[test]
    fn role_round_trips_through_display() {
        for role in [
            UserRole::User,
            UserRole::Verified,
            UserRole::Moderator,
            UserRole::Admin,
            UserRole::SuperAdmin,
        ] {
            assert_eq!(UserRole::from_str(&role.to_string()).unwrap(), role);
        }
    }
}
