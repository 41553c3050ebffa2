use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Teacher, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Teacher => "TEACHER",
            Role::Admin => "ADMIN",
        }
    }

    /// Authority string carried in access tokens.
    pub fn authority(&self) -> &'static str {
        match self {
            Role::Student => "ROLE_STUDENT",
            Role::Teacher => "ROLE_TEACHER",
            Role::Admin => "ROLE_ADMIN",
        }
    }

    /// Accepts both `TEACHER` and `ROLE_TEACHER`, case-insensitively.
    pub fn parse(raw: &str) -> Option<Role> {
        let upper = raw.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("ROLE_").unwrap_or(&upper);
        Role::ALL.into_iter().find(|r| r.as_str() == bare)
    }
}

/// User record as handed to services.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_verified: bool,
    pub verification_code: Option<String>,
    pub verification_code_expiry: Option<OffsetDateTime>,
    pub password_reset_code: Option<String>,
    pub password_reset_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted: bool,
}

/// Row shape of `users`; role is stored as text.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub is_verified: bool,
    pub verification_code: Option<String>,
    pub verification_code_expiry: Option<OffsetDateTime>,
    pub password_reset_code: Option<String>,
    pub password_reset_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted: bool,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&r.role)
            .ok_or_else(|| anyhow::anyhow!("unknown role {:?} on user {}", r.role, r.id))?;
        Ok(Self {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            first_name: r.first_name,
            last_name: r.last_name,
            role,
            is_verified: r.is_verified,
            verification_code: r.verification_code,
            verification_code_expiry: r.verification_code_expiry,
            password_reset_code: r.password_reset_code,
            password_reset_expiry: r.password_reset_expiry,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted: r.deleted,
        })
    }
}

/// Fields supplied when a user registers.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub verification_code: String,
    pub verification_code_expiry: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub user_id: i64,
    pub token: String,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}
