use std::marker::PhantomData;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{
    auth::{jwt::TokenService, repo_types::Role},
    error::AppError,
};

/// Identity attached to a request that carried a valid access token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: i64,
    /// Normalized `ROLE_*` authorities.
    pub roles: Vec<String>,
}

impl CurrentUser {
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed
            .iter()
            .any(|role| self.roles.iter().any(|r| r == role.authority()))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolves the bearer token, if any. A missing or unusable token leaves the
/// request anonymous; endpoints decide whether that is acceptable.
pub async fn auth_middleware(
    State(tokens): State<TokenService>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    if let Some(token) = bearer_token(&parts) {
        match tokens.validate(token) {
            Ok(identity) => {
                parts.extensions.insert(CurrentUser {
                    user_id: identity.subject,
                    roles: identity.roles,
                });
            }
            Err(e) => debug!(reason = e.code(), "ignoring unusable bearer token"),
        }
    }

    next.run(Request::from_parts(parts, body)).await
}

/// A set of roles an endpoint admits.
pub trait AllowedRoles {
    const ROLES: &'static [Role];
}

pub struct AnyRole;
pub struct Staff;
pub struct AdminOnly;

impl AllowedRoles for AnyRole {
    const ROLES: &'static [Role] = &Role::ALL;
}

impl AllowedRoles for Staff {
    const ROLES: &'static [Role] = &[Role::Teacher, Role::Admin];
}

impl AllowedRoles for AdminOnly {
    const ROLES: &'static [Role] = &[Role::Admin];
}

/// Extracts the caller, rejecting anonymous requests with 401 and callers
/// outside `R` with 403.
pub struct Authorized<R>(pub CurrentUser, PhantomData<fn() -> R>);

#[async_trait]
impl<S, R> FromRequestParts<S> for Authorized<R>
where
    S: Send + Sync,
    R: AllowedRoles + 'static,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AppError::Unauthenticated)?;

        if !user.has_any_role(R::ROLES) {
            debug!(user_id = user.user_id, "role check failed");
            return Err(AppError::Forbidden);
        }
        Ok(Authorized(user, PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(roles: &[&str]) -> CurrentUser {
        CurrentUser {
            user_id: 1,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn role_sets_intersect_with_caller_roles() {
        let teacher = caller(&["ROLE_TEACHER"]);
        assert!(teacher.has_any_role(AnyRole::ROLES));
        assert!(teacher.has_any_role(Staff::ROLES));
        assert!(!teacher.has_any_role(AdminOnly::ROLES));

        let student = caller(&["ROLE_STUDENT"]);
        assert!(student.has_any_role(AnyRole::ROLES));
        assert!(!student.has_any_role(Staff::ROLES));

        assert!(!caller(&[]).has_any_role(AnyRole::ROLES));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let req = axum::http::Request::builder()
            .header(AUTHORIZATION, "Token abc")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        assert!(bearer_token(&parts).is_none());

        let req = axum::http::Request::builder()
            .header(AUTHORIZATION, "Bearer abc.def")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        assert_eq!(bearer_token(&parts), Some("abc.def"));
    }
}
