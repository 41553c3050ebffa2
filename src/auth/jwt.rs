use std::sync::Arc;

use axum::extract::FromRef;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument, warn};

use crate::{
    auth::{
        claims::{normalize_role, Claims, TokenIdentity},
        repo_types::{RefreshToken, Role, User},
    },
    config::JwtConfig,
    error::AppError,
    state::AppState,
    store::CredentialStore,
};

/// Access/refresh pair handed to clients.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Mints signed access tokens and storage-backed opaque refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store: Arc<dyn CredentialStore>,
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl TokenService {
    pub fn new(cfg: &JwtConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::minutes(cfg.ttl_minutes),
            refresh_ttl: Duration::days(cfg.refresh_ttl_days),
            store,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("jwt encode: {e}")))
    }

    pub fn issue_access_token(&self, user_id: i64, role: Role) -> Result<String, AppError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.access_ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            roles: vec![role.authority().to_string()],
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = self.sign(&claims)?;
        debug!(user_id, role = role.as_str(), "access token signed");
        Ok(token)
    }

    fn new_refresh_row(&self, user_id: i64, now: OffsetDateTime) -> RefreshToken {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        RefreshToken {
            user_id,
            token: Base64UrlUnpadded::encode_string(&bytes),
            issued_at: now,
            expires_at: now + self.refresh_ttl,
        }
    }

    pub async fn issue_refresh_token(&self, user: &User) -> Result<String, AppError> {
        let row = self.new_refresh_row(user.id, OffsetDateTime::now_utc());
        self.store.insert_refresh_token(&row).await?;
        Ok(row.token)
    }

    pub async fn issue_pair(&self, user: &User) -> Result<IssuedTokens, AppError> {
        Ok(IssuedTokens {
            access_token: self.issue_access_token(user.id, user.role)?,
            refresh_token: self.issue_refresh_token(user).await?,
        })
    }

    /// Pure check of signature, issuer, audience and expiry; never touches storage.
    pub fn validate(&self, token: &str) -> Result<TokenIdentity, AppError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::TokenInvalid,
            }
        })?;

        let subject = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::TokenInvalid)?;

        Ok(TokenIdentity {
            subject,
            roles: data.claims.roles.iter().map(|r| normalize_role(r)).collect(),
        })
    }

    /// Single-use exchange of a refresh token for a fresh pair.
    #[instrument(skip_all)]
    pub async fn rotate_refresh_token(&self, old: &str) -> Result<(IssuedTokens, User), AppError> {
        let now = OffsetDateTime::now_utc();
        let replacement = self.new_refresh_row(0, now);

        let rotated = self
            .store
            .rotate_refresh_token(
                old,
                Box::new(move |current| {
                    if current.is_expired_at(now) {
                        return Err(AppError::RefreshTokenExpired);
                    }
                    Ok(RefreshToken {
                        user_id: current.user_id,
                        ..replacement
                    })
                }),
            )
            .await;

        let next = match rotated {
            Ok(next) => next,
            Err(AppError::RefreshTokenExpired) => {
                if let Err(e) = self.store.delete_refresh_token(old).await {
                    warn!(error = %e, "failed to drop expired refresh token");
                }
                return Err(AppError::RefreshTokenExpired);
            }
            Err(e) => return Err(e),
        };

        let Some(user) = self.store.find_user_by_id(next.user_id).await? else {
            // account gone since issue; drop the replacement too
            if let Err(e) = self.store.delete_refresh_token(&next.token).await {
                warn!(error = %e, "failed to drop refresh token of missing user");
            }
            return Err(AppError::TokenInvalid);
        };

        let access_token = self.issue_access_token(user.id, user.role)?;
        debug!(user_id = user.id, "refresh token rotated");
        Ok((
            IssuedTokens {
                access_token,
                refresh_token: next.token,
            },
            user,
        ))
    }

    pub async fn revoke_refresh_token(&self, token: &str) -> Result<bool, AppError> {
        self.store.delete_refresh_token(token).await
    }

    #[cfg(test)]
    pub(crate) fn sign_raw(&self, claims: &Claims) -> String {
        self.sign(claims).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::memory::MemoryStore;

    fn make_service(issuer: &str, audience: &str) -> (TokenService, Arc<MemoryStore>) {
        let mut cfg = AppConfig::for_tests().jwt;
        cfg.issuer = issuer.into();
        cfg.audience = audience.into();
        let store = Arc::new(MemoryStore::new());
        (TokenService::new(&cfg, store.clone()), store)
    }

    fn claims_for(svc: &TokenService, exp_offset: Duration) -> Claims {
        let now = OffsetDateTime::now_utc();
        Claims {
            sub: "9".into(),
            roles: vec!["teacher".into()],
            iat: now.unix_timestamp() as usize,
            exp: (now + exp_offset).unix_timestamp() as usize,
            iss: svc.issuer.clone(),
            aud: svc.audience.clone(),
        }
    }

    #[test]
    fn sign_and_validate_access_token() {
        let (svc, _) = make_service("test-issuer", "test-aud");
        let token = svc.issue_access_token(42, Role::Teacher).expect("sign access");
        let id = svc.validate(&token).expect("validate");
        assert_eq!(id.subject, 42);
        assert_eq!(id.roles, vec!["ROLE_TEACHER".to_string()]);
    }

    #[test]
    fn validate_normalizes_unprefixed_roles() {
        let (svc, _) = make_service("iss", "aud");
        let token = svc.sign_raw(&claims_for(&svc, Duration::minutes(5)));
        let id = svc.validate(&token).unwrap();
        assert_eq!(id.roles, vec!["ROLE_TEACHER".to_string()]);
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let (svc, _) = make_service("iss", "aud");
        let token = svc.sign_raw(&claims_for(&svc, Duration::minutes(-10)));
        assert!(matches!(svc.validate(&token), Err(AppError::TokenExpired)));
    }

    #[test]
    fn validate_rejects_wrong_issuer_or_audience() {
        let (good, _) = make_service("good-iss", "good-aud");
        let (bad, _) = make_service("bad-iss", "bad-aud");
        let token = good.issue_access_token(1, Role::Student).unwrap();
        assert!(matches!(bad.validate(&token), Err(AppError::TokenInvalid)));
    }

    #[test]
    fn validate_rejects_garbage_and_tampering() {
        let (svc, _) = make_service("iss", "aud");
        assert!(matches!(svc.validate("not.a.jwt"), Err(AppError::TokenInvalid)));

        let token = svc.issue_access_token(1, Role::Student).unwrap();
        let (head, sig) = token.rsplit_once('.').unwrap();
        let flipped = if sig.starts_with('A') { 'B' } else { 'A' };
        let tampered = format!("{head}.{flipped}{}", &sig[1..]);
        assert!(matches!(svc.validate(&tampered), Err(AppError::TokenInvalid)));
    }

    #[tokio::test]
    async fn refresh_tokens_are_opaque_and_unique() {
        let (svc, store) = make_service("iss", "aud");
        let now = OffsetDateTime::now_utc();
        let a = svc.new_refresh_row(1, now);
        let b = svc.new_refresh_row(1, now);
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 43);
        assert_eq!(a.expires_at - a.issued_at, Duration::days(1));
        assert!(!a.token.contains('.'));

        store.insert_refresh_token(&a).await.unwrap();
        assert!(svc.revoke_refresh_token(&a.token).await.unwrap());
        assert!(!svc.revoke_refresh_token(&a.token).await.unwrap());
    }

    #[tokio::test]
    async fn rotating_an_unknown_token_fails() {
        let (svc, _) = make_service("iss", "aud");
        let err = svc.rotate_refresh_token("nope").await.unwrap_err();
        assert!(matches!(err, AppError::RefreshTokenNotFound));
    }
}
