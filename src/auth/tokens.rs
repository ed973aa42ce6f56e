use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AuthError, Identity};
use crate::config::AppConfig;
use crate::db::repository::{get_user, is_token_revoked, revoke_token};
use crate::models::enums::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    fn as_str(self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Signed token payload. Identity fields ride along so the API layer does
/// not need a user lookup per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub email: String,
    pub token_type: TokenType,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> Result<Identity, AuthError> {
        let user_id = Uuid::parse_str(&self.sub)
            .map_err(|_| AuthError::TokenInvalid("subject is not a user id".into()))?;
        Ok(Identity {
            user_id,
            username: self.username.clone(),
            role: self.role,
            email: self.email.clone(),
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues and verifies HS256 tokens with one shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.access_ttl_secs, config.refresh_ttl_secs)
    }

    pub fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        Ok(TokenPair {
            access: self.issue(identity, TokenType::Access, now)?,
            refresh: self.issue(identity, TokenType::Refresh, now)?,
        })
    }

    pub fn issue(&self, identity: &Identity, token_type: TokenType, now: DateTime<Utc>) -> Result<String, AuthError> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: identity.user_id.to_string(),
            username: identity.username.clone(),
            role: identity.role,
            email: identity.email.clone(),
            token_type,
            jti: Uuid::new_v4().simple().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Signature and expiry check, nothing else.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid(e.to_string()),
            })
    }

    /// Identity carried by a valid access token.
    pub fn verify_access(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.decode(token)?;
        expect_type(&claims, TokenType::Access)?;
        claims.identity()
    }

    /// Exchange a refresh token for a new access token. The account must
    /// still exist and be active; claims are rebuilt from the stored user.
    pub fn refresh(&self, conn: &Connection, refresh_token: &str) -> Result<String, AuthError> {
        let claims = self.decode(refresh_token)?;
        expect_type(&claims, TokenType::Refresh)?;
        if is_token_revoked(conn, &claims.jti)? {
            return Err(AuthError::TokenRevoked);
        }
        let identity = claims.identity()?;
        let user = get_user(conn, &identity.user_id)?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidCredentials)?;
        self.issue(&Identity::from(&user), TokenType::Access, Utc::now())
    }

    /// Blacklist a refresh token presented by `owner` at logout.
    pub fn revoke(&self, conn: &Connection, owner: &Identity, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.decode(refresh_token)?;
        expect_type(&claims, TokenType::Refresh)?;
        if claims.identity()?.user_id != owner.user_id {
            return Err(AuthError::TokenInvalid("token belongs to another account".into()));
        }
        revoke_token(conn, &claims.jti, &owner.user_id, &claims.expires_at())?;
        tracing::info!(user_id = %owner.user_id, "refresh token revoked");
        Ok(())
    }
}

fn expect_type(claims: &Claims, expected: TokenType) -> Result<(), AuthError> {
    if claims.token_type != expected {
        return Err(AuthError::WrongTokenType {
            expected: expected.as_str(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"0123456789abcdef0123456789abcdef", 300, 86_400)
    }

    #[test]
    fn access_token_carries_identity_claims() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);
        let pair = issuer().issue_pair(&Identity::from(&user)).unwrap();

        let claims = issuer().decode(&pair.access).unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, Role::Patient);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.exp - claims.iat, 300);

        let identity = issuer().verify_access(&pair.access).unwrap();
        assert_eq!(identity.user_id, user.id);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);
        let pair = issuer().issue_pair(&Identity::from(&user)).unwrap();
        assert!(matches!(
            issuer().verify_access(&pair.refresh),
            Err(AuthError::WrongTokenType { .. })
        ));
        assert!(matches!(
            issuer().refresh(&conn, &pair.access),
            Err(AuthError::WrongTokenType { .. })
        ));
    }

    #[test]
    fn foreign_secret_rejected() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);
        let other = TokenIssuer::new(b"ffffffffffffffffffffffffffffffff", 300, 86_400);
        let pair = other.issue_pair(&Identity::from(&user)).unwrap();
        assert!(matches!(issuer().decode(&pair.access), Err(AuthError::TokenInvalid(_))));
        assert!(issuer().decode("not.a.token").is_err());
    }

    #[test]
    fn expired_token_reported_as_expired() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);
        let past = Utc::now() - Duration::hours(1);
        let token = issuer()
            .issue(&Identity::from(&user), TokenType::Access, past)
            .unwrap();
        assert!(matches!(issuer().decode(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn revoked_refresh_token_cannot_refresh() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);
        let identity = Identity::from(&user);
        let pair = issuer().issue_pair(&identity).unwrap();

        let access = issuer().refresh(&conn, &pair.refresh).unwrap();
        assert!(issuer().verify_access(&access).is_ok());

        issuer().revoke(&conn, &identity, &pair.refresh).unwrap();
        assert!(matches!(
            issuer().refresh(&conn, &pair.refresh),
            Err(AuthError::TokenRevoked)
        ));
    }

    #[test]
    fn cannot_revoke_someone_elses_token() {
        let conn = test_db();
        let alice = make_user(&conn, "alice", Role::Patient);
        let bob = make_user(&conn, "bob", Role::Patient);
        let pair = issuer().issue_pair(&Identity::from(&alice)).unwrap();
        assert!(issuer()
            .revoke(&conn, &Identity::from(&bob), &pair.refresh)
            .is_err());
        assert!(issuer().refresh(&conn, &pair.refresh).is_ok());
    }
}
