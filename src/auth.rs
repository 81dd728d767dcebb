// 🔑 Identity seam - verified principal from a bearer token
//
// Issuing credentials belongs to the identity provider. The service only
// needs `{account id, role}` out of a token it can trust, which is what
// `TokenVerifier` yields. `HmacTokenVerifier` checks HMAC-SHA256 signed
// tokens of the form `base64url(claims).base64url(mac)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

use crate::entities::account::Role;
use crate::error::{LedgerError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime when none is configured
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;

// ============================================================================
// IDENTITY
// ============================================================================

/// Already-verified caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(account_id: &str, role: Role) -> Self {
        Identity {
            account_id: account_id.to_string(),
            role,
        }
    }

    pub fn member(account_id: &str) -> Self {
        Self::new(account_id, Role::Member)
    }

    pub fn admin(account_id: &str) -> Self {
        Self::new(account_id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("administrator role required".into()))
        }
    }
}

// ============================================================================
// VERIFIER
// ============================================================================

/// Turns a bearer token into an [`Identity`], or rejects it as `Unauthenticated`
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity>;
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    exp: i64,
}

pub struct HmacTokenVerifier {
    secret: Vec<u8>,
    ttl: Duration,
}

impl fmt::Debug for HmacTokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacTokenVerifier")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl HmacTokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        HmacTokenVerifier {
            secret: secret.as_ref().to_vec(),
            ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| LedgerError::Internal(format!("invalid token secret: {}", e)))
    }

    /// Sign a token for `identity`, valid until `now + ttl`
    pub fn issue(&self, identity: &Identity, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: identity.account_id.clone(),
            role: identity.role,
            exp: (now + self.ttl).timestamp(),
        };
        let json = serde_json::to_vec(&claims).map_err(|e| LedgerError::Internal(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", payload, signature))
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity> {
        let rejected = |reason: &str| LedgerError::Unauthenticated(reason.to_string());

        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| rejected("malformed token"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| rejected("malformed token"))?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| rejected("invalid token signature"))?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| rejected("malformed token"))?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| rejected("malformed token"))?;

        if claims.exp <= now.timestamp() {
            return Err(rejected("token expired"));
        }

        Ok(Identity {
            account_id: claims.sub,
            role: claims.role,
        })
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Result<Identity> {
        self.verify_at(token, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-0123456789";

    #[test]
    fn test_issued_token_verifies() {
        let verifier = HmacTokenVerifier::new(SECRET);
        let token = verifier.issue(&Identity::admin("root"), Utc::now()).unwrap();

        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity, Identity::admin("root"));
        assert!(identity.require_admin().is_ok());
    }

    #[test]
    fn test_forged_role_rejected() {
        let verifier = HmacTokenVerifier::new(SECRET);
        let token = verifier.issue(&Identity::member("kim"), Utc::now()).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged_claims = serde_json::json!({"sub": "kim", "role": "ADMIN", "exp": i64::MAX});
        let forged_payload = URL_SAFE_NO_PAD.encode(forged_claims.to_string());
        let forged = format!("{}.{}", forged_payload, signature);

        let err = verifier.verify(&forged).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthenticated(_)));
    }

    #[test]
    fn test_wrong_secret_and_garbage_rejected() {
        let issuer = HmacTokenVerifier::new(SECRET);
        let other = HmacTokenVerifier::new("another-secret-9876543210");
        let token = issuer.issue(&Identity::member("kim"), Utc::now()).unwrap();

        assert!(matches!(other.verify(&token), Err(LedgerError::Unauthenticated(_))));
        assert!(matches!(issuer.verify("not-a-token"), Err(LedgerError::Unauthenticated(_))));
        assert!(matches!(issuer.verify("a.b"), Err(LedgerError::Unauthenticated(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = HmacTokenVerifier::new(SECRET).with_ttl(Duration::hours(1));
        let issued_at = Utc::now() - Duration::hours(2);
        let token = verifier.issue(&Identity::member("kim"), issued_at).unwrap();

        let err = verifier.verify(&token).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthenticated(_)));
    }

    #[test]
    fn test_member_is_not_admin() {
        let err = Identity::member("kim").require_admin().unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden(_)));
    }
}
