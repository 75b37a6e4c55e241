use std::fmt;

use base64_light::{base64_decode, base64_encode};
use hmac::{Hmac, Mac};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::time::Timestamp;

/// A username/password pair, as sent to `/register` and `/login`.
#[derive(Deserialize, Serialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.username
    }

    /// Salt and hash the password for storage, as `salt$digest`.
    pub fn calc_pwhash(&self) -> String {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = digest(&salt, &self.password);

        format!("{salt}${digest}")
    }

    pub fn matches(&self, pwhash: &str) -> bool {
        let Some((salt, expected)) = pwhash.split_once('$') else {
            error!("malformed stored password hash for {}", self.username);
            return false;
        };

        digest(salt, &self.password) == expected
    }
}

// never log the password
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn digest(salt: &str, password: &str) -> String {
    sha256::digest(format!("{salt}:{password}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: i64,
    exp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired at {0}")]
    Expired(Timestamp),
}

/// Issues and checks session tokens.
///
/// A token is `base64(claims) "." hex(hmac_sha256(secret, base64(claims)))`,
/// where the claims carry the user id and an expiry.
pub struct TokenSigner {
    secret: String,
    lifetime_secs: i64,
}

impl TokenSigner {
    pub const DEFAULT_LIFETIME_SECS: i64 = 2 * 60 * 60;

    pub fn new(secret: impl Into<String>, lifetime_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            lifetime_secs,
        }
    }

    /// A signer with a secret nobody else knows. Its tokens die with the process.
    pub fn random(lifetime_secs: i64) -> Self {
        Self::new(Uuid::new_v4().simple().to_string(), lifetime_secs)
    }

    pub fn issue(&self, user_id: i64, now: Timestamp) -> Result<SessionToken, ()> {
        let claims = Claims {
            user_id,
            exp: now.plus_secs(self.lifetime_secs),
        };

        let json = serde_json::to_string(&claims).map_err(|e| {
            error!("couldn't serialise token claims: {e:?}");
        })?;

        let payload = base64_encode(&json);
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());

        Ok(SessionToken(format!("{payload}.{signature}")))
    }

    pub fn verify(&self, token: &str, now: Timestamp) -> Result<i64, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;

        let signature = hex::decode(signature).map_err(|_| TokenError::BadSignature)?;
        self.mac(payload)
            .map_err(|()| TokenError::BadSignature)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = base64_decode(payload);
        let claims: Claims = serde_json::from_slice(&json).map_err(|e| {
            debug!("undecodable token claims: {e}");
            TokenError::Malformed
        })?;

        if claims.exp <= now {
            return Err(TokenError::Expired(claims.exp));
        }

        Ok(claims.user_id)
    }

    fn mac(&self, payload: &str) -> Result<Hmac<Sha256>, ()> {
        let mut mac = <Hmac<Sha256>>::new_from_slice(self.secret.as_bytes()).map_err(|e| {
            error!("couldn't key token mac: {e}");
        })?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test secret", TokenSigner::DEFAULT_LIFETIME_SECS)
    }

    #[test]
    fn password_round_trip() {
        let creds = Credentials::new("ada", "hunter2");
        let stored = creds.calc_pwhash();

        assert!(creds.matches(&stored));
        assert!(!Credentials::new("ada", "hunter3").matches(&stored));
    }

    #[test]
    fn password_hashes_are_salted() {
        let creds = Credentials::new("ada", "hunter2");

        assert_ne!(creds.calc_pwhash(), creds.calc_pwhash());
        assert!(!creds.calc_pwhash().contains("hunter2"));
    }

    #[test]
    fn malformed_pwhash_never_matches() {
        assert!(!Credentials::new("ada", "").matches("no-separator"));
    }

    #[test]
    fn debug_hides_password() {
        let shown = format!("{:?}", Credentials::new("ada", "hunter2"));

        assert!(shown.contains("ada"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn token_round_trip() {
        let now = Timestamp::from_i64(1_700_000_000);
        let token = signer().issue(42, now).unwrap();

        assert_eq!(signer().verify(token.as_str(), now), Ok(42));
        assert_eq!(signer().verify(token.as_str(), now.plus_secs(60 * 60)), Ok(42));
    }

    #[test]
    fn token_expires_after_two_hours() {
        let now = Timestamp::from_i64(1_700_000_000);
        let token = signer().issue(42, now).unwrap();
        let exp = now.plus_secs(TokenSigner::DEFAULT_LIFETIME_SECS);

        assert_eq!(
            signer().verify(token.as_str(), exp),
            Err(TokenError::Expired(exp))
        );
    }

    #[test]
    fn token_from_other_secret_rejected() {
        let now = Timestamp::from_i64(1_700_000_000);
        let token = TokenSigner::new("other", 60).issue(42, now).unwrap();

        assert_eq!(
            signer().verify(token.as_str(), now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn tampered_token_rejected() {
        let now = Timestamp::from_i64(1_700_000_000);
        let token = signer().issue(42, now).unwrap();
        let (_, signature) = token.as_str().split_once('.').unwrap();

        let forged_claims = base64_encode(r#"{"userId":1,"exp":99999999999}"#);
        let forged = format!("{forged_claims}.{signature}");

        assert_eq!(
            signer().verify(&forged, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn secret_prefix_signature_rejected() {
        let now = Timestamp::from_i64(1_700_000_000);
        let token = signer().issue(42, now).unwrap();
        let (payload, _) = token.as_str().split_once('.').unwrap();

        // a plain digest of secret and payload is not a mac
        let digest = sha256::digest(format!("test secret.{payload}"));
        let forged = format!("{payload}.{digest}");

        assert_eq!(
            signer().verify(&forged, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn non_hex_signature_rejected() {
        let now = Timestamp::from_i64(1_700_000_000);
        let token = signer().issue(42, now).unwrap();
        let (payload, _) = token.as_str().split_once('.').unwrap();

        assert_eq!(
            signer().verify(&format!("{payload}.not-hex"), now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn garbage_token_rejected() {
        let now = Timestamp::from_i64(0);

        assert_eq!(signer().verify("", now), Err(TokenError::Malformed));
        assert_eq!(signer().verify("nodot", now), Err(TokenError::Malformed));

        // correctly signed, but not claims
        let payload = base64_encode("not json");
        let signature = hex::encode(signer().mac(&payload).unwrap().finalize().into_bytes());
        let token = format!("{payload}.{signature}");
        assert_eq!(signer().verify(&token, now), Err(TokenError::Malformed));
    }
}
