//! Signed credentials and the service signing key.
//!
//! A credential is `base64url(claims) "." base64url(signature)`, where the
//! claims are JSON and the signature is an Ed25519 signature over the encoded
//! claims segment. Only the holder of the [`ServiceKey`] can mint one.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH, SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Result, StorageError};

/// Length of the stored service secret.
pub const SERVICE_KEY_LENGTH: usize = SECRET_KEY_LENGTH;

/// Payload bound into every credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub identity: String,
    /// Tenant root, relative to the server's storage root.
    pub tenant_root: String,
    /// Fixed at login and kept across refreshes. Each login gets its own
    /// server-side session.
    pub session_id: String,
    /// Unix seconds.
    pub issued_at: u64,
    /// Unix seconds. The credential is valid while `now < expires_at`.
    pub expires_at: u64,
}

impl Claims {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// A decoded credential together with its wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    claims: Claims,
    token: String,
}

impl Credential {
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The opaque string sent to clients.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn into_token(self) -> String {
        self.token
    }
}

/// The Ed25519 key that signs and verifies credentials.
#[derive(Clone)]
pub struct ServiceKey {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl ServiceKey {
    /// Generates a fresh key from the OS random source.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Restores a key from its 32 secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; SERVICE_KEY_LENGTH]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Restores a key from an arbitrary slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SERVICE_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            StorageError::bad_request(format!(
                "service key must be {SERVICE_KEY_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn secret_bytes(&self) -> [u8; SERVICE_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }

    /// Short hex fingerprint of the public half, safe to log.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.verifying_key.as_bytes());
        hex::encode(&hash[..8])
    }

    /// Signs `claims` into a credential.
    pub fn issue(&self, claims: Claims) -> Result<Credential> {
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| StorageError::unknown(format!("cannot encode claims: {e}")))?;
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let signature = self.signing_key.sign(encoded.as_bytes());
        let token = format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()));
        Ok(Credential { claims, token })
    }

    /// Checks the signature and decodes the claims. Expiry is not checked.
    ///
    /// Every failure is reported as `WrongCredentials`.
    pub fn verify(&self, token: &str) -> Result<Credential> {
        let (encoded, signature) = token
            .trim()
            .split_once('.')
            .ok_or_else(StorageError::wrong_credentials)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StorageError::wrong_credentials())?;
        let signature: [u8; SIGNATURE_LENGTH] = signature
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::wrong_credentials())?;
        self.verifying_key
            .verify(encoded.as_bytes(), &Signature::from_bytes(&signature))
            .map_err(|_| StorageError::wrong_credentials())?;

        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| StorageError::wrong_credentials())?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| StorageError::wrong_credentials())?;

        Ok(Credential {
            claims,
            token: token.trim().to_string(),
        })
    }
}

impl std::fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceKey")
            .field("signing_key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Hashes a password the way stored tenant records expect:
/// lowercase hex SHA-256 of `password ++ identity`.
pub fn hash_secret(password: &str, identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(identity.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares two hashes in constant time. Lengths are not secret.
pub fn hashes_match(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn claims() -> Claims {
        Claims {
            identity: "alice".into(),
            tenant_root: "alice/".into(),
            session_id: "s1".into(),
            issued_at: 1_000,
            expires_at: 1_300,
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let key = ServiceKey::generate();
        let credential = key.issue(claims()).unwrap();

        let verified = key.verify(credential.token()).unwrap();
        assert_eq!(verified.claims(), &claims());
        assert_eq!(verified, credential);
    }

    #[test]
    fn test_token_shape() {
        let key = ServiceKey::generate();
        let token = key.issue(claims()).unwrap().into_token();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 2);
        assert!(!token.contains('='));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let token = ServiceKey::generate().issue(claims()).unwrap().into_token();
        let err = ServiceKey::generate().verify(&token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongCredentials);
    }

    #[test]
    fn test_verify_rejects_tampered_claims() {
        let key = ServiceKey::generate();
        let token = key.issue(claims()).unwrap().into_token();
        let (_, signature) = token.split_once('.').unwrap();

        let mut forged = claims();
        forged.tenant_root = "bob/".into();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{forged_payload}.{signature}");

        assert!(key.verify(&forged_token).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let key = ServiceKey::generate();
        for token in ["", "abc", "abc.def", ".", "a.b.c"] {
            let err = key.verify(token).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::WrongCredentials, "{token:?}");
            assert_eq!(err.message(), "wrong credentials");
        }
    }

    #[test]
    fn test_key_roundtrip_from_bytes() {
        let key = ServiceKey::generate();
        let restored = ServiceKey::from_slice(&key.secret_bytes()).unwrap();
        let token = key.issue(claims()).unwrap().into_token();
        assert!(restored.verify(&token).is_ok());
        assert_eq!(key.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(ServiceKey::from_slice(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", ServiceKey::generate());
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_expiry_boundary() {
        let claims = claims();
        assert!(!claims.is_expired(1_299));
        assert!(claims.is_expired(1_300));
    }

    #[test]
    fn test_hash_secret_known_value() {
        // sha256("secretalice")
        assert_eq!(
            hash_secret("secret", "alice"),
            hex::encode(Sha256::digest(b"secretalice"))
        );
        assert_ne!(hash_secret("secret", "alice"), hash_secret("secret", "bob"));
        assert_eq!(hash_secret("x", "y").len(), 64);
    }

    #[test]
    fn test_hashes_match() {
        let h = hash_secret("pw", "alice");
        assert!(hashes_match(&h, &h.clone()));
        assert!(!hashes_match(&h, &hash_secret("pw2", "alice")));
        assert!(!hashes_match(&h, "short"));

        let mut flipped = h.clone().into_bytes();
        flipped[63] = if flipped[63] == b'0' { b'1' } else { b'0' };
        assert!(!hashes_match(&h, std::str::from_utf8(&flipped).unwrap()));
        assert!(hashes_match("", ""));
    }
}
