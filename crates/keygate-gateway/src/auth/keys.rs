//! RSA key material.

use std::path::{Path, PathBuf};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use keygate_core::Config;
use serde::{Serialize, de::DeserializeOwned};

use super::AuthError;

/// The only algorithm Keygate signs with or accepts.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

/// An RSA key pair loaded once at startup.
///
/// The private key only signs and the public key only verifies. Neither is
/// exposed; callers go through [`KeyMaterial::sign`] and [`KeyMaterial::verify`].
pub struct KeyMaterial {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl KeyMaterial {
    /// Build key material from PEM bytes.
    ///
    /// Accepts PKCS#1 or PKCS#8 private keys and SPKI or PKCS#1 public keys.
    /// The pair is checked by signing and verifying a probe token.
    ///
    /// # Errors
    ///
    /// Returns `KeyLoadFailed` if either PEM is unusable or the keys do not pair.
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, AuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| AuthError::KeyLoadFailed(format!("Invalid private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| AuthError::KeyLoadFailed(format!("Invalid public key: {e}")))?;

        let keys = Self {
            encoding_key,
            decoding_key,
        };
        keys.check_pair()?;
        Ok(keys)
    }

    /// Load the key pair named by the config.
    ///
    /// Relative paths are tried against [`Config::key_search_bases`] in order;
    /// the first existing file wins.
    ///
    /// # Errors
    ///
    /// Returns `KeyLoadFailed` if a file is missing, unreadable or invalid.
    pub fn load(config: &Config) -> Result<Self, AuthError> {
        let bases = config.key_search_bases();
        let private_path = resolve_key_path(&config.auth.private_key_path, &bases)?;
        let public_path = resolve_key_path(&config.auth.public_key_path, &bases)?;

        let private_pem = read_key(&private_path)?;
        let public_pem = read_key(&public_path)?;
        let keys = Self::from_pem(&private_pem, &public_pem)?;

        tracing::info!(
            private_key = %private_path.display(),
            public_key = %public_path.display(),
            "Loaded RSA key pair"
        );
        Ok(keys)
    }

    /// Sign claims with the private key.
    pub(crate) fn sign<T: Serialize>(
        &self,
        claims: &T,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key)
    }

    /// Verify and decode a token with the public key.
    pub(crate) fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<TokenData<T>, jsonwebtoken::errors::Error> {
        decode(token, &self.decoding_key, validation)
    }

    fn check_pair(&self) -> Result<(), AuthError> {
        let probe = self
            .sign(&serde_json::json!({ "probe": "keygate" }))
            .map_err(|e| AuthError::KeyLoadFailed(format!("Signing probe failed: {e}")))?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        self.verify::<serde_json::Value>(&probe, &validation)
            .map(|_| ())
            .map_err(|e| {
                AuthError::KeyLoadFailed(format!("Public key does not match private key: {e}"))
            })
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("algorithm", &SIGNING_ALGORITHM)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

/// Resolve a key path against ordered search bases.
///
/// # Errors
///
/// Returns `KeyLoadFailed` listing every location tried.
pub fn resolve_key_path(path: &Path, bases: &[PathBuf]) -> Result<PathBuf, AuthError> {
    if path.is_absolute() {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(AuthError::KeyLoadFailed(format!(
                "Key file not found: {}",
                path.display()
            )))
        };
    }

    bases
        .iter()
        .map(|base| base.join(path))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            let tried: Vec<String> = bases
                .iter()
                .map(|b| b.join(path).display().to_string())
                .collect();
            AuthError::KeyLoadFailed(format!(
                "Key file {} not found (tried: {})",
                path.display(),
                tried.join(", ")
            ))
        })
}

fn read_key(path: &Path) -> Result<Vec<u8>, AuthError> {
    std::fs::read(path)
        .map_err(|e| AuthError::KeyLoadFailed(format!("Cannot read {}: {e}", path.display())))
}
