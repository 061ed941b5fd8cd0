//! Backpack authentication and request signing
//!
//! Every authenticated operation, REST or streaming, is signed here with pure
//! Ed25519 over the raw message bytes. The canonical messages are:
//!
//! - streaming handshake: `timestamp + window`
//! - requests without a body (GET/DELETE): `timestamp`
//! - requests with a body (POST/PUT): `body + timestamp`
//!
//! Signatures and keys travel Base64-encoded.

use crate::config::{API_KEY_ENV, API_SECRET_ENV};
use crate::errors::{ExchangeError, Result};
use crate::http::HttpMethod;
use backpack_core::prelude::*;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{
    Signature, Signer as _, SigningKey, Verifier, VerifyingKey, KEYPAIR_LENGTH, SECRET_KEY_LENGTH,
};
use serde_json::json;
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

pub const DEFAULT_WINDOW_MS: u64 = 5000;

pub const HEADER_API_KEY: &str = "X-API-Key";
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
pub const HEADER_WINDOW: &str = "X-Window";
pub const HEADER_SIGNATURE: &str = "X-Signature";

/// API key plus the decoded Ed25519 signing key
///
/// The Base64 secret is decoded exactly once, here. `SigningKey` wipes its
/// secret on drop and the intermediate decode buffers are `Zeroizing`.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    signing_key: SigningKey,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Validate and decode credentials
    ///
    /// Fails with a configuration error before any network I/O when either part
    /// is empty, the secret is not Base64, or it does not decode to 32 or 64 bytes.
    pub fn new(api_key: impl Into<String>, private_key_b64: &str) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ExchangeError::MissingCredentials("API key is empty".to_string()));
        }
        if private_key_b64.trim().is_empty() {
            return Err(ExchangeError::MissingCredentials("private key is empty".to_string()));
        }

        let signing_key = decode_signing_key(private_key_b64)?;
        Ok(Self { api_key, signing_key })
    }

    /// Load from `BACKPACK_API_KEY` / `BACKPACK_API_SECRET`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ExchangeError::MissingCredentials(API_KEY_ENV.to_string()))?;
        let secret = Zeroizing::new(
            std::env::var(API_SECRET_ENV)
                .map_err(|_| ExchangeError::MissingCredentials(API_SECRET_ENV.to_string()))?,
        );
        Self::new(api_key, &secret)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key, Base64
    pub fn verifying_key_b64(&self) -> String {
        STANDARD.encode(self.verifying_key().as_bytes())
    }

    /// Sign raw message bytes, returning the Base64 signature
    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| ExchangeError::SigningError(e.to_string()))?;
        Ok(STANDARD.encode(signature.to_bytes()))
    }
}

fn decode_signing_key(private_key_b64: &str) -> Result<SigningKey> {
    let decoded = Zeroizing::new(
        STANDARD
            .decode(private_key_b64.trim())
            .map_err(|e| ExchangeError::InvalidKeyEncoding(e.to_string()))?,
    );

    match decoded.len() {
        SECRET_KEY_LENGTH => {
            let mut seed = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
            seed.copy_from_slice(&decoded);
            Ok(SigningKey::from_bytes(&seed))
        }
        KEYPAIR_LENGTH => {
            let mut pair = Zeroizing::new([0u8; KEYPAIR_LENGTH]);
            pair.copy_from_slice(&decoded);
            SigningKey::from_keypair_bytes(&pair).map_err(|_| {
                ExchangeError::InvalidCredentials("public half does not match the seed".to_string())
            })
        }
        other => Err(ExchangeError::InvalidKeyLength(other)),
    }
}

/// Sign `message` with a Base64 private key in one call
///
/// Prefer [`Credentials`] for repeated signing; this decodes the key every time.
pub fn sign(message: &[u8], private_key_b64: &str) -> Result<String> {
    let signing_key = decode_signing_key(private_key_b64)?;
    let signature = signing_key
        .try_sign(message)
        .map_err(|e| ExchangeError::SigningError(e.to_string()))?;
    Ok(STANDARD.encode(signature.to_bytes()))
}

/// Check a Base64 signature against a Base64 public key
pub fn verify(message: &[u8], signature_b64: &str, verifying_key_b64: &str) -> Result<bool> {
    let key_bytes = STANDARD
        .decode(verifying_key_b64)
        .map_err(|e| ExchangeError::InvalidKeyEncoding(e.to_string()))?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ExchangeError::InvalidKeyLength(key_bytes.len()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| ExchangeError::InvalidCredentials(e.to_string()))?;

    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|e| ExchangeError::SigningError(format!("signature is not Base64: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| ExchangeError::SigningError(e.to_string()))?;

    Ok(verifying_key.verify(message, &signature).is_ok())
}

/// Message signed for the streaming handshake
pub fn stream_auth_message(timestamp: u64, window_ms: u64) -> String {
    format!("{timestamp}{window_ms}")
}

/// Message signed for a one-shot request
pub fn request_message(method: HttpMethod, body: Option<&str>, timestamp: u64) -> String {
    match body {
        Some(body) if method.carries_body() && !body.is_empty() => format!("{body}{timestamp}"),
        _ => timestamp.to_string(),
    }
}

/// The four authentication values shared by both transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub timestamp: u64,
    pub window_ms: u64,
    pub signature: String,
}

impl SignedHeaders {
    /// `(name, value)` pairs for an HTTP request
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_API_KEY, self.api_key.clone()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_WINDOW, self.window_ms.to_string()),
            (HEADER_SIGNATURE, self.signature.clone()),
        ]
    }

    /// Authentication frame for the streaming connection
    pub fn to_auth_frame(&self) -> String {
        json!({
            "method": "AUTH",
            "params": {
                HEADER_API_KEY: self.api_key,
                HEADER_TIMESTAMP: self.timestamp.to_string(),
                HEADER_WINDOW: self.window_ms.to_string(),
                HEADER_SIGNATURE: self.signature,
            }
        })
        .to_string()
    }
}

/// Produces [`SignedHeaders`] for both transports from one set of credentials
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
    window_ms: u64,
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_window(credentials, DEFAULT_WINDOW_MS)
    }

    pub fn with_window(credentials: Credentials, window_ms: u64) -> Self {
        Self { credentials, window_ms }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Sign the streaming handshake with the current time
    pub fn sign_stream_auth(&self) -> Result<SignedHeaders> {
        self.sign_stream_auth_at(timestamp_ms())
    }

    pub fn sign_stream_auth_at(&self, timestamp: u64) -> Result<SignedHeaders> {
        let timer = PerfTimer::start("sign_stream_auth");
        let message = stream_auth_message(timestamp, self.window_ms);
        let signature = self.credentials.sign(message.as_bytes())?;
        timer.finish();

        debug!("🔐 Signed stream handshake (ts={})", timestamp);
        Ok(self.headers(timestamp, signature))
    }

    /// Sign a one-shot request with the current time
    pub fn sign_request(&self, method: HttpMethod, body: Option<&str>) -> Result<SignedHeaders> {
        self.sign_request_at(method, body, timestamp_ms())
    }

    pub fn sign_request_at(&self, method: HttpMethod, body: Option<&str>, timestamp: u64) -> Result<SignedHeaders> {
        let timer = PerfTimer::start("sign_request");
        let message = request_message(method, body, timestamp);
        let signature = self.credentials.sign(message.as_bytes())?;
        timer.finish();

        debug!("🔐 Signed {} request (ts={})", method, timestamp);
        Ok(self.headers(timestamp, signature))
    }

    fn headers(&self, timestamp: u64, signature: String) -> SignedHeaders {
        SignedHeaders {
            api_key: self.credentials.api_key().to_string(),
            timestamp,
            window_ms: self.window_ms,
            signature,
        }
    }
}
