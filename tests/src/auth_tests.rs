//! Ed25519 credentials and request signing through the public API

use backpack_client::auth::{self, request_message, stream_auth_message, Credentials, RequestSigner};
use backpack_client::config::{BackpackConfig, API_KEY_ENV, API_SECRET_ENV};
use backpack_client::{ExchangeError, HttpMethod};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::SigningKey;
use proptest::prelude::*;
use rstest::*;
use serial_test::serial;

#[fixture]
fn seed() -> [u8; 32] {
    [42u8; 32]
}

#[fixture]
fn credentials(seed: [u8; 32]) -> Credentials {
    Credentials::new("test-key", &STANDARD.encode(seed)).unwrap()
}

// ============================================================================
// KEY DECODING
// ============================================================================

mod key_decoding {
    use super::*;

    #[rstest]
    #[case(16)]
    #[case(31)]
    #[case(33)]
    #[case(63)]
    fn test_wrong_length_rejected(#[case] len: usize) {
        let secret = STANDARD.encode(vec![1u8; len]);
        let result = Credentials::new("key", &secret);
        assert!(matches!(result, Err(ExchangeError::InvalidKeyLength(n)) if n == len));
    }

    #[rstest]
    fn test_keypair_form_accepted(seed: [u8; 32]) {
        let public = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        let keypair: Vec<u8> = seed.iter().chain(public.iter()).copied().collect();

        let from_pair = Credentials::new("key", &STANDARD.encode(keypair)).unwrap();
        let from_seed = Credentials::new("key", &STANDARD.encode(seed)).unwrap();
        assert_eq!(from_pair.verifying_key_b64(), from_seed.verifying_key_b64());
    }

    #[rstest]
    fn test_mismatched_keypair_rejected(seed: [u8; 32]) {
        let other_public = SigningKey::from_bytes(&[9u8; 32]).verifying_key().to_bytes();
        let keypair: Vec<u8> = seed.iter().chain(other_public.iter()).copied().collect();

        let result = Credentials::new("key", &STANDARD.encode(keypair));
        assert!(matches!(result, Err(ExchangeError::InvalidCredentials(_))));
    }

    #[test]
    fn test_not_base64() {
        let result = Credentials::new("key", "%%% not base64 %%%");
        assert!(matches!(result, Err(ExchangeError::InvalidKeyEncoding(_))));
    }

    #[rstest]
    #[case("", "c2VjcmV0")]
    #[case("key", "")]
    #[case("key", "   ")]
    fn test_empty_parts(#[case] api_key: &str, #[case] secret: &str) {
        let result = Credentials::new(api_key, secret);
        assert!(matches!(result, Err(ExchangeError::MissingCredentials(_))));
    }

    #[rstest]
    fn test_debug_never_prints_secret(seed: [u8; 32], credentials: Credentials) {
        let printed = format!("{credentials:?}");
        assert!(printed.contains("test-key"));
        assert!(!printed.contains(&STANDARD.encode(seed)));
    }
}

// ============================================================================
// SIGNING
// ============================================================================

mod signing {
    use super::*;

    #[rstest]
    fn test_stream_handshake_verifies(credentials: Credentials) {
        let public = credentials.verifying_key_b64();
        let signer = RequestSigner::with_window(credentials, 5000);
        let signed = signer.sign_stream_auth_at(1_700_000_000_000).unwrap();

        assert_eq!(stream_auth_message(1_700_000_000_000, 5000), "17000000000005000");
        assert!(auth::verify(b"17000000000005000", &signed.signature, &public).unwrap());
        assert!(!auth::verify(b"17000000000005001", &signed.signature, &public).unwrap());
    }

    #[rstest]
    fn test_auth_frame_carries_headers(credentials: Credentials) {
        let signer = RequestSigner::with_window(credentials, 7000);
        let signed = signer.sign_stream_auth_at(1_234).unwrap();
        let frame: serde_json::Value = serde_json::from_str(&signed.to_auth_frame()).unwrap();

        assert_eq!(frame["method"], "AUTH");
        assert_eq!(frame["params"]["X-API-Key"], "test-key");
        assert_eq!(frame["params"]["X-Timestamp"], "1234");
        assert_eq!(frame["params"]["X-Window"], "7000");
        assert_eq!(frame["params"]["X-Signature"], signed.signature.as_str());
    }

    #[rstest]
    #[case(HttpMethod::Get, Some(r#"{"a":1}"#), "99")]
    #[case(HttpMethod::Post, Some(r#"{"a":1}"#), r#"{"a":1}99"#)]
    #[case(HttpMethod::Post, None, "99")]
    #[case(HttpMethod::Post, Some(""), "99")]
    #[case(HttpMethod::Delete, Some(r#"{"a":1}"#), "99")]
    fn test_request_message(#[case] method: HttpMethod, #[case] body: Option<&str>, #[case] expected: &str) {
        assert_eq!(request_message(method, body, 99), expected);
    }

    #[rstest]
    fn test_request_headers(credentials: Credentials) {
        let public = credentials.verifying_key_b64();
        let signer = RequestSigner::new(credentials);
        let body = r#"{"symbol":"SOL_USDC"}"#;
        let signed = signer.sign_request_at(HttpMethod::Post, Some(body), 55).unwrap();

        let headers = signed.headers();
        let names: Vec<&str> = headers.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["X-API-Key", "X-Timestamp", "X-Window", "X-Signature"]);
        assert_eq!(headers[2].1, "5000");
        assert!(auth::verify(format!("{body}55").as_bytes(), &signed.signature, &public).unwrap());
    }

    #[rstest]
    fn test_one_shot_sign_matches_credentials(seed: [u8; 32], credentials: Credentials) {
        let direct = auth::sign(b"hello", &STANDARD.encode(seed)).unwrap();
        assert_eq!(direct, credentials.sign(b"hello").unwrap());
    }

    proptest! {
        #[test]
        fn test_any_message_verifies(seed in any::<[u8; 32]>(), message in prop::collection::vec(any::<u8>(), 0..512)) {
            let credentials = Credentials::new("key", &STANDARD.encode(seed)).unwrap();
            let signature = credentials.sign(&message).unwrap();
            prop_assert!(auth::verify(&message, &signature, &credentials.verifying_key_b64()).unwrap());
        }
    }
}

// ============================================================================
// ENVIRONMENT CREDENTIALS
// ============================================================================

mod env_credentials {
    use super::*;

    #[rstest]
    #[serial]
    fn test_loaded_from_env(seed: [u8; 32]) {
        std::env::set_var(API_KEY_ENV, "env-key");
        std::env::set_var(API_SECRET_ENV, STANDARD.encode(seed));

        let config = BackpackConfig::default().with_env_credentials().unwrap();
        assert!(config.has_credentials());
        assert_eq!(config.api_key, "env-key");
        assert_eq!(Credentials::from_env().unwrap().api_key(), "env-key");

        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(API_SECRET_ENV);
    }

    #[test]
    #[serial]
    fn test_missing_env() {
        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(API_SECRET_ENV);

        let result = BackpackConfig::default().with_env_credentials();
        assert!(matches!(result, Err(ExchangeError::MissingCredentials(_))));
        assert!(matches!(Credentials::from_env(), Err(ExchangeError::MissingCredentials(_))));
    }
}
