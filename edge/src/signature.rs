//! Per-provider webhook signature verification (component C1).
//!
//! A verification never fails the request: callers always get back a
//! `bool`. An endpoint with no secret configured is `false` without even
//! attempting a comparison — see `verify`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use relay_protocol::ProviderType;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

const STRIPE_TOLERANCE_SECONDS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomAlgorithm {
    Sha256,
    Sha1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomEncoding {
    Hex,
    Base64,
}

/// Decrypted `verification_config_encrypted` payload for `custom` providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomVerificationConfig {
    pub header_name: String,
    pub algorithm: CustomAlgorithm,
    pub encoding: CustomEncoding,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub body_template: Option<String>,
}

/// Inputs a caller gathers before asking C1 to verify a request.
pub struct VerificationInput<'a> {
    pub provider: ProviderType,
    pub headers: &'a HashMap<String, String>,
    pub body: &'a [u8],
    pub secret: Option<&'a [u8]>,
    pub custom_config: Option<&'a CustomVerificationConfig>,
    /// For `telegram`: the path segment following the endpoint id, if any.
    pub telegram_path_secret: Option<&'a str>,
}

/// Verify a webhook's signature. Never errors: an unverifiable or
/// unconfigured request simply comes back `false`.
pub fn verify(input: VerificationInput<'_>) -> bool {
    let Some(secret) = input.secret else {
        return match input.provider {
            ProviderType::Telegram => input.telegram_path_secret.is_none(),
            ProviderType::Generic => true,
            _ => false,
        };
    };

    match input.provider {
        ProviderType::Stripe => verify_stripe(input.headers, input.body, secret),
        ProviderType::Github => verify_github(input.headers, input.body, secret),
        ProviderType::Telegram => verify_telegram(input.telegram_path_secret, secret),
        ProviderType::Generic => verify_generic(input.headers, input.body, secret),
        ProviderType::Custom => match input.custom_config {
            Some(config) => verify_custom(input.headers, input.body, secret, config),
            None => false,
        },
    }
}

fn verify_stripe(headers: &HashMap<String, String>, body: &[u8], secret: &[u8]) -> bool {
    let Some(header) = find_header(headers, "stripe-signature") else {
        return false;
    };

    let mut timestamp: Option<i64> = None;
    let mut v1_values = Vec::new();
    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse().ok(),
            (Some("v1"), Some(v)) => v1_values.push(v),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    let now = now_unix();
    if (now - timestamp).abs() > STRIPE_TOLERANCE_SECONDS {
        return false;
    }

    let signed_payload = format!("{timestamp}.{}", String::from_utf8_lossy(body));
    let expected = hmac_hex::<HmacSha256>(secret, signed_payload.as_bytes());
    v1_values.iter().any(|v| hex_eq(v, &expected))
}

fn verify_github(headers: &HashMap<String, String>, body: &[u8], secret: &[u8]) -> bool {
    let Some(header) = find_header(headers, "x-hub-signature-256") else {
        return false;
    };
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let expected = hmac_hex::<HmacSha256>(secret, body);
    hex_eq(hex_sig, &expected)
}

fn verify_telegram(path_secret: Option<&str>, configured_secret: &[u8]) -> bool {
    match path_secret {
        Some(suffix) => bytes_eq(suffix.as_bytes(), configured_secret),
        None => false,
    }
}

fn verify_generic(headers: &HashMap<String, String>, body: &[u8], secret: &[u8]) -> bool {
    let Some(header) = find_header(headers, "x-signature") else {
        return false;
    };
    let expected = hmac_hex::<HmacSha256>(secret, body);
    hex_eq(&header, &expected)
}

fn verify_custom(
    headers: &HashMap<String, String>,
    body: &[u8],
    secret: &[u8],
    config: &CustomVerificationConfig,
) -> bool {
    let Some(header) = find_header(headers, &config.header_name.to_lowercase()) else {
        return false;
    };
    let header = match &config.prefix {
        Some(prefix) => match header.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.to_string(),
            None => return false,
        },
        None => header,
    };

    let signed_body = match &config.body_template {
        Some(template) => template.replace("{body}", &String::from_utf8_lossy(body)),
        None => String::from_utf8_lossy(body).into_owned(),
    };

    let mac = match config.algorithm {
        CustomAlgorithm::Sha256 => hmac_raw::<HmacSha256>(secret, signed_body.as_bytes()),
        CustomAlgorithm::Sha1 => hmac_raw::<HmacSha1>(secret, signed_body.as_bytes()),
    };

    match config.encoding {
        CustomEncoding::Hex => hex_eq(&header, &hex::encode(&mac)),
        CustomEncoding::Base64 => {
            use base64::Engine;
            match base64::engine::general_purpose::STANDARD.decode(header.as_bytes()) {
                Ok(decoded) => bytes_eq(&decoded, &mac),
                Err(_) => false,
            }
        }
    }
}

fn find_header(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.to_lowercase() == name)
        .map(|(_, v)| v.clone())
}

fn hmac_raw<M: Mac + hmac::digest::KeyInit>(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_hex<M: Mac + hmac::digest::KeyInit>(secret: &[u8], message: &[u8]) -> String {
    hex::encode(hmac_raw::<M>(secret, message))
}

fn hex_eq(a: &str, b: &str) -> bool {
    bytes_eq(a.as_bytes(), b.as_bytes())
}

fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn github_valid_signature() {
        let body = br#"{"x":1}"#;
        let secret = b"s3cr3t";
        let sig = hmac_hex::<HmacSha256>(secret, body);
        let h = headers(&[("X-Hub-Signature-256", &format!("sha256={sig}"))]);
        assert!(verify(VerificationInput {
            provider: ProviderType::Github,
            headers: &h,
            body,
            secret: Some(secret),
            custom_config: None,
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn github_single_byte_body_mutation_invalidates() {
        let body = br#"{"x":1}"#;
        let secret = b"s3cr3t";
        let sig = hmac_hex::<HmacSha256>(secret, body);
        let h = headers(&[("X-Hub-Signature-256", &format!("sha256={sig}"))]);
        let mutated = br#"{"x":2}"#;
        assert!(!verify(VerificationInput {
            provider: ProviderType::Github,
            headers: &h,
            body: mutated,
            secret: Some(secret),
            custom_config: None,
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn github_single_byte_signature_mutation_invalidates() {
        let body = br#"{"x":1}"#;
        let secret = b"s3cr3t";
        let mut sig = hmac_hex::<HmacSha256>(secret, body);
        sig.replace_range(0..1, if &sig[0..1] == "a" { "b" } else { "a" });
        let h = headers(&[("X-Hub-Signature-256", &format!("sha256={sig}"))]);
        assert!(!verify(VerificationInput {
            provider: ProviderType::Github,
            headers: &h,
            body,
            secret: Some(secret),
            custom_config: None,
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn stripe_valid_signature_within_tolerance() {
        let body = br#"{"id":"evt_1"}"#;
        let secret = b"whsec_test";
        let t = now_unix();
        let signed_payload = format!("{t}.{}", String::from_utf8_lossy(body));
        let v1 = hmac_hex::<HmacSha256>(secret, signed_payload.as_bytes());
        let h = headers(&[("Stripe-Signature", &format!("t={t},v1={v1}"))]);
        assert!(verify(VerificationInput {
            provider: ProviderType::Stripe,
            headers: &h,
            body,
            secret: Some(secret),
            custom_config: None,
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn stripe_rejects_stale_timestamp() {
        let body = br#"{"id":"evt_1"}"#;
        let secret = b"whsec_test";
        let t = now_unix() - 3600;
        let signed_payload = format!("{t}.{}", String::from_utf8_lossy(body));
        let v1 = hmac_hex::<HmacSha256>(secret, signed_payload.as_bytes());
        let h = headers(&[("Stripe-Signature", &format!("t={t},v1={v1}"))]);
        assert!(!verify(VerificationInput {
            provider: ProviderType::Stripe,
            headers: &h,
            body,
            secret: Some(secret),
            custom_config: None,
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn generic_no_secret_is_always_valid() {
        let h = headers(&[]);
        assert!(verify(VerificationInput {
            provider: ProviderType::Generic,
            headers: &h,
            body: b"anything",
            secret: None,
            custom_config: None,
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn telegram_no_secret_configured_is_valid_without_path_secret() {
        assert!(verify(VerificationInput {
            provider: ProviderType::Telegram,
            headers: &HashMap::new(),
            body: b"{}",
            secret: None,
            custom_config: None,
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn telegram_path_secret_must_match_configured_secret() {
        let secret = b"my-secret-token";
        assert!(verify(VerificationInput {
            provider: ProviderType::Telegram,
            headers: &HashMap::new(),
            body: b"{}",
            secret: Some(secret),
            custom_config: None,
            telegram_path_secret: Some("my-secret-token"),
        }));
        assert!(!verify(VerificationInput {
            provider: ProviderType::Telegram,
            headers: &HashMap::new(),
            body: b"{}",
            secret: Some(secret),
            custom_config: None,
            telegram_path_secret: Some("wrong-token"),
        }));
    }

    #[test]
    fn custom_hex_sha256_with_prefix() {
        let body = br#"{"a":1}"#;
        let secret = b"custom-secret";
        let mac = hmac_hex::<HmacSha256>(secret, body);
        let config = CustomVerificationConfig {
            header_name: "X-Custom-Signature".to_string(),
            algorithm: CustomAlgorithm::Sha256,
            encoding: CustomEncoding::Hex,
            prefix: Some("sha256=".to_string()),
            body_template: None,
        };
        let h = headers(&[("X-Custom-Signature", &format!("sha256={mac}"))]);
        assert!(verify(VerificationInput {
            provider: ProviderType::Custom,
            headers: &h,
            body,
            secret: Some(secret),
            custom_config: Some(&config),
            telegram_path_secret: None,
        }));
    }

    #[test]
    fn endpoint_without_secret_is_never_valid_for_non_generic() {
        let h = headers(&[]);
        assert!(!verify(VerificationInput {
            provider: ProviderType::Github,
            headers: &h,
            body: b"{}",
            secret: None,
            custom_config: None,
            telegram_path_secret: None,
        }));
    }
}
