//! GitHub App authentication.
//!
//! An app proves its identity with a short-lived RS256 JWT signed by its
//! private key, then trades that JWT for an installation access token. The
//! installation token is used like any other bearer token afterwards.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde_json::json;
use tracing::{debug, info};

use crate::client::GithubClient;
use crate::config::{AppAuthConfig, ResolvedConfig};
use crate::error::ProviderError;

/// Backdate `iat` to tolerate clock drift against the API.
const CLOCK_SKEW_SECS: u64 = 60;
const JWT_LIFETIME_SECS: u64 = 600;

/// Read the app key, sign a JWT and exchange it for an installation token.
pub async fn installation_token(
    resolved: &ResolvedConfig,
    app: &AppAuthConfig,
) -> Result<String, ProviderError> {
    check(app)?;
    let pem = tokio::fs::read_to_string(&app.pem_file).await.map_err(|e| {
        ProviderError::operation(
            "Failed to Read PEM File",
            format!("Unable to read GitHub App private key file: {}", e),
        )
    })?;
    let jwt = app_jwt(app.id, &pem, SystemTime::now())?;
    debug!(app_id = app.id, "Signed GitHub App JWT");

    let app_client = GithubClient::new(&ResolvedConfig {
        token: Some(jwt),
        owner: None,
        ..resolved.clone()
    })?;
    let issued = app_client
        .create_installation_token(app.installation_id)
        .await
        .map_err(|e| {
            ProviderError::operation(
                "Failed to Create Installation Token",
                format!("Unable to create installation access token: {}", e),
            )
        })?;
    let token = issued.token.filter(|t| !t.is_empty()).ok_or_else(|| {
        ProviderError::operation(
            "Failed to Create Installation Token",
            "The API response did not include a token.",
        )
    })?;

    info!(
        app_id = app.id,
        installation_id = app.installation_id,
        expires_at = issued.expires_at.as_deref().unwrap_or("unknown"),
        "Using GitHub App installation token"
    );
    Ok(token)
}

fn check(app: &AppAuthConfig) -> Result<(), ProviderError> {
    if app.id <= 0 {
        return Err(ProviderError::operation(
            "Invalid App ID",
            "GitHub App ID must be provided and greater than 0.",
        ));
    }
    if app.installation_id <= 0 {
        return Err(ProviderError::operation(
            "Invalid Installation ID",
            "GitHub App Installation ID must be provided and greater than 0.",
        ));
    }
    if app.pem_file.is_empty() {
        return Err(ProviderError::operation(
            "Missing PEM File",
            "GitHub App PEM file path must be provided.",
        ));
    }
    Ok(())
}

/// Sign the app JWT: `iss` is the app ID, valid for ten minutes from a
/// minute before `now`.
pub fn app_jwt(app_id: i64, pem: &str, now: SystemTime) -> Result<String, ProviderError> {
    let key = parse_key(pem)?;
    let now = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let header = json!({"alg": "RS256", "typ": "JWT"});
    let claims = json!({
        "iat": now.saturating_sub(CLOCK_SKEW_SECS),
        "exp": now + JWT_LIFETIME_SECS,
        "iss": app_id,
    });
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );

    let mut signature = vec![0; key.public().modulus_len()];
    key.sign(
        &RSA_PKCS1_SHA256,
        &SystemRandom::new(),
        signing_input.as_bytes(),
        &mut signature,
    )
    .map_err(|_| ProviderError::operation("Failed to Sign JWT", "Unable to sign JWT token."))?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Accepts PKCS#1 (`RSA PRIVATE KEY`, what GitHub hands out) and PKCS#8.
fn parse_key(pem: &str) -> Result<RsaKeyPair, ProviderError> {
    let (label, der) = decode_pem(pem).ok_or_else(|| {
        ProviderError::operation(
            "Invalid PEM File",
            "Failed to decode PEM file. Ensure the file contains a valid RSA private key.",
        )
    })?;
    let parsed = match label.as_str() {
        "RSA PRIVATE KEY" => RsaKeyPair::from_der(&der),
        _ => RsaKeyPair::from_pkcs8(&der),
    };
    parsed.map_err(|e| {
        ProviderError::operation(
            "Invalid Private Key",
            format!("Failed to parse private key: {}", e),
        )
    })
}

/// First PEM block in `pem`: its label and decoded body.
fn decode_pem(pem: &str) -> Option<(String, Vec<u8>)> {
    let mut lines = pem
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with("-----BEGIN "));
    let label = lines
        .next()?
        .strip_prefix("-----BEGIN ")?
        .strip_suffix("-----")?
        .to_string();
    let end = format!("-----END {}-----", label);

    let mut body = String::new();
    for line in lines {
        if line == end {
            let der = STANDARD.decode(body).ok()?;
            return Some((label, der));
        }
        body.push_str(line);
    }
    None
}
