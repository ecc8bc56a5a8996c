use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::prelude::*;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::Sha256;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use url::form_urlencoded::byte_serialize;

/// The result of generating a token
pub type TokenResult = Result<SasToken, TokenError>;

/// Represents a failure to generate a token
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TokenError {
    /// The key is not valid base64
    InvalidKey,

    /// The time-to-live is zero or out of range
    InvalidTtl,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::InvalidKey => write!(f, "Shared access key is not valid base64"),
            TokenError::InvalidTtl => write!(f, "Token time-to-live is out of range"),
        }
    }
}

impl Error for TokenError {}

/// Represents a single SAS token of a device or a registration
#[derive(Clone, Debug)]
pub struct SasToken {
    value: String,
}

impl SasToken {
    /// Generates a SAS token for a device connection
    pub fn for_device(server_addr: &str, device_id: &str, key: &str, ttl: Duration) -> TokenResult {
        let encoded_device_id = utf8_percent_encode(device_id, NON_ALPHANUMERIC).to_string();
        let resource_uri = format!("{}/devices/{}", server_addr, encoded_device_id);
        get_sas_token(key, &resource_uri, None, ttl, Utc::now())
    }

    /// Generates a SAS token for a provisioning service registration
    pub fn for_registration(
        scope_id: &str,
        registration_id: &str,
        key: &str,
        ttl: Duration,
    ) -> TokenResult {
        let resource_uri = format!("{}/registrations/{}", scope_id, registration_id);
        get_sas_token(key, &resource_uri, Some("registration"), ttl, Utc::now())
    }

    /// The token text
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl From<SasToken> for String {
    fn from(token: SasToken) -> Self {
        token.value
    }
}

fn get_sas_token(
    key: &str,
    resource_uri: &str,
    key_name: Option<&str>,
    ttl: Duration,
    now: DateTime<Utc>,
) -> TokenResult {
    type HmacSha256 = Hmac<Sha256>;

    if ttl.as_secs() == 0 {
        return Err(TokenError::InvalidTtl);
    }
    let key = STANDARD.decode(key).map_err(|_| TokenError::InvalidKey)?;
    let ttl = chrono::Duration::from_std(ttl).map_err(|_| TokenError::InvalidTtl)?;
    let expiry = (now + ttl).timestamp();

    let encoded_uri: String = byte_serialize(resource_uri.as_bytes()).collect();
    let string_to_sign = format!("{}\n{}", encoded_uri, expiry);
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| TokenError::InvalidKey)?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    let encoded_signature: String = byte_serialize(signature.as_bytes()).collect();

    let mut token = format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_uri, encoded_signature, expiry
    );
    if let Some(key_name) = key_name {
        token.push_str("&skn=");
        token.push_str(key_name);
    }
    Ok(SasToken { value: token })
}
