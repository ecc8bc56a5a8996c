/// SAS-based authentication
pub mod sas;

use std::time::Duration;

use sas::{SasToken, TokenResult};

/// A symmetric-key credential, as used by a device enrolled through the
/// provisioning service
#[derive(Clone)]
pub struct SymmetricKeyCredential {
    /// The registration ID (equal to the device ID)
    pub registration_id: String,

    /// The device's symmetric key (base64)
    pub key: String,
}

impl SymmetricKeyCredential {
    /// Builds a credential from a device ID and its key
    pub fn new(registration_id: &str, key: &str) -> SymmetricKeyCredential {
        SymmetricKeyCredential {
            registration_id: registration_id.to_owned(),
            key: key.to_owned(),
        }
    }

    /// Generates the token used to authenticate a registration request
    pub fn registration_token(&self, scope_id: &str, ttl: Duration) -> TokenResult {
        SasToken::for_registration(scope_id, &self.registration_id, &self.key, ttl)
    }
}

impl std::fmt::Debug for SymmetricKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKeyCredential")
            .field("registration_id", &self.registration_id)
            .finish()
    }
}
