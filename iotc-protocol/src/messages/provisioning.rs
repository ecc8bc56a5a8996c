use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The initial registration request
#[derive(Clone, Debug)]
pub struct RegisterReq {
    /// Request identifier, echoed in the response topic
    pub request_id: String,

    /// The registration ID (device ID)
    pub registration_id: String,

    /// Custom payload forwarded to the allocation policy
    pub payload: Option<Value>,
}

/// Queries the status of a registration operation still in progress
#[derive(Clone, Debug)]
pub struct PollRegistrationReq {
    /// Request identifier
    pub request_id: String,

    /// The operation returned by the 202 response
    pub operation_id: String,
}

/// A response from the provisioning service
#[derive(Clone, Debug)]
pub struct RegistrationRes {
    /// Request identifier
    pub request_id: Option<String>,

    /// HTTP-like status code (200, 202, 4xx...)
    pub status_code: u16,

    /// Seconds to wait before polling, when the service asks for it
    pub retry_after: Option<u64>,

    /// The operation status document
    pub body: Option<RegistrationOperation>,
}

/// The body of a provisioning response
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOperation {
    /// Operation to poll while the registration is `assigning`
    #[serde(default)]
    pub operation_id: Option<String>,

    /// `unassigned`, `assigning`, `assigned`, `failed` or `disabled`
    #[serde(default)]
    pub status: Option<String>,

    /// The registration outcome, once known
    #[serde(default)]
    pub registration_state: Option<RegistrationState>,

    /// Error description on failure responses
    #[serde(default)]
    pub message: Option<String>,
}

/// The device registration state
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationState {
    /// The hub the device was assigned to
    #[serde(default)]
    pub assigned_hub: Option<String>,

    /// The device ID on the assigned hub
    #[serde(default)]
    pub device_id: Option<String>,

    /// Registration status
    #[serde(default)]
    pub status: Option<String>,

    /// Error description, if the registration failed
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RegistrationOperation {
    /// Whether the registration is still being processed
    pub fn is_assigning(&self) -> bool {
        matches!(self.status.as_deref(), Some("assigning") | Some("unassigned"))
    }
}
