use crate::PropertyBag;

/// A device-to-cloud message
#[derive(Clone, Debug)]
pub struct TelemetryMsg {
    /// The sender's device ID
    pub device_id: String,

    /// The content of the message
    pub content: Option<serde_json::Value>,

    /// Message headers (application properties)
    pub headers: Option<PropertyBag>,
}
