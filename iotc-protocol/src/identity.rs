use std::fmt;

/// The identity a device presents to the provisioning service.
/// Supplied once at startup and never mutated.
#[derive(Clone, Eq, PartialEq)]
pub struct DeviceIdentity {
    /// The ID scope of the IoT Central application
    pub scope_id: String,

    /// The Device ID (also used as the provisioning registration ID)
    pub device_id: String,

    /// The device's symmetric key (base64)
    pub device_key: String,

    /// The device template (model) identifier
    pub model_id: String,
}

impl DeviceIdentity {
    /// Creates a new device identity
    pub fn new(scope_id: &str, device_id: &str, device_key: &str, model_id: &str) -> DeviceIdentity {
        DeviceIdentity {
            scope_id: scope_id.to_owned(),
            device_id: device_id.to_owned(),
            device_key: device_key.to_owned(),
            model_id: model_id.to_owned(),
        }
    }
}

// The key never ends up in logs
impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("scope_id", &self.scope_id)
            .field("device_id", &self.device_id)
            .field("device_key", &"<redacted>")
            .field("model_id", &self.model_id)
            .finish()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope_id, self.device_id)
    }
}

/// Everything needed to open a connection to the assigned IoT Hub.
/// Rendered as `HostName=...;DeviceId=...;SharedAccessKey=...`
#[derive(Clone, Eq, PartialEq)]
pub struct ConnectionDescriptor {
    /// The assigned hub's host name
    pub hostname: String,

    /// The device ID assigned by the provisioning service
    pub device_id: String,

    /// The device's symmetric key
    pub shared_access_key: String,
}

impl ConnectionDescriptor {
    /// Creates a descriptor from the provisioning result and the device key it was registered with
    pub fn new(hostname: &str, device_id: &str, shared_access_key: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            hostname: hostname.to_owned(),
            device_id: device_id.to_owned(),
            shared_access_key: shared_access_key.to_owned(),
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostName={};DeviceId={};SharedAccessKey={}",
            self.hostname, self.device_id, self.shared_access_key
        )
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostName={};DeviceId={};SharedAccessKey=<redacted>",
            self.hostname, self.device_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_format() {
        // Arrange
        let descriptor = ConnectionDescriptor::new("h1", "d1", "a2V5");

        // Act
        let text = descriptor.to_string();

        // Assert
        assert_eq!(text, "HostName=h1;DeviceId=d1;SharedAccessKey=a2V5");
    }

    #[test]
    fn test_debug_hides_key() {
        let identity = DeviceIdentity::new("scope", "dev", "secret", "model");
        let descriptor = ConnectionDescriptor::new("h1", "d1", "secret");

        assert!(!format!("{:?}", identity).contains("secret"));
        assert!(!format!("{:?}", descriptor).contains("secret"));
    }
}
