/// MQTT QoS used for a hub publication or subscription
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeliveryGuarantees {
    /// QoS0, fire and forget. Used for twin and direct method traffic, which
    /// carries its own `$rid` correlation.
    AtMostOnce,
    /// QoS1, redelivered until the broker acknowledges it. Used for telemetry.
    AtLeastOnce,
}

/// Whether the hub keeps QoS1 subscriptions and undelivered cloud messages
/// across reconnects
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionMode {
    /// The hub forgets subscriptions when the device disconnects
    Clean,

    /// The hub keeps subscriptions and redelivers unacknowledged messages
    Persistent,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Clean
    }
}

impl SessionMode {
    /// The value of the MQTT clean-session flag
    pub fn is_clean(self) -> bool {
        self == SessionMode::Clean
    }
}
