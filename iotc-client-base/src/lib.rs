use std::{collections::HashMap, time::Duration};

use iotc_protocol::{
    auth::sas::{SasToken, TokenResult},
    qos::SessionMode,
    ConnectionDescriptor,
};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

pub mod capabilities;
pub mod error;
pub mod fs;

pub use capabilities::*;
pub use error::{ClientError, ClientResult};

pub const DEFAULT_MQTT_PORT: u16 = 8883;

#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub hostname: String,
    pub port: u16,
    pub device_id: String,
    pub model_id: Option<String>,
    pub session_mode: SessionMode,
    pub timeout: Duration,
    pub token_ttl: Duration,
    pub shared_access_key: String,
}

impl ConnectionSettings {
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> ConnectionSettings {
        ConnectionSettings {
            hostname: descriptor.hostname.clone(),
            port: DEFAULT_MQTT_PORT,
            device_id: descriptor.device_id.clone(),
            model_id: None,
            session_mode: SessionMode::Clean,
            timeout: Duration::from_secs(30),
            token_ttl: Duration::from_secs(60 * 60),
            shared_access_key: descriptor.shared_access_key.clone(),
        }
    }

    pub fn with_model_id(mut self, model_id: &str) -> ConnectionSettings {
        self.model_id = Some(model_id.to_owned()).filter(|id| !id.is_empty());
        self
    }

    pub fn with_token_ttl(mut self, token_ttl: Duration) -> ConnectionSettings {
        self.token_ttl = token_ttl;
        self
    }
}

pub fn generate_sas_token(settings: &ConnectionSettings) -> TokenResult {
    SasToken::for_device(
        &settings.hostname,
        &settings.device_id,
        &settings.shared_access_key,
        settings.token_ttl,
    )
}

#[derive(Debug, Clone)]
pub struct D2CMsg {
    pub content: Option<Value>,
    pub headers: Option<HashMap<String, String>>,
}

impl D2CMsg {
    /// A message carrying a single JSON object and no headers
    pub fn json(content: Value) -> D2CMsg {
        D2CMsg {
            content: Some(content),
            headers: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DMIRequest {
    pub method_name: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DMIResult {
    pub status: i32,
    pub payload: Option<Value>,
}

/// Completes a single direct method invocation
#[derive(Debug)]
pub struct DMIResponder {
    response_tx: oneshot::Sender<DMIResult>,
}

impl DMIResponder {
    /// Creates a responder and the receiving end the transport awaits
    pub fn channel() -> (DMIResponder, oneshot::Receiver<DMIResult>) {
        let (response_tx, response_rx) = oneshot::channel();
        (DMIResponder { response_tx }, response_rx)
    }

    pub fn complete(self, result: DMIResult) -> ClientResult<()> {
        self.response_tx
            .send(result)
            .map_err(|_| ClientError::ChannelClosed)
    }
}

/// Events pushed by the transport and twin collaborators
#[derive(Debug)]
pub enum HubEvent {
    /// A full or partial desired properties document, including `$version`
    DesiredPropertiesChanged(Map<String, Value>),

    /// A direct method invocation waiting for its response
    MethodInvoked(DMIRequest, DMIResponder),

    /// The transport reported an error
    TransportError(String),
}

pub type EventSink = mpsc::UnboundedSender<HubEvent>;
