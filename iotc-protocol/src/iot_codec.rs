use crate::messages::direct_methods::{DirectMethodReq, DirectMethodRes};
use crate::messages::provisioning::{PollRegistrationReq, RegisterReq, RegistrationRes};
use crate::messages::telemetry::TelemetryMsg;
use crate::messages::twin::*;
use crate::messages::{MsgFromHub, MsgToHub};
use log::debug;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use url::form_urlencoded;

/// IoT Hub MQTT API version
pub const HUB_API_VERSION: &str = "2021-04-12";

/// Device Provisioning Service MQTT API version
pub const DPS_API_VERSION: &str = "2019-03-31";

/// Topic filter for twin operation responses
pub const TWIN_RESPONSES_FILTER: &str = "$iothub/twin/res/#";

/// Topic filter for desired properties updates
pub const DESIRED_PROPERTIES_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";

/// Topic filter for direct method invocations
pub const METHODS_FILTER: &str = "$iothub/methods/POST/#";

/// Topic filter for provisioning service responses
pub const PROVISIONING_RESPONSES_FILTER: &str = "$dps/registrations/res/#";

const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const DESIRED_PROPERTIES_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const METHODS_PREFIX: &str = "$iothub/methods/POST/";
const PROVISIONING_RESPONSE_PREFIX: &str = "$dps/registrations/res/";

/// A Codec that encodes and decodes between IoT messages and MQTT publications
#[derive(Debug, Copy, Clone)]
pub struct IotCodec;

/// An IoT message rendered as an MQTT topic and payload
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EncodedPublish {
    /// The topic name
    pub topic: String,

    /// The publication payload
    pub payload: Vec<u8>,
}

/// The result of an encoding process
pub type EncodingResult = Result<EncodedPublish, CodecError>;

/// The result of a decoding process
pub type DecodingResult = Result<MsgFromHub, CodecError>;

/// Represents an error in encoding or decoding a publication
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CodecError {
    /// The message body does not match what the Azure IoT Hub MQTT API expects
    InvalidMessageBody,

    /// The topic name is not one the Azure IoT Hub MQTT API uses
    InvalidTopic,

    /// The Request ID is missing
    MissingRid,

    /// The direct method invocation topic is missing the invoked method name
    MissingMethodName,

    /// The twin version indicator is missing
    MissingVersion,

    /// The operation status code is missing
    MissingStatusCode,

    /// The twin version identifier is invalid
    InvalidVersionIdentifier,
}

impl CodecError {
    fn get_text(&self) -> &str {
        match self {
            CodecError::InvalidMessageBody => "Invalid Message Body",
            CodecError::InvalidTopic => "Invalid Topic",
            CodecError::MissingRid => "Missing Request IDentifier (RID)",
            CodecError::MissingMethodName => "Missing Direct Method Name",
            CodecError::MissingVersion => "Missing Version Identifier",
            CodecError::MissingStatusCode => "Missing Status Code",
            CodecError::InvalidVersionIdentifier => "Invalid Twin Version Identifier",
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_text())
    }
}

impl Error for CodecError {}

impl IotCodec {
    /// The MQTT user name a device presents to its IoT Hub.
    /// The model ID makes the device discoverable as a Plug and Play device.
    pub fn hub_username(hostname: &str, device_id: &str, model_id: Option<&str>) -> String {
        let mut username = format!("{}/{}/?api-version={}", hostname, device_id, HUB_API_VERSION);
        if let Some(model_id) = model_id.filter(|id| !id.is_empty()) {
            username.push_str("&model-id=");
            username.extend(form_urlencoded::byte_serialize(model_id.as_bytes()));
        }
        username
    }

    /// The MQTT user name used when registering with the provisioning service
    pub fn provisioning_username(scope_id: &str, registration_id: &str) -> String {
        format!(
            "{}/registrations/{}/api-version={}",
            scope_id, registration_id, DPS_API_VERSION
        )
    }

    /// Encodes an IoT message to an MQTT topic and payload
    pub fn encode_message(message: &MsgToHub) -> EncodingResult {
        let encoded = match message {
            MsgToHub::Telemetry(ref msg) => Self::encode_telemetry_message(msg),
            MsgToHub::ReadTwin(ref msg) => Self::encode_read_twin(msg),
            MsgToHub::UpdateReportedProperties(ref msg) => Self::encode_twin_update(msg)?,
            MsgToHub::DirectMethodResponse(ref msg) => Self::encode_direct_method_response(msg),
            MsgToHub::Register(ref msg) => Self::encode_register(msg)?,
            MsgToHub::PollRegistration(ref msg) => Self::encode_poll_registration(msg),
        };

        Ok(encoded)
    }

    /// Decodes a publication received from the hub or the provisioning service
    ///
    /// # Arguments
    ///
    /// * topic - the publication's topic name
    /// * payload - the publication's payload
    pub fn decode_publish(topic: &str, payload: &[u8]) -> DecodingResult {
        if let Some(rest) = topic.strip_prefix(TWIN_RESPONSE_PREFIX) {
            return Self::decode_twin_response(rest, payload);
        }

        if let Some(rest) = topic.strip_prefix(DESIRED_PROPERTIES_PREFIX) {
            return Self::decode_desired_properties_update(rest, payload);
        }

        if let Some(rest) = topic.strip_prefix(METHODS_PREFIX) {
            return Self::decode_direct_method_invocation(rest, payload);
        }

        if let Some(rest) = topic.strip_prefix(PROVISIONING_RESPONSE_PREFIX) {
            return Self::decode_provisioning_response(rest, payload);
        }

        debug!("Unrecognized topic: {}", topic);
        Ok(MsgFromHub::UnknownMessage())
    }

    fn decode_direct_method_invocation(rest: &str, payload: &[u8]) -> DecodingResult {
        let (path, mut query) = split_topic(rest);
        let request_id = query.remove("$rid").ok_or(CodecError::MissingRid)?;

        let method_name = match path.split('/').next() {
            Some(name) if !name.is_empty() => percent_decode_str(name)
                .decode_utf8()
                .map_err(|_e| CodecError::InvalidTopic)?
                .into_owned(),
            _ => return Err(CodecError::MissingMethodName),
        };

        let message = DirectMethodReq {
            body: deserialize_message_body(payload)?,
            request_id,
            method_name,
        };

        Ok(message.into())
    }

    fn decode_desired_properties_update(rest: &str, payload: &[u8]) -> DecodingResult {
        let (_path, query) = split_topic(rest);
        let version = Self::extract_version(&query)?.ok_or(CodecError::MissingVersion)?;
        let body: Map<String, Value> =
            deserialize_message_body(payload)?.ok_or(CodecError::InvalidMessageBody)?;

        let message = DesiredPropsUpdated {
            body,
            desired_properties_version: version,
        };

        Ok(message.into())
    }

    fn decode_twin_response(rest: &str, payload: &[u8]) -> DecodingResult {
        let (path, mut query) = split_topic(rest);
        let request_id = query.remove("$rid").ok_or(CodecError::MissingRid)?;
        let code = parse_status_code(path)?;

        let body = match code {
            200 => deserialize_message_body(payload)?,
            _other => None,
        };

        Ok(MsgFromHub::TwinResponseMessage(ReadTwinRes {
            request_id,
            status_code: code.into(),
            body,
            version: Self::extract_version(&query)?,
        }))
    }

    fn decode_provisioning_response(rest: &str, payload: &[u8]) -> DecodingResult {
        let (path, mut query) = split_topic(rest);
        let status_code = parse_status_code(path)?;
        let retry_after = query
            .remove("retry-after")
            .and_then(|value| value.parse::<u64>().ok());

        Ok(RegistrationRes {
            request_id: query.remove("$rid"),
            status_code,
            retry_after,
            body: deserialize_message_body(payload)?,
        }
        .into())
    }

    fn extract_version(map: &HashMap<String, String>) -> Result<Option<u64>, CodecError> {
        match map.get("$version") {
            Some(version_string) => version_string
                .parse::<u64>()
                .map(Some)
                .map_err(|_e| CodecError::InvalidVersionIdentifier),
            None => Ok(None),
        }
    }

    fn encode_telemetry_message(message: &TelemetryMsg) -> EncodedPublish {
        let mut topic = format!("devices/{}/messages/events/", message.device_id);

        let mut bag: Vec<String> = Vec::new();
        if message.content.is_some() {
            bag.push("$.ct=application%2Fjson".to_owned());
            bag.push("$.ce=utf-8".to_owned());
        }
        if let Some(headers) = &message.headers {
            let mut keys: Vec<&String> = headers.keys().collect();
            keys.sort();
            for key in keys {
                bag.push(format!(
                    "{}={}",
                    utf8_percent_encode(key, NON_ALPHANUMERIC),
                    utf8_percent_encode(&headers[key], NON_ALPHANUMERIC)
                ));
            }
        }
        topic.push_str(&bag.join("&"));

        let payload = match &message.content {
            Some(value) => value.to_string().into_bytes(),
            None => Vec::new(),
        };

        EncodedPublish { topic, payload }
    }

    fn encode_twin_update(message: &UpdateReportedPropsReq) -> EncodingResult {
        let payload =
            serde_json::to_vec(&message.reported).map_err(|_e| CodecError::InvalidMessageBody)?;
        let topic = format!(
            "$iothub/twin/PATCH/properties/reported/?$rid={}",
            message.request_id
        );
        Ok(EncodedPublish { topic, payload })
    }

    fn encode_read_twin(message: &ReadTwinReq) -> EncodedPublish {
        EncodedPublish {
            topic: format!("$iothub/twin/GET/?$rid={}", message.request_id),
            payload: Vec::new(),
        }
    }

    fn encode_direct_method_response(message: &DirectMethodRes) -> EncodedPublish {
        let topic = format!(
            "$iothub/methods/res/{}/?$rid={}",
            message.status, message.request_id
        );

        let payload = match &message.payload {
            Some(x) => x.to_string().into_bytes(),
            None => Vec::new(),
        };

        EncodedPublish { topic, payload }
    }

    fn encode_register(message: &RegisterReq) -> EncodingResult {
        let mut body = json!({ "registrationId": message.registration_id });
        if let Some(payload) = &message.payload {
            body["payload"] = payload.clone();
        }
        let payload = serde_json::to_vec(&body).map_err(|_e| CodecError::InvalidMessageBody)?;

        Ok(EncodedPublish {
            topic: format!(
                "$dps/registrations/PUT/iotdps-register/?$rid={}",
                message.request_id
            ),
            payload,
        })
    }

    fn encode_poll_registration(message: &PollRegistrationReq) -> EncodedPublish {
        EncodedPublish {
            topic: format!(
                "$dps/registrations/GET/iotdps-get-operationstatus/?$rid={}&operationId={}",
                message.request_id, message.operation_id
            ),
            payload: Vec::new(),
        }
    }
}

/// Splits `path/?query` into the path and the decoded query pairs
fn split_topic(rest: &str) -> (&str, HashMap<String, String>) {
    match rest.find('?') {
        Some(index) => {
            let query = form_urlencoded::parse(rest[index + 1..].as_bytes())
                .into_owned()
                .collect();
            (rest[..index].trim_end_matches('/'), query)
        }
        None => (rest.trim_end_matches('/'), HashMap::new()),
    }
}

fn parse_status_code(path: &str) -> Result<u16, CodecError> {
    path.split('/')
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(CodecError::MissingStatusCode)
}

fn deserialize_message_body<T>(payload: &[u8]) -> Result<Option<T>, CodecError>
where
    T: DeserializeOwned,
{
    if payload.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }

    serde_json::from_slice(payload).map_err(|_e| CodecError::InvalidMessageBody)
}
