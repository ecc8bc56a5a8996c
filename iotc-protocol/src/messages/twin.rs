use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The key under which the twin carries its version
pub const VERSION_KEY: &str = "$version";

/// The Twin
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Twin {
    /// Desired properties section
    #[serde(default)]
    pub desired: Map<String, Value>,

    /// Reported properties section
    #[serde(default)]
    pub reported: Map<String, Value>,
}

/// A command message requesting the IoT Hub to respond with the content of the Twin
#[derive(Clone, Debug)]
pub struct ReadTwinReq {
    /// Request identifier, returned in the ReadTwinRes response message
    pub request_id: String,
}

/// Twin operation response message
#[derive(Clone, Debug)]
pub struct ReadTwinRes {
    /// The request identifier specified in the request
    pub request_id: String,

    /// Response status code
    pub status_code: StatusCode,

    /// Twin content (only present for a successful read)
    pub body: Option<Value>,

    /// Twin version
    pub version: Option<u64>,
}

/// Event message specifying the twin's Desired Properties section was updated
#[derive(Clone, Debug)]
pub struct DesiredPropsUpdated {
    /// The patch to the Desired Properties section (including `$version`)
    pub body: Map<String, Value>,

    /// The version of the Desired Properties section
    pub desired_properties_version: u64,
}

/// Command message for updating the Reported Properties section of the Twin
#[derive(Clone, Debug)]
pub struct UpdateReportedPropsReq {
    /// Request identifier
    pub request_id: String,

    /// Updated Reported Properties section
    pub reported: Map<String, Value>,
}

/// Response code
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusCode {
    /// Command succeeded and returned content
    OK,

    /// Command succeeded and returned no content
    NoContent,

    /// Throttled
    TooManyRequests,

    /// Client sent a bad request
    BadRequest,

    /// Server returned an error
    ServerError(u16),

    /// Server sent some unknown status code
    UnknownStatusCode(u16),
}

impl StatusCode {
    /// Whether the operation succeeded
    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::OK | StatusCode::NoContent)
    }

    /// The numeric status code
    pub fn code(self) -> u16 {
        match self {
            StatusCode::OK => 200,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::TooManyRequests => 429,
            StatusCode::ServerError(code) | StatusCode::UnknownStatusCode(code) => code,
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        match code {
            429 => StatusCode::TooManyRequests,
            200 => StatusCode::OK,
            204 => StatusCode::NoContent,
            400 => StatusCode::BadRequest,
            500..=599 => StatusCode::ServerError(code),
            other => StatusCode::UnknownStatusCode(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_round_trips_its_number() {
        for code in &[200u16, 204, 400, 429, 503, 404] {
            assert_eq!(StatusCode::from(*code).code(), *code);
        }
        assert!(StatusCode::from(204).is_success());
        assert!(!StatusCode::from(429).is_success());
    }
}
