use std::fmt::{self, Formatter};

use serde_json::Value;

/// A direct method call pushed by the hub on `$iothub/methods/POST/{name}/?$rid={rid}`
#[derive(Clone, Debug)]
pub struct DirectMethodReq {
    /// The `$rid` the response must echo
    pub request_id: String,

    /// Method name, taken from the topic
    pub method_name: String,

    /// The JSON payload, if the call carried one
    pub body: Option<Value>,
}

impl fmt::Display for DirectMethodReq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ($rid={})", self.method_name, self.request_id)
    }
}

/// The device's answer to a [`DirectMethodReq`]
#[derive(Clone, Debug)]
pub struct DirectMethodRes {
    /// The `$rid` of the call being answered
    pub request_id: String,

    /// HTTP-like status code, placed in the response topic
    pub status: i32,

    /// Response payload; an empty body is sent when absent
    pub payload: Option<Value>,
}
