use serde::Serialize;
use serde_json::{json, Map, Value};

/// Status reported once a command was accepted for processing
pub const STATUS_ACCEPTED: i32 = 202;

/// Outcome of a command, written back as a reported property
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CommandResult {
    #[serde(rename = "COMMANDRESPONSE_STATUSCODE")]
    pub status_code: i32,

    #[serde(rename = "COMMANDRESPONSE_MESSAGE")]
    pub message: String,

    #[serde(rename = "COMMANDRESPONSE_DATA")]
    pub data: String,
}

impl CommandResult {
    pub fn accepted(message: String) -> CommandResult {
        CommandResult {
            status_code: STATUS_ACCEPTED,
            message,
            data: String::new(),
        }
    }

    /// `{ <command>: { "value": <result> } }`
    pub fn into_reported(self, command_name: &str) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert(command_name.to_owned(), json!({ "value": self }));
        patch
    }
}
