use std::error::Error;
use std::fmt;
use std::io;

use iotc_protocol::auth::sas::TokenError;
use iotc_protocol::CodecError;

pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the hub collaborators
#[derive(Debug)]
pub enum ClientError {
    /// A SAS token could not be generated
    Token(TokenError),
    /// A message could not be encoded or decoded
    Codec(CodecError),
    /// The underlying MQTT or HTTP transport failed
    Transport(String),
    /// The service answered with a failure status
    Rejected { status: u16, message: String },
    /// The provisioning service did not assign the device
    Provisioning(String),
    /// No response arrived in time
    Timeout(&'static str),
    /// The operation requires an open connection
    NotConnected,
    /// The other side of an internal channel is gone
    ChannelClosed,
    Io(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Token(e) => write!(f, "Cannot generate SAS token: {}", e),
            ClientError::Codec(e) => write!(f, "Codec failure: {}", e),
            ClientError::Transport(e) => write!(f, "Transport failure: {}", e),
            ClientError::Rejected { status, message } => {
                write!(f, "Request rejected with status {}: {}", status, message)
            }
            ClientError::Provisioning(e) => write!(f, "Provisioning failed: {}", e),
            ClientError::Timeout(what) => write!(f, "Timed out waiting for {}", what),
            ClientError::NotConnected => write!(f, "Not connected"),
            ClientError::ChannelClosed => write!(f, "Channel closed"),
            ClientError::Io(e) => e.fmt(f),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientError::Token(e) => Some(e),
            ClientError::Codec(e) => Some(e),
            ClientError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TokenError> for ClientError {
    fn from(item: TokenError) -> Self {
        ClientError::Token(item)
    }
}

impl From<CodecError> for ClientError {
    fn from(item: CodecError) -> Self {
        ClientError::Codec(item)
    }
}

impl From<io::Error> for ClientError {
    fn from(item: io::Error) -> Self {
        ClientError::Io(item)
    }
}
