use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use iotc_device::{FolderNaming, NamingPolicy, ReconnectPolicy, SessionConfig, TimestampNaming};
use iotc_protocol::DeviceIdentity;
use structopt::StructOpt;

/// Which blob naming policy the session uses
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NamingKind {
    Folder,
    Timestamp,
}

impl FromStr for NamingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "folder" => Ok(NamingKind::Folder),
            "timestamp" => Ok(NamingKind::Timestamp),
            other => Err(format!("unknown naming policy '{}', expected folder or timestamp", other)),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// At least one identity value is absent or empty
    MissingIdentity,
    InvalidHeartbeatInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingIdentity => write!(
                f,
                "missing required environment variables scopeId, deviceId, deviceKey, modelId"
            ),
            ConfigError::InvalidHeartbeatInterval => {
                write!(f, "heartbeat interval must be at least one second")
            }
        }
    }
}

impl Error for ConfigError {}

#[derive(StructOpt, Debug)]
#[structopt(name = "iotc-device", about = "Connects a simulated device to IoT Central")]
pub struct Options {
    #[structopt(long = "scope-id", env = "scopeId", hide_env_values = true)]
    pub scope_id: Option<String>,

    #[structopt(long = "device-id", env = "deviceId")]
    pub device_id: Option<String>,

    #[structopt(long = "device-key", env = "deviceKey", hide_env_values = true)]
    pub device_key: Option<String>,

    #[structopt(long = "model-id", env = "modelId")]
    pub model_id: Option<String>,

    #[structopt(long = "heartbeat-interval", default_value = "15")]
    pub heartbeat_interval_secs: u64,

    /// folder | timestamp
    #[structopt(long = "naming", default_value = "folder")]
    pub naming: NamingKind,

    #[structopt(long = "upload-source", default_value = "./datafile.json", parse(from_os_str))]
    pub upload_source: PathBuf,

    #[structopt(long = "provisioning-host", default_value = "global.azure-devices-provisioning.net")]
    pub provisioning_host: String,

    /// Upload into the folder named by SETTING_UPLOAD_FOLDERNAME instead of the fixed path
    #[structopt(long = "honor-upload-folder")]
    pub honor_upload_folder: bool,

    /// Reconnect with backoff after connection failures
    #[structopt(long = "reconnect")]
    pub reconnect: bool,

    #[structopt(long = "max-backoff", default_value = "60")]
    pub max_backoff_secs: u64,

    #[structopt(long = "token-ttl", default_value = "60")]
    pub token_ttl_mins: u64,
}

fn required(value: &Option<String>) -> Result<&str, ConfigError> {
    match value.as_deref() {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingIdentity),
    }
}

impl Options {
    pub fn from_cmd_line() -> Options {
        Options::from_args()
    }

    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        Ok(DeviceIdentity::new(
            required(&self.scope_id)?,
            required(&self.device_id)?,
            required(&self.device_key)?,
            required(&self.model_id)?,
        ))
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidHeartbeatInterval);
        }

        Ok(SessionConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            upload_source: self.upload_source.clone(),
            provisioning_host: self.provisioning_host.clone(),
        })
    }

    pub fn naming_policy(&self) -> Box<dyn NamingPolicy> {
        match self.naming {
            NamingKind::Folder => Box::new(FolderNaming::new(self.honor_upload_folder)),
            NamingKind::Timestamp => Box::new(TimestampNaming),
        }
    }

    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        if self.reconnect {
            Some(ReconnectPolicy::new(Duration::from_secs(self.max_backoff_secs)))
        } else {
            None
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(60 * self.token_ttl_mins)
    }
}
