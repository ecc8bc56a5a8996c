//! The device side of an IoT Central connection: provisioning, connection,
//! heartbeat telemetry, desired-property reconciliation and file upload on
//! command, all driven by a single session task.

pub mod bootstrap;
pub mod command;
pub mod logging;
pub mod naming;
pub mod session;
pub mod settings;
pub mod state;

pub use bootstrap::{start, BootstrapOutcome};
pub use command::CommandResult;
pub use logging::SessionLogger;
pub use naming::{BlobTarget, FolderNaming, NamingPolicy, TimestampNaming};
pub use session::{Collaborators, DeviceSession, SessionConfig, SessionExit};
pub use settings::{DeviceSettings, SettingName};
pub use state::{ReconnectPolicy, SessionState};

/// Direct method that triggers a file upload
pub const COMMAND_UPLOAD_FILE: &str = "COMMAND_UPLOAD_FILE";

/// Telemetry sent on every heartbeat tick
pub const TELEMETRY_SYSTEM_HEARTBEAT: &str = "TELEMETRY_SYSTEM_HEARTBEAT";

/// Telemetry sent after a successful upload
pub const EVENT_UPLOAD_FILE: &str = "EVENT_UPLOAD_FILE";

pub const DEFAULT_PROVISIONING_HOST: &str = "global.azure-devices-provisioning.net";
