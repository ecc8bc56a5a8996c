//! The device session actor.
//!
//! One task owns the session and everything it mutates: the settings mirror,
//! the transport and twin handles, and the heartbeat ticker. Collaborators
//! never call back into the session directly; they push [`HubEvent`]s into
//! the session's queue and [`DeviceSession::run`] handles them one at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use iotc_client_base::{
    ClientError, ClientResult, Connector, D2CMsg, DMIRequest, DMIResponder, DMIResult,
    DeviceTransport, DeviceTwin, EventSink, FileSystem, HubEvent, ProvisioningClient,
    RegistrationRequest,
};
use iotc_protocol::auth::SymmetricKeyCredential;
use iotc_protocol::messages::twin::VERSION_KEY;
use iotc_protocol::{ConnectionDescriptor, DeviceIdentity};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::command::CommandResult;
use crate::logging::SessionLogger;
use crate::naming::NamingPolicy;
use crate::settings::{truthy_setting_value, DeviceSettings};
use crate::state::SessionState;
use crate::{
    COMMAND_UPLOAD_FILE, DEFAULT_PROVISIONING_HOST, EVENT_UPLOAD_FILE, TELEMETRY_SYSTEM_HEARTBEAT,
};

const STATUS_OK: i32 = 200;
const STATUS_NOT_IMPLEMENTED: i32 = 501;

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    /// Local file uploaded on `COMMAND_UPLOAD_FILE`
    pub upload_source: PathBuf,
    pub provisioning_host: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            heartbeat_interval: Duration::from_secs(15),
            upload_source: PathBuf::from("./datafile.json"),
            provisioning_host: DEFAULT_PROVISIONING_HOST.to_owned(),
        }
    }
}

/// The capabilities a session is built on
#[derive(Clone)]
pub struct Collaborators {
    pub provisioning: Arc<dyn ProvisioningClient>,
    pub connector: Arc<dyn Connector>,
    pub file_system: Arc<dyn FileSystem>,
}

/// Why [`DeviceSession::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// The transport failed and the session was set to exit on faults
    Faulted(String),
    /// The event queue closed
    Closed,
}

/// Transport and twin, held together or not at all
#[derive(Clone)]
struct Link {
    transport: Arc<dyn DeviceTransport>,
    twin: Arc<dyn DeviceTwin>,
}

pub struct DeviceSession {
    identity: DeviceIdentity,
    config: SessionConfig,
    collaborators: Collaborators,
    naming: Box<dyn NamingPolicy>,
    logger: SessionLogger,

    settings: DeviceSettings,
    state: SessionState,
    link: Option<Link>,
    heartbeat: Option<Interval>,
    exit_on_fault: bool,

    events_tx: EventSink,
    events_rx: mpsc::UnboundedReceiver<HubEvent>,
}

impl DeviceSession {
    pub fn new(
        identity: DeviceIdentity,
        config: SessionConfig,
        collaborators: Collaborators,
        naming: Box<dyn NamingPolicy>,
        logger: SessionLogger,
    ) -> DeviceSession {
        let settings = DeviceSettings::new(naming.setting(), naming.default_value());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        DeviceSession {
            identity,
            config,
            collaborators,
            naming,
            logger,
            settings,
            state: SessionState::Disconnected,
            link: None,
            heartbeat: None,
            exit_on_fault: false,
            events_tx,
            events_rx,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub(crate) fn logger(&self) -> &SessionLogger {
        &self.logger
    }

    /// When set, a transport error drops the connection and makes
    /// [`DeviceSession::run`] return instead of only being logged
    pub fn exit_on_transport_error(&mut self, enabled: bool) {
        self.exit_on_fault = enabled;
    }

    /// Registers the device with the provisioning service and returns the
    /// descriptor of the hub it was assigned to, or `None` on failure
    pub async fn provision(&mut self) -> Option<ConnectionDescriptor> {
        self.state = SessionState::Provisioning;

        let request = RegistrationRequest {
            endpoint: self.config.provisioning_host.clone(),
            scope_id: self.identity.scope_id.clone(),
            credential: SymmetricKeyCredential::new(
                &self.identity.device_id,
                &self.identity.device_key,
            ),
            payload: json!({ "iotcModelId": self.identity.model_id }),
        };
        self.logger.info(format_args!(
            "Registering device {} with provisioning host {}",
            self.identity.device_id, request.endpoint
        ));

        let registration = self.collaborators.provisioning.register(request).await;
        self.state = SessionState::Disconnected;

        match registration {
            Ok(result) => {
                self.logger.info(format_args!(
                    "DPS registration succeeded - hub: {}",
                    result.assigned_hub
                ));
                Some(ConnectionDescriptor::new(
                    &result.assigned_hub,
                    &result.device_id,
                    &self.identity.device_key,
                ))
            }
            Err(e) => {
                self.logger.error(format_args!(
                    "Failed to instantiate client interface from configuration: {}",
                    e
                ));
                None
            }
        }
    }

    /// Builds and opens the transport, fetches the twin and subscribes to
    /// desired properties, transport errors and `COMMAND_UPLOAD_FILE`.
    /// Failures are logged and leave the session without a connection.
    pub async fn connect(&mut self, descriptor: &ConnectionDescriptor) {
        self.state = SessionState::Connecting;
        self.link = None;
        self.renew_event_queue();

        let transport = match self.collaborators.connector.connect(descriptor).await {
            Ok(transport) => transport,
            Err(e) => {
                self.logger.error(format_args!(
                    "Failed to connect device client interface from connection string - device: {} ({})",
                    self.identity.device_id, e
                ));
                self.state = SessionState::Faulted;
                return;
            }
        };

        self.start_heartbeat();

        match self.open(transport).await {
            Ok(link) => {
                self.link = Some(link);
                self.state = SessionState::Connected;
                self.logger.info(format_args!(
                    "IoT Central successfully connected device: {}",
                    self.identity.device_id
                ));
            }
            Err(e) => {
                self.state = SessionState::Faulted;
                self.logger
                    .error(format_args!("IoT Central connection error: {}", e));
            }
        }
    }

    async fn open(&self, transport: Arc<dyn DeviceTransport>) -> ClientResult<Link> {
        transport.open().await?;
        self.logger.info(format_args!(
            "Successfully connected to IoT Central - device: {}",
            self.identity.device_id
        ));

        let twin = transport.get_twin().await?;
        twin.on_desired_properties(self.events_tx.clone());
        transport.on_error(self.events_tx.clone());
        transport.on_method(COMMAND_UPLOAD_FILE, self.events_tx.clone());

        Ok(Link { transport, twin })
    }

    /// Replaces the event queue. Events still queued by a previous link are
    /// dropped with the old receiver and its sinks close.
    fn renew_event_queue(&mut self) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;
    }

    // Started once; reconnects keep the same ticker.
    fn start_heartbeat(&mut self) {
        if self.heartbeat.is_some() {
            return;
        }
        let period = self.config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(ticker);
    }

    /// Drops the transport and twin handles
    pub fn disconnect(&mut self) {
        self.link = None;
        self.state = SessionState::Disconnected;
    }

    /// Processes heartbeat ticks and hub events until the session faults
    /// (see [`DeviceSession::exit_on_transport_error`])
    pub async fn run(&mut self) -> SessionExit {
        loop {
            tokio::select! {
                _ = next_tick(&mut self.heartbeat) => self.send_heartbeat().await,
                event = self.events_rx.recv() => match event {
                    Some(event) => {
                        if let Some(exit) = self.handle_event(event).await {
                            return exit;
                        }
                    }
                    None => return SessionExit::Closed,
                },
            }
        }
    }

    async fn handle_event(&mut self, event: HubEvent) -> Option<SessionExit> {
        match event {
            HubEvent::DesiredPropertiesChanged(patch) => {
                self.on_desired_properties_changed(&patch).await;
            }
            HubEvent::MethodInvoked(request, responder) => {
                self.on_method_invoked(request, responder).await;
            }
            HubEvent::TransportError(message) => {
                self.logger
                    .error(format_args!("Device client connection error: {}", message));
                if self.exit_on_fault {
                    self.link = None;
                    self.state = SessionState::Faulted;
                    return Some(SessionExit::Faulted(message));
                }
            }
        }
        None
    }

    async fn on_method_invoked(&mut self, request: DMIRequest, responder: DMIResponder) {
        if request.method_name == COMMAND_UPLOAD_FILE {
            self.on_upload_file_command(responder).await;
            return;
        }

        self.logger.warn(format_args!(
            "Received unknown command '{}'",
            request.method_name
        ));
        self.acknowledge(responder, STATUS_NOT_IMPLEMENTED);
    }

    pub async fn send_heartbeat(&self) {
        self.send_measurement(measurement(TELEMETRY_SYSTEM_HEARTBEAT, json!(1)))
            .await;
    }

    /// Sends one telemetry message. Silently does nothing while disconnected.
    pub async fn send_measurement(&self, data: Value) {
        let link = match &self.link {
            Some(link) => link,
            None => return,
        };

        if let Err(e) = link.transport.send_event(D2CMsg::json(data)).await {
            self.logger.error(format_args!("sendMeasurement: {}", e));
        }
    }

    /// Applies a desired properties document to the settings mirror and
    /// reports the accepted values back in a single update
    pub async fn on_desired_properties_changed(&mut self, patch: &Map<String, Value>) {
        let setting = self.naming.setting();
        let mut reported = Map::new();

        for (key, value) in patch {
            if key == VERSION_KEY {
                continue;
            }

            if key == setting.as_str() {
                let value =
                    truthy_setting_value(value).unwrap_or_else(|| self.naming.default_value());
                self.settings.replace(value.clone());
                reported.insert(key.clone(), Value::String(value));
            } else {
                self.logger.warn(format_args!(
                    "Received desired property change for unknown setting '{}'",
                    key
                ));
            }
        }

        self.update_device_properties(reported).await;
    }

    /// Writes a reported properties patch. Empty patches are not sent.
    pub async fn update_device_properties(&self, patch: Map<String, Value>) {
        if patch.is_empty() {
            return;
        }
        let link = match &self.link {
            Some(link) => link,
            None => return,
        };

        if let Err(e) = link.twin.update_reported_properties(patch).await {
            self.logger
                .error(format_args!("Error updating device properties: {}", e));
        }
    }

    /// Acknowledges with 200 whatever the upload outcome, then reports a
    /// [`CommandResult`] under the command name
    pub async fn on_upload_file_command(&mut self, responder: DMIResponder) {
        self.logger.info(format_args!(
            "Received upload file command for deviceId: {}",
            self.identity.device_id
        ));

        let blob = self.upload_file(&self.config.upload_source).await;
        self.acknowledge(responder, STATUS_OK);

        let message = self
            .naming
            .command_message(&self.identity.device_id, blob.as_deref());
        self.update_device_properties(
            CommandResult::accepted(message).into_reported(COMMAND_UPLOAD_FILE),
        )
        .await;
    }

    fn acknowledge(&self, responder: DMIResponder, status: i32) {
        let result = DMIResult {
            status,
            payload: None,
        };
        if let Err(e) = responder.complete(result) {
            self.logger
                .warn(format_args!("Could not acknowledge command: {}", e));
        }
    }

    /// Uploads `path` under the name the naming policy picks and returns the
    /// blob name, or `None` if anything failed
    pub async fn upload_file(&self, path: &Path) -> Option<String> {
        match self.try_upload_file(path).await {
            Ok(blob) => {
                self.logger
                    .info(format_args!("Uploaded {} to blob {}", path.display(), blob));
                Some(blob)
            }
            Err(e) => {
                self.logger
                    .error(format_args!("Error during upload to blob: {}", e));
                None
            }
        }
    }

    async fn try_upload_file(&self, path: &Path) -> ClientResult<String> {
        let link = self.link.clone().ok_or(ClientError::NotConnected)?;
        let file_system = &self.collaborators.file_system;

        let size = match file_system.stat(path).await {
            Ok(stats) => Some(stats.size),
            Err(e) => {
                self.logger.warn(format_args!(
                    "An error occurred while getting file stats: {}",
                    e
                ));
                None
            }
        };

        let target = self.naming.blob_target(path, self.settings.value());
        self.logger.info(format_args!(
            "uploadContent - data length: {}, blob path: {}",
            size.map_or_else(|| "unknown".to_owned(), |size| size.to_string()),
            target.log_path
        ));

        let source = file_system.open_read(path).await?;
        link.transport
            .upload_to_blob(&target.destination, source, size)
            .await?;

        self.send_measurement(measurement(
            EVENT_UPLOAD_FILE,
            Value::String(target.destination.clone()),
        ))
        .await;

        Ok(target.destination)
    }

    #[cfg(test)]
    async fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }
}

/// A telemetry body with a single key
fn measurement(name: &str, value: Value) -> Value {
    let mut body = Map::new();
    body.insert(name.to_owned(), value);
    Value::Object(body)
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{FolderNaming, TimestampNaming, FIXED_DESTINATION};
    use crate::settings::SettingName;
    use iotc_test_utils::{
        CapturingLogger, FakeConnector, FakeFileSystem, FakeProvisioning, FakeTransport,
    };
    use log::Level;

    const KEY: &str = "a2V5";

    struct Harness {
        provisioning: Arc<FakeProvisioning>,
        connector: Arc<FakeConnector>,
        transport: Arc<FakeTransport>,
        files: Arc<FakeFileSystem>,
        log: Arc<CapturingLogger>,
    }

    impl Harness {
        fn new() -> Harness {
            let transport = Arc::new(FakeTransport::default());
            Harness {
                provisioning: Arc::new(FakeProvisioning::succeeding("h1", "d1")),
                connector: Arc::new(FakeConnector::new(transport.clone())),
                transport,
                files: Arc::new(FakeFileSystem::with_file("./datafile.json", b"{\"a\":1}")),
                log: Arc::new(CapturingLogger::default()),
            }
        }

        fn session(&self, naming: Box<dyn NamingPolicy>) -> DeviceSession {
            DeviceSession::new(
                DeviceIdentity::new("scope", "d1", KEY, "urn:model:1"),
                SessionConfig::default(),
                Collaborators {
                    provisioning: self.provisioning.clone(),
                    connector: self.connector.clone(),
                    file_system: self.files.clone(),
                },
                naming,
                SessionLogger::new(self.log.clone()),
            )
        }

        async fn connected(&self, naming: Box<dyn NamingPolicy>) -> DeviceSession {
            let mut session = self.session(naming);
            session
                .connect(&ConnectionDescriptor::new("h1", "d1", KEY))
                .await;
            assert!(session.is_connected());
            session
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[tokio::test]
    async fn test_provision_builds_descriptor() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.session(Box::new(FolderNaming::default()));

        // Act
        let descriptor = session.provision().await.unwrap();

        // Assert
        assert_eq!(descriptor.to_string(), format!("HostName=h1;DeviceId=d1;SharedAccessKey={}", KEY));
        let requests = harness.provisioning.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].endpoint, DEFAULT_PROVISIONING_HOST);
        assert_eq!(requests[0].scope_id, "scope");
        assert_eq!(requests[0].credential.registration_id, "d1");
        assert_eq!(requests[0].payload, json!({ "iotcModelId": "urn:model:1" }));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_provision_failure_returns_none() {
        let mut harness = Harness::new();
        harness.provisioning = Arc::new(FakeProvisioning::failing("unauthorized"));
        let mut session = harness.session(Box::new(FolderNaming::default()));

        let descriptor = session.provision().await;

        assert!(descriptor.is_none());
        assert_eq!(harness.log.count(Level::Error), 1);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_registers_handlers() {
        // Arrange
        let harness = Harness::new();

        // Act
        let session = harness.connected(Box::new(FolderNaming::default())).await;

        // Assert
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(harness.transport.opens(), 1);
        assert!(harness.transport.has_method_handler(COMMAND_UPLOAD_FILE));
        assert!(harness.transport.has_error_handler());
        assert!(harness.transport.twin().has_desired_handler());
        assert_eq!(harness.connector.descriptors()[0].hostname, "h1");
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_session_unconnected() {
        let harness = Harness::new();
        harness.transport.set_fail_open(true);
        let mut session = harness.session(Box::new(FolderNaming::default()));

        session
            .connect(&ConnectionDescriptor::new("h1", "d1", KEY))
            .await;

        assert!(!session.is_connected());
        assert_eq!(session.state(), SessionState::Faulted);
        assert!(harness
            .log
            .contains(Level::Error, "IoT Central connection error"));
        assert!(!harness.transport.has_method_handler(COMMAND_UPLOAD_FILE));
    }

    #[tokio::test]
    async fn test_connector_failure_is_logged() {
        let harness = Harness::new();
        harness.connector.fail_next(1);
        let mut session = harness.session(Box::new(FolderNaming::default()));

        session
            .connect(&ConnectionDescriptor::new("h1", "d1", KEY))
            .await;

        assert!(!session.is_connected());
        assert!(harness
            .log
            .contains(Level::Error, "Failed to connect device client interface"));
    }

    #[tokio::test]
    async fn test_heartbeat_is_noop_when_disconnected() {
        let harness = Harness::new();
        let session = harness.session(Box::new(FolderNaming::default()));

        session.send_heartbeat().await;

        assert!(harness.transport.sent_events().is_empty());
        assert_eq!(harness.log.count(Level::Error), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_send_failure_is_logged() {
        let harness = Harness::new();
        let session = harness.connected(Box::new(FolderNaming::default())).await;
        harness.transport.set_fail_send(true);

        session.send_heartbeat().await;

        assert!(harness.log.contains(Level::Error, "sendMeasurement: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ticks_while_running() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        // Act
        let res = time::timeout(Duration::from_secs(31), session.run()).await;

        // Assert
        assert!(res.is_err());
        assert_eq!(
            harness.transport.sent_events(),
            vec![
                json!({ "TELEMETRY_SYSTEM_HEARTBEAT": 1 }),
                json!({ "TELEMETRY_SYSTEM_HEARTBEAT": 1 })
            ]
        );
    }

    #[tokio::test]
    async fn test_version_only_patch_changes_nothing() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        // Act
        session
            .on_desired_properties_changed(&object(json!({ "$version": 2 })))
            .await;

        // Assert
        assert_eq!(session.settings().value(), "Temp01");
        assert!(harness.transport.twin().updates().is_empty());
        assert_eq!(harness.log.count(Level::Warn), 0);
    }

    #[tokio::test]
    async fn test_recognized_setting_is_stored_and_reported() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        // Act
        harness
            .transport
            .twin()
            .push_desired(json!({ "SETTING_UPLOAD_FOLDERNAME": "Temp02", "$version": 3 }));
        session.drain_events().await;

        // Assert
        assert_eq!(session.settings().get("SETTING_UPLOAD_FOLDERNAME"), Some("Temp02"));
        assert_eq!(
            harness.transport.twin().updates(),
            vec![object(json!({ "SETTING_UPLOAD_FOLDERNAME": "Temp02" }))]
        );
    }

    #[tokio::test]
    async fn test_falsy_setting_resets_to_folder_default() {
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;
        session
            .on_desired_properties_changed(&object(json!({ "SETTING_UPLOAD_FOLDERNAME": "Temp02" })))
            .await;

        session
            .on_desired_properties_changed(&object(json!({ "SETTING_UPLOAD_FOLDERNAME": "", "$version": 4 })))
            .await;

        assert_eq!(session.settings().value(), "Temp01");
        assert_eq!(
            harness.transport.twin().updates().last(),
            Some(&object(json!({ "SETTING_UPLOAD_FOLDERNAME": "Temp01" })))
        );
    }

    #[tokio::test]
    async fn test_falsy_suffix_resets_to_fresh_timestamp() {
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(TimestampNaming)).await;

        session
            .on_desired_properties_changed(&object(json!({ "SETTING_FILENAME_SUFFIX": null })))
            .await;

        assert_eq!(session.settings().name(), SettingName::FilenameSuffix);
        assert_eq!(session.settings().value().len(), "20200101-101010".len());
        assert_eq!(harness.transport.twin().updates().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_settings_warn_once_each() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        // Act
        session
            .on_desired_properties_changed(&object(json!({ "foo": 1, "bar": "x", "$version": 5 })))
            .await;

        // Assert
        let warnings = harness.log.messages(Level::Warn);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.contains(&"Received desired property change for unknown setting 'foo'".to_owned()));
        assert!(warnings.contains(&"Received desired property change for unknown setting 'bar'".to_owned()));
        assert_eq!(session.settings().value(), "Temp01");
        assert!(harness.transport.twin().updates().is_empty());
    }

    #[tokio::test]
    async fn test_reported_update_failure_keeps_mirror() {
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;
        harness.transport.twin().set_fail_update(true);

        session
            .on_desired_properties_changed(&object(json!({ "SETTING_UPLOAD_FOLDERNAME": "Temp03" })))
            .await;

        assert_eq!(session.settings().value(), "Temp03");
        assert!(harness
            .log
            .contains(Level::Error, "Error updating device properties"));
    }

    #[tokio::test]
    async fn test_upload_command_acks_and_reports() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        // Act
        let ack = harness
            .transport
            .invoke_method(COMMAND_UPLOAD_FILE, None)
            .unwrap();
        session.drain_events().await;

        // Assert
        assert_eq!(ack.await.unwrap().status, 200);
        let uploads = harness.transport.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].blob_name, FIXED_DESTINATION);
        assert_eq!(uploads[0].size, Some(7));
        assert_eq!(uploads[0].content, b"{\"a\":1}".to_vec());
        assert_eq!(
            harness.transport.sent_events(),
            vec![json!({ "EVENT_UPLOAD_FILE": FIXED_DESTINATION })]
        );
        assert_eq!(
            harness.transport.twin().updates(),
            vec![object(json!({
                "COMMAND_UPLOAD_FILE": {
                    "value": {
                        "COMMANDRESPONSE_STATUSCODE": 202,
                        "COMMANDRESPONSE_MESSAGE": "Received upload file command for deviceId: d1",
                        "COMMANDRESPONSE_DATA": ""
                    }
                }
            }))]
        );
    }

    #[tokio::test]
    async fn test_upload_command_acks_even_when_file_is_missing() {
        // Arrange
        let mut harness = Harness::new();
        harness.files = Arc::new(FakeFileSystem::default());
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        // Act
        let ack = harness
            .transport
            .invoke_method(COMMAND_UPLOAD_FILE, Some(json!({ "ignored": true })))
            .unwrap();
        session.drain_events().await;

        // Assert
        assert_eq!(ack.await.unwrap().status, 200);
        assert!(harness.transport.uploads().is_empty());
        assert!(harness
            .log
            .contains(Level::Warn, "An error occurred while getting file stats"));
        assert!(harness.log.contains(Level::Error, "Error during upload to blob"));
        assert_eq!(harness.transport.twin().updates().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_reported_by_timestamp_policy() {
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(TimestampNaming)).await;
        harness.transport.set_fail_upload(true);

        let ack = harness
            .transport
            .invoke_method(COMMAND_UPLOAD_FILE, None)
            .unwrap();
        session.drain_events().await;

        assert_eq!(ack.await.unwrap().status, 200);
        let updates = harness.transport.twin().updates();
        assert_eq!(
            updates[0]["COMMAND_UPLOAD_FILE"]["value"]["COMMANDRESPONSE_MESSAGE"],
            json!("Upload failed for deviceId: d1")
        );
        assert!(harness.transport.sent_events().is_empty());
    }

    #[tokio::test]
    async fn test_upload_uses_suffix_and_unknown_size() {
        // Arrange
        let harness = Harness::new();
        harness.files.set_fail_stat(true);
        let mut session = harness.connected(Box::new(TimestampNaming)).await;
        session
            .on_desired_properties_changed(&object(json!({ "SETTING_FILENAME_SUFFIX": "v2" })))
            .await;

        // Act
        let blob = session.upload_file(Path::new("./datafile.json")).await;

        // Assert
        assert_eq!(blob.as_deref(), Some("datafile-v2.json"));
        let uploads = harness.transport.uploads();
        assert_eq!(uploads[0].blob_name, "datafile-v2.json");
        assert_eq!(uploads[0].size, None);
        assert!(harness
            .log
            .contains(Level::Info, "uploadContent - data length: unknown, blob path: datafile-v2.json"));
    }

    #[tokio::test]
    async fn test_upload_while_disconnected_fails() {
        let harness = Harness::new();
        let session = harness.session(Box::new(FolderNaming::default()));

        let blob = session.upload_file(Path::new("./datafile.json")).await;

        assert_eq!(blob, None);
        assert!(harness.log.contains(Level::Error, "Not connected"));
    }

    #[tokio::test]
    async fn test_unknown_method_gets_501() {
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;
        let (responder, ack) = DMIResponder::channel();

        session
            .handle_event(HubEvent::MethodInvoked(
                DMIRequest {
                    method_name: "reboot".to_owned(),
                    body: None,
                },
                responder,
            ))
            .await;

        assert_eq!(ack.await.unwrap().status, 501);
    }

    #[tokio::test]
    async fn test_transport_error_is_only_logged_by_default() {
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        harness.transport.raise_error("socket closed");
        session.drain_events().await;

        assert!(session.is_connected());
        assert_eq!(
            harness.log.messages(Level::Error),
            vec!["Device client connection error: socket closed".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_transport_error_faults_when_asked() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;
        session.exit_on_transport_error(true);

        // Act
        harness.transport.raise_error("socket closed");
        let exit = session.run().await;

        // Assert
        assert_eq!(exit, SessionExit::Faulted("socket closed".to_owned()));
        assert_eq!(session.state(), SessionState::Faulted);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_errors_queued_by_a_dropped_link_do_not_fault_the_next_one() {
        // Arrange
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;
        session.exit_on_transport_error(true);
        harness.transport.raise_error("link dropped");
        harness.transport.raise_error("link dropped again");
        assert_eq!(
            session.run().await,
            SessionExit::Faulted("link dropped".to_owned())
        );

        // Act
        session
            .connect(&ConnectionDescriptor::new("h1", "d1", KEY))
            .await;
        let second_run = time::timeout(Duration::from_millis(100), session.run()).await;

        // Assert
        assert!(session.is_connected());
        assert!(second_run.is_err());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_drops_both_handles() {
        let harness = Harness::new();
        let mut session = harness.connected(Box::new(FolderNaming::default())).await;

        session.disconnect();
        session
            .update_device_properties(object(json!({ "x": 1 })))
            .await;

        assert!(!session.is_connected());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(harness.transport.twin().updates().is_empty());
    }
}
