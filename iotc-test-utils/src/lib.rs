//! In-memory stand-ins for the hub collaborators, for driving a device
//! session in tests.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iotc_client_base::{
    BlobSource, BlobUpload, ClientError, ClientResult, Connector, D2CMsg, DMIRequest,
    DMIResponder, DMIResult, DeviceTransport, DeviceTwin, EventSink, FileStats, FileSystem,
    HubEvent, ProvisioningClient, RegistrationRequest, RegistrationResult,
};
use iotc_protocol::ConnectionDescriptor;
use log::{Level, Log, Metadata, Record};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

type Outcome = Result<RegistrationResult, String>;

/// Answers registrations from a script, repeating the last outcome
pub struct FakeProvisioning {
    outcomes: Mutex<VecDeque<Outcome>>,
    requests: Mutex<Vec<RegistrationRequest>>,
}

impl FakeProvisioning {
    pub fn scripted(outcomes: Vec<Outcome>) -> FakeProvisioning {
        assert!(!outcomes.is_empty(), "a script needs at least one outcome");
        FakeProvisioning {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(assigned_hub: &str, device_id: &str) -> FakeProvisioning {
        FakeProvisioning::scripted(vec![Ok(RegistrationResult {
            assigned_hub: assigned_hub.to_owned(),
            device_id: device_id.to_owned(),
        })])
    }

    pub fn failing(message: &str) -> FakeProvisioning {
        FakeProvisioning::scripted(vec![Err(message.to_owned())])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RegistrationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProvisioningClient for FakeProvisioning {
    async fn register(&self, request: RegistrationRequest) -> ClientResult<RegistrationResult> {
        self.requests.lock().unwrap().push(request);

        let mut outcomes = self.outcomes.lock().unwrap();
        let outcome = if outcomes.len() > 1 {
            outcomes.pop_front().unwrap()
        } else {
            outcomes[0].clone()
        };
        outcome.map_err(ClientError::Provisioning)
    }
}

/// Hands out the same [`FakeTransport`] on every connect
pub struct FakeConnector {
    transport: Arc<FakeTransport>,
    failures_left: AtomicUsize,
    descriptors: Mutex<Vec<ConnectionDescriptor>>,
}

impl FakeConnector {
    pub fn new(transport: Arc<FakeTransport>) -> FakeConnector {
        FakeConnector {
            transport,
            failures_left: AtomicUsize::new(0),
            descriptors: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next `count` connects fail
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of connect attempts, failed ones included
    pub fn connects(&self) -> usize {
        self.descriptors.lock().unwrap().len()
    }

    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.descriptors.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> ClientResult<Arc<dyn DeviceTransport>> {
        self.descriptors.lock().unwrap().push(descriptor.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::Transport("connection refused".to_owned()));
        }

        let transport: Arc<dyn DeviceTransport> = self.transport.clone();
        Ok(transport)
    }
}

/// A blob the fake transport received
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub blob_name: String,
    pub size: Option<u64>,
    pub content: Vec<u8>,
}

/// Records everything sent through it and lets a test push inbound events
#[derive(Default)]
pub struct FakeTransport {
    twin: Arc<FakeTwin>,
    opens: AtomicUsize,
    sent: Mutex<Vec<Value>>,
    uploads: Mutex<Vec<Upload>>,
    method_sinks: Mutex<HashMap<String, EventSink>>,
    error_sink: Mutex<Option<EventSink>>,
    fail_open: AtomicBool,
    fail_send: AtomicBool,
    fail_upload: AtomicBool,
}

impl FakeTransport {
    pub fn twin(&self) -> &FakeTwin {
        &self.twin
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Bodies of every telemetry message sent
    pub fn sent_events(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    pub fn has_method_handler(&self, method_name: &str) -> bool {
        self.method_sinks.lock().unwrap().contains_key(method_name)
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_sink.lock().unwrap().is_some()
    }

    /// Invokes a direct method and returns where its response will arrive,
    /// or `None` if no handler is registered for it
    pub fn invoke_method(&self, method_name: &str, body: Option<Value>) -> Option<oneshot::Receiver<DMIResult>> {
        let sinks = self.method_sinks.lock().unwrap();
        let sink = sinks.get(method_name)?;

        let (responder, response) = DMIResponder::channel();
        let request = DMIRequest {
            method_name: method_name.to_owned(),
            body,
        };
        sink.send(HubEvent::MethodInvoked(request, responder)).ok()?;
        Some(response)
    }

    /// Reports a transport error; `false` if nobody listens
    pub fn raise_error(&self, message: &str) -> bool {
        match self.error_sink.lock().unwrap().as_ref() {
            Some(sink) => sink
                .send(HubEvent::TransportError(message.to_owned()))
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl BlobUpload for FakeTransport {
    async fn upload_to_blob(&self, blob_name: &str, mut source: BlobSource, size: Option<u64>) -> ClientResult<()> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected {
                status: 403,
                message: "upload denied".to_owned(),
            });
        }

        let mut content = Vec::new();
        source.read_to_end(&mut content).await?;
        self.uploads.lock().unwrap().push(Upload {
            blob_name: blob_name.to_owned(),
            size,
            content,
        });
        Ok(())
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn open(&self) -> ClientResult<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("tls handshake failed".to_owned()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_event(&self, msg: D2CMsg) -> ClientResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ClientError::Timeout("PUBACK"));
        }
        self.sent
            .lock()
            .unwrap()
            .push(msg.content.unwrap_or(Value::Null));
        Ok(())
    }

    async fn get_twin(&self) -> ClientResult<Arc<dyn DeviceTwin>> {
        let twin: Arc<dyn DeviceTwin> = self.twin.clone();
        Ok(twin)
    }

    fn on_method(&self, method_name: &str, sink: EventSink) {
        self.method_sinks
            .lock()
            .unwrap()
            .insert(method_name.to_owned(), sink);
    }

    fn on_error(&self, sink: EventSink) {
        self.error_sink.lock().unwrap().replace(sink);
    }
}

/// Records reported-property patches and pushes desired ones
#[derive(Default)]
pub struct FakeTwin {
    updates: Mutex<Vec<Map<String, Value>>>,
    desired_sink: Mutex<Option<EventSink>>,
    fail_update: AtomicBool,
}

impl FakeTwin {
    pub fn updates(&self) -> Vec<Map<String, Value>> {
        self.updates.lock().unwrap().clone()
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn has_desired_handler(&self) -> bool {
        self.desired_sink.lock().unwrap().is_some()
    }

    /// Pushes a desired properties document; `false` if it is not an object
    /// or nobody listens
    pub fn push_desired(&self, patch: Value) -> bool {
        let patch = match patch {
            Value::Object(patch) => patch,
            _ => return false,
        };
        match self.desired_sink.lock().unwrap().as_ref() {
            Some(sink) => sink
                .send(HubEvent::DesiredPropertiesChanged(patch))
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl DeviceTwin for FakeTwin {
    fn on_desired_properties(&self, sink: EventSink) {
        self.desired_sink.lock().unwrap().replace(sink);
    }

    async fn update_reported_properties(&self, patch: Map<String, Value>) -> ClientResult<()> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected {
                status: 400,
                message: "bad patch".to_owned(),
            });
        }
        self.updates.lock().unwrap().push(patch);
        Ok(())
    }
}

/// Files kept in memory, keyed by the exact path they were added under
#[derive(Default)]
pub struct FakeFileSystem {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    fail_stat: AtomicBool,
}

impl FakeFileSystem {
    pub fn with_file<P: Into<PathBuf>>(path: P, content: &[u8]) -> FakeFileSystem {
        let fs = FakeFileSystem::default();
        fs.add_file(path, content);
        fs
    }

    pub fn add_file<P: Into<PathBuf>>(&self, path: P, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), content.to_vec());
    }

    /// Makes `stat` fail even for files that exist
    pub fn set_fail_stat(&self, fail: bool) {
        self.fail_stat.store(fail, Ordering::SeqCst);
    }

    fn content(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, format!("{}: no such file", path.display())))
    }
}

#[async_trait]
impl FileSystem for FakeFileSystem {
    async fn stat(&self, path: &Path) -> io::Result<FileStats> {
        if self.fail_stat.load(Ordering::SeqCst) {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "stat denied"));
        }
        let content = self.content(path)?;
        Ok(FileStats {
            size: content.len() as u64,
        })
    }

    async fn open_read(&self, path: &Path) -> io::Result<BlobSource> {
        let content = self.content(path)?;
        Ok(Box::new(Cursor::new(content)))
    }
}

/// A `log::Log` that keeps every record it receives
#[derive(Default)]
pub struct CapturingLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl CapturingLogger {
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.messages(level).len()
    }

    /// Whether any record at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages(level)
            .iter()
            .any(|message| message.contains(needle))
    }
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_provisioning_script_repeats_last_outcome() {
        let fake = FakeProvisioning::scripted(vec![
            Err("busy".to_owned()),
            Ok(RegistrationResult {
                assigned_hub: "h1".to_owned(),
                device_id: "d1".to_owned(),
            }),
        ]);
        let request = || RegistrationRequest {
            endpoint: "dps".to_owned(),
            scope_id: "scope".to_owned(),
            credential: iotc_protocol::auth::SymmetricKeyCredential::new("d1", "a2V5"),
            payload: Value::Null,
        };

        assert!(fake.register(request()).await.is_err());
        assert!(fake.register(request()).await.is_ok());
        assert!(fake.register(request()).await.is_ok());
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_routes_methods_to_sink() {
        // Arrange
        let transport = FakeTransport::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.on_method("ping", tx);

        // Act
        let response = transport.invoke_method("ping", Some(json!({}))).unwrap();
        let missing = transport.invoke_method("other", None);

        // Assert
        assert!(missing.is_none());
        match rx.recv().await.unwrap() {
            HubEvent::MethodInvoked(request, responder) => {
                assert_eq!(request.method_name, "ping");
                responder
                    .complete(DMIResult {
                        status: 200,
                        payload: None,
                    })
                    .unwrap();
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(response.await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_file_system_stat_and_read() {
        let fs = FakeFileSystem::with_file("a.json", b"abc");

        let stats = fs.stat(Path::new("a.json")).await.unwrap();
        let missing = fs.stat(Path::new("b.json")).await;

        assert_eq!(stats.size, 3);
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    }
}
