//! The collaborator surface a device session consumes.
//!
//! Every network-facing operation (provisioning, telemetry, twin, direct
//! methods, blob upload) sits behind one of these traits, so the session never
//! names a concrete transport.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use iotc_protocol::auth::SymmetricKeyCredential;
use iotc_protocol::ConnectionDescriptor;
use serde_json::{Map, Value};
use tokio::io::AsyncRead;

use crate::{ClientResult, D2CMsg, EventSink};

/// A readable blob content stream
pub type BlobSource = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// A single registration handshake with the provisioning service
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub endpoint: String,
    pub scope_id: String,
    pub credential: SymmetricKeyCredential,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationResult {
    pub assigned_hub: String,
    pub device_id: String,
}

#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn register(&self, request: RegistrationRequest) -> ClientResult<RegistrationResult>;
}

/// Builds a transport from a connection descriptor. The transport is not
/// opened yet.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> ClientResult<Arc<dyn DeviceTransport>>;
}

#[async_trait]
pub trait BlobUpload: Send + Sync {
    /// Uploads `source` as `blob_name`. `size` is `None` when it could not be determined.
    async fn upload_to_blob(&self, blob_name: &str, source: BlobSource, size: Option<u64>) -> ClientResult<()>;
}

#[async_trait]
pub trait DeviceTransport: BlobUpload {
    async fn open(&self) -> ClientResult<()>;

    async fn send_event(&self, msg: D2CMsg) -> ClientResult<()>;

    async fn get_twin(&self) -> ClientResult<Arc<dyn DeviceTwin>>;

    /// Routes invocations of `method_name` to `sink`
    fn on_method(&self, method_name: &str, sink: EventSink);

    /// Routes transport errors to `sink`
    fn on_error(&self, sink: EventSink);
}

#[async_trait]
pub trait DeviceTwin: Send + Sync {
    /// Routes desired property patches to `sink`
    fn on_desired_properties(&self, sink: EventSink);

    async fn update_reported_properties(&self, patch: Map<String, Value>) -> ClientResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub size: u64,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn stat(&self, path: &Path) -> io::Result<FileStats>;

    async fn open_read(&self, path: &Path) -> io::Result<BlobSource>;
}
