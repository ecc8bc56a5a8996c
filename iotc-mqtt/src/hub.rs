//! The IoT Hub device connection.
//!
//! One background task drives the rumqttc event loop and routes inbound
//! publications: twin responses resolve pending requests by `$rid`, desired
//! property patches and direct methods are forwarded to the registered event
//! sinks, and event loop errors go to the error sinks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use iotc_client_base::{
    generate_sas_token, BlobSource, BlobUpload, ClientError, ClientResult, ConnectionSettings,
    Connector, D2CMsg, DMIRequest, DMIResponder, DMIResult, DeviceTransport, DeviceTwin,
    EventSink, HubEvent,
};
use iotc_protocol::messages::direct_methods::{DirectMethodReq, DirectMethodRes};
use iotc_protocol::messages::telemetry::TelemetryMsg;
use iotc_protocol::messages::twin::{ReadTwinReq, ReadTwinRes, Twin, UpdateReportedPropsReq, VERSION_KEY};
use iotc_protocol::qos::DeliveryGuarantees;
use iotc_protocol::{
    ConnectionDescriptor, IotCodec, MsgFromHub, MsgToHub, DESIRED_PROPERTIES_FILTER,
    METHODS_FILTER, TWIN_RESPONSES_FILTER,
};
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;

use crate::blob::BlobClient;
use crate::{lock, mqtt_options, new_client, new_request_id, publish, transport_error};

const HUB_FILTERS: [&str; 3] = [TWIN_RESPONSES_FILTER, DESIRED_PROPERTIES_FILTER, METHODS_FILTER];

/// Pause after an event loop error before rumqttc reconnects
const ERROR_PAUSE: Duration = Duration::from_secs(1);

const STATUS_NOT_IMPLEMENTED: i32 = 501;
const STATUS_HANDLER_GONE: i32 = 500;

/// Builds [`HubConnection`]s from the descriptors the provisioning step hands out
#[derive(Debug, Clone)]
pub struct HubConnector {
    model_id: Option<String>,
    token_ttl: Duration,
    blob: BlobClient,
}

impl HubConnector {
    pub fn new(model_id: &str, token_ttl: Duration) -> HubConnector {
        HubConnector {
            model_id: Some(model_id.to_owned()).filter(|id| !id.is_empty()),
            token_ttl,
            blob: BlobClient::default(),
        }
    }
}

#[async_trait]
impl Connector for HubConnector {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> ClientResult<Arc<dyn DeviceTransport>> {
        let mut settings = ConnectionSettings::from_descriptor(descriptor).with_token_ttl(self.token_ttl);
        if let Some(model_id) = &self.model_id {
            settings = settings.with_model_id(model_id);
        }

        let connection: Arc<dyn DeviceTransport> = Arc::new(HubConnection::new(settings, self.blob.clone())?);
        Ok(connection)
    }
}

/// State shared between the connection, its twin and the event loop task
struct Shared {
    client: AsyncClient,
    pending: Mutex<HashMap<String, oneshot::Sender<ReadTwinRes>>>,
    methods: Mutex<HashMap<String, EventSink>>,
    desired_sinks: Mutex<Vec<EventSink>>,
    error_sinks: Mutex<Vec<EventSink>>,
}

impl Shared {
    fn new(client: AsyncClient) -> Shared {
        Shared {
            client,
            pending: Mutex::new(HashMap::new()),
            methods: Mutex::new(HashMap::new()),
            desired_sinks: Mutex::new(Vec::new()),
            error_sinks: Mutex::new(Vec::new()),
        }
    }

    /// Publishes a twin request and waits for the response carrying its `$rid`
    async fn request(&self, message: MsgToHub, request_id: String, timeout: Duration) -> ClientResult<ReadTwinRes> {
        let (response_tx, response_rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), response_tx);

        if let Err(e) = publish(&self.client, &message, DeliveryGuarantees::AtMostOnce).await {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }

        match time::timeout(timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::ChannelClosed),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                Err(ClientError::Timeout("twin response"))
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        let message = match IotCodec::decode_publish(topic, payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping publication on {}: {}", topic, e);
                return;
            }
        };

        match message {
            MsgFromHub::TwinResponseMessage(response) => {
                match lock(&self.pending).remove(&response.request_id) {
                    Some(waiting) => {
                        let _ = waiting.send(response);
                    }
                    None => debug!("No request waiting for twin response {}", response.request_id),
                }
            }
            MsgFromHub::DesiredPropertiesUpdated(update) => {
                let version = update.desired_properties_version;
                let mut patch = update.body;
                patch
                    .entry(VERSION_KEY)
                    .or_insert_with(|| Value::from(version));
                broadcast(&self.desired_sinks, || {
                    HubEvent::DesiredPropertiesChanged(patch.clone())
                });
            }
            MsgFromHub::DirectMethodInvocation(invocation) => self.invoke(invocation),
            other => debug!("Ignoring {}", other),
        }
    }

    fn invoke(&self, invocation: DirectMethodReq) {
        let DirectMethodReq {
            request_id,
            method_name,
            body,
        } = invocation;
        let client = self.client.clone();

        let sink = lock(&self.methods).get(&method_name).cloned();
        let sink = match sink {
            Some(sink) => sink,
            None => {
                debug!("No handler for direct method {}", method_name);
                let result = DMIResult {
                    status: STATUS_NOT_IMPLEMENTED,
                    payload: None,
                };
                tokio::spawn(async move { respond(&client, request_id, result).await });
                return;
            }
        };

        let (responder, response) = DMIResponder::channel();
        let request = DMIRequest {
            method_name: method_name.clone(),
            body,
        };
        if sink.send(HubEvent::MethodInvoked(request, responder)).is_err() {
            lock(&self.methods).remove(&method_name);
        }

        // Responses are published off the event loop task.
        tokio::spawn(async move {
            let result = response.await.unwrap_or(DMIResult {
                status: STATUS_HANDLER_GONE,
                payload: None,
            });
            respond(&client, request_id, result).await;
        });
    }

    fn report_error(&self, message: &str) {
        broadcast(&self.error_sinks, || HubEvent::TransportError(message.to_owned()));
    }
}

/// Sends an event to every sink, forgetting sinks whose session is gone
fn broadcast<F: Fn() -> HubEvent>(sinks: &Mutex<Vec<EventSink>>, event: F) {
    lock(sinks).retain(|sink| sink.send(event()).is_ok());
}

async fn respond(client: &AsyncClient, request_id: String, result: DMIResult) {
    let response = DirectMethodRes {
        request_id,
        status: result.status,
        payload: result.payload,
    };
    if let Err(e) = publish(client, &response.into(), DeliveryGuarantees::AtMostOnce).await {
        warn!("Failed to send direct method response: {}", e);
    }
}

async fn drive(mut eventloop: EventLoop, shared: Arc<Shared>, connack: oneshot::Sender<ClientResult<()>>) {
    let mut connack = Some(connack);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => match connack.take() {
                Some(first) => {
                    let _ = first.send(Ok(()));
                }
                None => resubscribe(&shared.client),
            },
            Ok(Event::Incoming(Packet::Publish(publication))) => {
                shared.dispatch(&publication.topic, &publication.payload)
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(first) = connack.take() {
                    let _ = first.send(Err(transport_error(&e)));
                    return;
                }
                error!("IoT Hub connection error: {}", e);
                shared.report_error(&e.to_string());
                time::sleep(ERROR_PAUSE).await;
            }
        }
    }
}

// Clean sessions lose their subscriptions on reconnect.
fn resubscribe(client: &AsyncClient) {
    for filter in HUB_FILTERS.iter() {
        if let Err(e) = client.try_subscribe(*filter, QoS::AtLeastOnce) {
            warn!("Failed to resubscribe to {}: {}", filter, e);
        }
    }
}

/// An MQTT connection to the device's IoT Hub
pub struct HubConnection {
    settings: ConnectionSettings,
    shared: Arc<Shared>,
    eventloop: Mutex<Option<EventLoop>>,
    task: Mutex<Option<JoinHandle<()>>>,
    twin: Arc<HubTwin>,
    blob: BlobClient,
}

impl HubConnection {
    /// Prepares the connection; nothing touches the network until [`DeviceTransport::open`]
    pub fn new(settings: ConnectionSettings, blob: BlobClient) -> ClientResult<HubConnection> {
        let token = generate_sas_token(&settings)?;
        let username = IotCodec::hub_username(
            &settings.hostname,
            &settings.device_id,
            settings.model_id.as_deref(),
        );
        let options = mqtt_options(
            &settings.device_id,
            &settings.hostname,
            settings.port,
            username,
            token.as_str(),
            settings.session_mode.is_clean(),
        );
        let (client, eventloop) = new_client(options);
        let shared = Arc::new(Shared::new(client));

        Ok(HubConnection {
            twin: Arc::new(HubTwin::new(shared.clone(), settings.timeout)),
            settings,
            shared,
            eventloop: Mutex::new(Some(eventloop)),
            task: Mutex::new(None),
            blob,
        })
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

#[async_trait]
impl BlobUpload for HubConnection {
    async fn upload_to_blob(&self, blob_name: &str, source: BlobSource, size: Option<u64>) -> ClientResult<()> {
        let token = generate_sas_token(&self.settings)?;
        self.blob
            .upload(
                &self.settings.hostname,
                &self.settings.device_id,
                &token,
                blob_name,
                source,
                size,
            )
            .await
    }
}

#[async_trait]
impl DeviceTransport for HubConnection {
    async fn open(&self) -> ClientResult<()> {
        let eventloop = lock(&self.eventloop)
            .take()
            .ok_or_else(|| ClientError::Transport("connection was already opened".to_owned()))?;

        let (connack_tx, connack_rx) = oneshot::channel();
        let task = tokio::spawn(drive(eventloop, self.shared.clone(), connack_tx));
        *lock(&self.task) = Some(task);

        time::timeout(self.settings.timeout, connack_rx)
            .await
            .map_err(|_| ClientError::Timeout("CONNACK"))?
            .map_err(|_| ClientError::ChannelClosed)??;

        for filter in HUB_FILTERS.iter() {
            self.shared
                .client
                .subscribe(*filter, QoS::AtLeastOnce)
                .await
                .map_err(transport_error)?;
        }

        info!(
            "Connected to {} as {}",
            self.settings.hostname, self.settings.device_id
        );
        Ok(())
    }

    async fn send_event(&self, msg: D2CMsg) -> ClientResult<()> {
        let telemetry = TelemetryMsg {
            device_id: self.settings.device_id.clone(),
            content: msg.content,
            headers: msg.headers,
        };
        publish(&self.shared.client, &telemetry.into(), DeliveryGuarantees::AtLeastOnce).await
    }

    async fn get_twin(&self) -> ClientResult<Arc<dyn DeviceTwin>> {
        self.twin.refresh().await?;
        let twin: Arc<dyn DeviceTwin> = self.twin.clone();
        Ok(twin)
    }

    fn on_method(&self, method_name: &str, sink: EventSink) {
        lock(&self.shared.methods).insert(method_name.to_owned(), sink);
    }

    fn on_error(&self, sink: EventSink) {
        lock(&self.shared.error_sinks).push(sink);
    }
}

/// The device twin of a [`HubConnection`]
pub struct HubTwin {
    shared: Arc<Shared>,
    timeout: Duration,
    /// Desired section of the last full read
    desired: Mutex<Option<Map<String, Value>>>,
}

impl HubTwin {
    fn new(shared: Arc<Shared>, timeout: Duration) -> HubTwin {
        HubTwin {
            shared,
            timeout,
            desired: Mutex::new(None),
        }
    }

    /// Reads the full twin document and remembers its desired section
    async fn refresh(&self) -> ClientResult<()> {
        let request_id = new_request_id();
        let request = ReadTwinReq {
            request_id: request_id.clone(),
        };
        let response = self
            .shared
            .request(request.into(), request_id, self.timeout)
            .await?;

        if !response.status_code.is_success() {
            return Err(ClientError::Rejected {
                status: response.status_code.code(),
                message: "twin read failed".to_owned(),
            });
        }

        let twin: Twin = match response.body {
            Some(body) => serde_json::from_value(body)
                .map_err(|e| ClientError::Transport(format!("malformed twin document: {}", e)))?,
            None => Twin::default(),
        };
        *lock(&self.desired) = Some(twin.desired);
        Ok(())
    }
}

#[async_trait]
impl DeviceTwin for HubTwin {
    /// Registers `sink` and immediately hands it the desired section read
    /// when the twin was fetched
    fn on_desired_properties(&self, sink: EventSink) {
        if let Some(desired) = lock(&self.desired).clone() {
            if sink.send(HubEvent::DesiredPropertiesChanged(desired)).is_err() {
                return;
            }
        }
        lock(&self.shared.desired_sinks).push(sink);
    }

    async fn update_reported_properties(&self, patch: Map<String, Value>) -> ClientResult<()> {
        let request_id = new_request_id();
        let request = UpdateReportedPropsReq {
            request_id: request_id.clone(),
            reported: patch,
        };
        let response = self
            .shared
            .request(request.into(), request_id, self.timeout)
            .await?;

        if response.status_code.is_success() {
            Ok(())
        } else {
            Err(ClientError::Rejected {
                status: response.status_code.code(),
                message: "reported properties update rejected".to_owned(),
            })
        }
    }
}
