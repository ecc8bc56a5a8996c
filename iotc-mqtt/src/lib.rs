//! IoT Hub and Device Provisioning Service collaborators over MQTT (`rumqttc`)
//! and HTTPS (`reqwest`).

#[macro_use]
extern crate log;

use std::fmt::Display;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use iotc_client_base::{ClientError, ClientResult};
use iotc_protocol::qos::DeliveryGuarantees;
use iotc_protocol::{IotCodec, MsgToHub};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use uuid::Uuid;

pub mod blob;
pub mod hub;
pub mod provisioning;

pub use blob::BlobClient;
pub use hub::{HubConnection, HubConnector, HubTwin};
pub use provisioning::DpsClient;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Twin documents can be far larger than the rumqttc default
const MAX_PACKET_SIZE: usize = 256 * 1024;

const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// TLS connection options for a hub or provisioning endpoint
pub(crate) fn mqtt_options(
    client_id: &str,
    host: &str,
    port: u16,
    username: String,
    password: &str,
    clean_session: bool,
) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_credentials(username, password);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(clean_session);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    options.set_transport(Transport::tls_with_default_config());
    options
}

pub(crate) fn new_client(options: MqttOptions) -> (AsyncClient, EventLoop) {
    AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY)
}

pub(crate) fn qos(guarantees: DeliveryGuarantees) -> QoS {
    match guarantees {
        DeliveryGuarantees::AtMostOnce => QoS::AtMostOnce,
        DeliveryGuarantees::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// Encodes `message` and queues it for publication
pub(crate) async fn publish(client: &AsyncClient, message: &MsgToHub, guarantees: DeliveryGuarantees) -> ClientResult<()> {
    let encoded = IotCodec::encode_message(message)?;
    client
        .publish(encoded.topic, qos(guarantees), false, encoded.payload)
        .await
        .map_err(transport_error)
}

/// Polls until the broker accepts the connection
pub(crate) async fn await_connack(eventloop: &mut EventLoop) -> ClientResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(transport_error(e)),
        }
    }
}

pub(crate) fn transport_error<E: Display>(error: E) -> ClientError {
    ClientError::Transport(error.to_string())
}

pub(crate) fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Locks `mutex`, recovering the guard if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos(DeliveryGuarantees::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(qos(DeliveryGuarantees::AtLeastOnce), QoS::AtLeastOnce);
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}
