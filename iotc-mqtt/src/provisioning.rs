use std::time::Duration;

use async_trait::async_trait;
use iotc_client_base::{
    ClientError, ClientResult, ProvisioningClient, RegistrationRequest, RegistrationResult,
    DEFAULT_MQTT_PORT,
};
use iotc_protocol::messages::provisioning::{PollRegistrationReq, RegisterReq, RegistrationRes};
use iotc_protocol::qos::DeliveryGuarantees;
use iotc_protocol::{IotCodec, MsgFromHub, PROVISIONING_RESPONSES_FILTER};
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio::time;

use crate::{await_connack, mqtt_options, new_client, new_request_id, publish, transport_error};

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(3);

/// Registers devices with the Device Provisioning Service over MQTT
#[derive(Debug, Clone)]
pub struct DpsClient {
    /// Upper bound for the whole register-and-poll exchange
    pub timeout: Duration,
    pub token_ttl: Duration,
}

impl Default for DpsClient {
    fn default() -> Self {
        DpsClient {
            timeout: Duration::from_secs(60),
            token_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// What a provisioning response asks the device to do next
#[derive(Debug, PartialEq)]
enum Step {
    Poll { operation_id: String, delay: Duration },
    Assigned(RegistrationResult),
}

#[async_trait]
impl ProvisioningClient for DpsClient {
    async fn register(&self, request: RegistrationRequest) -> ClientResult<RegistrationResult> {
        time::timeout(self.timeout, self.run_registration(&request))
            .await
            .map_err(|_| ClientError::Timeout("device registration"))?
    }
}

impl DpsClient {
    async fn run_registration(&self, request: &RegistrationRequest) -> ClientResult<RegistrationResult> {
        let registration_id = &request.credential.registration_id;
        let token = request
            .credential
            .registration_token(&request.scope_id, self.token_ttl)?;

        let options = mqtt_options(
            registration_id,
            &request.endpoint,
            DEFAULT_MQTT_PORT,
            IotCodec::provisioning_username(&request.scope_id, registration_id),
            token.as_str(),
            true,
        );
        let (client, mut eventloop) = new_client(options);

        await_connack(&mut eventloop).await?;
        client
            .subscribe(PROVISIONING_RESPONSES_FILTER, QoS::AtLeastOnce)
            .await
            .map_err(transport_error)?;

        let register = RegisterReq {
            request_id: new_request_id(),
            registration_id: registration_id.clone(),
            payload: Some(request.payload.clone()),
        };
        publish(&client, &register.into(), DeliveryGuarantees::AtMostOnce).await?;

        loop {
            let response = next_response(&mut eventloop).await?;
            match interpret(response)? {
                Step::Assigned(result) => {
                    debug!(
                        "Device {} assigned to {}",
                        result.device_id, result.assigned_hub
                    );
                    disconnect(&client).await;
                    return Ok(result);
                }
                Step::Poll {
                    operation_id,
                    delay,
                } => {
                    debug!("Registration in progress, polling again in {:?}", delay);
                    time::sleep(delay).await;
                    let poll = PollRegistrationReq {
                        request_id: new_request_id(),
                        operation_id,
                    };
                    publish(&client, &poll.into(), DeliveryGuarantees::AtMostOnce).await?;
                }
            }
        }
    }
}

async fn disconnect(client: &AsyncClient) {
    if let Err(e) = client.disconnect().await {
        debug!("Provisioning client did not disconnect cleanly: {}", e);
    }
}

async fn next_response(eventloop: &mut EventLoop) -> ClientResult<RegistrationRes> {
    loop {
        let event = eventloop.poll().await.map_err(transport_error)?;
        if let Event::Incoming(Packet::Publish(publish)) = event {
            match IotCodec::decode_publish(&publish.topic, &publish.payload)? {
                MsgFromHub::ProvisioningResponse(response) => return Ok(response),
                other => debug!("Ignoring {} during registration", other),
            }
        }
    }
}

fn interpret(response: RegistrationRes) -> ClientResult<Step> {
    let operation = response.body.unwrap_or_default();

    match response.status_code {
        202 => {
            let operation_id = operation.operation_id.ok_or_else(|| {
                ClientError::Provisioning("registration accepted without an operation id".to_owned())
            })?;
            let delay = response
                .retry_after
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            Ok(Step::Poll {
                operation_id,
                delay,
            })
        }
        200 if operation.is_assigning() => {
            let operation_id = operation.operation_id.ok_or_else(|| {
                ClientError::Provisioning("registration still assigning without an operation id".to_owned())
            })?;
            Ok(Step::Poll {
                operation_id,
                delay: DEFAULT_RETRY_AFTER,
            })
        }
        200 => {
            let state = operation.registration_state.unwrap_or_default();
            match (operation.status.as_deref(), state.assigned_hub, state.device_id) {
                (Some("assigned"), Some(assigned_hub), Some(device_id)) => {
                    Ok(Step::Assigned(RegistrationResult {
                        assigned_hub,
                        device_id,
                    }))
                }
                (status, _, _) => Err(ClientError::Provisioning(format!(
                    "registration ended with status {}: {}",
                    status.unwrap_or("unknown"),
                    state.error_message.unwrap_or_default()
                ))),
            }
        }
        status => Err(ClientError::Rejected {
            status,
            message: operation.message.unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotc_protocol::messages::provisioning::{RegistrationOperation, RegistrationState};

    fn response(status_code: u16, retry_after: Option<u64>, body: RegistrationOperation) -> RegistrationRes {
        RegistrationRes {
            request_id: Some("1".to_owned()),
            status_code,
            retry_after,
            body: Some(body),
        }
    }

    #[test]
    fn test_accepted_registration_is_polled() {
        // Arrange
        let body = RegistrationOperation {
            operation_id: Some("op-1".to_owned()),
            status: Some("assigning".to_owned()),
            ..Default::default()
        };

        // Act
        let step = interpret(response(202, Some(5), body)).unwrap();

        // Assert
        assert_eq!(
            step,
            Step::Poll {
                operation_id: "op-1".to_owned(),
                delay: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_assigned_registration() {
        let body = RegistrationOperation {
            operation_id: Some("op-1".to_owned()),
            status: Some("assigned".to_owned()),
            registration_state: Some(RegistrationState {
                assigned_hub: Some("h1".to_owned()),
                device_id: Some("d1".to_owned()),
                status: Some("assigned".to_owned()),
                error_message: None,
            }),
            message: None,
        };

        let step = interpret(response(200, None, body)).unwrap();

        assert_eq!(
            step,
            Step::Assigned(RegistrationResult {
                assigned_hub: "h1".to_owned(),
                device_id: "d1".to_owned()
            })
        );
    }

    #[test]
    fn test_failed_and_rejected_registrations() {
        let failed = RegistrationOperation {
            status: Some("failed".to_owned()),
            registration_state: Some(RegistrationState {
                error_message: Some("custom allocation failed".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let unauthorized = RegistrationOperation {
            message: Some("Unauthorized".to_owned()),
            ..Default::default()
        };

        let failed = interpret(response(200, None, failed)).unwrap_err();
        let rejected = interpret(response(401, None, unauthorized)).unwrap_err();

        assert!(failed.to_string().contains("custom allocation failed"));
        assert!(matches!(rejected, ClientError::Rejected { status: 401, .. }));
    }

    #[test]
    fn test_accepted_without_operation_id_is_an_error() {
        let res = interpret(response(202, None, RegistrationOperation::default()));

        assert!(matches!(res, Err(ClientError::Provisioning(_))));
    }
}
