use iotc_protocol::ConnectionDescriptor;

use crate::session::{DeviceSession, SessionExit};
use crate::state::{ReconnectPolicy, CONNECT_FAILURES_BEFORE_REPROVISION};

/// How a bootstrapped session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No connection descriptor could be obtained
    ProvisioningFailed,
    /// A descriptor was obtained but the connection could not be opened
    ConnectFailed,
    /// The session's event loop returned
    Stopped(SessionExit),
}

/// Provisions and connects `session`, then runs it.
///
/// Without a reconnect policy this makes exactly one provisioning and one
/// connection attempt. A failed connect then returns
/// [`BootstrapOutcome::ConnectFailed`] instead of leaving an idle session
/// with a heartbeat that has nothing to send, so the caller decides whether
/// the process lives on. With a policy, every failure is retried after a
/// backoff.
pub async fn start(mut session: DeviceSession, reconnect: Option<ReconnectPolicy>) -> BootstrapOutcome {
    match reconnect {
        None => run_once(&mut session).await,
        Some(policy) => {
            session.exit_on_transport_error(true);
            supervise(&mut session, policy).await
        }
    }
}

async fn run_once(session: &mut DeviceSession) -> BootstrapOutcome {
    let descriptor = match session.provision().await {
        Some(descriptor) => descriptor,
        None => {
            session
                .logger()
                .error(format_args!("Failed to obtain connection string for device."));
            return BootstrapOutcome::ProvisioningFailed;
        }
    };

    session.connect(&descriptor).await;
    if !session.is_connected() {
        return BootstrapOutcome::ConnectFailed;
    }

    BootstrapOutcome::Stopped(session.run().await)
}

async fn supervise(session: &mut DeviceSession, policy: ReconnectPolicy) -> BootstrapOutcome {
    let mut backoff = policy.backoff();
    let mut descriptor: Option<ConnectionDescriptor> = None;
    let mut failed_connects = 0;

    loop {
        let current = match descriptor.take() {
            Some(current) => current,
            None => match session.provision().await {
                Some(provisioned) => provisioned,
                None => {
                    let delay = backoff.next_delay();
                    session.logger().error(format_args!(
                        "Failed to obtain connection string for device, retrying in {}s",
                        delay.as_secs()
                    ));
                    tokio::time::sleep(delay).await;
                    continue;
                }
            },
        };

        session.connect(&current).await;
        if session.is_connected() {
            backoff.reset();
            failed_connects = 0;
            match session.run().await {
                SessionExit::Faulted(reason) => session
                    .logger()
                    .warn(format_args!("Session faulted ({}), reconnecting", reason)),
                exit @ SessionExit::Closed => return BootstrapOutcome::Stopped(exit),
            }
        } else {
            failed_connects += 1;
        }

        if failed_connects < CONNECT_FAILURES_BEFORE_REPROVISION {
            descriptor = Some(current);
        } else {
            session.logger().warn(format_args!(
                "{} consecutive connection failures, provisioning again",
                failed_connects
            ));
            failed_connects = 0;
        }

        let delay = backoff.next_delay();
        session
            .logger()
            .info(format_args!("Reconnecting in {}s (state: {})", delay.as_secs(), session.state()));
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::logging::SessionLogger;
    use crate::naming::FolderNaming;
    use crate::session::{Collaborators, SessionConfig};
    use crate::state::SessionState;
    use iotc_protocol::DeviceIdentity;
    use iotc_test_utils::{
        CapturingLogger, FakeConnector, FakeFileSystem, FakeProvisioning, FakeTransport,
    };
    use log::Level;

    fn session(
        provisioning: Arc<FakeProvisioning>,
        connector: Arc<FakeConnector>,
        log: Arc<CapturingLogger>,
    ) -> DeviceSession {
        DeviceSession::new(
            DeviceIdentity::new("scope", "d1", "a2V5", "urn:model:1"),
            SessionConfig::default(),
            Collaborators {
                provisioning,
                connector,
                file_system: Arc::new(FakeFileSystem::default()),
            },
            Box::new(FolderNaming::default()),
            SessionLogger::new(log),
        )
    }

    #[tokio::test]
    async fn test_provisioning_failure_stops_startup() {
        // Arrange
        let log = Arc::new(CapturingLogger::default());
        let connector = Arc::new(FakeConnector::new(Arc::new(FakeTransport::default())));
        let session = session(
            Arc::new(FakeProvisioning::failing("denied")),
            connector.clone(),
            log.clone(),
        );

        // Act
        let outcome = start(session, None).await;

        // Assert
        assert_eq!(outcome, BootstrapOutcome::ProvisioningFailed);
        assert!(log.contains(Level::Error, "Failed to obtain connection string for device."));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_retried_without_policy() {
        let log = Arc::new(CapturingLogger::default());
        let connector = Arc::new(FakeConnector::new(Arc::new(FakeTransport::default())));
        connector.fail_next(1);
        let provisioning = Arc::new(FakeProvisioning::succeeding("h1", "d1"));
        let session = session(provisioning.clone(), connector.clone(), log);

        let outcome = start(session, None).await;

        assert_eq!(outcome, BootstrapOutcome::ConnectFailed);
        assert_eq!(provisioning.calls(), 1);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_reconnects_after_transport_error() {
        // Arrange
        let log = Arc::new(CapturingLogger::default());
        let transport = Arc::new(FakeTransport::default());
        let connector = Arc::new(FakeConnector::new(transport.clone()));
        let provisioning = Arc::new(FakeProvisioning::succeeding("h1", "d1"));
        let session = session(provisioning.clone(), connector.clone(), log.clone());
        let handle = tokio::spawn(start(session, Some(ReconnectPolicy::default())));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.connects(), 1);

        // Act
        assert!(transport.raise_error("link dropped"));
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Assert
        assert_eq!(connector.connects(), 2);
        assert_eq!(transport.opens(), 2);
        assert_eq!(provisioning.calls(), 1);
        assert!(log.contains(Level::Warn, "Session faulted (link dropped), reconnecting"));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_provisions_again_after_two_failed_connects() {
        // Arrange
        let log = Arc::new(CapturingLogger::default());
        let transport = Arc::new(FakeTransport::default());
        let connector = Arc::new(FakeConnector::new(transport.clone()));
        connector.fail_next(2);
        let provisioning = Arc::new(FakeProvisioning::succeeding("h1", "d1"));
        let session = session(provisioning.clone(), connector.clone(), log.clone());

        // Act
        let handle = tokio::spawn(start(session, Some(ReconnectPolicy::default())));
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Assert
        assert_eq!(provisioning.calls(), 2);
        assert_eq!(connector.connects(), 3);
        assert_eq!(transport.opens(), 1);
        assert!(log.contains(Level::Info, &format!("state: {}", SessionState::Faulted)));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_retries_provisioning() {
        let log = Arc::new(CapturingLogger::default());
        let connector = Arc::new(FakeConnector::new(Arc::new(FakeTransport::default())));
        let provisioning = Arc::new(FakeProvisioning::failing("denied"));
        let session = session(provisioning.clone(), connector.clone(), log);

        let handle = tokio::spawn(start(session, Some(ReconnectPolicy::default())));
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // attempts at 0s, 1s and 3s
        assert_eq!(provisioning.calls(), 3);
        assert_eq!(connector.connects(), 0);
        handle.abort();
    }
}
