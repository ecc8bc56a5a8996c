#[macro_use]
extern crate log;

use std::sync::Arc;

use env_logger::Env;
use iotc_cli::Options;
use iotc_client_base::fs::LocalFileSystem;
use iotc_device::{start, BootstrapOutcome, Collaborators, DeviceSession, SessionLogger};
use iotc_mqtt::{DpsClient, HubConnector};
use sysinfo::System;

const MIB: u64 = 1024 * 1024;

/// One line describing the host, logged before anything else
fn machine_banner(os: &str, cores: usize, free_memory: u64, total_memory: u64) -> String {
    format!(
        " > Machine: {}, {} core, freemem={}mb, totalmem={}mb",
        os,
        cores,
        free_memory / MIB,
        total_memory / MIB
    )
}

fn log_machine() {
    let mut system = System::new();
    system.refresh_memory();
    let cores = std::thread::available_parallelism().map_or(1, |cores| cores.get());
    info!(
        "{}",
        machine_banner(std::env::consts::OS, cores, system.free_memory(), system.total_memory())
    );
}

#[tokio::main]
pub async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting IoT Central device");
    log_machine();

    let options = Options::from_cmd_line();
    let (identity, config) = match options.identity().and_then(|id| Ok((id, options.session_config()?))) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Error - {}", e);
            return;
        }
    };

    let token_ttl = options.token_ttl();
    let collaborators = Collaborators {
        provisioning: Arc::new(DpsClient {
            token_ttl,
            ..Default::default()
        }),
        connector: Arc::new(HubConnector::new(&identity.model_id, token_ttl)),
        file_system: Arc::new(LocalFileSystem),
    };

    debug!("Provisioning {} through {}", identity.device_id, config.provisioning_host);
    let session = DeviceSession::new(
        identity,
        config,
        collaborators,
        options.naming_policy(),
        SessionLogger::process(),
    );

    match tokio::spawn(start(session, options.reconnect_policy())).await {
        Err(e) => error!("Error starting process: {}", e),
        Ok(BootstrapOutcome::Stopped(exit)) => info!("Device session stopped: {:?}", exit),
        Ok(outcome) => warn!("Device did not start: {:?}", outcome),
    }
}
