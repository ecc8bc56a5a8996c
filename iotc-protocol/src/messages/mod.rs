/// Device-to-cloud telemetry messages
pub mod telemetry;

/// Direct method invocation messages
pub mod direct_methods;

/// Twin-related messages and data structures
pub mod twin;

/// Device Provisioning Service registration messages
pub mod provisioning;

use std::collections::HashMap;
use std::fmt::Display;

use direct_methods::*;
use provisioning::*;
use telemetry::*;
use twin::*;

/// Implements `From<$message>` for an enum wrapping it in `$variant`
macro_rules! wrap_message {
    ($target:ident { $($message:ty => $variant:ident),+ $(,)? }) => {
        $(
            impl From<$message> for $target {
                fn from(message: $message) -> Self {
                    $target::$variant(message)
                }
            }
        )+
    };
}

/// Application properties of a telemetry message
pub type PropertyBag = HashMap<String, String>;

/// A publication received from the hub or the provisioning service
#[derive(Clone, Debug)]
pub enum MsgFromHub {
    /// A publication on a topic the codec does not know
    UnknownMessage(),

    /// The response to a Twin request (read or reported properties update)
    TwinResponseMessage(ReadTwinRes),

    /// An event representing an update to the twin's desired properties
    DesiredPropertiesUpdated(DesiredPropsUpdated),

    /// A direct method invocation request
    DirectMethodInvocation(DirectMethodReq),

    /// A response from the provisioning service
    ProvisioningResponse(RegistrationRes),
}

impl Display for MsgFromHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            MsgFromHub::TwinResponseMessage(resp) => write!(
                f,
                "Twin Response: {:?} {:?} {:?}",
                resp.status_code, resp.version, resp.body
            ),
            MsgFromHub::DesiredPropertiesUpdated(msg) => write!(
                f,
                "Desired properties updated, version: {}",
                msg.desired_properties_version
            ),
            MsgFromHub::DirectMethodInvocation(dmi) => {
                write!(f, "Direct method invocation, method: {}", dmi.method_name)
            }
            MsgFromHub::ProvisioningResponse(resp) => {
                write!(f, "Provisioning response, status: {}", resp.status_code)
            }
            MsgFromHub::UnknownMessage() => write!(f, "Unknown msg"),
        }
    }
}

wrap_message!(MsgFromHub {
    ReadTwinRes => TwinResponseMessage,
    DesiredPropsUpdated => DesiredPropertiesUpdated,
    DirectMethodReq => DirectMethodInvocation,
    RegistrationRes => ProvisioningResponse,
});

/// A publication the device sends to the hub or the provisioning service
#[derive(Clone, Debug)]
pub enum MsgToHub {
    /// A device-to-cloud telemetry message
    Telemetry(TelemetryMsg),

    /// A request to read the twin
    ReadTwin(ReadTwinReq),

    /// A patch to the twin's reported properties
    UpdateReportedProperties(UpdateReportedPropsReq),

    /// The result of a direct method invocation
    DirectMethodResponse(DirectMethodRes),

    /// A registration request to the provisioning service
    Register(RegisterReq),

    /// A registration status query to the provisioning service
    PollRegistration(PollRegistrationReq),
}

wrap_message!(MsgToHub {
    TelemetryMsg => Telemetry,
    ReadTwinReq => ReadTwin,
    UpdateReportedPropsReq => UpdateReportedProperties,
    DirectMethodRes => DirectMethodResponse,
    RegisterReq => Register,
    PollRegistrationReq => PollRegistration,
});
