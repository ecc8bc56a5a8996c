//! The IoTC-Protocol Crate

#![warn(
    absolute_paths_not_starting_with_crate,
    anonymous_parameters,
    bare_trait_objects,
    dead_code,
    elided_lifetimes_in_paths,
    ellipsis_inclusive_range_patterns,
    explicit_outlives_requirements,
    keyword_idents,
    missing_debug_implementations,
    missing_docs,
    non_ascii_idents,
    rustdoc::broken_intra_doc_links,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_imports,
    unused_lifetimes,
    unused_qualifications,
    unused_variables
)]

/// Device identities and connection descriptors
pub mod identity;

/// IoT protocol encoder/decoder
pub mod iot_codec;

/// The IoT Hub and provisioning protocol messages
pub mod messages;

/// QoS and delivery guarantees
pub mod qos;

/// Authentication methods
pub mod auth;

pub use crate::identity::*;
pub use crate::iot_codec::*;
pub use crate::messages::*;
