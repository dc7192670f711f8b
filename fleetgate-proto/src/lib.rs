//! Fleetgate Protocol - Protobuf types for the gateway's gRPC surfaces

/// Operator-facing token and cluster management.
pub mod management {
    pub mod v1 {
        tonic::include_proto!("fleetgate.management.v1");
    }
}

/// Agent-facing bootstrap endpoint.
pub mod bootstrap {
    pub mod v1 {
        tonic::include_proto!("fleetgate.bootstrap.v1");
    }
}

/// File descriptor set for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("fleetgate_descriptor");
