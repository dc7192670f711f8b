//! # Fleetgate Core
//!
//! Domain types for admitting agents into a fleet.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//!
//! All types are plain Rust structs/enums with serde serialization. Storage
//! and the RPC surface live in `fleetgate-gateway`.
//!
//! ## Modules
//!
//! - [`token`] - Bootstrap tokens and their lifecycle states
//! - [`lease`] - Expiry deadlines
//! - [`labels`] - Label maps propagated from tokens to clusters
//! - [`cluster`] - Cluster identity and registration records
//! - [`admission`] - Admission stages and rejection reasons
//! - [`audit`] - Audit events for admission decisions
//! - [`error`] - Validation errors

pub mod admission;
pub mod audit;
pub mod cluster;
pub mod error;
pub mod labels;
pub mod lease;
pub mod token;

pub use admission::{Progress, Rejection, Stage};
pub use audit::{AuditAction, AuditEvent, AuditTarget};
pub use cluster::{ClusterId, ClusterRecord, ClusterSummary};
pub use error::ValidationError;
pub use labels::Labels;
pub use lease::Lease;
pub use token::{BootstrapToken, TokenId, TokenState};
