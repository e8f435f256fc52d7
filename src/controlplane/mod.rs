//! Control Plane Module
//!
//! Coordinates the volume lifecycle: provisioning strategies, the lifecycle
//! manager that serializes and times operations, and the API that exposes it.

pub mod api;
pub mod manager;
pub mod metrics;
pub mod provisioners;

pub use api::*;
pub use manager::*;
pub use metrics::*;
pub use provisioners::*;
