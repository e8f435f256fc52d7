//! FSx Volume Driver
//!
//! Volume lifecycle driver for managed Lustre filesystems. A volume is
//! either a dedicated filesystem or a subdirectory/fileset carved out of a
//! shared one.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      REST API (axum)                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                    Volume Manager                                │
//! │   in-flight keys │ operation deadline │ metrics                  │
//! ├───────────────┬──────────────────────────┬───────────────────────┤
//! │  Filesystem   │      SubDirectory        │       Fileset         │
//! │  provisioner  │      provisioner         │       provisioner     │
//! ├───────────────┴──────────┬───────────────┴───────────────────────┤
//! │  Filesystem cloud client │        Scratch mounts / Mounter       │
//! │  (create, resize, poll)  │        (mount, umount, symlink)       │
//! └──────────────────────────┴───────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`volume`]: Capacity rules, volume ids, parameters, in-flight tracking
//! - [`cloud`]: Managed filesystem service client and polling
//! - [`node`]: Mount operations on the host
//! - [`controlplane`]: Provisioners, lifecycle manager, and REST API
//! - [`config`]: Driver configuration file
//! - [`domain`]: Request/response types and traits
//! - [`error`]: Error types and status kinds

pub mod cloud;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod node;
pub mod volume;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, OperationMetrics, ProvisionerSet, RestRouter, VolumeManager,
    VolumeManagerConfig,
};

pub use cloud::{
    CloudPollConfig, FilesystemApi, FilesystemCloud, HttpFilesystemApi, HttpFilesystemApiConfig,
    InMemoryConfig, InMemoryFilesystemApi,
};

pub use config::DriverConfig;

pub use domain::ports::{
    AccessMode, AccessType, CapacityRange, CreateVolumeRequest, ExpandVolumeResponse, Mounter,
    Provisioner, PublishVolumeRequest, ValidationResult, Volume, VolumeCapability,
};

pub use error::{Error, ErrorKind, Result, Status};

pub use node::{CommandMounter, SymlinkMounter};

pub use volume::{quantize_capacity_gib, DeploymentType, InFlight, ProvisionerKind, VolumeId, GIB};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
