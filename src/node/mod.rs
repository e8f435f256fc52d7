//! Node-side mount operations

pub mod mounter;

pub use mounter::{CommandMounter, SymlinkMounter};
