//! Shared Workbench data models consumed by the core library and review clients.

pub mod diff;
pub mod repository;
pub mod rpc;
pub mod workspace;

pub use diff::*;
pub use repository::*;
pub use rpc::*;
pub use workspace::*;
