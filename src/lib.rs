//! OVA Pusher Library
//!
//! Resumable, chunked, retrying upload of OVA appliances to ESXi datastores.
//! The archive is indexed in place, disks are streamed by byte range, and
//! progress is persisted so an interrupted run can skip finished disks.

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod hypervisor;
pub mod logging;
pub mod output;
pub mod retry;
pub mod session;
pub mod transfer;
pub mod upload;

pub use error::{PusherError, Result};
pub use output::OutputManager;
