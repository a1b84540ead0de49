//! Boundary to the hypervisor that receives the uploaded disks
//!
//! The transfer engine only needs four things from the remote side: a
//! reachability/credential check, a handle for the destination datastore, the
//! URL a file should be PUT to, and a final step that turns the uploaded disks
//! plus the OVF descriptor into a VM.

pub mod esxi;

pub use esxi::DatastoreClient;

use crate::error::Result;
use async_trait::async_trait;
use url::Url;

/// Resolved destination datastore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationHandle {
    pub datastore: String,
    pub datacenter: String,
}

#[async_trait]
pub trait HypervisorClient: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn lookup_destination(&self, name: &str) -> Result<DestinationHandle>;

    /// URL for a file at `remote_path` (e.g. `web01/web01-disk1.vmdk`) on the destination.
    fn build_upload_url(&self, destination: &DestinationHandle, remote_path: &str) -> Result<Url>;

    async fn create_item_from_descriptor(
        &self,
        descriptor: &str,
        item_name: &str,
        destination: &DestinationHandle,
        network: &str,
    ) -> Result<()>;
}
