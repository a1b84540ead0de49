//! ESXi host access through the `/folder` datastore file endpoint

use crate::config::{AuthConfig, EndpointConfig};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{PusherError, Result};
use crate::hypervisor::{DestinationHandle, HypervisorClient};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use url::Url;

/// Standalone hosts expose a single datacenter under this name.
pub const DEFAULT_DATACENTER: &str = "ha-datacenter";

pub struct DatastoreClient {
    client: Client,
    base_url: Url,
    auth: AuthConfig,
    datacenter: String,
}

impl DatastoreClient {
    pub fn new(client: Client, endpoint: &EndpointConfig, auth: AuthConfig) -> Result<Self> {
        Ok(Self {
            client,
            base_url: endpoint.base_url()?,
            auth,
            datacenter: DEFAULT_DATACENTER.to_string(),
        })
    }

    fn folder_url(&self, datastore: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PusherError::Config(format!("host URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .push("folder");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("dcPath", &self.datacenter);
            if let Some(datastore) = datastore {
                query.append_pair("dsName", datastore);
            }
        }
        Ok(url)
    }

    async fn probe(&self, url: Url, operation: &str) -> Result<StatusCode> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.auth.username, self.auth.password.as_deref())
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(HttpErrorHandler::handle_endpoint_error(status, error_text.trim(), operation))
    }
}

#[async_trait]
impl HypervisorClient for DatastoreClient {
    async fn connect(&self) -> Result<()> {
        let url = self.folder_url(None)?;
        self.probe(url, "host connection").await?;
        tracing::info!(host = %self.base_url, "connected to host");
        Ok(())
    }

    async fn lookup_destination(&self, name: &str) -> Result<DestinationHandle> {
        let url = self.folder_url(Some(name))?;
        self.probe(url, &format!("datastore lookup '{}'", name)).await?;
        tracing::debug!(datastore = name, "datastore found");
        Ok(DestinationHandle {
            datastore: name.to_string(),
            datacenter: self.datacenter.clone(),
        })
    }

    fn build_upload_url(&self, destination: &DestinationHandle, remote_path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PusherError::Config(format!("host URL cannot be a base: {}", self.base_url)))?;
            segments.pop_if_empty().push("folder");
            for part in remote_path.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }
        url.query_pairs_mut()
            .append_pair("dcPath", &destination.datacenter)
            .append_pair("dsName", &destination.datastore);
        Ok(url)
    }

    /// Places the descriptor, with its networks mapped to `network`, next to
    /// the uploaded disks as `<item>/<item>.ovf`.
    async fn create_item_from_descriptor(
        &self,
        descriptor: &str,
        item_name: &str,
        destination: &DestinationHandle,
        network: &str,
    ) -> Result<()> {
        let body = map_networks(descriptor, network);
        let url = self.build_upload_url(destination, &format!("{0}/{0}.ovf", item_name))?;

        let response = self
            .client
            .put(url)
            .basic_auth(&self.auth.username, self.auth.password.as_deref())
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "descriptor upload"))?;

        let status = response.status();
        if !HttpErrorHandler::is_accepted(status) {
            let error_text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_upload_error(status, &error_text, "descriptor upload"));
        }

        tracing::info!(vm = item_name, datastore = %destination.datastore, network, "descriptor placed");
        Ok(())
    }
}

/// Points every `<rasd:Connection>` of the descriptor at `network`.
pub fn map_networks(descriptor: &str, network: &str) -> String {
    const OPEN: &str = "<rasd:Connection>";
    const CLOSE: &str = "</rasd:Connection>";

    let mut output = String::with_capacity(descriptor.len());
    let mut rest = descriptor;
    while let Some(start) = rest.find(OPEN) {
        let value_start = start + OPEN.len();
        let Some(len) = rest[value_start..].find(CLOSE) else {
            break;
        };
        output.push_str(&rest[..value_start]);
        output.push_str(network);
        rest = &rest[value_start + len..];
    }
    output.push_str(rest);
    output
}
