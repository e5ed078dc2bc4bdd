use super::{EntityPayload, NamedResource, ReferencePayload, ResourceList, UpstreamSource};
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::model::{EntityId, ReferenceKind};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Listing page size large enough to return a whole reference catalog in one call.
const LIST_PAGE_SIZE: u32 = 1000;

/// [`UpstreamSource`] over the upstream HTTP/JSON API.
///
/// No retries: a failed call is reported to the caller as is. When no timeout is configured the
/// transport default applies.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing client (connection pool, proxy settings).
    pub fn with_client(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, UpstreamError> {
        debug!(target: "catalog_mirror::upstream", url = %url, "GET");
        let response = self.client.get(url).send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status { status: status.as_u16(), url: url.to_string() });
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                UpstreamError::Decode(e.to_string())
            }
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> UpstreamError {
        match (err.is_timeout(), self.timeout) {
            (true, Some(timeout)) => UpstreamError::Timeout { timeout },
            _ => UpstreamError::Transport(err.to_string()),
        }
    }
}

#[async_trait]
impl UpstreamSource for HttpUpstream {
    async fn fetch_entity(&self, id: EntityId) -> Result<EntityPayload, UpstreamError> {
        self.get_json(&format!("{}/pokemon/{}", self.base_url, id)).await
    }

    async fn list_references(
        &self,
        kind: ReferenceKind,
    ) -> Result<Vec<NamedResource>, UpstreamError> {
        let url = format!("{}/{}?limit={}", self.base_url, kind.upstream_resource(), LIST_PAGE_SIZE);
        let list: ResourceList = self.get_json(&url).await?;
        Ok(list.results)
    }

    async fn fetch_reference(
        &self,
        kind: ReferenceKind,
        id: u32,
    ) -> Result<ReferencePayload, UpstreamError> {
        self.get_json(&format!("{}/{}/{}", self.base_url, kind.upstream_resource(), id)).await
    }
}
