//! HTTP/JSON catalog client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{
    BuildTarget, CatalogBuildId, CatalogClient, CatalogCurrent, CatalogError, CatalogResult,
};

pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ListBuildTargetsResponse {
    #[serde(default)]
    targets: Vec<BuildTarget>,
}

#[derive(Serialize)]
struct UpdateBuildCurrentRequest<'a> {
    id: &'a CatalogBuildId,
    current: &'a CatalogCurrent,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>) -> CatalogResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> CatalogResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Catalog request failed");
        Err(CatalogError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list_build_targets(&self) -> CatalogResult<Vec<BuildTarget>> {
        let url = format!("{}/v1/build-targets", self.base_url);
        debug!(url = %url, "Listing build targets");

        let response = self.client.get(&url).send().await?;
        let response = Self::check(response).await?;
        let body: ListBuildTargetsResponse = response.json().await?;
        Ok(body.targets)
    }

    async fn update_build_current(
        &self,
        id: &CatalogBuildId,
        current: &CatalogCurrent,
    ) -> CatalogResult<()> {
        let url = format!("{}/v1/build-current", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&UpdateBuildCurrentRequest { id, current })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
