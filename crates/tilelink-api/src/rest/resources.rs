// REST resource reads
//
// Read-only accessors for sites, devices, health, and mmWave history.
// All real state lives in the backend; these seed and refresh the local
// device cache.

use tracing::debug;

use crate::error::Error;
use crate::models::{Coordinator, HealthStatus, MmwaveFrame, Node, Site};
use crate::rest::RestClient;

impl RestClient {
    /// Check backend health.
    ///
    /// `GET /health`
    pub async fn health(&self) -> Result<HealthStatus, Error> {
        self.get(self.endpoint("health")).await
    }

    /// List all sites.
    ///
    /// `GET /sites`
    pub async fn list_sites(&self) -> Result<Vec<Site>, Error> {
        debug!("listing sites");
        self.get(self.endpoint("sites")).await
    }

    /// Get a single site by id.
    ///
    /// `GET /sites/{id}`
    pub async fn get_site(&self, site_id: &str) -> Result<Site, Error> {
        self.get(self.endpoint(&format!("sites/{site_id}"))).await
    }

    /// Get a coordinator by id.
    ///
    /// `GET /coordinators/{id}`
    pub async fn get_coordinator(&self, coord_id: &str) -> Result<Coordinator, Error> {
        self.get(self.endpoint(&format!("coordinators/{coord_id}")))
            .await
    }

    /// Get a node by id.
    ///
    /// `GET /nodes/{id}`
    pub async fn get_node(&self, node_id: &str) -> Result<Node, Error> {
        self.get(self.endpoint(&format!("nodes/{node_id}"))).await
    }

    /// Fetch recent mmWave radar frames.
    ///
    /// `GET /mmwave/history?limit={n}`
    pub async fn mmwave_history(&self, limit: Option<u32>) -> Result<Vec<MmwaveFrame>, Error> {
        let mut url = self.endpoint("mmwave/history");
        if let Some(limit) = limit {
            url.query_pairs_mut().append_pair("limit", &limit.to_string());
        }
        self.get(url).await
    }
}
