use super::endpoints::{StatusEndpoint, details_path, vehicles_path};
use super::parse::{VehicleDetails, parse_details, parse_vehicle_list};
use crate::error::Result;
use crate::http::{CacheKey, CachedClient, RequestOptions};
use crate::logging::{StructuredLogger, get_api_logger};
use serde_json::Value;
use std::sync::Arc;

/// Typed access to the Connected Vehicle resources
pub struct VolvoClient {
    http: Arc<CachedClient>,
    api_logger: StructuredLogger,
}

impl VolvoClient {
    pub fn new(http: Arc<CachedClient>) -> Self {
        Self {
            http,
            api_logger: get_api_logger("volvo"),
        }
    }

    pub fn with_logger(mut self, logger: &StructuredLogger) -> Self {
        self.api_logger = logger.api();
        self
    }

    pub fn http(&self) -> &Arc<CachedClient> {
        &self.http
    }

    /// VINs linked to the account
    pub async fn list_vehicles(&self, options: RequestOptions) -> Result<Vec<String>> {
        let payload = self
            .http
            .get_with(&CacheKey::new(vehicles_path()), options)
            .await?;
        parse_vehicle_list(&payload)
    }

    pub async fn vehicle_details(&self, vin: &str, options: RequestOptions) -> Result<VehicleDetails> {
        let key = CacheKey::new(details_path(vin)).with_vin(vin);
        let payload = self.http.get_with(&key, options).await?;
        parse_details(vin, &payload, &self.api_logger.for_vin(vin))
    }

    /// Raw payload of one status resource; mapping happens at publish time
    pub async fn status(
        &self,
        vin: &str,
        endpoint: StatusEndpoint,
        options: RequestOptions,
    ) -> Result<Arc<Value>> {
        let key = CacheKey::new(endpoint.path(vin)).with_vin(vin);
        self.http.get_with(&key, options).await
    }
}
