//! Typed access to the tenant Resource API.
//!
//! The business screens (products, orders, campaigns, discounts, clients,
//! bot configuration, dashboard) are plain CRUD over these endpoints. The
//! tenant is implied by the bearer token, so paths carry no tenant id.

use std::fmt;
use std::str::FromStr;

use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::{ApiError, RequestGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Products,
    Orders,
    Campaigns,
    Discounts,
    Clients,
    BotConfig,
    Dashboard,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Products,
        Resource::Orders,
        Resource::Campaigns,
        Resource::Discounts,
        Resource::Clients,
        Resource::BotConfig,
        Resource::Dashboard,
    ];

    /// Path segment under the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Products => "products",
            Resource::Orders => "orders",
            Resource::Campaigns => "campaigns",
            Resource::Discounts => "discounts",
            Resource::Clients => "clients",
            Resource::BotConfig => "bot-config",
            Resource::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Resource::ALL
            .into_iter()
            .find(|r| r.path() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Resource::ALL.iter().map(Resource::path).collect();
                format!("unknown resource '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// CRUD client over the `RequestGateway`.
#[derive(Clone)]
pub struct ResourceApi {
    gateway: RequestGateway,
}

impl ResourceApi {
    pub fn new(gateway: RequestGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub async fn list<T: DeserializeOwned>(&self, resource: Resource) -> Result<T, ApiError> {
        let builder = self.gateway.request(Method::GET, resource.path());
        self.fetch_json(builder).await
    }

    pub async fn get<T: DeserializeOwned>(&self, resource: Resource, id: &str) -> Result<T, ApiError> {
        let builder = self.gateway.request(Method::GET, &item_path(resource, id));
        self.fetch_json(builder).await
    }

    pub async fn create<T: DeserializeOwned, B: Serialize>(
        &self,
        resource: Resource,
        body: &B,
    ) -> Result<T, ApiError> {
        let builder = self.gateway.request(Method::POST, resource.path()).json(body);
        self.fetch_json(builder).await
    }

    pub async fn update<T: DeserializeOwned, B: Serialize>(
        &self,
        resource: Resource,
        id: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let builder = self
            .gateway
            .request(Method::PUT, &item_path(resource, id))
            .json(body);
        self.fetch_json(builder).await
    }

    pub async fn delete(&self, resource: Resource, id: &str) -> Result<(), ApiError> {
        let builder = self.gateway.request(Method::DELETE, &item_path(resource, id));
        self.execute(builder).await?;
        Ok(())
    }

    async fn fetch_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.execute(builder).await?;
        let url = response.url().to_string();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            debug!(url = %url, error = %e, "Unexpected response shape");
            ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
        })
    }

    /// Send through the gateway and turn non-2xx statuses into errors.
    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let request = builder
            .build()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let response = self.gateway.send(request).await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

fn item_path(resource: Resource, id: &str) -> String {
    format!("{}/{}", resource.path(), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_parse_accepts_variants() {
        assert_eq!("products".parse::<Resource>().unwrap(), Resource::Products);
        assert_eq!("Bot_Config".parse::<Resource>().unwrap(), Resource::BotConfig);
        assert_eq!(" orders ".parse::<Resource>().unwrap(), Resource::Orders);
        let err = "widgets".parse::<Resource>().unwrap_err();
        assert!(err.contains("bot-config"));
    }

    #[test]
    fn test_item_path() {
        assert_eq!(item_path(Resource::Discounts, "42"), "discounts/42");
        assert_eq!(Resource::BotConfig.to_string(), "bot-config");
    }
}
