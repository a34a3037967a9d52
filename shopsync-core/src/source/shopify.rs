//! Shopify Admin REST client with `Link`-header pagination.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, LINK};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{RawRecord, ResourceCollection, ResourceFetcher, next_link};
use crate::config::{HttpConfig, ShopConfig};
use crate::error::FetchError;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Longest error body kept in a `FetchError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Paginated fetcher for one shop.
pub struct ShopifyClient {
    client: Client,
    base_url: String,
    shop_name: String,
    access_token: String,
    page_size: u32,
}

impl ShopifyClient {
    pub fn new(shop: &ShopConfig, http: &HttpConfig) -> Result<Self, FetchError> {
        let base_url = shop.api_base_url();
        Url::parse(&base_url).map_err(|e| FetchError::InvalidUrl {
            url: base_url.clone(),
            message: e.to_string(),
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport {
                resource: base_url.clone(),
                source: e,
            })?;

        let shop_name = if shop.shop_name.is_empty() {
            base_url.clone()
        } else {
            shop.shop_name.clone()
        };

        Ok(Self {
            client,
            base_url,
            shop_name,
            access_token: shop.access_token.clone(),
            page_size: http.effective_page_size(),
        })
    }

    fn resource_url(&self, resource_path: &str) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base_url, resource_path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| FetchError::InvalidUrl {
            url: raw,
            message: e.to_string(),
        })
    }

    /// Fetch one page. Returns the page's records and the next-page URL, if any.
    async fn fetch_page(
        &self,
        url: &Url,
        first_page: bool,
        resource_path: &str,
        key: &str,
    ) -> Result<(Vec<RawRecord>, Option<String>), FetchError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .header(ACCEPT, "application/json");
        // Next links already carry their own limit and cursor.
        if first_page {
            request = request.query(&[("limit", self.page_size)]);
        }

        let response = request.send().await.map_err(|e| FetchError::Transport {
            resource: resource_path.to_string(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(FetchError::Status {
                resource: resource_path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let next = match response.headers().get(LINK) {
            Some(value) => {
                let header = value.to_str().map_err(|e| FetchError::InvalidBody {
                    resource: resource_path.to_string(),
                    message: format!("unreadable Link header: {e}"),
                })?;
                next_link(header)
            }
            None => None,
        };

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
            resource: resource_path.to_string(),
            source: e,
        })?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| FetchError::InvalidBody {
            resource: resource_path.to_string(),
            message: e.to_string(),
        })?;

        let items = match body {
            Value::Object(mut map) => match map.remove(key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            },
            _ => None,
        };
        let items = match items {
            Some(items) => items,
            None => {
                return Err(FetchError::MissingKey {
                    resource: resource_path.to_string(),
                    key: key.to_string(),
                });
            }
        };

        let records = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                RawRecord::from_value(item).map_err(|e| FetchError::InvalidBody {
                    resource: resource_path.to_string(),
                    message: format!("{key}[{i}]: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((records, next))
    }
}

#[async_trait]
impl ResourceFetcher for ShopifyClient {
    async fn fetch_all(
        &self,
        resource_path: &str,
        key: &str,
    ) -> Result<ResourceCollection, FetchError> {
        let mut url = self.resource_url(resource_path)?;
        let mut records = Vec::new();
        let mut pages = 0;

        loop {
            let (page, next) = self.fetch_page(&url, pages == 0, resource_path, key).await?;
            pages += 1;
            records.extend(page.into_iter());
            info!(
                shop = %self.shop_name,
                resource = resource_path,
                page = pages,
                total = records.len(),
                "Fetched page"
            );

            let Some(next) = next else {
                break;
            };
            let next_url = url.join(&next).map_err(|e| FetchError::InvalidUrl {
                url: next.clone(),
                message: e.to_string(),
            })?;
            if next_url == url {
                return Err(FetchError::InvalidBody {
                    resource: resource_path.to_string(),
                    message: "next link points at the current page".into(),
                });
            }
            debug!(next = %next_url, "Following next link");
            url = next_url;
        }

        Ok(ResourceCollection {
            resource: resource_path.to_string(),
            records,
            pages,
        })
    }

    fn source_name(&self) -> &str {
        &self.shop_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shop(base_url: Option<&str>) -> ShopConfig {
        ShopConfig {
            shop_name: "demo-store".into(),
            access_token: "shpat_test".into(),
            base_url: base_url.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_resource_url() {
        let client = ShopifyClient::new(&shop(None), &HttpConfig::default()).unwrap();
        assert_eq!(
            client.resource_url("customers.json").unwrap().as_str(),
            "https://demo-store.myshopify.com/admin/api/2024-04/customers.json"
        );
        assert_eq!(client.source_name(), "demo-store");
    }

    #[test]
    fn test_page_size_is_clamped() {
        let http = HttpConfig {
            page_size: 500,
            ..Default::default()
        };
        let client = ShopifyClient::new(&shop(None), &http).unwrap();
        assert_eq!(client.page_size, 250);
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ShopifyClient::new(&shop(Some("not a url")), &HttpConfig::default());
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }
}
