//! Shared fixtures: an in-process fake Shopify Admin API and config builders.
#![allow(dead_code)]

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use shopsync_core::config::{ShopConfig, SyncConfig, WarehouseBackend};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};

/// One request the fake shop received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub resource: String,
    pub query: String,
    pub token: Option<String>,
}

#[derive(Default)]
pub struct ShopState {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    /// `(resource, zero-based page)` that answers with HTTP 500.
    fail_on: Mutex<Option<(String, usize)>>,
    requests: Mutex<Vec<RecordedRequest>>,
    /// Append a non-ASCII byte to every `Link` header.
    garble_links: Mutex<bool>,
}

pub struct FakeShop {
    pub base_url: String,
    pub state: Arc<ShopState>,
}

impl FakeShop {
    pub fn set_collection(&self, resource: &str, records: Vec<Value>) {
        self.state
            .collections
            .lock()
            .unwrap()
            .insert(resource.to_string(), records);
    }

    pub fn fail_on_page(&self, resource: &str, page: usize) {
        *self.state.fail_on.lock().unwrap() = Some((resource.to_string(), page));
    }

    pub fn clear_failure(&self) {
        *self.state.fail_on.lock().unwrap() = None;
    }

    pub fn garble_links(&self) {
        *self.state.garble_links.lock().unwrap() = true;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn shop_config(&self) -> ShopConfig {
        ShopConfig {
            shop_name: "demo-store".into(),
            access_token: "shpat_test_token".into(),
            base_url: Some(self.base_url.clone()),
            ..Default::default()
        }
    }

    /// Config for a full run against this shop and a SQLite warehouse in `dir`.
    pub fn sqlite_config(&self, dir: &FsPath) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.shop = self.shop_config();
        config.warehouse.backend = WarehouseBackend::Sqlite;
        config.warehouse.sqlite_path = Some(dir.to_path_buf());
        config.http.timeout_secs = 10;
        config
    }
}

pub async fn spawn_shop(collections: Vec<(&str, Vec<Value>)>) -> FakeShop {
    let state = Arc::new(ShopState::default());
    {
        let mut map = state.collections.lock().unwrap();
        for (resource, records) in collections {
            map.insert(resource.to_string(), records);
        }
    }

    let app = Router::new()
        .route("/admin/api/2024-04/{resource}", get(serve_resource))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeShop {
        base_url: format!("http://{addr}/admin/api/2024-04"),
        state,
    }
}

async fn serve_resource(
    State(state): State<Arc<ShopState>>,
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Response {
    state.requests.lock().unwrap().push(RecordedRequest {
        resource: resource.clone(),
        query: raw.unwrap_or_default(),
        token: headers
            .get("x-shopify-access-token")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    });

    let records = state
        .collections
        .lock()
        .unwrap()
        .get(&resource)
        .cloned();
    let Some(records) = records else {
        return (StatusCode::NOT_FOUND, Json(json!({"errors": "Not Found"}))).into_response();
    };

    let limit: usize = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(50)
        .clamp(1, 250);
    let offset: usize = params
        .get("page_info")
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let page = offset / limit;

    if let Some((failing, failing_page)) = state.fail_on.lock().unwrap().clone() {
        if failing == resource && failing_page == page {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"errors": "Internal Server Error"})),
            )
                .into_response();
        }
    }

    let end = (offset + limit).min(records.len());
    let slice = records.get(offset..end).unwrap_or_default().to_vec();
    let key = resource.trim_end_matches(".json").to_string();

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("127.0.0.1")
        .to_string();
    let page_url =
        |cursor: usize| format!("http://{host}/admin/api/2024-04/{resource}?limit={limit}&page_info={cursor}");

    let mut links = Vec::new();
    if offset > 0 {
        links.push(format!("<{}>; rel=\"previous\"", page_url(offset.saturating_sub(limit))));
    }
    if end < records.len() {
        links.push(format!("<{}>; rel=\"next\"", page_url(end)));
    }

    let mut response = Json(json!({ key: slice })).into_response();
    if !links.is_empty() {
        let mut raw = links.join(", ").into_bytes();
        if *state.garble_links.lock().unwrap() {
            raw.push(0xff);
        }
        if let Ok(value) = HeaderValue::from_bytes(&raw) {
            response.headers_mut().insert(header::LINK, value);
        }
    }
    response
}

/// Shopify-shaped customer records with ids starting at `first_id`.
pub fn customers(count: usize, first_id: u64) -> Vec<Value> {
    (0..count as u64)
        .map(|i| {
            let id = first_id + i;
            json!({
                "id": id,
                "email": format!("customer{id}@example.com"),
                "first_name": "Ada",
                "last_name": format!("Customer{id}"),
                "created_at": "2024-01-02T09:00:00-05:00",
                "updated_at": "2024-03-04T10:30:00-05:00",
                "orders_count": (id % 7) as i64,
                "total_spent": format!("{}.50", id % 100),
                "tags": "",
                "addresses": []
            })
        })
        .collect()
}

/// Shopify-shaped product records; even ids carry one variant, odd ids none.
pub fn products(count: usize, first_id: u64) -> Vec<Value> {
    (0..count as u64)
        .map(|i| {
            let id = first_id + i;
            let variants = if id % 2 == 0 {
                json!([{"id": id * 10, "price": "19.99"}, {"id": id * 10 + 1, "price": "24.99"}])
            } else {
                json!([])
            };
            json!({
                "id": id,
                "title": format!("Product {id}"),
                "vendor": "Acme",
                "product_type": "Mugs",
                "created_at": "2024-02-01T12:00:00Z",
                "updated_at": "2024-02-02T12:00:00Z",
                "variants": variants
            })
        })
        .collect()
}
