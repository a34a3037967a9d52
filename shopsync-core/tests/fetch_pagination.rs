//! Integration tests for the paginated Shopify fetcher against a fake shop.

mod common;

use common::{customers, spawn_shop};
use shopsync_core::config::HttpConfig;
use shopsync_core::error::FetchError;
use shopsync_core::source::{ResourceFetcher, ShopifyClient};

fn client(shop: &common::FakeShop, page_size: u32) -> ShopifyClient {
    let http = HttpConfig {
        page_size,
        timeout_secs: 10,
        ..Default::default()
    };
    ShopifyClient::new(&shop.shop_config(), &http).unwrap()
}

#[tokio::test]
async fn test_fetches_every_page_in_order() {
    let shop = spawn_shop(vec![("customers.json", customers(260, 1000))]).await;
    let collection = client(&shop, 250)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap();

    assert_eq!(collection.len(), 260);
    assert_eq!(collection.pages, 2);
    let ids: Vec<String> = collection
        .records
        .iter()
        .map(|r| r.id_field("id").unwrap().unwrap())
        .collect();
    let expected: Vec<String> = (1000..1260).map(|id| id.to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_empty_collection_is_one_page() {
    let shop = spawn_shop(vec![("customers.json", vec![])]).await;
    let collection = client(&shop, 250)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap();
    assert!(collection.is_empty());
    assert_eq!(collection.pages, 1);
}

#[tokio::test]
async fn test_exact_page_boundary() {
    let shop = spawn_shop(vec![("customers.json", customers(250, 1))]).await;
    let collection = client(&shop, 250)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap();
    assert_eq!(collection.len(), 250);
    assert_eq!(collection.pages, 1);
}

#[tokio::test]
async fn test_smaller_page_size_means_more_pages() {
    let shop = spawn_shop(vec![("customers.json", customers(260, 1))]).await;
    let collection = client(&shop, 100)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap();
    assert_eq!(collection.len(), 260);
    assert_eq!(collection.pages, 3);
}

#[tokio::test]
async fn test_later_pages_follow_next_link_verbatim() {
    let shop = spawn_shop(vec![("customers.json", customers(260, 1))]).await;
    client(&shop, 250)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap();

    let requests = shop.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].query, "limit=250");
    assert_eq!(requests[1].query, "limit=250&page_info=250");
    assert_eq!(requests[1].query.matches("limit=").count(), 1);
}

#[tokio::test]
async fn test_sends_access_token_on_every_page() {
    let shop = spawn_shop(vec![("customers.json", customers(260, 1))]).await;
    client(&shop, 250)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap();
    for request in shop.requests() {
        assert_eq!(request.token.as_deref(), Some("shpat_test_token"));
    }
}

#[tokio::test]
async fn test_failure_on_later_page_fails_whole_fetch() {
    let shop = spawn_shop(vec![("customers.json", customers(600, 1))]).await;
    shop.fail_on_page("customers.json", 1);
    let err = client(&shop, 250)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap_err();

    match err {
        FetchError::Status {
            resource, status, ..
        } => {
            assert_eq!(resource, "customers.json");
            assert_eq!(status, 500);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(shop.requests().len(), 2);
}

#[tokio::test]
async fn test_unknown_resource_is_status_error() {
    let shop = spawn_shop(vec![]).await;
    let err = client(&shop, 250)
        .fetch_all("orders.json", "orders")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
}

#[tokio::test]
async fn test_missing_array_key() {
    let shop = spawn_shop(vec![("customers.json", customers(3, 1))]).await;
    let err = client(&shop, 250)
        .fetch_all("customers.json", "clients")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::MissingKey { ref key, .. } if key == "clients"));
}

#[tokio::test]
async fn test_unreadable_link_header_fails_fetch() {
    let shop = spawn_shop(vec![("customers.json", customers(260, 1))]).await;
    shop.garble_links();
    let err = client(&shop, 250)
        .fetch_all("customers.json", "customers")
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::InvalidBody { ref message, .. } if message.contains("Link header"))
    );
    assert_eq!(shop.requests().len(), 1);
}
