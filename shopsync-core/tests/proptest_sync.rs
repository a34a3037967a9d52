//! Property-based tests for the transformer and pagination using proptest.

mod common;

use proptest::prelude::*;
use serde_json::{Value, json};

use shopsync_core::config::HttpConfig;
use shopsync_core::schema::EntityType;
use shopsync_core::source::{RawRecord, ResourceFetcher, ShopifyClient, next_link};
use shopsync_core::transform::{TypedRow, transform};

fn optional<T: Strategy>(inner: T) -> impl Strategy<Value = Option<T::Value>> {
    prop::option::of(inner)
}

prop_compose! {
    fn customer_record(id: u64)(
        email in optional("[a-z]{1,8}@example\\.com"),
        orders in optional(0i64..10_000),
        spent in optional(0u32..1_000_000),
        spent_as_string in any::<bool>(),
        with_timestamp in any::<bool>(),
    ) -> Value {
        let mut record = json!({ "id": id });
        if let Some(email) = email {
            record["email"] = json!(email);
        }
        if let Some(orders) = orders {
            record["orders_count"] = json!(orders);
        }
        if let Some(cents) = spent {
            let amount = format!("{}.{:02}", cents / 100, cents % 100);
            record["total_spent"] = if spent_as_string {
                json!(amount)
            } else {
                json!(cents as f64 / 100.0)
            };
        }
        if with_timestamp {
            record["created_at"] = json!("2024-05-06T07:08:09+02:00");
        }
        record
    }
}

fn customer_batch() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::btree_set(1u64..1_000_000_000, 0..60).prop_flat_map(|ids| {
        ids.into_iter()
            .map(customer_record)
            .collect::<Vec<_>>()
    })
}

// --- Transformer properties ---

proptest! {
    #[test]
    fn transform_is_total_and_order_preserving(batch in customer_batch()) {
        let records: Vec<RawRecord> = batch
            .iter()
            .cloned()
            .map(|v| RawRecord::from_value(v).unwrap())
            .collect();
        let rows = transform(&records, EntityType::Customers).unwrap();

        prop_assert_eq!(rows.len(), batch.len());
        for (row, raw) in rows.iter().zip(&batch) {
            prop_assert_eq!(row.key(), raw["id"].as_u64().unwrap().to_string());
            prop_assert_eq!(row.cells().len(), EntityType::Customers.schema().len());
        }
    }

    #[test]
    fn product_price_is_first_variant_or_zero(
        prices in prop::collection::vec(0u32..100_000, 0..4),
    ) {
        let variants: Vec<Value> = prices
            .iter()
            .map(|cents| json!({ "price": format!("{}.{:02}", cents / 100, cents % 100) }))
            .collect();
        let record = RawRecord::from_value(json!({ "id": 7, "variants": variants })).unwrap();
        let rows = transform(&[record], EntityType::Products).unwrap();
        let TypedRow::Product(row) = &rows[0] else {
            panic!("expected product row");
        };
        let expected = prices.first().map(|c| *c as f64 / 100.0).unwrap_or(0.0);
        prop_assert!((row.price - expected).abs() < 1e-9);
    }

    #[test]
    fn next_link_found_regardless_of_position(
        cursor in "[A-Za-z0-9]{4,24}",
        previous_first in any::<bool>(),
    ) {
        let next = format!("https://demo-store.myshopify.com/admin/api/2024-04/customers.json?limit=250&page_info={cursor}");
        let prev = "https://demo-store.myshopify.com/admin/api/2024-04/customers.json?limit=250&page_info=prev";
        let header = if previous_first {
            format!("<{prev}>; rel=\"previous\", <{next}>; rel=\"next\"")
        } else {
            format!("<{next}>; rel=\"next\", <{prev}>; rel=\"previous\"")
        };
        prop_assert_eq!(next_link(&header), Some(next));
    }
}

// --- Pagination counts against the fake shop ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn fetch_collects_every_record_across_pages(
        total in 0usize..600,
        page_size in 1u32..=250,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (len, pages) = runtime.block_on(async {
            let shop = common::spawn_shop(vec![("customers.json", common::customers(total, 1))]).await;
            let http = HttpConfig { page_size, timeout_secs: 10, ..Default::default() };
            let client = ShopifyClient::new(&shop.shop_config(), &http).unwrap();
            let collection = client.fetch_all("customers.json", "customers").await.unwrap();
            (collection.len(), collection.pages)
        });

        let expected_pages = total.div_ceil(page_size as usize).max(1);
        prop_assert_eq!(len, total);
        prop_assert_eq!(pages, expected_pages);
    }
}
