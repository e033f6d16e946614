//! Integration tests with mocked external APIs.
//! Exercises the full proxy workflows (creation chains, per-contact
//! aggregation, AI insight) without hitting HubSpot or Gemini.

use axum::extract::State;
use breezy_crm_api::aggregation::ContactAggregator;
use breezy_crm_api::config::Config;
use breezy_crm_api::errors::AppError;
use breezy_crm_api::gemini::GeminiClient;
use breezy_crm_api::handlers::{self, AppState};
use breezy_crm_api::hubspot::{HubSpotClient, ORDER_PIPELINE_ID, SUBSCRIPTIONS_OBJECT_TYPE};
use breezy_crm_api::insight::InsightService;
use breezy_crm_api::models::{CreateContactRequest, CreateDealRequest, SideStep};
use breezy_crm_api::orders::{OrderService, MAX_THERMOSTAT_QUANTITY};
use moka::future::Cache;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn hubspot_client(mock_server: &MockServer) -> HubSpotClient {
    HubSpotClient::new(mock_server.uri(), "test-token".to_string()).unwrap()
}

fn gemini_client(mock_server: &MockServer) -> GeminiClient {
    GeminiClient::new(
        mock_server.uri(),
        "test-key".to_string(),
        "gemini-2.0-flash-exp".to_string(),
    )
    .unwrap()
}

fn product_cache() -> Cache<String, String> {
    Cache::builder().max_capacity(100).build()
}

fn contact_request(body: serde_json::Value) -> CreateContactRequest {
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn list_contacts_passes_response_through() {
    let mock_server = MockServer::start().await;

    let upstream = json!({
        "results": [
            { "id": "1", "properties": { "firstname": "Ada", "email": "ada@example.com" } }
        ],
        "paging": { "next": { "after": "1" } }
    });

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts"))
        .and(query_param("limit", "50"))
        .and(query_param(
            "properties",
            "firstname,lastname,email,phone,address",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(&upstream))
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let contacts = client
        .list_contacts(50, "firstname,lastname,email,phone,address")
        .await
        .unwrap();

    assert_eq!(contacts.results.len(), 1);
    assert_eq!(contacts.results[0].property("firstname"), Some("Ada"));
    // Paging cursors survive the round trip
    assert!(contacts.rest.contains_key("paging"));
}

#[tokio::test]
async fn upstream_status_and_body_are_propagated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(
            ResponseTemplate::new(502).set_body_json(json!({ "message": "portal unavailable" })),
        )
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let result = client.list_deals(50, "dealname").await;

    match result {
        Err(AppError::Upstream {
            status, details, ..
        }) => {
            assert_eq!(status, 502);
            assert_eq!(details["message"], json!("portal unavailable"));
        }
        other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn contact_without_quantity_makes_no_deal_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "7",
            "properties": { "email": "ada@example.com" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    // No deal, product, or line item traffic is allowed
    for blocked in [
        "/crm/v3/objects/deals",
        "/crm/v3/objects/products",
        "/crm/v3/objects/line_items",
    ] {
        Mock::given(path(blocked))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;
    }

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    let request = contact_request(json!({
        "properties": { "email": "ada@example.com" }
    }));
    let creation = orders.create_contact_with_hardware(&request).await.unwrap();

    assert_eq!(creation.contact.id, "7");
    assert!(creation.thermostat_deal.is_none());
    assert!(creation.side_effects.is_clean());
}

#[tokio::test]
async fn zero_quantity_is_treated_as_absent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "7", "properties": {} })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(path("/crm/v3/objects/deals"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    let request = contact_request(json!({
        "properties": {},
        "thermostatQuantity": "0"
    }));
    let creation = orders.create_contact_with_hardware(&request).await.unwrap();
    assert!(creation.thermostat_deal.is_none());
}

#[tokio::test]
async fn oversized_quantity_is_rejected_before_any_crm_write() {
    let mock_server = MockServer::start().await;

    // Rejection happens before the contact is created
    Mock::given(path("/crm/v3/objects/contacts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    for quantity in [(MAX_THERMOSTAT_QUANTITY + 1).to_string(), i64::MAX.to_string()] {
        let request = contact_request(json!({
            "properties": { "email": "ada@example.com" },
            "thermostatQuantity": quantity
        }));
        let result = orders.create_contact_with_hardware(&request).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}

#[tokio::test]
async fn hardware_purchase_creates_deal_with_exact_amount() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "7",
            "properties": { "firstname": "Ada", "lastname": "Lovelace" }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/deals"))
        .and(body_partial_json(json!({
            "properties": {
                "dealname": "Thermostat Purchase - Ada Lovelace",
                "amount": "897",
                "pipeline": ORDER_PIPELINE_ID,
            },
            "associations": [{ "to": { "id": "7" } }]
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "55", "properties": {} })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // Product does not exist yet
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/products"))
        .and(body_partial_json(json!({
            "properties": { "name": "Breezy Thermostat", "price": "299" }
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "p1", "properties": {} })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/line_items"))
        .and(body_partial_json(json!({
            "properties": {
                "quantity": "3",
                "price": "299",
                "amount": "897",
                "hs_product_id": "p1",
            }
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "li1", "properties": {} })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/crm/v3/objects/line_items/li1/associations/deals/55/20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    let request = contact_request(json!({
        "properties": { "firstname": "Ada", "lastname": "Lovelace" },
        "thermostatQuantity": 3
    }));
    let creation = orders.create_contact_with_hardware(&request).await.unwrap();

    let deal = creation.thermostat_deal.expect("deal summary expected");
    assert_eq!(deal.id, "55");
    assert_eq!(deal.amount, 897.0);
    assert_eq!(deal.quantity, 3);
    assert!(creation.side_effects.is_clean());
}

#[tokio::test]
async fn duplicate_email_is_remapped_to_conflict() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "status": "error",
            "category": "CONFLICT",
            "message": "Contact already exists. Existing ID: 7"
        })))
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    let request = contact_request(json!({
        "properties": { "email": "ada@example.com" }
    }));
    let result = orders.create_contact_with_hardware(&request).await;

    match result {
        Err(AppError::DuplicateContact { details }) => {
            assert_eq!(details["category"], json!("CONFLICT"));
        }
        other => panic!("expected duplicate conflict, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn duplicate_detected_by_message_fallback_on_400() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "A contact with this email already exists"
        })))
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    let request = contact_request(json!({ "properties": {} }));
    let result = orders.create_contact_with_hardware(&request).await;
    assert!(matches!(result, Err(AppError::DuplicateContact { .. })));
}

#[tokio::test]
async fn failed_product_lookup_is_best_effort() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "7", "properties": {} })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "55", "properties": {} })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/products"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    // Line item creation must be skipped once the product step failed
    Mock::given(path("/crm/v3/objects/line_items"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    let request = contact_request(json!({
        "properties": {},
        "thermostatQuantity": 2
    }));
    let creation = orders.create_contact_with_hardware(&request).await.unwrap();

    // Contact and deal survive; the failed step is reported
    let deal = creation.thermostat_deal.expect("deal summary expected");
    assert_eq!(deal.amount, 598.0);
    assert_eq!(
        creation.side_effects.failed_steps,
        vec![SideStep::ProductFindOrCreate]
    );
}

#[tokio::test]
async fn deal_with_plan_attaches_recurring_line_item() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/deals"))
        .and(body_partial_json(json!({
            "associations": [{ "to": { "id": "7" } }]
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "88", "properties": {} })),
        )
        .mount(&mock_server)
        .await;

    // Product already exists
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": "p9", "properties": { "name": "Breezy Premium" } }]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/line_items"))
        .and(body_partial_json(json!({
            "properties": {
                "name": "Breezy Premium",
                "quantity": "1",
                "recurringbillingfrequency": "monthly",
                "hs_product_id": "p9",
            }
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "li9", "properties": {} })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/crm/v3/objects/line_items/li9/associations/deals/88/20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    let request: CreateDealRequest = serde_json::from_value(json!({
        "dealProperties": { "dealname": "Premium Trial" },
        "contactId": "7",
        "billingFrequency": "monthly",
        "lineItemPrice": "9.99"
    }))
    .unwrap();
    let creation = orders.create_deal_with_plan(&request).await.unwrap();

    assert_eq!(creation.deal.id, "88");
    assert!(creation.side_effects.is_clean());
}

#[tokio::test]
async fn deal_without_plan_skips_line_item_chain() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "88", "properties": {} })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(path("/crm/v3/objects/products"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let cache = product_cache();
    let orders = OrderService::new(&client, &cache);

    // Frequency without price: the line item chain must not run
    let request: CreateDealRequest = serde_json::from_value(json!({
        "dealProperties": { "dealname": "Premium Trial" },
        "billingFrequency": "monthly"
    }))
    .unwrap();
    let creation = orders.create_deal_with_plan(&request).await.unwrap();
    assert!(creation.side_effects.is_clean());
}

#[tokio::test]
async fn trial_and_thermostat_paths_partition_deals() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/7/associations/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": "t1" }, { "id": "h1" }]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/deals/batch/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "t1", "properties": { "pipeline": "default", "dealname": "Trial" } },
                { "id": "h1", "properties": { "pipeline": ORDER_PIPELINE_ID, "dealname": "Order" } }
            ]
        })))
        .mount(&mock_server)
        .await;

    // The hardware deal has no line items: fallback quantity applies
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals/h1/associations/line_items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let aggregator = ContactAggregator::new(&client);

    let stage_labels: Cache<String, String> = Cache::builder().max_capacity(10).build();
    let trials = aggregator.trial_deals("7", &stage_labels).await.unwrap();
    assert_eq!(trials.len(), 1);
    assert_eq!(trials[0].id, "t1");

    let hardware = aggregator.thermostat_deals("7").await.unwrap();
    assert_eq!(hardware.len(), 1);
    assert_eq!(hardware[0].deal.id, "h1");
    assert_eq!(hardware[0].quantity, 1);
}

#[tokio::test]
async fn pipeline_refresh_replaces_stale_stage_labels() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/pipelines/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "p1",
                "label": "Trials",
                "stages": [{ "id": "stage-new", "label": "Trial Started" }]
            }]
        })))
        .mount(&mock_server)
        .await;

    let state = Arc::new(AppState {
        config: Config {
            port: 3001,
            hubspot_access_token: "test-token".to_string(),
            hubspot_base_url: mock_server.uri(),
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_model: "gemini-2.0-flash-exp".to_string(),
        },
        hubspot: hubspot_client(&mock_server),
        gemini: None,
        stage_labels: Cache::builder().max_capacity(10).build(),
        contacts_cache: Cache::builder().max_capacity(4).build(),
        product_cache: product_cache(),
    });

    // A stage that no longer exists upstream
    state
        .stage_labels
        .insert("stage-old".to_string(), "Removed Stage".to_string())
        .await;

    handlers::list_pipelines(State(state.clone())).await.unwrap();

    assert_eq!(state.stage_labels.get("stage-old").await, None);
    assert_eq!(
        state.stage_labels.get("stage-new").await,
        Some("Trial Started".to_string())
    );
}

#[tokio::test]
async fn trial_deals_are_annotated_with_cached_stage_labels() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/7/associations/deals"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "results": [{ "id": "t1" }] })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/deals/batch/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "t1", "properties": { "pipeline": "default", "dealstage": "stage-9" } }
            ]
        })))
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let aggregator = ContactAggregator::new(&client);

    let stage_labels: Cache<String, String> = Cache::builder().max_capacity(10).build();
    stage_labels
        .insert("stage-9".to_string(), "Trial Started".to_string())
        .await;

    let trials = aggregator.trial_deals("7", &stage_labels).await.unwrap();
    assert_eq!(trials[0].rest["dealstageLabel"], json!("Trial Started"));
}

#[tokio::test]
async fn thermostat_quantity_sums_line_items() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/7/associations/deals"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "results": [{ "id": "h1" }] })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/deals/batch/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "h1", "properties": { "pipeline": ORDER_PIPELINE_ID, "amount": "1495" } }
            ]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals/h1/associations/line_items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": "li1" }, { "id": "li2" }]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/line_items/batch/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "li1", "properties": { "quantity": "2" } },
                { "id": "li2", "properties": { "quantity": "3" } }
            ]
        })))
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let aggregator = ContactAggregator::new(&client);

    let hardware = aggregator.thermostat_deals("7").await.unwrap();
    assert_eq!(hardware[0].quantity, 5);
}

#[tokio::test]
async fn contact_without_associations_short_circuits() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/7/associations/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&mock_server)
        .await;

    // No batch read may be issued for an empty association list
    Mock::given(path("/crm/v3/objects/deals/batch/read"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let aggregator = ContactAggregator::new(&client);

    let stage_labels: Cache<String, String> = Cache::builder().max_capacity(10).build();
    let trials = aggregator.trial_deals("7", &stage_labels).await.unwrap();
    assert!(trials.is_empty());
}

#[tokio::test]
async fn subscriptions_use_the_custom_object_type() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/crm/v3/objects/contacts/7/associations/{}",
            SUBSCRIPTIONS_OBJECT_TYPE
        )))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "results": [{ "id": "s1" }] })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/crm/v3/objects/{}/batch/read",
            SUBSCRIPTIONS_OBJECT_TYPE
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "s1", "properties": { "status": "active", "trial_id": "t1" } }
            ]
        })))
        .mount(&mock_server)
        .await;

    let client = hubspot_client(&mock_server);
    let aggregator = ContactAggregator::new(&client);

    let subscriptions = aggregator.subscriptions("7").await.unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].property("status"), Some("active"));
}

#[tokio::test]
async fn insight_for_empty_customer_is_well_formed() {
    let hubspot_server = MockServer::start().await;
    let gemini_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "7",
            "properties": { "email": "ada@example.com", "createdate": "2025-01-01T00:00:00Z" }
        })))
        .mount(&hubspot_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/7/associations/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&hubspot_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/crm/v3/objects/contacts/7/associations/{}",
            SUBSCRIPTIONS_OBJECT_TYPE
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&hubspot_server)
        .await;

    let completion = "```json\n{\"likelihoodToUpgrade\": \"Low (15%)\", \"riskOfChurn\": \"Medium (40%)\", \"suggestedAction\": \"Use HubSpot AI-powered Workflows for onboarding\", \"justification\": \"New contact with no activity.\"}\n```";
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash-exp:generateContent"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": completion }] }
            }]
        })))
        .mount(&gemini_server)
        .await;

    let hubspot = hubspot_client(&hubspot_server);
    let gemini = gemini_client(&gemini_server);

    let insight = InsightService::new(&hubspot, &gemini)
        .generate("7")
        .await
        .unwrap();

    assert!(insight.success);
    assert_eq!(insight.insight.likelihood_to_upgrade, "Low (15%)");
    assert_eq!(insight.raw_response, completion);
}

#[tokio::test]
async fn unparsable_completion_yields_placeholder_insight() {
    let hubspot_server = MockServer::start().await;
    let gemini_server = MockServer::start().await;

    // Every CRM read fails: the insight degrades to empty aggregates
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("portal down"))
        .mount(&hubspot_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash-exp:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "I could not produce JSON, sorry." }] }
            }]
        })))
        .mount(&gemini_server)
        .await;

    let hubspot = hubspot_client(&hubspot_server);
    let gemini = gemini_client(&gemini_server);

    let insight = InsightService::new(&hubspot, &gemini)
        .generate("7")
        .await
        .unwrap();

    assert!(insight.success);
    assert_eq!(insight.insight.likelihood_to_upgrade, "Analysis unavailable");
    assert_eq!(
        insight.insight.suggested_action,
        "Review customer data manually"
    );
}

#[tokio::test]
async fn gemini_failure_fails_the_insight_request() {
    let hubspot_server = MockServer::start().await;
    let gemini_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&hubspot_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({ "error": "quota exceeded" })),
        )
        .mount(&gemini_server)
        .await;

    let hubspot = hubspot_client(&hubspot_server);
    let gemini = gemini_client(&gemini_server);

    let result = InsightService::new(&hubspot, &gemini).generate("7").await;
    match result {
        Err(AppError::Upstream { status, .. }) => assert_eq!(status, 429),
        other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
    }
}
