use crate::aggregation::ContactAggregator;
use crate::config::Config;
use crate::errors::AppError;
use crate::gemini::GeminiClient;
use crate::hubspot::{HubSpotClient, CONTACT_LIST_PROPERTIES, DEAL_LIST_PROPERTIES};
use crate::insight::InsightService;
use crate::models::{CreateContactRequest, CreateDealRequest, InsightResponse};
use crate::orders::OrderService;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use moka::future::Cache;
use serde_json::{json, Value};
use std::sync::Arc;

const LIST_LIMIT: u32 = 50;
const CONTACTS_CACHE_KEY: &str = "contacts";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Client for the HubSpot CRM API.
    pub hubspot: HubSpotClient,
    /// Client for the Gemini completion API; `None` when no key is set.
    pub gemini: Option<GeminiClient>,
    /// Stage id -> display label, repopulated on every pipelines fetch.
    pub stage_labels: Cache<String, String>,
    /// Short-lived snapshot of the contact listing (autocomplete backing).
    pub contacts_cache: Cache<String, String>,
    /// Product name -> product id memo for the find-or-create step.
    pub product_cache: Cache<String, String>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "Server is running",
            "service": "breezy-crm-api",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// GET /api/contacts
///
/// Lists contacts with the fixed autocomplete property set. The listing is a
/// transient snapshot: cached briefly and invalidated whenever a contact is
/// created through this proxy.
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    if let Some(cached) = state.contacts_cache.get(CONTACTS_CACHE_KEY).await {
        if let Ok(value) = serde_json::from_str::<Value>(&cached) {
            tracing::debug!("Contact list cache HIT");
            return Ok(Json(value));
        }
    }

    let contacts = state
        .hubspot
        .list_contacts(LIST_LIMIT, CONTACT_LIST_PROPERTIES)
        .await?;
    let value = serde_json::to_value(&contacts)
        .map_err(|e| AppError::Internal(format!("Failed to serialize contacts: {}", e)))?;

    if let Ok(serialized) = serde_json::to_string(&value) {
        state
            .contacts_cache
            .insert(CONTACTS_CACHE_KEY.to_string(), serialized)
            .await;
    }

    Ok(Json(value))
}

/// POST /api/contacts
///
/// Creates a contact; a positive `thermostatQuantity` additionally creates a
/// purchase deal with a line item. The response is the created contact,
/// extended with `thermostatDeal` when a deal was created and with
/// `sideEffects.failedSteps` when any best-effort step failed.
pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateContactRequest>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("POST /api/contacts");

    let orders = OrderService::new(&state.hubspot, &state.product_cache);
    let creation = orders.create_contact_with_hardware(&request).await?;

    // The listing snapshot is now stale
    state.contacts_cache.invalidate(CONTACTS_CACHE_KEY).await;

    let mut response = serde_json::to_value(&creation.contact)
        .map_err(|e| AppError::Internal(format!("Failed to serialize contact: {}", e)))?;
    if let Some(object) = response.as_object_mut() {
        if let Some(deal) = &creation.thermostat_deal {
            object.insert("thermostatDeal".to_string(), json!(deal));
        }
        if !creation.side_effects.is_clean() {
            object.insert("sideEffects".to_string(), json!(creation.side_effects));
        }
    }

    Ok(Json(response))
}

/// GET /api/deals
pub async fn list_deals(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let deals = state
        .hubspot
        .list_deals(LIST_LIMIT, DEAL_LIST_PROPERTIES)
        .await?;
    let value = serde_json::to_value(&deals)
        .map_err(|e| AppError::Internal(format!("Failed to serialize deals: {}", e)))?;
    Ok(Json(value))
}

/// POST /api/deals
///
/// Creates a deal (associated to a contact when `contactId` is given); when
/// both `billingFrequency` and `lineItemPrice` are present, a recurring
/// "Breezy Premium" line item is attached best-effort.
pub async fn create_deal(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDealRequest>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("POST /api/deals");

    let orders = OrderService::new(&state.hubspot, &state.product_cache);
    let creation = orders.create_deal_with_plan(&request).await?;

    let mut response = serde_json::to_value(&creation.deal)
        .map_err(|e| AppError::Internal(format!("Failed to serialize deal: {}", e)))?;
    if let Some(object) = response.as_object_mut() {
        if !creation.side_effects.is_clean() {
            object.insert("sideEffects".to_string(), json!(creation.side_effects));
        }
    }

    Ok(Json(response))
}

/// GET /api/pipelines
///
/// Lists deal pipelines and refreshes the stage-label cache from the result.
/// The cache is only ever invalidated by a successful re-fetch here (plus
/// its TTL as a staleness bound), never pushed from upstream.
pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let pipelines = state.hubspot.list_pipelines().await?;

    // A successful fetch replaces the map wholesale, so stages deleted or
    // relabeled upstream do not linger until the TTL expires
    state.stage_labels.invalidate_all();
    for pipeline in &pipelines.results {
        for stage in &pipeline.stages {
            state
                .stage_labels
                .insert(stage.id.clone(), stage.label.clone())
                .await;
        }
    }
    tracing::debug!(
        "Stage label cache refreshed from {} pipeline(s)",
        pipelines.results.len()
    );

    let value = serde_json::to_value(&pipelines)
        .map_err(|e| AppError::Internal(format!("Failed to serialize pipelines: {}", e)))?;
    Ok(Json(value))
}

/// GET /api/contacts/:id/deals
///
/// Trial deals for a contact: every associated deal outside the order
/// pipeline, annotated with cached stage labels.
pub async fn contact_trial_deals(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let aggregator = ContactAggregator::new(&state.hubspot);
    let deals = aggregator
        .trial_deals(&contact_id, &state.stage_labels)
        .await?;
    Ok(Json(json!({ "results": deals })))
}

/// GET /api/contacts/:id/thermostat-deals
///
/// Hardware deals for a contact, each with its summed line-item quantity.
pub async fn contact_thermostat_deals(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let aggregator = ContactAggregator::new(&state.hubspot);
    let deals = aggregator.thermostat_deals(&contact_id).await?;
    Ok(Json(json!({ "results": deals })))
}

/// GET /api/contacts/:id/subscriptions
pub async fn contact_subscriptions(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let aggregator = ContactAggregator::new(&state.hubspot);
    let subscriptions = aggregator.subscriptions(&contact_id).await?;
    Ok(Json(json!({ "results": subscriptions })))
}

/// POST /api/contacts/:id/ai-insight
///
/// Aggregates the contact's CRM data and produces the customer-health
/// insight via the completion API.
pub async fn contact_ai_insight(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> Result<Json<InsightResponse>, AppError> {
    tracing::info!("POST /api/contacts/{}/ai-insight", contact_id);

    let gemini = state.gemini.as_ref().ok_or_else(|| {
        AppError::NotConfigured(
            "Gemini API key not configured. Please set GEMINI_API_KEY in your .env file"
                .to_string(),
        )
    })?;

    let insight = InsightService::new(&state.hubspot, gemini)
        .generate(&contact_id)
        .await?;
    Ok(Json(insight))
}
