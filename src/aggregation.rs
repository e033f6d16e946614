//! Per-contact read paths: trial deals, hardware (thermostat) deals with
//! summed line-item quantities, and custom-object subscriptions.
//!
//! Each path is the same shape: fetch association ids, batch-read the full
//! objects, filter/annotate. An empty association list short-circuits to an
//! empty result without a batch read.

use crate::errors::AppError;
use crate::hubspot::{
    HubSpotClient, ORDER_PIPELINE_ID, SUBSCRIPTIONS_OBJECT_TYPE, SUBSCRIPTION_PROPERTIES,
};
use crate::models::{CrmObject, DealWithQuantity};
use futures::stream::{self, StreamExt};
use moka::future::Cache;
use serde_json::json;

/// Properties fetched for trial deal listings.
const TRIAL_DEAL_PROPERTIES: [&str; 6] = [
    "dealname",
    "amount",
    "dealstage",
    "closedate",
    "pipeline",
    "converted_subscription_id",
];

/// Properties fetched for hardware deal listings.
const HARDWARE_DEAL_PROPERTIES: [&str; 4] = ["dealname", "amount", "dealstage", "pipeline"];

/// Properties fetched for the full per-contact deal set feeding the insight.
pub const INSIGHT_DEAL_PROPERTIES: [&str; 7] = [
    "dealname",
    "amount",
    "dealstage",
    "closedate",
    "pipeline",
    "createdate",
    "converted_subscription_id",
];

/// Per-deal line-item reads are independent; cap the fan-out.
const LINE_ITEM_FAN_OUT: usize = 4;

/// Quantity reported for a hardware deal whose line items are missing or
/// unreadable. A deal implies at least one unit, which keeps the fallback
/// distinguishable from line items genuinely summing to zero.
pub const MISSING_LINE_ITEMS_QUANTITY: i64 = 1;

pub struct ContactAggregator<'a> {
    hubspot: &'a HubSpotClient,
}

impl<'a> ContactAggregator<'a> {
    pub fn new(hubspot: &'a HubSpotClient) -> Self {
        Self { hubspot }
    }

    /// Fetches all deals associated to a contact, with the given properties.
    pub async fn associated_deals(
        &self,
        contact_id: &str,
        properties: &[&str],
    ) -> Result<Vec<CrmObject>, AppError> {
        let associations = self
            .hubspot
            .associations("contacts", contact_id, "deals")
            .await?;
        if associations.results.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = associations.results.into_iter().map(|r| r.id).collect();
        let deals = self.hubspot.batch_read("deals", &ids, properties).await?;
        Ok(deals.results)
    }

    /// Trial deals: every associated deal outside the order pipeline,
    /// annotated with the cached stage label when one is known.
    pub async fn trial_deals(
        &self,
        contact_id: &str,
        stage_labels: &Cache<String, String>,
    ) -> Result<Vec<CrmObject>, AppError> {
        let deals = self
            .associated_deals(contact_id, &TRIAL_DEAL_PROPERTIES)
            .await?;
        let (trials, _) = partition_by_pipeline(deals);

        let mut annotated = Vec::with_capacity(trials.len());
        for mut deal in trials {
            if let Some(stage) = deal.property("dealstage").map(str::to_string) {
                if let Some(label) = stage_labels.get(&stage).await {
                    deal.rest.insert("dealstageLabel".to_string(), json!(label));
                }
            }
            annotated.push(deal);
        }
        Ok(annotated)
    }

    /// Hardware deals: every associated deal in the order pipeline, each
    /// annotated with its summed line-item quantity. Line-item reads for
    /// different deals run concurrently with bounded parallelism.
    pub async fn thermostat_deals(
        &self,
        contact_id: &str,
    ) -> Result<Vec<DealWithQuantity>, AppError> {
        let deals = self
            .associated_deals(contact_id, &HARDWARE_DEAL_PROPERTIES)
            .await?;
        let (_, hardware) = partition_by_pipeline(deals);
        Ok(self.annotate_quantities(hardware).await)
    }

    /// Attaches summed line-item quantities to hardware deals, preserving
    /// input order.
    pub async fn annotate_quantities(&self, deals: Vec<CrmObject>) -> Vec<DealWithQuantity> {
        stream::iter(deals)
            .map(|deal| async move {
                let quantity = self.deal_quantity(&deal.id).await;
                DealWithQuantity { deal, quantity }
            })
            .buffered(LINE_ITEM_FAN_OUT)
            .collect()
            .await
    }

    /// Summed line-item quantity for one deal. Any sub-call failure, or a
    /// deal with no line items at all, reports the fallback quantity.
    async fn deal_quantity(&self, deal_id: &str) -> i64 {
        let associations = match self
            .hubspot
            .associations("deals", deal_id, "line_items")
            .await
        {
            Ok(list) => list,
            Err(e) => {
                tracing::error!("Error fetching line items for deal {}: {}", deal_id, e);
                return MISSING_LINE_ITEMS_QUANTITY;
            }
        };
        if associations.results.is_empty() {
            return MISSING_LINE_ITEMS_QUANTITY;
        }

        let ids: Vec<String> = associations.results.into_iter().map(|r| r.id).collect();
        let line_items = match self
            .hubspot
            .batch_read("line_items", &ids, &["quantity", "name"])
            .await
        {
            Ok(list) => list,
            Err(e) => {
                tracing::error!("Error reading line items for deal {}: {}", deal_id, e);
                return MISSING_LINE_ITEMS_QUANTITY;
            }
        };

        sum_line_item_quantities(&line_items.results)
    }

    /// Subscriptions: custom-object associations plus a batch read of the
    /// subscription lifecycle properties.
    pub async fn subscriptions(&self, contact_id: &str) -> Result<Vec<CrmObject>, AppError> {
        let associations = self
            .hubspot
            .associations("contacts", contact_id, SUBSCRIPTIONS_OBJECT_TYPE)
            .await?;
        if associations.results.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = associations.results.into_iter().map(|r| r.id).collect();
        let subscriptions = self
            .hubspot
            .batch_read(SUBSCRIPTIONS_OBJECT_TYPE, &ids, &SUBSCRIPTION_PROPERTIES)
            .await?;
        Ok(subscriptions.results)
    }
}

/// Splits a contact's deals into (trial, hardware) by the order pipeline id.
/// The two sets are disjoint and together cover the input.
pub fn partition_by_pipeline(deals: Vec<CrmObject>) -> (Vec<CrmObject>, Vec<CrmObject>) {
    deals
        .into_iter()
        .partition(|deal| deal.property("pipeline") != Some(ORDER_PIPELINE_ID))
}

/// Sums line-item quantities; unparsable or missing quantities count as 0.
pub fn sum_line_item_quantities(line_items: &[CrmObject]) -> i64 {
    line_items
        .iter()
        .map(|item| {
            item.property("quantity")
                .and_then(|q| q.parse::<i64>().ok())
                .unwrap_or(0)
        })
        .sum()
}
