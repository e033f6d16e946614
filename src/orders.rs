//! Creation chains: contact with optional hardware purchase, and deal with
//! optional recurring plan line item.
//!
//! The primary create is fatal to the request; every later step is
//! best-effort. Failed steps are logged and reported in [`SideEffects`] so
//! the caller can tell which parts of the chain were skipped.

use crate::errors::AppError;
use crate::hubspot::{
    HubSpotClient, ORDER_PIPELINE_ID, PREMIUM_PRODUCT_NAME, PURCHASED_STAGE_ID,
    THERMOSTAT_PRODUCT_NAME, THERMOSTAT_UNIT_PRICE,
};
use crate::models::{
    CreateContactRequest, CreateDealRequest, CrmObject, SideEffects, SideStep,
    ThermostatDealSummary,
};
use moka::future::Cache;
use serde_json::{json, Value};

/// Upper bound on a single order's thermostat quantity. Keeps the deal
/// amount exactly representable in both i64 and f64 and rejects
/// nonsensical orders before any CRM call is made.
pub const MAX_THERMOSTAT_QUANTITY: i64 = 10_000;

pub struct OrderService<'a> {
    hubspot: &'a HubSpotClient,
    /// Memoizes product name -> product id. The upstream find-or-create is
    /// not atomic; the memo only narrows the race window.
    product_cache: &'a Cache<String, String>,
}

/// Outcome of the contact creation chain.
pub struct ContactCreation {
    pub contact: CrmObject,
    pub thermostat_deal: Option<ThermostatDealSummary>,
    pub side_effects: SideEffects,
}

/// Outcome of the deal creation chain.
pub struct DealCreation {
    pub deal: CrmObject,
    pub side_effects: SideEffects,
}

impl<'a> OrderService<'a> {
    pub fn new(hubspot: &'a HubSpotClient, product_cache: &'a Cache<String, String>) -> Self {
        Self {
            hubspot,
            product_cache,
        }
    }

    /// POST /api/contacts behavior: create the contact, then (when a positive
    /// thermostat quantity was submitted) a purchase deal with a line item.
    ///
    /// Contact-creation failure is fatal and duplicate-email rejections are
    /// remapped to the conflict shape. Everything after the contact is
    /// best-effort.
    pub async fn create_contact_with_hardware(
        &self,
        request: &CreateContactRequest,
    ) -> Result<ContactCreation, AppError> {
        // Reject absurd quantities up front, before any CRM write. The bound
        // keeps quantity * unit price exact in i64 and f64.
        if request
            .thermostat_quantity()
            .is_some_and(|q| q > MAX_THERMOSTAT_QUANTITY)
        {
            return Err(AppError::BadRequest(format!(
                "thermostatQuantity must be between 1 and {}",
                MAX_THERMOSTAT_QUANTITY
            )));
        }

        let contact = self
            .hubspot
            .create_contact(&request.properties)
            .await
            .map_err(AppError::remap_duplicate_contact)?;
        tracing::info!("Contact created: {}", contact.id);

        let mut side_effects = SideEffects::default();

        let quantity = match request.thermostat_quantity() {
            Some(q) if q > 0 => q,
            // No quantity (or non-positive): no deal, product, or line item
            // calls are made.
            _ => {
                return Ok(ContactCreation {
                    contact,
                    thermostat_deal: None,
                    side_effects,
                })
            }
        };

        let total_amount = quantity * THERMOSTAT_UNIT_PRICE;
        let deal_properties = json!({
            "dealname": format!("Thermostat Purchase - {}", request.contact_name()),
            "amount": total_amount.to_string(),
            "dealstage": PURCHASED_STAGE_ID,
            "pipeline": ORDER_PIPELINE_ID,
        });

        let deal = match self
            .hubspot
            .create_deal(&deal_properties, Some(&contact.id))
            .await
        {
            Ok(deal) => deal,
            Err(e) => {
                tracing::error!("Error creating thermostat deal: {}", e);
                side_effects.record(SideStep::DealCreate);
                return Ok(ContactCreation {
                    contact,
                    thermostat_deal: None,
                    side_effects,
                });
            }
        };
        tracing::info!(
            "Thermostat deal {} created for contact {} (quantity {})",
            deal.id,
            contact.id,
            quantity
        );

        self.attach_line_item(
            &deal.id,
            THERMOSTAT_PRODUCT_NAME,
            &THERMOSTAT_UNIT_PRICE.to_string(),
            json!({
                "name": THERMOSTAT_PRODUCT_NAME,
                "quantity": quantity.to_string(),
                "price": THERMOSTAT_UNIT_PRICE.to_string(),
                "amount": total_amount.to_string(),
            }),
            &mut side_effects,
        )
        .await;

        Ok(ContactCreation {
            contact,
            thermostat_deal: Some(ThermostatDealSummary {
                id: deal.id,
                amount: total_amount as f64,
                quantity,
            }),
            side_effects,
        })
    }

    /// POST /api/deals behavior: create the deal (associated to a contact
    /// when an id is supplied), then a best-effort recurring line item when
    /// both billing frequency and price are present.
    pub async fn create_deal_with_plan(
        &self,
        request: &CreateDealRequest,
    ) -> Result<DealCreation, AppError> {
        let properties = Value::Object(request.deal_properties.clone());
        let deal = self
            .hubspot
            .create_deal(&properties, request.contact_id.as_deref())
            .await?;
        tracing::info!("Deal created: {}", deal.id);

        let mut side_effects = SideEffects::default();

        let (frequency, price) = match (&request.billing_frequency, request.line_item_price()) {
            (Some(f), Some(p)) if !f.is_empty() => (f.clone(), p),
            _ => {
                return Ok(DealCreation {
                    deal,
                    side_effects,
                })
            }
        };

        let price_str = price.to_string();
        self.attach_line_item(
            &deal.id,
            PREMIUM_PRODUCT_NAME,
            &price_str,
            json!({
                "name": PREMIUM_PRODUCT_NAME,
                "price": price_str,
                "amount": price_str,
                "quantity": "1",
                "recurringbillingfrequency": frequency,
            }),
            &mut side_effects,
        )
        .await;

        Ok(DealCreation { deal, side_effects })
    }

    /// Best-effort tail of both chains: find-or-create the product, create
    /// the line item referencing it, associate it to the deal. Each failure
    /// is recorded and the chain stops there.
    async fn attach_line_item(
        &self,
        deal_id: &str,
        product_name: &str,
        product_price: &str,
        mut line_item_properties: Value,
        side_effects: &mut SideEffects,
    ) {
        let product_id = match self.find_or_create_product(product_name, product_price).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Error finding/creating product '{}': {}", product_name, e);
                side_effects.record(SideStep::ProductFindOrCreate);
                return;
            }
        };

        if let Some(props) = line_item_properties.as_object_mut() {
            props.insert("hs_product_id".to_string(), json!(product_id));
        }

        let line_item = match self.hubspot.create_line_item(&line_item_properties).await {
            Ok(item) => item,
            Err(e) => {
                tracing::error!("Error creating line item for deal {}: {}", deal_id, e);
                side_effects.record(SideStep::LineItemCreate);
                return;
            }
        };
        tracing::info!("Line item created: {}", line_item.id);

        if let Err(e) = self
            .hubspot
            .associate_line_item_to_deal(&line_item.id, deal_id)
            .await
        {
            tracing::error!(
                "Error associating line item {} to deal {}: {}",
                line_item.id,
                deal_id,
                e
            );
            side_effects.record(SideStep::LineItemAssociate);
        } else {
            tracing::info!("Line item {} associated to deal {}", line_item.id, deal_id);
        }
    }

    async fn find_or_create_product(
        &self,
        name: &str,
        price: &str,
    ) -> Result<String, AppError> {
        if let Some(cached) = self.product_cache.get(name).await {
            tracing::debug!("Product cache HIT for '{}': {}", name, cached);
            return Ok(cached);
        }

        let product_id = match self.hubspot.search_product(name).await? {
            Some(product) => {
                tracing::info!("Found existing product '{}' with id {}", name, product.id);
                product.id
            }
            None => {
                tracing::info!("Product '{}' not found, creating", name);
                let created = self.hubspot.create_product(name, price).await?;
                tracing::info!("Created product '{}' with id {}", name, created.id);
                created.id
            }
        };

        self.product_cache
            .insert(name.to_string(), product_id.clone())
            .await;
        Ok(product_id)
    }
}
