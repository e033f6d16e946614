use crate::errors::AppError;
use crate::models::{AssociationRef, CrmList, CrmObject, Pipeline};
use serde_json::{json, Map, Value};
use std::time::Duration;

// Portal-specific identifiers baked into the target HubSpot configuration.
// They are opaque to this proxy.
pub const ORDER_PIPELINE_ID: &str = "829155852";
pub const PURCHASED_STAGE_ID: &str = "1228120105";
pub const SUBSCRIPTIONS_OBJECT_TYPE: &str = "2-53381506";
pub const DEAL_TO_CONTACT_ASSOCIATION_TYPE_ID: u32 = 3;
pub const LINE_ITEM_TO_DEAL_ASSOCIATION_TYPE_ID: u32 = 20;

pub const THERMOSTAT_UNIT_PRICE: i64 = 299;
pub const THERMOSTAT_PRODUCT_NAME: &str = "Breezy Thermostat";
pub const PREMIUM_PRODUCT_NAME: &str = "Breezy Premium";

pub const CONTACT_LIST_PROPERTIES: &str = "firstname,lastname,email,phone,address";
pub const DEAL_LIST_PROPERTIES: &str = "dealname,amount,dealstage,closedate,pipeline";
pub const SUBSCRIPTION_PROPERTIES: [&str; 6] = [
    "hs_object_id",
    "status",
    "subscription_id",
    "active_date",
    "cancellation_date",
    "trial_id",
];

/// Client for the HubSpot CRM v3 REST API.
#[derive(Clone)]
pub struct HubSpotClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubSpotClient {
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApi(format!("Failed to create HubSpot client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Converts a non-2xx upstream response into `AppError::Upstream`,
    /// keeping the upstream status and its JSON error body.
    async fn upstream_error(
        response: reqwest::Response,
        what: &str,
    ) -> AppError {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let details: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text));
        AppError::Upstream {
            status,
            error: format!("Failed to {}", what),
            details,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: reqwest::Url,
        what: &str,
    ) -> Result<T, AppError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("HubSpot request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(response, what).await);
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApi(format!("Failed to parse HubSpot response: {}", e))
        })
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: reqwest::Url,
        body: &Value,
        what: &str,
    ) -> Result<T, AppError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("HubSpot request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(response, what).await);
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApi(format!("Failed to parse HubSpot response: {}", e))
        })
    }

    fn url(&self, path: &str) -> Result<reqwest::Url, AppError> {
        reqwest::Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| AppError::ExternalApi(format!("Failed to build URL: {}", e)))
    }

    fn url_with_params(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Url, AppError> {
        reqwest::Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| AppError::ExternalApi(format!("Failed to build URL: {}", e)))
    }

    /// GET /crm/v3/objects/contacts
    pub async fn list_contacts(
        &self,
        limit: u32,
        properties: &str,
    ) -> Result<CrmList<CrmObject>, AppError> {
        let url = self.url_with_params(
            "/crm/v3/objects/contacts",
            &[("limit", limit.to_string().as_str()), ("properties", properties)],
        )?;
        self.get_json(url, "fetch contacts").await
    }

    /// GET /crm/v3/objects/contacts/{id}
    pub async fn get_contact(
        &self,
        contact_id: &str,
        properties: &str,
    ) -> Result<CrmObject, AppError> {
        let url = self.url_with_params(
            &format!("/crm/v3/objects/contacts/{}", contact_id),
            &[("properties", properties)],
        )?;
        self.get_json(url, "fetch contact").await
    }

    /// POST /crm/v3/objects/contacts
    pub async fn create_contact(
        &self,
        properties: &Map<String, Value>,
    ) -> Result<CrmObject, AppError> {
        let url = self.url("/crm/v3/objects/contacts")?;
        let body = json!({ "properties": properties });
        self.post_json(url, &body, "create contact").await
    }

    /// GET /crm/v3/objects/deals
    pub async fn list_deals(
        &self,
        limit: u32,
        properties: &str,
    ) -> Result<CrmList<CrmObject>, AppError> {
        let url = self.url_with_params(
            "/crm/v3/objects/deals",
            &[("limit", limit.to_string().as_str()), ("properties", properties)],
        )?;
        self.get_json(url, "fetch deals").await
    }

    /// POST /crm/v3/objects/deals, optionally associated to a contact.
    pub async fn create_deal(
        &self,
        properties: &Value,
        contact_id: Option<&str>,
    ) -> Result<CrmObject, AppError> {
        let url = self.url("/crm/v3/objects/deals")?;
        let associations = match contact_id {
            Some(id) => json!([{
                "to": { "id": id },
                "types": [{
                    "associationCategory": "HUBSPOT_DEFINED",
                    "associationTypeId": DEAL_TO_CONTACT_ASSOCIATION_TYPE_ID,
                }]
            }]),
            None => json!([]),
        };
        let body = json!({ "properties": properties, "associations": associations });
        self.post_json(url, &body, "create deal").await
    }

    /// GET /crm/v3/pipelines/deals
    pub async fn list_pipelines(&self) -> Result<CrmList<Pipeline>, AppError> {
        let url = self.url("/crm/v3/pipelines/deals")?;
        self.get_json(url, "fetch pipelines").await
    }

    /// GET /crm/v3/objects/{from}/{id}/associations/{to}
    pub async fn associations(
        &self,
        from_type: &str,
        object_id: &str,
        to_type: &str,
    ) -> Result<CrmList<AssociationRef>, AppError> {
        let url = self.url(&format!(
            "/crm/v3/objects/{}/{}/associations/{}",
            from_type, object_id, to_type
        ))?;
        self.get_json(url, "fetch associations").await
    }

    /// POST /crm/v3/objects/{type}/batch/read
    pub async fn batch_read(
        &self,
        object_type: &str,
        ids: &[String],
        properties: &[&str],
    ) -> Result<CrmList<CrmObject>, AppError> {
        let url = self.url(&format!("/crm/v3/objects/{}/batch/read", object_type))?;
        let inputs: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        let body = json!({ "inputs": inputs, "properties": properties });
        self.post_json(url, &body, "batch read objects").await
    }

    /// GET /crm/v3/objects/products filtered by exact name, limit 1.
    pub async fn search_product(&self, name: &str) -> Result<Option<CrmObject>, AppError> {
        let filter = json!([{
            "filters": [{
                "propertyName": "name",
                "operator": "EQ",
                "value": name,
            }]
        }]);
        let url = self.url_with_params(
            "/crm/v3/objects/products",
            &[
                ("limit", "1"),
                ("properties", "name"),
                ("filterGroups", filter.to_string().as_str()),
            ],
        )?;
        let list: CrmList<CrmObject> = self.get_json(url, "search products").await?;
        Ok(list.results.into_iter().next())
    }

    /// POST /crm/v3/objects/products
    pub async fn create_product(&self, name: &str, price: &str) -> Result<CrmObject, AppError> {
        let url = self.url("/crm/v3/objects/products")?;
        let body = json!({ "properties": { "name": name, "price": price } });
        self.post_json(url, &body, "create product").await
    }

    /// POST /crm/v3/objects/line_items
    pub async fn create_line_item(&self, properties: &Value) -> Result<CrmObject, AppError> {
        let url = self.url("/crm/v3/objects/line_items")?;
        let body = json!({ "properties": properties });
        self.post_json(url, &body, "create line item").await
    }

    /// PUT /crm/v3/objects/line_items/{li}/associations/deals/{deal}/{type}
    pub async fn associate_line_item_to_deal(
        &self,
        line_item_id: &str,
        deal_id: &str,
    ) -> Result<(), AppError> {
        let url = self.url(&format!(
            "/crm/v3/objects/line_items/{}/associations/deals/{}/{}",
            line_item_id, deal_id, LINE_ITEM_TO_DEAL_ASSOCIATION_TYPE_ID
        ))?;

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("HubSpot request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(response, "associate line item to deal").await);
        }

        Ok(())
    }
}
