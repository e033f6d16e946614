use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============ CRM Pass-through Shapes ============

/// A HubSpot CRM object: an opaque id plus a property bag.
///
/// Every remaining field (createdAt, updatedAt, archived, ...) is kept
/// verbatim so responses pass through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmObject {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl CrmObject {
    /// String property lookup, `None` when absent or null.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }
}

/// A HubSpot list/batch response (`{ "results": [...] }`), paging cursors
/// and batch status fields carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmList<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl<T> Default for CrmList<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            rest: Map::new(),
        }
    }
}

/// One edge in an association listing: the id of the associated object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationRef {
    pub id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub association_type: Option<String>,
}

/// A pipeline with its stages, as returned by `/crm/v3/pipelines/deals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub stages: Vec<PipelineStage>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

// ============ API Request Models ============

/// Request payload for POST /api/contacts.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContactRequest {
    pub properties: Map<String, Value>,
    /// Optional thermostat quantity; forms submit it as a string, API
    /// clients as a number, so it is parsed leniently via
    /// [`CreateContactRequest::thermostat_quantity`].
    #[serde(rename = "thermostatQuantity", default)]
    pub thermostat_quantity: Option<Value>,
}

impl CreateContactRequest {
    /// Parsed thermostat quantity; `None` when absent or not a usable integer.
    pub fn thermostat_quantity(&self) -> Option<i64> {
        parse_lenient_int(self.thermostat_quantity.as_ref()?)
    }

    /// Display name used for the generated deal: "first last", falling back
    /// to the email, then a generic label.
    pub fn contact_name(&self) -> String {
        let first = self
            .properties
            .get("firstname")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let last = self
            .properties
            .get("lastname")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let full = format!("{} {}", first, last).trim().to_string();
        if !full.is_empty() {
            return full;
        }
        self.properties
            .get("email")
            .and_then(|v| v.as_str())
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| "Customer".to_string())
    }
}

/// Request payload for POST /api/deals.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDealRequest {
    #[serde(rename = "dealProperties")]
    pub deal_properties: Map<String, Value>,
    #[serde(rename = "contactId", default)]
    pub contact_id: Option<String>,
    /// "monthly" or "annually"; together with `line_item_price` triggers the
    /// recurring line item side-effect.
    #[serde(rename = "billingFrequency", default)]
    pub billing_frequency: Option<String>,
    #[serde(rename = "lineItemPrice", default)]
    pub line_item_price: Option<Value>,
}

impl CreateDealRequest {
    pub fn line_item_price(&self) -> Option<f64> {
        parse_lenient_float(self.line_item_price.as_ref()?)
    }
}

fn parse_lenient_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_lenient_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============ API Response Models ============

/// Summary of the hardware deal created alongside a contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermostatDealSummary {
    pub id: String,
    pub amount: f64,
    pub quantity: i64,
}

/// Best-effort sub-steps of the creation chains. A failed step is logged,
/// recorded here, and omitted from the result instead of failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideStep {
    DealCreate,
    ProductFindOrCreate,
    LineItemCreate,
    LineItemAssociate,
}

/// Explicit partial-success report for a creation chain: the caller can tell
/// which best-effort steps were skipped instead of guessing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideEffects {
    #[serde(rename = "failedSteps")]
    pub failed_steps: Vec<SideStep>,
}

impl SideEffects {
    pub fn record(&mut self, step: SideStep) {
        self.failed_steps.push(step);
    }

    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

/// A hardware deal annotated with its summed line-item quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealWithQuantity {
    #[serde(flatten)]
    pub deal: CrmObject,
    pub quantity: i64,
}

// ============ AI Insight Models ============

/// The structured insight parsed out of the Gemini completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiInsight {
    #[serde(rename = "likelihoodToUpgrade")]
    pub likelihood_to_upgrade: String,
    #[serde(rename = "riskOfChurn")]
    pub risk_of_churn: String,
    #[serde(rename = "suggestedAction")]
    pub suggested_action: String,
    pub justification: String,
}

/// Response payload for POST /api/contacts/:id/ai-insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightResponse {
    pub success: bool,
    pub insight: AiInsight,
    #[serde(rename = "rawResponse")]
    pub raw_response: String,
}
