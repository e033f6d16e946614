//! AI customer-health insight: derive numeric/date facts from the
//! per-contact aggregates, template them into a prompt, run one Gemini
//! completion, and parse the (possibly fenced) JSON answer.
//!
//! CRM reads feeding the metrics are best-effort and degrade to empty
//! sets; an unparsable completion degrades to a placeholder insight. The
//! request only fails on a missing API key or a failed completion call.

use crate::aggregation::{ContactAggregator, INSIGHT_DEAL_PROPERTIES};
use crate::errors::AppError;
use crate::gemini::GeminiClient;
use crate::hubspot::HubSpotClient;
use crate::models::{AiInsight, CrmObject, DealWithQuantity, InsightResponse};
use chrono::{DateTime, Utc};
use regex::Regex;

const INSIGHT_CONTACT_PROPERTIES: &str = "firstname,lastname,email,createdate";

/// Derived counters and dates fed into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerMetrics {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub contact_created: String,
    pub hardware_units: i64,
    pub total_hardware_value: f64,
    pub latest_hardware_purchase: Option<String>,
    pub active_subscriptions: usize,
    pub cancelled_subscriptions: usize,
    pub total_subscriptions: usize,
    pub total_trials: usize,
    pub converted_trials: usize,
    pub unconverted_trials: usize,
    pub total_trial_value: f64,
    pub latest_trial_date: Option<String>,
    pub days_since_hardware: Option<i64>,
    pub days_since_trial: Option<i64>,
}

fn amount_of(deal: &CrmObject) -> f64 {
    deal.property("amount")
        .and_then(|a| a.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn latest_createdate<'a, I>(deals: I) -> Option<String>
where
    I: Iterator<Item = &'a CrmObject>,
{
    deals
        .filter_map(|d| d.property("createdate"))
        .max_by_key(|date| parse_date(date).unwrap_or(DateTime::<Utc>::MIN_UTC))
        .map(str::to_string)
}

fn days_since(date: Option<&str>, now: DateTime<Utc>) -> Option<i64> {
    parse_date(date?).map(|d| (now - d).num_days())
}

/// Pure derivation of the prompt facts; `now` is injected so day-deltas are
/// testable.
pub fn compute_metrics(
    contact: Option<&CrmObject>,
    trials: &[CrmObject],
    hardware: &[DealWithQuantity],
    subscriptions: &[CrmObject],
    now: DateTime<Utc>,
) -> CustomerMetrics {
    let contact_property = |name: &str| {
        contact
            .and_then(|c| c.property(name))
            .unwrap_or("")
            .to_string()
    };

    let hardware_units = hardware.iter().map(|d| d.quantity).sum();
    let total_hardware_value = hardware.iter().map(|d| amount_of(&d.deal)).sum();
    let latest_hardware_purchase = latest_createdate(hardware.iter().map(|d| &d.deal));

    let status_count = |status: &str| {
        subscriptions
            .iter()
            .filter(|s| {
                s.property("status")
                    .is_some_and(|v| v.eq_ignore_ascii_case(status))
            })
            .count()
    };

    let converted_trials = trials
        .iter()
        .filter(|d| {
            d.property("converted_subscription_id")
                .is_some_and(|v| !v.is_empty())
        })
        .count();

    let latest_trial_date = latest_createdate(trials.iter());
    let contact_created = contact
        .and_then(|c| c.property("createdate"))
        .unwrap_or("Unknown")
        .to_string();

    CustomerMetrics {
        first_name: contact_property("firstname"),
        last_name: contact_property("lastname"),
        email: contact
            .and_then(|c| c.property("email"))
            .unwrap_or("N/A")
            .to_string(),
        contact_created,
        hardware_units,
        total_hardware_value,
        days_since_hardware: days_since(latest_hardware_purchase.as_deref(), now),
        latest_hardware_purchase,
        active_subscriptions: status_count("active"),
        cancelled_subscriptions: status_count("cancelled"),
        total_subscriptions: subscriptions.len(),
        total_trials: trials.len(),
        converted_trials,
        unconverted_trials: trials.len() - converted_trials,
        total_trial_value: trials.iter().map(amount_of).sum(),
        days_since_trial: days_since(latest_trial_date.as_deref(), now),
        latest_trial_date,
    }
}

fn format_days(days: Option<i64>) -> String {
    days.map(|d| d.to_string()).unwrap_or_else(|| "N/A".to_string())
}

/// Natural-language customer profile plus the JSON-shape instruction sent to
/// the completion API.
pub fn build_prompt(metrics: &CustomerMetrics) -> String {
    let mut conversion_pattern = String::new();
    if metrics.converted_trials > 0 {
        conversion_pattern.push_str(&format!(
            "- Has converted {} trial(s) to paid subscription\n",
            metrics.converted_trials
        ));
    } else {
        conversion_pattern.push_str("- No trial conversions yet\n");
    }
    if metrics.unconverted_trials > 0 {
        conversion_pattern.push_str(&format!(
            "- Has {} unconverted trial(s)\n",
            metrics.unconverted_trials
        ));
    }
    if metrics.latest_hardware_purchase.is_some() && metrics.latest_trial_date.is_none() {
        conversion_pattern.push_str("- Purchased hardware but has not started a trial\n");
    }
    if metrics.latest_trial_date.is_some() && metrics.unconverted_trials > 0 {
        conversion_pattern
            .push_str("- Started trial but has not converted to paid subscription\n");
    }

    format!(
        r#"Customer Profile for {first} {last} ({email}):

Hardware Purchases:
- Total thermostats purchased: {units}
- Total hardware value: ${hardware_value:.2}
- Latest purchase date: {latest_purchase}

Subscription Status:
- Active subscriptions: {active}
- Cancelled subscriptions: {cancelled}
- Total subscriptions: {total_subs}

Trial Activity:
- Total trials: {total_trials}
- Converted trials: {converted}
- Unconverted trials: {unconverted}
- Total trial value: ${trial_value:.2}
- Latest trial date: {latest_trial}

Key Dates:
- Customer since: {created}
- Days since last hardware purchase: {days_hardware}
- Days since last trial: {days_trial}

Conversion Pattern:
{conversion_pattern}
Based on this customer data, provide a concise AI Customer Health Insight analysis. Return your response as a JSON object with the following structure:
{{
  "likelihoodToUpgrade": "Low/Medium/High with percentage (e.g., 'High (85%)')",
  "riskOfChurn": "Low/Medium/High with percentage (e.g., 'Medium (45%)')",
  "suggestedAction": "A specific, actionable marketing or sales recommendation that includes which HubSpot AI tools to use for execution",
  "justification": "A brief 2-3 sentence explanation of the insights"
}}

Focus on:
- Their engagement level (hardware ownership, trial activity)
- Conversion patterns (trial to subscription)
- Time-based signals (recent activity vs. inactivity)
- Risk factors (unconverted trials, no recent activity)
- Opportunities (upsell potential, re-engagement needs)

IMPORTANT: In your suggestedAction field, you MUST recommend specific HubSpot AI tools that sales and marketing teams can use to tactically execute on the suggestion. Examples include HubSpot AI Content Writer, ChatSpot AI, HubSpot AI Email Assistant, HubSpot AI-powered Workflows, HubSpot AI Chatbot, HubSpot AI Sales Assistant, and HubSpot AI Marketing Hub features.

Be specific and actionable in your recommendations, always tying them to HubSpot AI tool capabilities."#,
        first = metrics.first_name,
        last = metrics.last_name,
        email = metrics.email,
        units = metrics.hardware_units,
        hardware_value = metrics.total_hardware_value,
        latest_purchase = metrics
            .latest_hardware_purchase
            .as_deref()
            .unwrap_or("No purchases"),
        active = metrics.active_subscriptions,
        cancelled = metrics.cancelled_subscriptions,
        total_subs = metrics.total_subscriptions,
        total_trials = metrics.total_trials,
        converted = metrics.converted_trials,
        unconverted = metrics.unconverted_trials,
        trial_value = metrics.total_trial_value,
        latest_trial = metrics.latest_trial_date.as_deref().unwrap_or("No trials"),
        created = metrics.contact_created,
        days_hardware = format_days(metrics.days_since_hardware),
        days_trial = format_days(metrics.days_since_trial),
        conversion_pattern = conversion_pattern,
    )
}

/// Parses the completion text into an [`AiInsight`], stripping an optional
/// fenced ```json block first. An unparsable response yields the placeholder
/// insight instead of an error.
pub fn parse_insight(response_text: &str) -> AiInsight {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").unwrap();
    let json_text = fence
        .captures(response_text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(response_text);

    match serde_json::from_str::<AiInsight>(json_text.trim()) {
        Ok(insight) => insight,
        Err(e) => {
            tracing::error!("Error parsing Gemini response: {}", e);
            placeholder_insight(response_text)
        }
    }
}

fn placeholder_insight(response_text: &str) -> AiInsight {
    let truncated: String = response_text.chars().take(200).collect();
    AiInsight {
        likelihood_to_upgrade: "Analysis unavailable".to_string(),
        risk_of_churn: "Analysis unavailable".to_string(),
        suggested_action: "Review customer data manually".to_string(),
        justification: format!("{}...", truncated),
    }
}

pub struct InsightService<'a> {
    hubspot: &'a HubSpotClient,
    gemini: &'a GeminiClient,
}

impl<'a> InsightService<'a> {
    pub fn new(hubspot: &'a HubSpotClient, gemini: &'a GeminiClient) -> Self {
        Self { hubspot, gemini }
    }

    /// Aggregates the contact's CRM data, runs the completion, and parses
    /// the insight.
    pub async fn generate(&self, contact_id: &str) -> Result<InsightResponse, AppError> {
        let aggregator = ContactAggregator::new(self.hubspot);

        let contact = match self
            .hubspot
            .get_contact(contact_id, INSIGHT_CONTACT_PROPERTIES)
            .await
        {
            Ok(contact) => Some(contact),
            Err(e) => {
                tracing::warn!("Error fetching contact {} for insight: {}", contact_id, e);
                None
            }
        };

        let all_deals = match aggregator
            .associated_deals(contact_id, &INSIGHT_DEAL_PROPERTIES)
            .await
        {
            Ok(deals) => deals,
            Err(e) => {
                tracing::warn!("Error fetching deals for insight: {}", e);
                Vec::new()
            }
        };
        let (trials, hardware) = crate::aggregation::partition_by_pipeline(all_deals);
        let hardware = aggregator.annotate_quantities(hardware).await;

        let subscriptions = match aggregator.subscriptions(contact_id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!("Error fetching subscriptions for insight: {}", e);
                Vec::new()
            }
        };

        let metrics = compute_metrics(
            contact.as_ref(),
            &trials,
            &hardware,
            &subscriptions,
            Utc::now(),
        );
        let prompt = build_prompt(&metrics);

        let response_text = self.gemini.generate(&prompt).await?;
        let insight = parse_insight(&response_text);

        Ok(InsightResponse {
            success: true,
            insight,
            raw_response: response_text,
        })
    }
}
