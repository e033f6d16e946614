use serde::Deserialize;

pub const DEFAULT_HUBSPOT_BASE_URL: &str = "https://api.hubapi.com";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub hubspot_access_token: String,
    pub hubspot_base_url: String,
    /// Optional: the AI insight endpoint returns an error when absent,
    /// every other endpoint works without it.
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            hubspot_access_token: std::env::var("HUBSPOT_ACCESS_TOKEN")
                .map_err(|_| {
                    anyhow::anyhow!(
                        "HUBSPOT_ACCESS_TOKEN environment variable required. \
                         Create a .env file and add your HubSpot Private App token"
                    )
                })
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("HUBSPOT_ACCESS_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            hubspot_base_url: std::env::var("HUBSPOT_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_HUBSPOT_BASE_URL.to_string()),
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string()),
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
        };

        for (name, url) in [
            ("HUBSPOT_BASE_URL", &config.hubspot_base_url),
            ("GEMINI_BASE_URL", &config.gemini_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("HubSpot Base URL: {}", config.hubspot_base_url);
        tracing::debug!("Gemini Base URL: {}", config.gemini_base_url);
        tracing::debug!("Gemini model: {}", config.gemini_model);
        if config.gemini_api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set - AI insight endpoint will be unavailable");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
