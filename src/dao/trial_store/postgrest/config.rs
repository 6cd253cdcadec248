use std::time::Duration;

use super::error::{PostgrestDaoError, PostgrestResult};

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Runtime configuration describing how to reach the PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// Project URL, without the `/rest/v1` suffix.
    pub base_url: String,
    /// Anonymous or service key sent as `apikey` and bearer token.
    pub api_key: String,
    /// Database schema selected through the profile headers.
    pub schema: String,
    /// Interval between two polls of a change subscription.
    pub poll_interval: Duration,
}

impl PostgrestConfig {
    /// Construct a configuration from an explicit URL and key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Override the subscription poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> PostgrestResult<Self> {
        let base_url = std::env::var("SUPABASE_URL").map_err(|_| {
            PostgrestDaoError::MissingEnvVar {
                var: "SUPABASE_URL",
            }
        })?;
        let api_key = std::env::var("SUPABASE_KEY").map_err(|_| {
            PostgrestDaoError::MissingEnvVar {
                var: "SUPABASE_KEY",
            }
        })?;

        let mut config = Self::new(base_url, api_key);
        if let Ok(schema) = std::env::var("SUPABASE_SCHEMA") {
            if !schema.trim().is_empty() {
                config = config.with_schema(schema.trim());
            }
        }

        Ok(config)
    }
}
