use anyhow::{Context, Result};
use dotenvy::dotenv;
use harvester::{LoginCredentials, SecretString};
use std::env;
use std::num::NonZeroU32;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub session_cookie: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: Option<String>,
    pub model: String,
    pub token_budget: usize,
    pub requests_per_minute: Option<NonZeroU32>,
    pub user_agents: Vec<String>,
    pub proxies: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("HARVEST_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://harvest.db".to_string()),
            session_cookie: non_empty("LINKEDIN_SESSION_COOKIE").map(SecretString::from),
            username: non_empty("LINKEDIN_USERNAME"),
            password: non_empty("LINKEDIN_PASSWORD").map(SecretString::from),
            openai_api_key: non_empty("OPENAI_API_KEY").map(SecretString::from),
            openai_base_url: non_empty("OPENAI_BASE_URL"),
            model: env::var("HARVEST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            token_budget: env::var("HARVEST_TOKEN_BUDGET")
                .unwrap_or_else(|_| "2048".to_string())
                .parse()
                .context("HARVEST_TOKEN_BUDGET must be a valid number")?,
            requests_per_minute: match non_empty("HARVEST_REQUESTS_PER_MINUTE") {
                Some(rpm) => Some(
                    rpm.parse()
                        .context("HARVEST_REQUESTS_PER_MINUTE must be a positive number")?,
                ),
                None => NonZeroU32::new(20),
            },
            user_agents: list("HARVEST_USER_AGENTS"),
            proxies: list("HARVEST_PROXIES"),
        })
    }

    /// Form-login credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<LoginCredentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                Some(LoginCredentials::new(username.clone(), password.expose()))
            }
            _ => None,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `|`-separated list (user agent strings contain commas).
fn list(key: &str) -> Vec<String> {
    non_empty(key)
        .map(|raw| {
            raw.split('|')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
