use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub auth: AuthConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared with the upstream authentication service.
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Which upstream provider to talk to ("deepseek", "openai", "mock").
    pub kind: String,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl ChatConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(ChatConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("chat_db"), is_prod)?,
            },
            auth: AuthConfig {
                jwt_secret: get_env("AUTH_JWT_SECRET", None, is_prod)?,
            },
            provider: ProviderConfig {
                kind: get_env("CHAT_PROVIDER", Some("deepseek"), is_prod)?,
                api_base: get_env(
                    "CHAT_PROVIDER_API_BASE",
                    Some("https://api.deepseek.com"),
                    is_prod,
                )?,
                api_key: get_env("CHAT_PROVIDER_API_KEY", None, is_prod)?,
                model: get_env("CHAT_MODEL", Some("deepseek-reasoner"), is_prod)?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}
