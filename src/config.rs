use std::{fs, path::Path};

use once_cell::sync::Lazy;
use rand::{distr::Alphanumeric, rng, Rng};
use serde::{Deserialize, Serialize};

// --- OAUTH CONFIG ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OAuthConfig {
    pub google_client_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialOAuthConfig {
    pub google_client_id: Option<String>,
}

impl PartialOAuthConfig {
    fn merge_into(self, final_config: &mut OAuthConfig) {
        if let Some(google_client_id) = self.google_client_id {
            final_config.google_client_id = Some(google_client_id);
        }
    }
}

// Used for deserializing user-provided config files where all fields are optional.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub base_path: Option<String>,
    pub jwt_secret: Option<String>,
    pub db_url: Option<String>,
    pub log_level: Option<String>,
    pub oauth: Option<PartialOAuthConfig>,
}

impl PartialConfig {
    /// Merges the fields of this partial config into a final config, overwriting existing values.
    fn merge_into(self, final_config: &mut FinalConfig) {
        if let Some(host) = self.host {
            final_config.host = host;
        }
        if let Some(port) = self.port {
            final_config.port = port;
        }
        if let Some(base_path) = self.base_path {
            final_config.base_path = base_path;
        }
        if let Some(jwt_secret) = self.jwt_secret {
            final_config.jwt_secret = jwt_secret;
        }
        if let Some(db_url) = self.db_url {
            final_config.db_url = db_url;
        }
        if let Some(log_level) = self.log_level {
            final_config.log_level = log_level;
        }
        if let Some(oauth) = self.oauth {
            oauth.merge_into(&mut final_config.oauth);
        }
    }
}

// The fully resolved configuration used by the application.
#[derive(Debug, Deserialize, Serialize)]
pub struct FinalConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub jwt_secret: String,
    pub db_url: String,
    pub log_level: String,
    pub oauth: OAuthConfig,
}

fn generate_random_string(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn get_env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn get_config_from_env() -> PartialConfig {
    PartialConfig {
        host: get_env_var("HOST"),
        port: get_env_var("PORT"),
        base_path: get_env_var("BASE_PATH"),
        jwt_secret: get_env_var("JWT_SECRET"),
        db_url: get_env_var("DB_URL"),
        log_level: get_env_var("LOG_LEVEL"),
        oauth: match get_env_var::<String>("GOOGLE_CLIENT_ID") {
            Some(google_client_id) => Some(PartialOAuthConfig {
                google_client_id: Some(google_client_id),
            }),
            None => None,
        },
    }
}

pub static CONFIG: Lazy<FinalConfig> = Lazy::new(|| {
    let user_config_path = if cfg!(debug_assertions) {
        if Path::new("config.local.yaml").exists() {
            Path::new("config.local.yaml")
        } else {
            Path::new("config.yaml")
        }
    } else {
        Path::new("config.yaml")
    };

    // Programmatic defaults. A fresh deployment boots on sqlite with a
    // throwaway signing secret; anything durable comes from the config file
    // or from environment variables.
    let mut final_config = FinalConfig {
        host: "0.0.0.0".to_string(),
        port: 8000,
        base_path: "/api/v1".to_string(),
        jwt_secret: generate_random_string(48),
        db_url: "./storage/modelgate.db".to_string(),
        log_level: "info".to_string(),
        oauth: OAuthConfig::default(),
    };

    // The user's config file is optional and overrides the defaults.
    if user_config_path.exists() {
        if let Ok(config_str) = fs::read_to_string(user_config_path) {
            let user_config: PartialConfig = serde_yaml::from_str(&config_str).unwrap_or_else(|e| {
                panic!(
                    "Failed to parse configuration file at {:?}: {}",
                    user_config_path, e
                )
            });
            user_config.merge_into(&mut final_config);
        }
    }

    // Environment variables have the highest priority.
    get_config_from_env().merge_into(&mut final_config);

    final_config
});
