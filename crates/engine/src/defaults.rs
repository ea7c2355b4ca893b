use std::collections::HashMap;

use crate::{config_dir::flowlab_config_dir, types::ClientConfig};

/// PingOne issuer convention for an environment.
#[must_use]
pub fn issuer_for_environment(environment_id: &str) -> String {
    format!("https://auth.pingone.com/{environment_id}/as")
}

/// Default client configurations for known providers.
///
/// Builtins ship without a `client_id`; one must come from the config file
/// or environment, and flow construction rejects configs that still lack it.
fn builtin_defaults() -> HashMap<String, ClientConfig> {
    let mut m = HashMap::new();
    m.insert("pingone".into(), ClientConfig {
        client_id: String::new(),
        issuer: String::new(),
        environment_id: None,
        redirect_uri: "http://localhost:3000/callback".into(),
        scopes: vec!["openid".into(), "profile".into(), "email".into()],
        auth_url: None,
        token_url: None,
        response_mode: None,
        client_secret: None,
        extra_auth_params: vec![],
    });
    m.insert("example".into(), ClientConfig {
        client_id: String::new(),
        issuer: "https://auth.example.com".into(),
        environment_id: None,
        redirect_uri: "http://localhost:3000/callback".into(),
        scopes: vec!["openid".into()],
        auth_url: None,
        token_url: None,
        response_mode: None,
        client_secret: None,
        extra_auth_params: vec![],
    });
    m
}

/// Path to the providers config file.
fn config_path() -> std::path::PathBuf {
    flowlab_config_dir().join("providers.json")
}

/// Load the client config for a provider.
///
/// Priority:
/// 1. User config file (`{config_dir}/providers.json`)
/// 2. Environment variables (`FLOWLAB_OAUTH_{PROVIDER}_CLIENT_ID`, etc.)
/// 3. Built-in defaults
pub fn load_client_config(provider: &str) -> Option<ClientConfig> {
    // Start from builtin defaults
    let mut config = builtin_defaults().remove(provider)?;

    // Override from config file
    if let Ok(data) = std::fs::read_to_string(config_path())
        && let Ok(file_configs) = serde_json::from_str::<HashMap<String, ClientConfig>>(&data)
        && let Some(file_config) = file_configs.get(provider)
    {
        config = file_config.clone();
    }

    // Override individual fields from env vars
    let env_prefix = format!(
        "FLOWLAB_OAUTH_{}_",
        provider.to_uppercase().replace('-', "_")
    );
    if let Ok(v) = std::env::var(format!("{env_prefix}CLIENT_ID")) {
        config.client_id = v;
    }
    if let Ok(v) = std::env::var(format!("{env_prefix}ENVIRONMENT_ID")) {
        config.environment_id = Some(v);
    }
    if let Ok(v) = std::env::var(format!("{env_prefix}ISSUER")) {
        config.issuer = v;
    }
    if let Ok(v) = std::env::var(format!("{env_prefix}REDIRECT_URI")) {
        config.redirect_uri = v;
    }
    if let Ok(v) = std::env::var(format!("{env_prefix}SCOPES")) {
        config.scopes = v.split_whitespace().map(str::to_string).collect();
    }

    // An environment id stands in for an explicit issuer.
    if config.issuer.is_empty()
        && let Some(env_id) = &config.environment_id
    {
        config.issuer = issuer_for_environment(env_id);
    }

    Some(config)
}
