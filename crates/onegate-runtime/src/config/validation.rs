//! Configuration validation utilities.

use std::collections::HashSet;

use onegate_core::{Filter, InstanceConfig};

use super::error::{ConfigError, ConfigResult};
use super::schema::{AccountConfig, GatewayConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &GatewayConfig) -> ConfigResult<()> {
    validate_general(config)?;
    validate_accounts(config)?;
    Ok(())
}

/// Validates protocol-wide defaults on their own.
fn validate_general(config: &GatewayConfig) -> ConfigResult<()> {
    for key in config.general.keys() {
        validate_protocol_key(key)?;
        let instance = config.instance_config(key, serde_json::Value::Null)?;
        validate_instance(key, &instance)?;
    }
    Ok(())
}

/// Validates all account configurations.
fn validate_accounts(config: &GatewayConfig) -> ConfigResult<()> {
    let mut seen = HashSet::new();

    for account in &config.accounts {
        validate_account(account)?;
        if !seen.insert((&account.platform, &account.account_id)) {
            return Err(ConfigError::DuplicateAccount(account.label()));
        }

        for key in account.protocols.keys() {
            validate_protocol_key(key)?;
        }
        for (key, instance) in config.instance_configs(&account.platform, &account.account_id)? {
            validate_instance(&format!("{}/{key}", account.label()), &instance)?;
        }
    }

    Ok(())
}

fn validate_account(account: &AccountConfig) -> ConfigResult<()> {
    if account.platform.is_empty() {
        return Err(ConfigError::missing_field("accounts.platform"));
    }
    if account.account_id.is_empty() {
        return Err(ConfigError::missing_field("accounts.account_id"));
    }
    if account.account_id.contains('/') || account.platform.contains('/') {
        return Err(ConfigError::validation(format!(
            "Account {} cannot contain '/'",
            account.label()
        )));
    }
    Ok(())
}

/// Protocol keys are `<protocol>.<version>`.
fn validate_protocol_key(key: &str) -> ConfigResult<()> {
    match key.split_once('.') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => Ok(()),
        _ => Err(ConfigError::InvalidProtocolKey(key.to_string())),
    }
}

/// Validates one merged instance configuration.
fn validate_instance(key: &str, instance: &InstanceConfig) -> ConfigResult<()> {
    if instance.post_timeout == 0 {
        return Err(ConfigError::validation(format!(
            "{key}: post_timeout must be greater than 0"
        )));
    }
    if !instance.ws_reverse.is_empty() && instance.reconnect_interval == 0 {
        return Err(ConfigError::validation(format!(
            "{key}: reconnect_interval must be greater than 0"
        )));
    }

    for url in &instance.ws_reverse {
        validate_url(url, "ws")?;
    }
    for url in instance.webhook_targets() {
        validate_url(url, "http")?;
    }

    if let Some(filter) = &instance.filter {
        Filter::compile(filter).map_err(|e| ConfigError::InvalidFilter {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

/// Validates a URL.
fn validate_url(url: &str, expected_scheme: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("url"));
    }

    let valid_schemes = match expected_scheme {
        "ws" => ["ws://", "wss://"],
        "http" => ["http://", "https://"],
        _ => return Err(ConfigError::validation("Unknown URL scheme type")),
    };

    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> GatewayConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_empty_config() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_duplicate_account() {
        let account = json!({ "platform": "qq", "account_id": "1" });
        let result = validate_config(&config(json!({ "accounts": [account.clone(), account] })));
        assert!(matches!(result, Err(ConfigError::DuplicateAccount(_))));
    }

    #[test]
    fn test_validate_same_id_on_other_platform() {
        let result = validate_config(&config(json!({ "accounts": [
            { "platform": "qq", "account_id": "1" },
            { "platform": "tg", "account_id": "1" },
        ] })));
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_url_schemes() {
        let result = validate_config(&config(json!({
            "general": { "onebot.v11": { "ws_reverse": ["http://wrong"] } }
        })));
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));

        let result = validate_config(&config(json!({
            "accounts": [{
                "platform": "qq",
                "account_id": "1",
                "protocols": { "onebot.v12": { "webhooks": ["ws://wrong"] } },
            }]
        })));
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_validate_filter_and_key() {
        let result = validate_config(&config(json!({
            "general": { "onebot.v11": { "filter": { "$and": 5 } } }
        })));
        assert!(matches!(result, Err(ConfigError::InvalidFilter { .. })));

        let result = validate_config(&config(json!({ "general": { "onebot": {} } })));
        assert!(matches!(result, Err(ConfigError::InvalidProtocolKey(_))));
    }

    #[test]
    fn test_validate_post_timeout() {
        let result = validate_config(&config(json!({
            "general": { "onebot.v11": { "post_timeout": 0 } }
        })));
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
