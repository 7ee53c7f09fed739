//! First-run setup experience
//!
//! Collects an OpenRouter API key, validates it against the key endpoint,
//! and lets the operator pick a model from the live catalogue (with a
//! static fallback when the catalogue can't be fetched).

use crate::config::Config;
use std::io::{self, Write};
use std::time::Duration;

const AUTH_KEY_URL: &str = "https://openrouter.ai/api/v1/auth/key";
const MODELS_URL: &str = "https://openrouter.ai/api/v1/models";
const SETUP_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shown when the model catalogue is unreachable or empty.
const FALLBACK_MODELS: &[&str] = &[
    "microsoft/phi-3-medium-128k-instruct",
    "microsoft/phi-3-mini-128k-instruct",
    "meta-llama/llama-3-8b-instruct",
    "mistralai/mistral-7b-instruct",
    "openai/gpt-4o",
];

/// Check if this is a first run (no config written and no API key stored).
pub fn is_first_run() -> bool {
    !Config::exists() && !Config::has_api_key()
}

/// Run the interactive setup flow and persist the resulting config.
pub async fn run_setup() -> Result<Config, String> {
    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  LOGMEDIC SETUP                                         │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!();
    println!("  logmedic watches your logs and uses OpenRouter to diagnose");
    println!("  errors and suggest fixes. It needs an API key to do that.");
    println!();
    println!("  1. Get a free API key at: https://openrouter.ai/keys");
    println!("  2. Paste it below (saved in your system keychain when available)");
    println!();

    let key = prompt_line("  API Key: ")?;
    if key.is_empty() {
        return Err("No API key provided".to_string());
    }

    if !Config::validate_api_key_format(&key) {
        println!();
        println!("  Warning: Key doesn't look like an OpenRouter key (should start with sk-)");
    }

    print!("  Validating key...");
    let _ = io::stdout().flush();
    if validate_api_key(&key).await {
        println!(" ok");
    } else {
        println!();
        return Err("API key was rejected by OpenRouter".to_string());
    }

    println!();
    println!("  Fetching available models...");
    let models = available_models(&key).await;

    println!();
    println!("  Available models:");
    for (i, model) in models.iter().enumerate() {
        println!("    {}. {}", i + 1, model);
    }
    println!();

    let choice = prompt_line("  Select a model (number) or enter a custom id: ")?;
    let model = match choice.parse::<usize>() {
        Ok(n) if n >= 1 && n <= models.len() => models[n - 1].clone(),
        _ if !choice.is_empty() => choice,
        _ => crate::config::DEFAULT_MODEL.to_string(),
    };

    Config::set_api_key(&key)?;

    let config = Config {
        model,
        ..Config::load()
    };
    config.save()?;

    println!();
    println!("  + API key saved");
    println!("  + Config written to {}", Config::config_location());
    println!();
    println!("  Add log files to watch under `sources` in the config, then");
    println!("  run `logmedic run` to start monitoring.");
    println!();

    Ok(config)
}

/// Ask OpenRouter whether the key is accepted.
pub async fn validate_api_key(api_key: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(SETUP_HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client
        .get(AUTH_KEY_URL)
        .header("Authorization", format!("Bearer {}", api_key))
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            eprintln!("  Warning: key validation request failed: {}", err);
            false
        }
    }
}

/// Fetch model ids from the catalogue, falling back to a static list when
/// the request fails or returns nothing usable.
pub async fn available_models(api_key: &str) -> Vec<String> {
    let fallback = || FALLBACK_MODELS.iter().map(|m| m.to_string()).collect();

    let client = match reqwest::Client::builder().timeout(SETUP_HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return fallback(),
    };

    let response = match client
        .get(MODELS_URL)
        .header("Authorization", format!("Bearer {}", api_key))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            eprintln!("  Warning: model fetch failed: {}", response.status());
            return fallback();
        }
        Err(err) => {
            eprintln!("  Warning: model fetch failed: {}", err);
            return fallback();
        }
    };

    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(_) => return fallback(),
    };

    let models: Vec<String> = body
        .get("data")
        .and_then(|d| d.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("id").and_then(|id| id.as_str()))
                .map(|id| id.to_string())
                .collect()
        })
        .unwrap_or_default();

    if models.is_empty() {
        eprintln!("  Warning: no models returned from API, using fallback list.");
        return fallback();
    }
    models
}

fn prompt_line(prompt: &str) -> Result<String, String> {
    print!("{}", prompt);
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    io::stdin().read_line(&mut input).map_err(|e| e.to_string())?;
    Ok(input.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_models_are_nonempty_and_unique() {
        assert!(!FALLBACK_MODELS.is_empty());
        let mut sorted: Vec<&str> = FALLBACK_MODELS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), FALLBACK_MODELS.len());
    }

    #[test]
    fn test_default_model_is_in_fallback_list() {
        assert!(FALLBACK_MODELS.contains(&crate::config::DEFAULT_MODEL));
    }
}
