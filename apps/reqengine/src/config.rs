use std::{collections::HashMap, fs, path::Path, time::Duration};

use client_core::{EngineSettings, FailurePolicy};

pub const CONFIG_FILE: &str = "reqengine.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub history_limit: u32,
    pub settle_delay_ms: u64,
    pub log_filter: String,
    pub text_failure_policy: FailurePolicy,
    pub document_failure_policy: FailurePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            history_limit: 50,
            settle_delay_ms: 800,
            log_filter: "info".into(),
            text_failure_policy: FailurePolicy::RetainAndAnnotate,
            document_failure_policy: FailurePolicy::RetainAndAnnotate,
        }
    }
}

impl Settings {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            history_limit: self.history_limit,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            text_failure_policy: self.text_failure_policy,
            document_failure_policy: self.document_failure_policy,
        }
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(CONFIG_FILE), |key| std::env::var(key).ok())
}

/// File values first, then environment overrides. Unparseable values are
/// ignored and the previous value is kept.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            let file_value = |key: &str| file_cfg.get(key).and_then(scalar_text);
            if let Some(v) = file_value("api_url") {
                settings.api_url = v;
            }
            apply(&mut settings, file_value("history_limit"), set_history_limit);
            apply(&mut settings, file_value("settle_delay_ms"), set_settle_delay);
            if let Some(v) = file_value("log_filter") {
                settings.log_filter = v;
            }
            apply(&mut settings, file_value("text_failure_policy"), set_text_policy);
            apply(&mut settings, file_value("document_failure_policy"), set_document_policy);
        }
    }

    if let Some(v) = env("REQENGINE_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env("APP__API_URL") {
        settings.api_url = v;
    }

    apply(&mut settings, env("APP__HISTORY_LIMIT"), set_history_limit);
    apply(&mut settings, env("APP__SETTLE_DELAY_MS"), set_settle_delay);

    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    apply(&mut settings, env("APP__TEXT_FAILURE_POLICY"), set_text_policy);
    apply(&mut settings, env("APP__DOCUMENT_FAILURE_POLICY"), set_document_policy);

    settings
}

fn scalar_text(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(text) => Some(text.clone()),
        toml::Value::Integer(number) => Some(number.to_string()),
        _ => None,
    }
}

fn apply(settings: &mut Settings, raw: Option<String>, set: fn(&mut Settings, &str) -> Option<()>) {
    if let Some(raw) = raw {
        let _ = set(settings, raw.trim());
    }
}

fn set_history_limit(settings: &mut Settings, raw: &str) -> Option<()> {
    settings.history_limit = raw.parse::<u32>().ok().filter(|limit| *limit > 0)?;
    Some(())
}

fn set_settle_delay(settings: &mut Settings, raw: &str) -> Option<()> {
    settings.settle_delay_ms = raw.parse().ok()?;
    Some(())
}

fn set_text_policy(settings: &mut Settings, raw: &str) -> Option<()> {
    settings.text_failure_policy = raw.parse().ok()?;
    Some(())
}

fn set_document_policy(settings: &mut Settings, raw: &str) -> Option<()> {
    settings.document_failure_policy = raw.parse().ok()?;
    Some(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
