//! Workspace-persisted engine settings.
//!
//! Each section is a JSON object stored under `setup.<section>` in the settings
//! table. Reads start from the defaults and apply whatever was saved; writes go
//! through the same validated merge.

use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Fetch,
    Polling,
    Reports,
}

impl SetupSection {
    pub const ALL: [SetupSection; 3] = [Self::Fetch, Self::Polling, Self::Reports];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "polling" => Some(Self::Polling),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Polling => "polling",
            Self::Reports => "reports",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Fetch => "setup.fetch",
            Self::Polling => "setup.polling",
            Self::Reports => "setup.reports",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Fetch => json!({
            "timeoutMs": 15000,
            "autoResolve": true
        }),
        SetupSection::Polling => json!({
            "intervalMs": 30000
        }),
        SetupSection::Reports => json!({
            "showAllKeys": ["status"]
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_key_list(v: &Value, key: &str) -> Result<Vec<String>, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    if items.len() > 32 {
        return Err(format!("{} must have at most 32 entries", key));
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let s = item
            .as_str()
            .map(str::trim)
            .ok_or_else(|| format!("{} must be an array of strings", key))?;
        if s.is_empty() || s.len() > 64 {
            return Err(format!("{} entries must be 1..=64 characters", key));
        }
        if !out.iter().any(|k: &String| k == s) {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Fetch => match k.as_str() {
                "timeoutMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 100, 600_000)?));
                }
                "autoResolve" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown fetch field: {}", k)),
            },
            SetupSection::Polling => match k.as_str() {
                "intervalMs" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1_000, 3_600_000)?),
                    );
                }
                _ => return Err(format!("unknown polling field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "showAllKeys" => {
                    obj.insert(k.clone(), json!(parse_key_list(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(e) = merge_section_patch(section, &mut current, &single) {
                    tracing::warn!(section = section.name(), error = %e, "ignoring saved setting");
                }
            }
        }
    }
    Ok(current)
}

pub fn save_section(conn: &Connection, section: SetupSection, value: &Value) -> anyhow::Result<()> {
    db::settings_set_json(conn, section.key(), value)
}

/// Resolved settings used when opening screens.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub fetch_timeout: Duration,
    pub auto_resolve: bool,
    pub poll_interval: Duration,
    pub show_all_keys: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_sections(
            &default_section(SetupSection::Fetch),
            &default_section(SetupSection::Polling),
            &default_section(SetupSection::Reports),
        )
    }
}

impl EngineConfig {
    /// Defaults when no workspace is open.
    pub fn load(conn: Option<&Connection>) -> anyhow::Result<Self> {
        let Some(conn) = conn else {
            return Ok(Self::default());
        };
        Ok(Self::from_sections(
            &load_section(conn, SetupSection::Fetch)?,
            &load_section(conn, SetupSection::Polling)?,
            &load_section(conn, SetupSection::Reports)?,
        ))
    }

    fn from_sections(fetch: &Value, polling: &Value, reports: &Value) -> Self {
        let ms = |v: &Value, key: &str, fallback: u64| {
            v.get(key).and_then(Value::as_u64).unwrap_or(fallback)
        };
        Self {
            fetch_timeout: Duration::from_millis(ms(fetch, "timeoutMs", 15_000)),
            auto_resolve: fetch
                .get("autoResolve")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            poll_interval: Duration::from_millis(ms(polling, "intervalMs", 30_000)),
            show_all_keys: reports
                .get("showAllKeys")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_workspace() {
        let cfg = EngineConfig::load(None).expect("load");
        assert_eq!(cfg.fetch_timeout, Duration::from_secs(15));
        assert!(cfg.auto_resolve);
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.show_all_keys, vec!["status".to_string()]);
    }

    #[test]
    fn merge_rejects_out_of_range_and_unknown_fields() {
        let mut cur = default_section(SetupSection::Fetch);
        let patch = json!({ "timeoutMs": 5 }).as_object().cloned().expect("obj");
        assert!(merge_section_patch(SetupSection::Fetch, &mut cur, &patch).is_err());

        let patch = json!({ "bogus": 1 }).as_object().cloned().expect("obj");
        assert!(merge_section_patch(SetupSection::Polling, &mut cur, &patch).is_err());
    }

    #[test]
    fn show_all_keys_are_trimmed_and_deduplicated() {
        let mut cur = default_section(SetupSection::Reports);
        let patch = json!({ "showAllKeys": [" status ", "status", "term"] })
            .as_object()
            .cloned()
            .expect("obj");
        merge_section_patch(SetupSection::Reports, &mut cur, &patch).expect("merge");
        assert_eq!(cur["showAllKeys"], json!(["status", "term"]));
    }
}
