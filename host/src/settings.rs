//! The configuration collaborator: a sectioned JSON file fed into [ProbeConfig::apply].
//!
//! ```json
//! { "speedtest": { "PING_TARGET": "1.1.1.1", "PING_TEST_INTERVAL": 60 },
//!   "ftp": { "SERVER": "ftp.example.org", "REMOTE_PATH": "/upload/{session}.txt" } }
//! ```
//!
//! Nothing in the file is fatal. A missing or unreadable file, a bad value or an unknown key is
//! logged and the affected settings keep their defaults.

use std::path::Path;

use log::{error, info, warn};
use netprobe::config::ProbeConfig;
use serde_json::{Map, Value};

/// Loads the settings in `path` on top of the built-in defaults.
pub fn load(path: &Path) -> ProbeConfig {
    let mut config = ProbeConfig::new();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            error!("Error loading config {}: {e}, using defaults", path.display());
            return config;
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(sections)) => {
            let applied = apply_sections(&mut config, &sections);
            info!("Applied {applied} settings from {}", path.display());
        }
        Ok(_) => error!("Config {} is not a JSON object, using defaults", path.display()),
        Err(e) => error!("Error loading config {}: {e}, using defaults", path.display()),
    }
    config
}

/// Applies every `section.KEY` pair in `sections` and returns how many were accepted.
pub fn apply_sections(config: &mut ProbeConfig, sections: &Map<String, Value>) -> usize {
    let mut applied = 0;
    for (key, value) in flatten(sections) {
        match config.apply(&key, &value) {
            Ok(()) => applied += 1,
            Err(e) => warn!("Ignoring setting: {e}"),
        }
    }
    applied
}

/// Turns `{"section": {"KEY": value}}` into `("section.KEY", "value")` pairs. Values that are not
/// scalars are skipped.
fn flatten(sections: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (section, entries) in sections {
        let Value::Object(entries) = entries else {
            warn!("Ignoring config section {section}: not an object");
            continue;
        };
        for (name, value) in entries {
            let key = format!("{section}.{name}");
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    warn!("Ignoring setting {key}: not a scalar");
                    continue;
                }
            };
            pairs.push((key, text));
        }
    }
    pairs
}
