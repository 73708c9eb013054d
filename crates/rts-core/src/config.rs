//! Collector-wide configuration, defaults, and `${VAR}` interpolation.
//!
//! Grounded on `ServerConfig`'s shape (a plain struct with a literal
//! `Default` impl) from the teacher's `realtime_communication` server,
//! generalized to the three env vars and three ports spec section 6.4
//! names.

use std::collections::HashMap;
use std::env;

use serde_json::Value;

/// Top-level process configuration, assembled from environment variables
/// with the literal defaults of spec section 6.4.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub ingest_port: u16,
    pub http_port: u16,
    pub buffer_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { ingest_port: 9090, http_port: 9091, buffer_size: 10_000 }
    }
}

impl CollectorConfig {
    /// Reads `RUNTIMESCOPE_PORT`, `RUNTIMESCOPE_HTTP_PORT`, and
    /// `RUNTIMESCOPE_BUFFER_SIZE`, falling back to defaults on absence or
    /// parse failure.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ingest_port: env_parsed("RUNTIMESCOPE_PORT").unwrap_or(defaults.ingest_port),
            http_port: env_parsed("RUNTIMESCOPE_HTTP_PORT").unwrap_or(defaults.http_port),
            buffer_size: env_parsed("RUNTIMESCOPE_BUFFER_SIZE").unwrap_or(defaults.buffer_size),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Expands `${VAR}` references in every string leaf of `value`, recursing
/// through arrays and objects. Unknown variables expand to the empty
/// string, per spec section 9 design notes.
pub fn interpolate_env(value: &Value, env: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, env)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_env(v, env)).collect())
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), interpolate_env(v, env));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn interpolate_str(input: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        match rest.find("${") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                match after.find('}') {
                    None => {
                        // Unterminated reference: emit verbatim and stop.
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let var_name = &after[..end];
                        out.push_str(env.get(var_name).map(String::as_str).unwrap_or(""));
                        rest = &after[end + 1..];
                    }
                }
            }
        }
    }
    out
}

/// Loads the process environment into the map shape `interpolate_env`
/// expects, for use at call sites that read `infrastructure.{json,yaml}`.
pub fn current_env_map() -> HashMap<String, String> {
    env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn interpolates_known_var() {
        let env = env_of(&[("HOST", "db.internal")]);
        assert_eq!(interpolate_str("postgres://${HOST}:5432", &env), "postgres://db.internal:5432");
    }

    #[test]
    fn unknown_var_expands_to_empty() {
        let env = env_of(&[]);
        assert_eq!(interpolate_str("${MISSING}-suffix", &env), "-suffix");
    }

    #[test]
    fn recurses_through_arrays_and_objects() {
        let env = env_of(&[("NAME", "prod-db")]);
        let value = json!({
            "databases": [ { "name": "${NAME}", "port": 5432 } ],
            "label": "no vars here",
        });
        let resolved = interpolate_env(&value, &env);
        assert_eq!(resolved["databases"][0]["name"], "prod-db");
        assert_eq!(resolved["databases"][0]["port"], 5432);
        assert_eq!(resolved["label"], "no vars here");
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = CollectorConfig::default();
        assert_eq!(cfg.ingest_port, 9090);
        assert_eq!(cfg.http_port, 9091);
        assert_eq!(cfg.buffer_size, 10_000);
    }
}
