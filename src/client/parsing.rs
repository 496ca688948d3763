//! Parsing of redis and sentinel text replies.
//!
//! All parsing functions are pure so they can be tested without a live node:
//! - `INFO replication` output into a [`RedisRole`]
//! - `SENTINEL MASTER` flat key/value replies into a [`SentinelMonitor`]
//! - `CONFIG GET` pairs and declared `redis.conf` lines for drift comparison

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::types::{DEFAULT_REDIS_PORT, Endpoint, RedisRole, SentinelMonitor};

/// Errors that can occur during parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to compile regex: {0}")]
    RegexCompilation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

static INFO_KV_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([\w-]+):(.+)$").ok());

/// Parse key-value pairs from INFO command output.
///
/// INFO output format: `key:value` per line, with optional section headers starting with `#`.
///
/// # Example
/// ```
/// use redis_failover_operator::client::parsing::parse_info_output;
///
/// let info = "role:master\nconnected_slaves:2\n";
/// let parsed = parse_info_output(info).unwrap();
/// assert_eq!(parsed.get("role"), Some(&"master".to_string()));
/// ```
pub fn parse_info_output(info: &str) -> Result<HashMap<String, String>, ParseError> {
    let kv_regex = INFO_KV_RE
        .as_ref()
        .ok_or_else(|| ParseError::RegexCompilation("info key/value pattern".to_string()))?;

    let mut result = HashMap::new();

    for line in info.lines() {
        let line = line.trim();

        // Skip empty lines and section headers
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = kv_regex.captures(line)
            && let (Some(key), Some(value)) = (caps.get(1), caps.get(2))
        {
            result.insert(key.as_str().to_string(), value.as_str().trim().to_string());
        }
    }

    Ok(result)
}

/// Parse the replication role from `INFO replication` output.
///
/// Replicas report `role:slave` together with `master_host` / `master_port`.
pub fn parse_role(info: &str) -> Result<RedisRole, ParseError> {
    let parsed = parse_info_output(info)?;
    let role = parsed
        .get("role")
        .ok_or_else(|| ParseError::MissingField("role".to_string()))?;

    match role.as_str() {
        "master" => Ok(RedisRole::Master),
        "slave" | "replica" => {
            let master = parsed.get("master_host").map(|host| {
                let port = parsed
                    .get("master_port")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_REDIS_PORT);
                Endpoint::new(host.clone(), port)
            });
            Ok(RedisRole::Replica { master })
        }
        other => Err(ParseError::Parse(format!("unknown role '{}'", other))),
    }
}

/// Fold a flat `[k1, v1, k2, v2, ...]` reply into a map.
///
/// A trailing key without a value is an error since it means the reply was
/// truncated.
pub fn pairs_to_map(reply: &[String]) -> Result<BTreeMap<String, String>, ParseError> {
    if reply.len() % 2 != 0 {
        return Err(ParseError::Parse(format!(
            "expected key/value pairs, got {} elements",
            reply.len()
        )));
    }
    Ok(reply
        .chunks_exact(2)
        .filter_map(|pair| match pair {
            [k, v] => Some((k.to_ascii_lowercase(), v.clone())),
            _ => None,
        })
        .collect())
}

/// Monitor fields that are reported as settings rather than identity.
const SENTINEL_IDENTITY_FIELDS: &[&str] = &[
    "name",
    "ip",
    "port",
    "runid",
    "flags",
    "quorum",
    "num-other-sentinels",
    "num-slaves",
];

/// Parse a `SENTINEL MASTER <name>` reply.
pub fn parse_sentinel_master(reply: &[String]) -> Result<SentinelMonitor, ParseError> {
    let fields = pairs_to_map(reply)?;

    let ip = fields
        .get("ip")
        .ok_or_else(|| ParseError::MissingField("ip".to_string()))?;
    let port: u16 = parse_field(&fields, "port")?;
    let quorum: u32 = parse_field(&fields, "quorum")?;
    let other_sentinels: u32 = parse_field(&fields, "num-other-sentinels")?;
    let known_replicas: u32 = parse_field(&fields, "num-slaves")?;

    let settings = fields
        .iter()
        .filter(|(k, _)| !SENTINEL_IDENTITY_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(SentinelMonitor {
        master: Some(Endpoint::new(ip.clone(), port)),
        quorum,
        known_sentinels: other_sentinels + 1,
        known_replicas,
        settings,
    })
}

fn parse_field<T: std::str::FromStr>(
    fields: &BTreeMap<String, String>,
    key: &str,
) -> Result<T, ParseError> {
    let raw = fields
        .get(key)
        .ok_or_else(|| ParseError::MissingField(key.to_string()))?;
    raw.trim()
        .parse()
        .map_err(|_| ParseError::Parse(format!("{} is not a number: '{}'", key, raw)))
}

/// Split a declared config line into `(parameter, value)`.
///
/// The parameter is lowercased; the value keeps its internal spacing so
/// multi-token values like `save 900 1` survive.
///
/// ```
/// use redis_failover_operator::client::parsing::split_config_line;
///
/// assert_eq!(split_config_line("maxmemory 100mb"), Some(("maxmemory".to_string(), "100mb".to_string())));
/// assert_eq!(split_config_line("save 900 1"), Some(("save".to_string(), "900 1".to_string())));
/// assert_eq!(split_config_line("lonely"), None);
/// ```
pub fn split_config_line(line: &str) -> Option<(String, String)> {
    let (param, value) = line.trim().split_once(char::is_whitespace)?;
    let value = value.trim();
    if param.is_empty() || value.is_empty() {
        return None;
    }
    Some((param.to_ascii_lowercase(), value.to_string()))
}

static MEMORY_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)(k|kb|m|mb|g|gb)$").ok());

/// Normalise a config value the way `CONFIG GET` reports it.
///
/// Memory units are expanded to bytes (`1k` = 1000, `1kb` = 1024, and so on)
/// and everything is lowercased, so `100mb` and `104857600` compare equal.
pub fn normalize_config_value(value: &str) -> String {
    let lowered = value.trim().to_ascii_lowercase();

    if let Some(re) = MEMORY_RE.as_ref()
        && let Some(caps) = re.captures(&lowered)
        && let (Some(num), Some(unit)) = (caps.get(1), caps.get(2))
        && let Ok(n) = num.as_str().parse::<u64>()
    {
        let factor: u64 = match unit.as_str() {
            "k" => 1_000,
            "kb" => 1_024,
            "m" => 1_000_000,
            "mb" => 1_024 * 1_024,
            "g" => 1_000_000_000,
            _ => 1_024 * 1_024 * 1_024,
        };
        if let Some(bytes) = n.checked_mul(factor) {
            return bytes.to_string();
        }
    }

    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Declared lines grouped by parameter, first occurrence first.
///
/// Repeated parameters (`save 900 1`, `save 300 10`) are joined into one
/// value the way `CONFIG GET` reports them.
fn grouped_params(declared: &[String]) -> Vec<(String, String)> {
    let mut grouped: Vec<(String, String)> = Vec::new();
    for (param, value) in declared.iter().filter_map(|line| split_config_line(line)) {
        match grouped.iter_mut().find(|(p, _)| *p == param) {
            Some((_, existing)) => {
                existing.push(' ');
                existing.push_str(&value);
            }
            None => grouped.push((param, value)),
        }
    }
    grouped
}

/// Declared lines with repeated parameters merged, ready for `CONFIG SET`.
pub fn merged_config_lines(declared: &[String]) -> Vec<String> {
    grouped_params(declared)
        .into_iter()
        .map(|(param, value)| format!("{} {}", param, value))
        .collect()
}

/// Render the applied values of the declared parameters as config lines, in
/// declaration order, so they can be compared line-by-line with the spec.
///
/// Parameters missing from `applied` render with an empty value and therefore
/// never compare equal to a declared line.
pub fn render_applied_lines(declared: &[String], applied: &BTreeMap<String, String>) -> Vec<String> {
    grouped_params(declared)
        .into_iter()
        .map(|(param, _)| {
            let value = applied.get(&param).map(String::as_str).unwrap_or_default();
            format!("{} {}", param, normalize_config_value(value))
        })
        .collect()
}

/// Declared config lines in the canonical form produced by [`render_applied_lines`].
pub fn canonical_lines(declared: &[String]) -> Vec<String> {
    grouped_params(declared)
        .into_iter()
        .map(|(param, value)| format!("{} {}", param, normalize_config_value(&value)))
        .collect()
}
