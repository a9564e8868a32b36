//! webclient.toml configuration.
//!
//! ```toml
//! user_agent = "inventory-sync/2.1"
//! default_timeout = "5s"
//! write_queue_depth = 8
//! tls = false
//!
//! [default_headers]
//! Accept = "application/json"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Body chunks the default transport queues ahead of the socket.
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 8;

/// `User-Agent` sent unless the options say otherwise.
pub const DEFAULT_USER_AGENT: &str = concat!("warpgrid-webclient/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// `User-Agent` header added to every request. `None` sends none.
    pub user_agent: Option<String>,
    /// Deadline applied to requests that set none, written as `"500ms"`, `"5s"`, `"2m"`.
    #[serde(with = "duration_str", skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<Duration>,
    pub write_queue_depth: usize,
    /// Use TLS unless a request says otherwise.
    pub tls: bool,
    /// Headers added to every request. Request headers with the same name win.
    pub default_headers: BTreeMap<String, String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            default_timeout: None,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
            tls: false,
            default_headers: BTreeMap::new(),
        }
    }
}

impl ClientOptions {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let options: ClientOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.write_queue_depth == 0 {
            bail!("write_queue_depth must be at least 1");
        }
        if self.default_timeout == Some(Duration::ZERO) {
            bail!("default_timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn default_timeout_duration(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(us) = s.strip_suffix("us") {
        us.trim().parse::<u64>().ok().map(Duration::from_micros)
    } else if let Some(ns) = s.strip_suffix("ns") {
        ns.trim().parse::<u64>().ok().map(Duration::from_nanos)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Inverse of [`parse_duration`], in the coarsest exact unit.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        format!("{}s", d.as_secs())
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else if nanos % 1_000 == 0 {
        format!("{}us", d.as_micros())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| {
                parse_duration(&raw)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
            })
            .transpose()
    }
}
