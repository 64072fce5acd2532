use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::{anyhow, Context};
use control::InboundPolicy;
use serde::Deserialize;
use shared::domain::{LocoSummary, SwitchSummary};
use tracing::warn;

const SETTINGS_FILE: &str = "bridge.toml";
const DEVICE_PORT: u16 = 15731;

#[derive(Debug, Clone)]
pub struct Settings {
    pub http_bind: String,
    pub device_addr: String,
    pub listen_bind: String,
    pub inbound_policy: String,
    pub read_timeout_ms: u64,
    pub subscriber_capacity: usize,
    pub locos: Vec<LocoSummary>,
    pub switches: Vec<SwitchSummary>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_bind: "0.0.0.0:5005".into(),
            device_addr: "192.168.20.42:15731".into(),
            listen_bind: "0.0.0.0:15730".into(),
            inbound_policy: "acknowledged".into(),
            read_timeout_ms: 1000,
            subscriber_capacity: event_bus::DEFAULT_CAPACITY,
            locos: Vec::new(),
            switches: Vec::new(),
        }
    }
}

impl Settings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Shape of `bridge.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    http_bind: Option<String>,
    device_addr: Option<String>,
    listen_bind: Option<String>,
    inbound_policy: Option<String>,
    read_timeout_ms: Option<u64>,
    subscriber_capacity: Option<usize>,
    #[serde(default)]
    locos: Vec<LocoSummary>,
    #[serde(default)]
    switches: Vec<SwitchSummary>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    apply_file(&mut settings, Path::new(SETTINGS_FILE));
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, path: &Path) {
    let Ok(raw) = fs::read_to_string(path) else {
        return;
    };
    if let Err(error) = apply_toml(settings, &raw) {
        warn!(path = %path.display(), %error, "ignoring unparsable settings file");
    }
}

fn apply_toml(settings: &mut Settings, raw: &str) -> Result<(), toml::de::Error> {
    let file = toml::from_str::<FileSettings>(raw)?;
    if let Some(v) = file.http_bind {
        settings.http_bind = v;
    }
    if let Some(v) = file.device_addr {
        settings.device_addr = v;
    }
    if let Some(v) = file.listen_bind {
        settings.listen_bind = v;
    }
    if let Some(v) = file.inbound_policy {
        settings.inbound_policy = v;
    }
    if let Some(v) = file.read_timeout_ms {
        settings.read_timeout_ms = v;
    }
    if let Some(v) = file.subscriber_capacity {
        settings.subscriber_capacity = v;
    }
    if !file.locos.is_empty() {
        settings.locos = file.locos;
    }
    if !file.switches.is_empty() {
        settings.switches = file.switches;
    }
    Ok(())
}

/// Short names first, `APP__*` last so it wins.
fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    for key in ["HTTP_BIND", "APP__HTTP_BIND"] {
        if let Some(v) = lookup(key) {
            settings.http_bind = v;
        }
    }
    for key in ["CS2_ADDR", "APP__DEVICE_ADDR"] {
        if let Some(v) = lookup(key) {
            settings.device_addr = v;
        }
    }
    if let Some(v) = lookup("APP__LISTEN_BIND") {
        settings.listen_bind = v;
    }
    if let Some(v) = lookup("APP__INBOUND_POLICY") {
        settings.inbound_policy = v;
    }
    if let Some(v) = lookup("APP__READ_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.read_timeout_ms = parsed,
            Err(error) => warn!(value = %v, %error, "ignoring APP__READ_TIMEOUT_MS"),
        }
    }
    if let Some(v) = lookup("APP__SUBSCRIBER_CAPACITY") {
        match v.parse::<usize>() {
            Ok(parsed) => settings.subscriber_capacity = parsed,
            Err(error) => warn!(value = %v, %error, "ignoring APP__SUBSCRIBER_CAPACITY"),
        }
    }
}

/// Accepts `host:port` or a bare IP, which gets `default_port`.
pub fn parse_socket_addr(raw: &str, default_port: u16) -> anyhow::Result<SocketAddr> {
    let raw = raw.trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    raw.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .with_context(|| format!("invalid socket address '{raw}'"))
}

pub fn parse_device_addr(raw: &str) -> anyhow::Result<SocketAddr> {
    parse_socket_addr(raw, DEVICE_PORT)
}

pub fn parse_policy(raw: &str) -> anyhow::Result<InboundPolicy> {
    raw.parse::<InboundPolicy>().map_err(|error| anyhow!(error))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
