use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;
use url::Url;

use crate::{
    backoff::{ReconnectPolicy, DEFAULT_MAX_ATTEMPTS},
    error::ClientError,
    store::{NOTIFICATION_CAPACITY, RECENT_ACTIVITY_CAPACITY},
    types::SessionIdentity,
};

pub const SETTINGS_FILE: &str = "collab.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub collaboration_path: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub activity_capacity: usize,
    pub notification_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            collaboration_path: "/ws/collaboration".into(),
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: DEFAULT_MAX_ATTEMPTS,
            activity_capacity: RECENT_ACTIVITY_CAPACITY,
            notification_capacity: NOTIFICATION_CAPACITY,
        }
    }
}

impl ClientSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.reconnect_max_attempts,
        }
    }

    /// Resolves the websocket endpoint: `https` maps to `wss`, `http` to `ws`.
    pub fn endpoint(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(self.server_url.trim()).map_err(|err| {
            ClientError::InvalidServerUrl {
                url: self.server_url.clone(),
                reason: err.to_string(),
            }
        })?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::UnsupportedScheme(scheme.to_string()))?;

        let base = url.path().trim_end_matches('/').to_string();
        let path = self.collaboration_path.trim_start_matches('/');
        url.set_path(&format!("{base}/{path}"));
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

pub fn collaboration_url(endpoint: &Url, identity: &SessionIdentity) -> Url {
    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("userId", &identity.user_id.to_string())
            .append_pair("tenantId", &identity.tenant_id.to_string())
            .append_pair("sessionType", &identity.session_type);
        if let Some(entity_id) = identity.entity_id {
            query.append_pair("entityId", &entity_id.to_string());
        }
    }
    url
}

pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    if let Err(err) = apply_file(&mut settings, Path::new(SETTINGS_FILE)) {
        tracing::debug!(%err, "collab: settings file not applied");
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn apply_file(settings: &mut ClientSettings, path: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file_cfg = toml::from_str::<HashMap<String, String>>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;

    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("collaboration_path") {
        settings.collaboration_path = v.clone();
    }
    if let Some(v) = file_cfg.get("reconnect_base_delay_ms") {
        parse_into(v, &mut settings.reconnect_base_delay_ms);
    }
    if let Some(v) = file_cfg.get("reconnect_max_delay_ms") {
        parse_into(v, &mut settings.reconnect_max_delay_ms);
    }
    if let Some(v) = file_cfg.get("reconnect_max_attempts") {
        parse_into(v, &mut settings.reconnect_max_attempts);
    }
    Ok(())
}

pub fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("COLLAB_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("COLLAB_PATH") {
        settings.collaboration_path = v;
    }
    if let Some(v) = lookup("COLLAB_RECONNECT_BASE_MS") {
        parse_into(&v, &mut settings.reconnect_base_delay_ms);
    }
    if let Some(v) = lookup("COLLAB_RECONNECT_MAX_MS") {
        parse_into(&v, &mut settings.reconnect_max_delay_ms);
    }
    if let Some(v) = lookup("COLLAB_RECONNECT_MAX_ATTEMPTS") {
        parse_into(&v, &mut settings.reconnect_max_attempts);
    }
}

fn parse_into<T: std::str::FromStr>(raw: &str, slot: &mut T) {
    if let Ok(parsed) = raw.trim().parse::<T>() {
        *slot = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
