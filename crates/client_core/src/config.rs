use std::{fs, path::Path, time::Duration};

use ethers::types::Address;
use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::ChainId;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "vault.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scoring_endpoint: String,
    pub wallet_rpc_url: Option<String>,
    pub contract_address: String,
    pub chain_id: Option<u64>,
    pub assess_timeout_secs: u64,
    pub receipt_poll_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub watch_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scoring_endpoint: "http://localhost:3001/assess-risk".into(),
            wallet_rpc_url: None,
            contract_address: "0x1234567890abcdef1234567890abcdef12345678".into(),
            chain_id: Some(ChainId::SEPOLIA.0),
            assess_timeout_secs: 20,
            receipt_poll_ms: 1_000,
            confirmation_timeout_secs: 300,
            watch_interval_ms: 2_000,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.scoring_endpoint_url()?;
        self.contract_address()?;
        if self.assess_timeout_secs == 0 {
            bail!("assess_timeout_secs must be greater than zero");
        }
        if self.confirmation_timeout_secs == 0 {
            bail!("confirmation_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn scoring_endpoint_url(&self) -> anyhow::Result<Url> {
        Url::parse(self.scoring_endpoint.trim())
            .with_context(|| format!("invalid scoring endpoint '{}'", self.scoring_endpoint))
    }

    pub fn contract_address(&self) -> anyhow::Result<Address> {
        self.contract_address
            .trim()
            .parse::<Address>()
            .with_context(|| format!("invalid contract address '{}'", self.contract_address))
    }

    pub fn expected_chain_id(&self) -> Option<ChainId> {
        self.chain_id.map(ChainId)
    }

    pub fn assess_timeout(&self) -> Duration {
        Duration::from_secs(self.assess_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms.max(1))
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(1))
    }
}

/// Defaults, then the TOML file, then environment overrides.
///
/// An explicit `path` must exist; without one, `vault.toml` in the working
/// directory is read when present.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => read_settings_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_settings_file(default_path)?
            } else {
                Settings::default()
            }
        }
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))
}

/// `APP__*` names take precedence over the plain ones.
pub fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let lookup_pair = |plain: &str, prefixed: &str| lookup(prefixed).or_else(|| lookup(plain));

    if let Some(v) = lookup_pair("SCORING_ENDPOINT", "APP__SCORING_ENDPOINT") {
        settings.scoring_endpoint = v;
    }
    if let Some(v) = lookup_pair("WALLET_RPC_URL", "APP__WALLET_RPC_URL") {
        let v = v.trim();
        settings.wallet_rpc_url = (!v.is_empty()).then(|| v.to_string());
    }
    if let Some(v) = lookup_pair("CONTRACT_ADDRESS", "APP__CONTRACT_ADDRESS") {
        settings.contract_address = v;
    }

    if let Some(v) = lookup("APP__CHAIN_ID") {
        let v = v.trim();
        settings.chain_id = if v.is_empty() || v.eq_ignore_ascii_case("any") {
            None
        } else {
            Some(parse_number("APP__CHAIN_ID", v)?)
        };
    }
    if let Some(v) = lookup("APP__ASSESS_TIMEOUT_SECS") {
        settings.assess_timeout_secs = parse_number("APP__ASSESS_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = lookup("APP__RECEIPT_POLL_MS") {
        settings.receipt_poll_ms = parse_number("APP__RECEIPT_POLL_MS", &v)?;
    }
    if let Some(v) = lookup("APP__CONFIRMATION_TIMEOUT_SECS") {
        settings.confirmation_timeout_secs = parse_number("APP__CONFIRMATION_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = lookup("APP__WATCH_INTERVAL_MS") {
        settings.watch_interval_ms = parse_number("APP__WATCH_INTERVAL_MS", &v)?;
    }

    Ok(())
}

fn parse_number(key: &str, raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
