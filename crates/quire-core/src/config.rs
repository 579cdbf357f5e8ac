use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::model::OpOrder;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub ordering: OrderingConfig,
    #[serde(default)]
    pub ids: IdConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingConfig {
    #[serde(default)]
    pub policy: OpOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdConfig {
    /// Seed for node id generation. Unset means entropy from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_true")]
    pub verify_signatures: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            verify_signatures: default_true(),
        }
    }
}

/// Partial config as found on disk. Absent keys leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigLayer {
    #[serde(default)]
    pub ordering: Option<OrderingConfig>,
    #[serde(default)]
    pub ids: Option<IdConfig>,
    #[serde(default)]
    pub replay: Option<ReplayConfig>,
}

impl ConfigLayer {
    fn apply(self, base: &mut EngineConfig) {
        if let Some(ordering) = self.ordering {
            base.ordering = ordering;
        }
        if let Some(ids) = self.ids {
            base.ids = ids;
        }
        if let Some(replay) = self.replay {
            base.replay = replay;
        }
    }
}

fn load_layer(path: &Path) -> Result<ConfigLayer> {
    if !path.exists() {
        return Ok(ConfigLayer::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ConfigLayer>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_project_config(project_root: &Path) -> Result<ConfigLayer> {
    load_layer(&project_root.join(".quire/config.toml"))
}

pub fn load_user_config() -> Result<ConfigLayer> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigLayer::default());
    };
    load_layer(&config_dir.join("quire/config.toml"))
}

/// Defaults, then user config, then project config, then `QUIRE_OP_ORDER`.
pub fn resolve_config(project_root: &Path) -> Result<EngineConfig> {
    let user = load_user_config()?;
    let project = load_project_config(project_root)?;
    let env_order = env::var("QUIRE_OP_ORDER").ok();
    merge_layers(user, project, env_order.as_deref())
}

fn merge_layers(user: ConfigLayer, project: ConfigLayer, env_order: Option<&str>) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();
    user.apply(&mut config);
    project.apply(&mut config);

    if let Some(raw) = env_order {
        config.ordering.policy = parse_order(raw)
            .with_context(|| format!("Invalid QUIRE_OP_ORDER value {raw:?}"))?;
    }
    Ok(config)
}

pub fn parse_order(raw: &str) -> Result<OpOrder> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Ok(OpOrder::Strict),
        "origin-tiebreak" | "tiebreak" => Ok(OpOrder::OriginTieBreak),
        other => anyhow::bail!("unknown op order {other:?}, expected strict or origin-tiebreak"),
    }
}

const fn default_true() -> bool {
    true
}
