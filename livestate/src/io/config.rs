//! Live-state configuration stored as TOML (default `livestate.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelConfig;
use crate::core::grouping::GroupingParams;
use crate::core::layout::LayoutParams;
use crate::graph::Position;

/// Live-state configuration (TOML).
///
/// Edited by humans; every table and field is optional and falls back to the
/// defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    pub channel: ChannelSection,
    pub layout: LayoutSection,
    pub grouping: GroupingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelSection {
    /// Linear backoff unit: retry `n` waits `n * base_delay_ms`.
    pub base_delay_ms: u64,
    /// Consecutive failed live attempts before polling takes over.
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_attempts: 5,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutSection {
    pub node_width: f64,
    pub node_height: f64,
    pub padding: f64,
    pub origin_x: f64,
    pub origin_y: f64,
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
    pub level_pitch: f64,
    pub sibling_pitch: f64,
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            node_width: 200.0,
            node_height: 80.0,
            padding: 50.0,
            origin_x: 100.0,
            origin_y: 100.0,
            center_x: 400.0,
            center_y: 300.0,
            radius: 250.0,
            level_pitch: 150.0,
            sibling_pitch: 250.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroupingSection {
    pub padding: f64,
    pub label_height: f64,
    pub snap_threshold: f64,
    /// `0` disables grid snapping.
    pub grid_size: f64,
}

impl Default for GroupingSection {
    fn default() -> Self {
        Self {
            padding: 20.0,
            label_height: 24.0,
            snap_threshold: 8.0,
            grid_size: 20.0,
        }
    }
}

impl LiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel.base_delay_ms == 0 {
            return Err(anyhow!("channel.base_delay_ms must be > 0"));
        }
        if self.channel.max_attempts == 0 {
            return Err(anyhow!("channel.max_attempts must be > 0"));
        }
        if self.channel.poll_interval_ms == 0 {
            return Err(anyhow!("channel.poll_interval_ms must be > 0"));
        }
        for (name, value) in [
            ("layout.node_width", self.layout.node_width),
            ("layout.node_height", self.layout.node_height),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(anyhow!("{} must be > 0", name));
            }
        }
        for (name, value) in [
            ("layout.padding", self.layout.padding),
            ("layout.radius", self.layout.radius),
            ("layout.level_pitch", self.layout.level_pitch),
            ("layout.sibling_pitch", self.layout.sibling_pitch),
            ("grouping.padding", self.grouping.padding),
            ("grouping.label_height", self.grouping.label_height),
            ("grouping.snap_threshold", self.grouping.snap_threshold),
            ("grouping.grid_size", self.grouping.grid_size),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(anyhow!("{} must be >= 0", name));
            }
        }
        Ok(())
    }

    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            base_delay: Duration::from_millis(self.channel.base_delay_ms),
            max_attempts: self.channel.max_attempts,
            poll_interval: Duration::from_millis(self.channel.poll_interval_ms),
        }
    }

    pub fn layout(&self) -> LayoutParams {
        let layout = &self.layout;
        LayoutParams {
            node_width: layout.node_width,
            node_height: layout.node_height,
            padding: layout.padding,
            origin: Position::new(layout.origin_x, layout.origin_y),
            center: Position::new(layout.center_x, layout.center_y),
            radius: layout.radius,
            level_pitch: layout.level_pitch,
            sibling_pitch: layout.sibling_pitch,
        }
    }

    /// Grouping parameters; node dimensions come from the layout table.
    pub fn grouping(&self) -> GroupingParams {
        GroupingParams {
            node_width: self.layout.node_width,
            node_height: self.layout.node_height,
            padding: self.grouping.padding,
            label_height: self.grouping.label_height,
            snap_threshold: self.grouping.snap_threshold,
            grid_size: self.grouping.grid_size,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LiveConfig::default()`.
pub fn load_config(path: &Path) -> Result<LiveConfig> {
    if !path.exists() {
        let cfg = LiveConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LiveConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LiveConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
