//! Desired-state data model (§3) and YAML loading.

mod loader;
mod validate;

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use loader::{ConfigError, ConfigReader, FsConfigReader};
pub use validate::validate_group_identifiers;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeSpec {
    #[serde(default = "default_volume_size")]
    pub size: u32,
    #[serde(default = "default_volume_type")]
    pub r#type: String,
    #[serde(default)]
    pub boot: bool,
}

fn default_volume_size() -> u32 {
    12
}

fn default_volume_type() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupConfig {
    pub count: u32,
    pub flavor: String,
    #[serde(default = "default_image_alias")]
    pub image: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub volume: Option<VolumeSpec>,
    #[serde(default)]
    pub secondary_htcondor_cluster: bool,
}

fn default_image_alias() -> String {
    "default".to_string()
}

impl GroupConfig {
    /// The tag used in log messages and, absent an explicit override, as
    /// the Condor `group` accounting attribute.
    pub fn group_tag(&self, group_id: &str) -> String {
        self.group.clone().unwrap_or_else(|| group_id.to_string())
    }

    pub fn is_dated(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Is `day` inside this group's active window? Undated groups are
    /// always active.
    pub fn active_on(&self, day: NaiveDate) -> bool {
        if let Some(start) = self.start {
            if day < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if day > end {
                return false;
            }
        }
        true
    }

    /// Whether this group is a training group for splitter/rounding
    /// purposes: its id starts with "training", or its `group` tag
    /// contains "training".
    pub fn is_training(&self, group_id: &str) -> bool {
        group_id.starts_with("training") || self.group.as_deref().unwrap_or("").contains("training")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DesiredState {
    pub images: HashMap<String, String>,
    pub nodes_inventory: HashMap<String, u32>,
    pub network: String,
    pub sshkey: String,
    #[serde(default)]
    pub secgroups: Vec<String>,
    #[serde(default)]
    pub pubkeys: Vec<String>,
    #[serde(default)]
    pub graceful: bool,
    pub deployment: indexmap::IndexMap<String, GroupConfig>,
}

impl DesiredState {
    pub fn image_for(&self, alias: &str) -> Option<&str> {
        self.images.get(alias).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tag_defaults_to_identifier() {
        let g = GroupConfig {
            count: 1,
            flavor: "m1.small".into(),
            image: "default".into(),
            group: None,
            start: None,
            end: None,
            volume: None,
            secondary_htcondor_cluster: false,
        };
        assert_eq!(g.group_tag("compute"), "compute");
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let g = GroupConfig {
            count: 1,
            flavor: "m1.small".into(),
            image: "default".into(),
            group: None,
            start: Some(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()),
            end: Some(NaiveDate::from_ymd_opt(2025, 1, 12).unwrap()),
            volume: None,
            secondary_htcondor_cluster: false,
        };
        assert!(g.active_on(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()));
        assert!(g.active_on(NaiveDate::from_ymd_opt(2025, 1, 12).unwrap()));
        assert!(!g.active_on(NaiveDate::from_ymd_opt(2025, 1, 9).unwrap()));
        assert!(!g.active_on(NaiveDate::from_ymd_opt(2025, 1, 13).unwrap()));
    }
}
