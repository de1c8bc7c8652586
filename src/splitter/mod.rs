//! Secondary-Cluster Splitter (§4.8): a pure transformation that produces a
//! desired-state document diverting a fraction of each group's capacity to
//! a secondary HTCondor cluster image, without reducing the original
//! group's emitted count (see SPEC_FULL.md's primary-count-retention
//! supplement).

use indexmap::IndexMap;
use thiserror::Error;

use crate::config::{DesiredState, GroupConfig};

#[derive(Error, Debug)]
pub enum SplitterError {
    #[error("'fraction' must be between 0 and 1, got {0}")]
    FractionOutOfRange(f64),
}

const IMAGE_MAPPING: &[(&str, &str)] = &[
    ("default", "htcondor-secondary"),
    ("gpu", "htcondor-secondary-gpu"),
    ("secure", "htcondor-secondary"),
    ("alma", "htcondor-secondary"),
    ("htcondor-secondary", "htcondor-secondary"),
    ("htcondor-secondary-gpu", "htcondor-secondary-gpu"),
];

fn map_image(alias: &str) -> String {
    IMAGE_MAPPING
        .iter()
        .find(|(from, _)| *from == alias)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| alias.to_string())
}

fn ceil_fraction(count: u32, fraction: f64) -> u32 {
    (count as f64 * fraction).ceil() as u32
}

/// Splits `state` so that `fraction` of each group's capacity is diverted
/// to a secondary HTCondor cluster. `fraction <= 0` returns `state`
/// unchanged (clone); `fraction` outside `[0, 1]` is an error.
pub fn allocate(state: &DesiredState, fraction: f64) -> Result<DesiredState, SplitterError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(SplitterError::FractionOutOfRange(fraction));
    }
    if fraction <= 0.0 {
        return Ok(state.clone());
    }

    let original = &state.deployment;
    let mut primary: IndexMap<String, GroupConfig> = original.clone();
    let mut secondary: IndexMap<String, GroupConfig> = IndexMap::new();

    for (group_id, config) in original.iter() {
        let count_primary = ceil_fraction(config.count, 1.0 - fraction);
        let count_secondary = if config.is_training(group_id) {
            config.count.saturating_sub(count_primary)
        } else {
            ceil_fraction(config.count, fraction)
        };

        if count_primary > 0 {
            let mut reduced = config.clone();
            reduced.count = count_primary;
            primary.insert(group_id.clone(), reduced);
        } else {
            primary.shift_remove(group_id);
        }

        if count_secondary > 0 {
            let mut secondary_config = config.clone();
            secondary_config.count = count_secondary;
            secondary_config.image = map_image(&config.image);
            secondary_config.secondary_htcondor_cluster = true;
            secondary.insert(format!("{group_id}-htcondor-secondary"), secondary_config);
        }
    }

    // modified = secondary | primary, in that order (matches the Python
    // `secondary_deployment | primary_deployment` assignment).
    let mut modified: IndexMap<String, GroupConfig> = IndexMap::new();
    upsert_all(&mut modified, &secondary);
    upsert_all(&mut modified, &primary);

    // Final key-order/value resolution: upload, then interactive, then
    // other non-training, then the full modified map, then the full
    // original map. Each step updates values in place for keys already
    // present (mirroring Python's dict union) and appends new keys.
    let mut result: IndexMap<String, GroupConfig> = IndexMap::new();

    upsert_filtered(&mut result, &modified, |id, c| {
        c.group_tag(strip_secondary_suffix(id)) == "upload" && c.count > 0
    });
    upsert_filtered(&mut result, &modified, |id, c| {
        c.group_tag(strip_secondary_suffix(id)) == "interactive" && c.count > 0
    });
    upsert_filtered(&mut result, &modified, |id, c| {
        !c.group_tag(strip_secondary_suffix(id)).contains("training") && c.count > 0
    });
    upsert_all(&mut result, &modified);
    upsert_all(&mut result, original);

    let mut new_state = state.clone();
    new_state.deployment = result;
    Ok(new_state)
}

/// A `<group>-htcondor-secondary` key's `group_tag` default (when the
/// config omits `group`) should reflect the *original* group identifier,
/// not the suffixed secondary key, since the secondary config is a clone
/// of the original with the same `group` field (or lack thereof).
fn strip_secondary_suffix(group_id: &str) -> &str {
    group_id
        .strip_suffix("-htcondor-secondary")
        .unwrap_or(group_id)
}

fn upsert_all(dest: &mut IndexMap<String, GroupConfig>, src: &IndexMap<String, GroupConfig>) {
    for (k, v) in src.iter() {
        dest.insert(k.clone(), v.clone());
    }
}

fn upsert_filtered(
    dest: &mut IndexMap<String, GroupConfig>,
    src: &IndexMap<String, GroupConfig>,
    predicate: impl Fn(&str, &GroupConfig) -> bool,
) {
    for (k, v) in src.iter() {
        if predicate(k, v) {
            dest.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn group(count: u32, group_tag: Option<&str>) -> GroupConfig {
        GroupConfig {
            count,
            flavor: "m1.small".into(),
            image: "default".into(),
            group: group_tag.map(String::from),
            start: None,
            end: None,
            volume: None,
            secondary_htcondor_cluster: false,
        }
    }

    fn state(deployment: Vec<(&str, GroupConfig)>) -> DesiredState {
        let mut dep = IndexMap::new();
        for (k, v) in deployment {
            dep.insert(k.to_string(), v);
        }
        DesiredState {
            images: HashMap::new(),
            nodes_inventory: HashMap::new(),
            network: "net".into(),
            sshkey: "key".into(),
            secgroups: vec![],
            pubkeys: vec![],
            graceful: true,
            deployment: dep,
        }
    }

    #[test]
    fn fraction_out_of_range_is_rejected() {
        let s = state(vec![]);
        assert!(matches!(
            allocate(&s, 1.5),
            Err(SplitterError::FractionOutOfRange(_))
        ));
        assert!(matches!(
            allocate(&s, -0.1),
            Err(SplitterError::FractionOutOfRange(_))
        ));
    }

    #[test]
    fn zero_fraction_is_a_no_op() {
        let s = state(vec![("compute", group(10, None))]);
        let out = allocate(&s, 0.0).unwrap();
        assert_eq!(out.deployment["compute"].count, 10);
        assert_eq!(out.deployment.len(), 1);
    }

    #[test]
    fn scenario_s6_primary_retains_original_count() {
        let s = state(vec![
            ("compute", group(10, None)),
            ("training-a", group(3, None)),
        ]);
        let out = allocate(&s, 0.3).unwrap();

        assert_eq!(out.deployment["compute"].count, 10);
        assert_eq!(out.deployment["compute-htcondor-secondary"].count, 3);
        assert_eq!(
            out.deployment["compute-htcondor-secondary"].image,
            "htcondor-secondary"
        );
        assert!(out.deployment["compute-htcondor-secondary"].secondary_htcondor_cluster);

        assert_eq!(out.deployment["training-a"].count, 3);
        assert!(!out.deployment.contains_key("training-a-htcondor-secondary"));
    }

    #[test]
    fn key_order_is_upload_interactive_nontraining_then_rest() {
        let s = state(vec![
            ("training-a", group(4, Some("training-a"))),
            ("upload", group(2, Some("upload"))),
            ("interactive", group(2, Some("interactive"))),
            ("compute", group(4, Some("compute"))),
        ]);
        let out = allocate(&s, 0.5).unwrap();
        let keys: Vec<&str> = out.deployment.keys().map(String::as_str).collect();
        assert_eq!(keys[0], "upload");
        assert!(keys.iter().position(|k| *k == "interactive").unwrap() < keys.iter().position(|k| *k == "compute").unwrap());
    }

    #[test]
    fn gpu_image_maps_to_gpu_secondary() {
        let mut g = group(10, None);
        g.image = "gpu".into();
        let s = state(vec![("compute", g)]);
        let out = allocate(&s, 0.5).unwrap();
        assert_eq!(
            out.deployment["compute-htcondor-secondary"].image,
            "htcondor-secondary-gpu"
        );
    }
}
