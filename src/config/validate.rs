use super::{loader::ConfigError, DesiredState};

/// Rejects identifier pairs where one is a strict prefix of the other,
/// which would make `naming::belongs_to_group` ambiguous (§9).
pub fn validate_group_identifiers(state: &DesiredState) -> Result<(), ConfigError> {
    let ids: Vec<&String> = state.deployment.keys().collect();
    for (i, a) in ids.iter().enumerate() {
        for b in ids.iter().skip(i + 1) {
            if a.starts_with(b.as_str()) {
                return Err(ConfigError::AmbiguousGroupPrefix((*b).clone(), (*a).clone()));
            }
            if b.starts_with(a.as_str()) {
                return Err(ConfigError::AmbiguousGroupPrefix((*a).clone(), (*b).clone()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GroupConfig;
    use indexmap::IndexMap;
    use std::collections::HashMap;

    fn group() -> GroupConfig {
        GroupConfig {
            count: 1,
            flavor: "m1.small".into(),
            image: "default".into(),
            group: None,
            start: None,
            end: None,
            volume: None,
            secondary_htcondor_cluster: false,
        }
    }

    fn state_with(ids: &[&str]) -> DesiredState {
        let mut deployment = IndexMap::new();
        for id in ids {
            deployment.insert(id.to_string(), group());
        }
        DesiredState {
            images: HashMap::new(),
            nodes_inventory: HashMap::new(),
            network: "net".into(),
            sshkey: "key".into(),
            secgroups: vec![],
            pubkeys: vec![],
            graceful: true,
            deployment,
        }
    }

    #[test]
    fn distinct_identifiers_are_fine() {
        assert!(validate_group_identifiers(&state_with(&["compute", "upload"])).is_ok());
    }

    #[test]
    fn prefix_collision_is_rejected() {
        let err = validate_group_identifiers(&state_with(&["compute", "compute-general"]))
            .expect_err("should reject");
        assert!(matches!(err, ConfigError::AmbiguousGroupPrefix(_, _)));
    }
}
