//! Group Planner (§4.6): per-group diff between desired and observed state.

use chrono::NaiveDate;

use crate::cloud::Server;
use crate::config::GroupConfig;
use crate::naming::belongs_to_group;

#[derive(Debug, Clone, Default)]
pub struct GroupPlan {
    /// Positive: servers to create. Negative: servers to remove.
    pub increment: i64,
    pub removals: Vec<Server>,
    pub replacements: Vec<Server>,
}

/// Selects the servers observed for `group_id` out of the full fleet
/// listing, bucketing by the `vgcnbwc-<group_id>-` name prefix.
pub fn servers_for_group<'a>(all_servers: &'a [Server], group_id: &str) -> Vec<&'a Server> {
    all_servers
        .iter()
        .filter(|s| belongs_to_group(&s.name, group_id))
        .collect()
}

/// Computes the increment, removal list, and replacement list for one
/// group. `resolved_image_id` is the image id the group should currently
/// be running, already resolved through the cloud client by the caller.
pub fn plan_group(
    group: &GroupConfig,
    observed: &[&Server],
    today: NaiveDate,
    resolved_image_id: &str,
) -> GroupPlan {
    let effective_count = if group.active_on(today) { group.count } else { 0 };

    let mut sorted: Vec<&Server> = observed.to_vec();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let increment = effective_count as i64 - sorted.len() as i64;

    let (removals, kept): (Vec<Server>, Vec<Server>) = if increment < 0 {
        let remove_count = (-increment) as usize;
        let removals = sorted[..remove_count.min(sorted.len())]
            .iter()
            .map(|s| (*s).clone())
            .collect();
        let kept = sorted[remove_count.min(sorted.len())..]
            .iter()
            .map(|s| (*s).clone())
            .collect();
        (removals, kept)
    } else {
        (Vec::new(), sorted.iter().map(|s| (*s).clone()).collect())
    };

    // Servers booted from a volume report no image_id and are exempt from
    // image-replacement (§4.6).
    let replacements: Vec<Server> = kept
        .into_iter()
        .filter(|s| {
            s.image_id
                .as_deref()
                .is_some_and(|id| id != resolved_image_id)
        })
        .collect();

    GroupPlan {
        increment,
        removals,
        replacements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ServerStatus;
    use std::collections::HashMap;

    fn server(name: &str, image_id: Option<&str>) -> Server {
        Server {
            id: name.to_string(),
            name: name.to_string(),
            status: ServerStatus::Active,
            image_id: image_id.map(String::from),
            addresses: HashMap::new(),
            networks: vec!["galaxy-net".into()],
        }
    }

    fn group(count: u32, start: Option<&str>, end: Option<&str>) -> GroupConfig {
        GroupConfig {
            count,
            flavor: "m1.small".into(),
            image: "default".into(),
            group: None,
            start: start.map(|s| s.parse().unwrap()),
            end: end.map(|s| s.parse().unwrap()),
            volume: None,
            secondary_htcondor_cluster: false,
        }
    }

    #[test]
    fn scenario_s1_all_new() {
        let g = group(3, None, None);
        let today: NaiveDate = "2025-06-01".parse().unwrap();
        let plan = plan_group(&g, &[], today, "img-1");
        assert_eq!(plan.increment, 3);
        assert!(plan.removals.is_empty());
    }

    #[test]
    fn scenario_s2_remove_one_oldest_by_name() {
        let g = group(3, None, None);
        let s0 = server("vgcnbwc-compute-0000", Some("img-1"));
        let s1 = server("vgcnbwc-compute-0001", Some("img-1"));
        let s2 = server("vgcnbwc-compute-0002", Some("img-1"));
        let s3 = server("vgcnbwc-compute-0003", Some("img-1"));
        let observed = vec![&s0, &s1, &s2, &s3];
        let today: NaiveDate = "2025-06-01".parse().unwrap();
        let plan = plan_group(&g, &observed, today, "img-1");
        assert_eq!(plan.increment, -1);
        assert_eq!(plan.removals.len(), 1);
        assert_eq!(plan.removals[0].name, "vgcnbwc-compute-0000");
    }

    #[test]
    fn scenario_s4_out_of_window_removes_all() {
        let g = group(2, Some("2025-01-10"), Some("2025-01-12"));
        let s0 = server("vgcnbwc-training-a-0000", Some("img-1"));
        let s1 = server("vgcnbwc-training-a-0001", Some("img-1"));
        let observed = vec![&s0, &s1];
        let today: NaiveDate = "2025-01-15".parse().unwrap();
        let plan = plan_group(&g, &observed, today, "img-1");
        assert_eq!(plan.increment, -2);
        assert_eq!(plan.removals.len(), 2);
    }

    #[test]
    fn scenario_s5_image_mismatch_is_a_replacement() {
        let g = group(1, None, None);
        let s0 = server("vgcnbwc-compute-0000", Some("img-old"));
        let observed = vec![&s0];
        let today: NaiveDate = "2025-06-01".parse().unwrap();
        let plan = plan_group(&g, &observed, today, "img-new");
        assert_eq!(plan.increment, 0);
        assert!(plan.removals.is_empty());
        assert_eq!(plan.replacements.len(), 1);
    }

    #[test]
    fn volume_booted_server_is_exempt_from_replacement() {
        let g = group(1, None, None);
        let s0 = server("vgcnbwc-compute-0000", None);
        let observed = vec![&s0];
        let today: NaiveDate = "2025-06-01".parse().unwrap();
        let plan = plan_group(&g, &observed, today, "img-new");
        assert!(plan.replacements.is_empty());
    }
}
