//! Capacity Validator (§4.2): checks a desired state against the per-flavor
//! hardware inventory, accounting for time-windowed ("dated") reservations.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::config::DesiredState;

#[derive(Debug, Clone)]
pub struct Conflict {
    pub flavor: String,
    pub date: Option<NaiveDate>,
    pub requested: u32,
    pub limit: u32,
    pub contributing_groups: Vec<String>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = self
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "undated".to_string());
        write!(
            f,
            "flavor `{}` on {}: requested {} > limit {} (groups: {})",
            self.flavor,
            when,
            self.requested,
            self.limit,
            self.contributing_groups.join(", ")
        )
    }
}

#[derive(Error, Debug)]
pub enum CapacityError {
    #[error("capacity conflicts found: [{}]", .0.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("; "))]
    Conflict(Vec<Conflict>),
}

/// Validate `state` against its own `nodes_inventory`. Non-dated groups
/// contribute to every day; dated groups contribute only within their
/// `[start, end]` window (missing bounds are unbounded on that side, see
/// SPEC_FULL.md §4.2).
pub fn validate(state: &DesiredState) -> Result<(), CapacityError> {
    let mut base_undated: HashMap<&str, u32> = HashMap::new();
    let mut undated_groups: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut dated_raw: Vec<(&str, &str, Option<NaiveDate>, Option<NaiveDate>, u32)> = Vec::new();

    for (group_id, group) in state.deployment.iter() {
        if group.count == 0 {
            continue;
        }
        let flavor = group.flavor.as_str();
        if group.is_dated() {
            dated_raw.push((group_id, flavor, group.start, group.end, group.count));
        } else {
            *base_undated.entry(flavor).or_insert(0) += group.count;
            undated_groups.entry(flavor).or_default().push(group_id);
        }
    }

    // Collect the finite set of days any *explicit* bound touches. A bound
    // left unset is unbounded on that side, so it is resolved against this
    // set's extremes rather than wall-clock time, once the set is known.
    let mut days: Vec<NaiveDate> = dated_raw
        .iter()
        .flat_map(|(_, _, s, e, _)| [*s, *e])
        .flatten()
        .collect();
    days.sort();
    days.dedup();

    let earliest = days.first().copied().unwrap_or_else(|| earliest_reference_date(state));
    let latest = days.last().copied().unwrap_or(earliest);

    let dated: Vec<(&str, &str, NaiveDate, NaiveDate, u32)> = dated_raw
        .into_iter()
        .map(|(group_id, flavor, start, end, count)| {
            (
                group_id,
                flavor,
                start.unwrap_or(earliest),
                end.unwrap_or(latest),
                count,
            )
        })
        .collect();

    let mut conflicts = Vec::new();

    for (flavor, &limit) in state.nodes_inventory.iter() {
        let base = *base_undated.get(flavor.as_str()).unwrap_or(&0);
        if base > limit {
            conflicts.push(Conflict {
                flavor: flavor.clone(),
                date: None,
                requested: base,
                limit,
                contributing_groups: undated_groups
                    .get(flavor.as_str())
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            });
        }

        for &day in &days {
            let mut requested = base;
            let mut contributing: Vec<String> = undated_groups
                .get(flavor.as_str())
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(String::from)
                .collect();
            for (group_id, g_flavor, start, end, count) in &dated {
                if *g_flavor == flavor.as_str() && day >= *start && day <= *end {
                    requested += count;
                    contributing.push((*group_id).to_string());
                }
            }
            if requested > limit {
                conflicts.push(Conflict {
                    flavor: flavor.clone(),
                    date: Some(day),
                    requested,
                    limit,
                    contributing_groups: contributing,
                });
            }
        }
    }

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(CapacityError::Conflict(conflicts))
    }
}

/// Missing `start`/`end` bounds default to today for the purpose of
/// deciding which concrete day a one-sided window covers, per SPEC_FULL.md.
fn earliest_reference_date(_state: &DesiredState) -> NaiveDate {
    chrono::Local::now().date_naive()
}
