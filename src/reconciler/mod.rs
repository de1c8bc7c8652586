//! Reconciler (§4.7): the top-level single-shot reconciliation loop.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::capacity;
use crate::cloud::{
    BlockDeviceMapping, CloudAPIError, CloudClient, CreateServerSpec, Server, ServerStatus,
};
use crate::condor::CondorError;
use crate::config::{DesiredState, GroupConfig};
use crate::error::{ApplyFailures, ReconcileError};
use crate::naming::{self, NamingError};
use crate::planner::{self, GroupPlan};
use crate::terminator::{self, SshParams, TerminatorError};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error(transparent)]
    Terminator(#[from] TerminatorError),

    #[error(transparent)]
    CloudAPI(#[from] CloudAPIError),

    #[error(transparent)]
    Naming(#[from] NamingError),
}

#[derive(Debug, Default, Clone)]
pub struct GroupReport {
    pub group_id: String,
    pub added: usize,
    pub removed: usize,
    pub replaced: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub dry_run: bool,
    pub groups: Vec<GroupReport>,
}

impl ReconcileOutcome {
    pub fn any_failure(&self) -> bool {
        self.groups.iter().any(|g| g.failed > 0)
    }
}

pub struct ReconcileTimeouts {
    pub condor_shutdown: Duration,
    pub condor_poll_interval: Duration,
    pub delete: Duration,
    pub delete_poll_interval: Duration,
    pub create_wait: Duration,
    pub create_poll_interval: Duration,
}

impl Default for ReconcileTimeouts {
    fn default() -> Self {
        Self {
            condor_shutdown: Duration::from_secs(600),
            condor_poll_interval: Duration::from_secs(10),
            delete: Duration::from_secs(300),
            delete_poll_interval: Duration::from_secs(10),
            create_wait: Duration::from_secs(300),
            create_poll_interval: Duration::from_secs(10),
        }
    }
}

pub struct UserDataRenderer<'a> {
    pub template_path: &'a Path,
    pub vars_files: &'a [std::path::PathBuf],
}

impl UserDataRenderer<'_> {
    /// Out of scope for this crate (§1 Non-goals): user-data templating is
    /// an external collaborator's concern. A real implementation would
    /// render `template_path` as Jinja/Tera with `state`, `group`, and the
    /// contents of `vars_files` in the render context.
    pub fn render(&self, _state: &DesiredState, _group: &GroupConfig) -> String {
        String::new()
    }
}

/// Single-shot reconciliation: validate capacity, list servers once,
/// compute a per-group plan, log it, and — unless `dry_run` — apply it
/// group by group in document order.
#[instrument(skip(state, cloud, renderer, ssh_params, timeouts))]
pub fn reconcile(
    state: &DesiredState,
    cloud: &dyn CloudClient,
    renderer: &UserDataRenderer,
    ssh_params: &SshParams,
    timeouts: &ReconcileTimeouts,
    today: NaiveDate,
    dry_run: bool,
) -> Result<ReconcileOutcome, ReconcileError> {
    capacity::validate(state)?;

    let all_servers = cloud.list_servers()?;
    let mut reserved_names: HashSet<String> = all_servers.iter().map(|s| s.name.clone()).collect();

    let mut group_plans: Vec<(String, GroupPlan, String)> = Vec::new();
    for (group_id, group) in state.deployment.iter() {
        let observed = planner::servers_for_group(&all_servers, group_id);
        let resolved_image_id = resolve_image(state, cloud, group)?;
        let plan = planner::plan_group(group, &observed, today, &resolved_image_id);
        log_plan(group_id, &plan);
        group_plans.push((group_id.clone(), plan, resolved_image_id));
    }

    if dry_run {
        let groups = group_plans
            .iter()
            .map(|(group_id, plan, _)| GroupReport {
                group_id: group_id.clone(),
                added: plan.increment.max(0) as usize,
                removed: plan.removals.len(),
                replaced: plan.replacements.len(),
                failed: 0,
            })
            .collect();
        return Ok(ReconcileOutcome {
            dry_run: true,
            groups,
        });
    }

    let mut reports = Vec::new();
    let mut failures = ApplyFailures::default();

    for (group_id, plan, resolved_image_id) in group_plans {
        let group = &state.deployment[&group_id];
        let mut report = GroupReport {
            group_id: group_id.clone(),
            ..Default::default()
        };

        if plan.increment > 0 {
            for _ in 0..plan.increment {
                match create_one(
                    state,
                    group,
                    &group_id,
                    cloud,
                    renderer,
                    &resolved_image_id,
                    &mut reserved_names,
                    timeouts,
                ) {
                    Ok(()) => report.added += 1,
                    Err(err) => {
                        warn!(group = %group_id, error_msg = %err, "failed to create server");
                        failures.push(group_id.clone(), err);
                        report.failed += 1;
                    }
                }
            }
        } else if plan.increment < 0 {
            for server in &plan.removals {
                match remove_server(server, state, cloud, ssh_params, timeouts) {
                    Ok(()) => {
                        reserved_names.remove(&server.name);
                        report.removed += 1;
                    }
                    Err(err) => {
                        warn!(server = %server.name, error_msg = %err, "failed to remove server");
                        failures.push(server.name.clone(), err);
                        report.failed += 1;
                    }
                }
            }
        }

        for server in &plan.replacements {
            match replace_server(
                server,
                state,
                group,
                cloud,
                renderer,
                ssh_params,
                &resolved_image_id,
                timeouts,
            ) {
                Ok(()) => report.replaced += 1,
                Err(err) => {
                    warn!(server = %server.name, error_msg = %err, "failed to replace server");
                    failures.push(server.name.clone(), err);
                    report.failed += 1;
                }
            }
        }

        info!(
            group = %group_id,
            added = report.added,
            removed = report.removed,
            replaced = report.replaced,
            failed = report.failed,
            "group reconciled"
        );
        reports.push(report);
    }

    if !failures.is_empty() {
        return Err(ReconcileError::Apply(failures));
    }

    Ok(ReconcileOutcome {
        dry_run: false,
        groups: reports,
    })
}

fn log_plan(group_id: &str, plan: &GroupPlan) {
    info!(
        group = %group_id,
        increment = plan.increment,
        removals = plan.removals.len(),
        replacements = plan.replacements.len(),
        "planned diff"
    );
}

fn resolve_image(
    state: &DesiredState,
    cloud: &dyn CloudClient,
    group: &GroupConfig,
) -> Result<String, CloudAPIError> {
    let alias = state
        .image_for(&group.image)
        .ok_or_else(|| CloudAPIError::ImageNotFound(group.image.clone()))?;
    if crate::cloud::looks_like_uuid(alias) {
        Ok(alias.to_string())
    } else {
        cloud.find_image(alias)
    }
}

#[allow(clippy::too_many_arguments)]
fn create_one(
    state: &DesiredState,
    group: &GroupConfig,
    group_id: &str,
    cloud: &dyn CloudClient,
    renderer: &UserDataRenderer,
    resolved_image_id: &str,
    reserved_names: &mut HashSet<String>,
    timeouts: &ReconcileTimeouts,
) -> Result<(), ApplyError> {
    let prefix = naming::group_prefix(group_id);
    let name = naming::unique_name(&prefix, reserved_names)?;
    reserved_names.insert(name.clone());

    let flavor_ref = if crate::cloud::looks_like_uuid(&group.flavor) {
        group.flavor.clone()
    } else {
        cloud.find_flavor(&group.flavor)?
    };
    let network_ref = if crate::cloud::looks_like_uuid(&state.network) {
        state.network.clone()
    } else {
        cloud.find_network(&state.network)?
    };

    let user_data = renderer.render(state, group);
    let user_data_base64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &user_data);

    let block_device_mapping_v2 = group
        .volume
        .as_ref()
        .map(|v| {
            vec![BlockDeviceMapping {
                source_type: "blank".into(),
                destination_type: "volume".into(),
                boot_index: if v.boot { 0 } else { -1 },
                volume_size: v.size,
                volume_type: v.r#type.clone(),
                delete_on_termination: true,
            }]
        })
        .unwrap_or_default();

    let spec = CreateServerSpec {
        name,
        flavor_ref,
        image_ref: Some(resolved_image_id.to_string()),
        key_name: state.sshkey.clone(),
        availability_zone: Some("nova".to_string()),
        network_uuids: vec![network_ref],
        user_data_base64,
        security_groups: state.secgroups.clone(),
        block_device_mapping_v2,
    };

    let created = cloud.create_server(spec)?;
    let final_server = wait_for_active_or_error(&created, cloud, timeouts)?;
    if final_server.status == ServerStatus::Error {
        terminator::brutally_terminate(
            &final_server,
            cloud,
            timeouts.delete,
            timeouts.delete_poll_interval,
        )?;
    }
    Ok(())
}

fn wait_for_active_or_error(
    created: &Server,
    cloud: &dyn CloudClient,
    timeouts: &ReconcileTimeouts,
) -> Result<Server, CloudAPIError> {
    use std::time::Instant;
    let deadline = Instant::now() + timeouts.create_wait;
    let mut current = created.clone();
    while current.status != ServerStatus::Active && current.status != ServerStatus::Error {
        if Instant::now() >= deadline {
            return Ok(current);
        }
        std::thread::sleep(timeouts.create_poll_interval);
        if let Some(refreshed) = cloud.find_server(&current.id)? {
            current = refreshed;
        }
    }
    Ok(current)
}

fn remove_server(
    server: &Server,
    state: &DesiredState,
    cloud: &dyn CloudClient,
    ssh_params: &SshParams,
    timeouts: &ReconcileTimeouts,
) -> Result<(), ApplyError> {
    // A removal candidate not attached to the configured network is
    // brutally terminated only if already ERROR; otherwise it is skipped
    // with a warning, mirroring the original implementation's network
    // sanity check before acting on a server.
    let on_configured_network = server.networks.iter().any(|n| n == &state.network);
    if !on_configured_network && server.status != ServerStatus::Error {
        warn!(server = %server.name, "server not on configured network, skipping removal this cycle");
        return Ok(());
    }

    if !state.graceful || server.status == ServerStatus::Error || !on_configured_network {
        terminator::brutally_terminate(
            server,
            cloud,
            timeouts.delete,
            timeouts.delete_poll_interval,
        )?;
        return Ok(());
    }

    match terminator::gracefully_terminate(
        server,
        cloud,
        ssh_params,
        timeouts.condor_shutdown,
        timeouts.condor_poll_interval,
        timeouts.delete,
        timeouts.delete_poll_interval,
    ) {
        Ok(()) => Ok(()),
        Err(TerminatorError::Condor(CondorError::CondorShutdownTimeout(timeout))) => {
            warn!(
                server = %server.name,
                ?timeout,
                "condor shutdown timed out, falling back to brutal termination"
            );
            terminator::brutally_terminate(
                server,
                cloud,
                timeouts.delete,
                timeouts.delete_poll_interval,
            )?;
            // The server was removed via the brutal fallback, but the
            // timeout itself is still a per-server failure that must show
            // up in the group's report and contribute to exit code 2 (§7).
            Err(ApplyError::Terminator(TerminatorError::Condor(
                CondorError::CondorShutdownTimeout(timeout),
            )))
        }
        Err(err) => Err(err.into()),
    }
}

#[allow(clippy::too_many_arguments)]
fn replace_server(
    server: &Server,
    state: &DesiredState,
    group: &GroupConfig,
    cloud: &dyn CloudClient,
    renderer: &UserDataRenderer,
    ssh_params: &SshParams,
    resolved_image_id: &str,
    timeouts: &ReconcileTimeouts,
) -> Result<(), ApplyError> {
    let name = server.name.clone();
    remove_server(server, state, cloud, ssh_params, timeouts)?;

    let flavor_ref = if crate::cloud::looks_like_uuid(&group.flavor) {
        group.flavor.clone()
    } else {
        cloud.find_flavor(&group.flavor)?
    };
    let network_ref = if crate::cloud::looks_like_uuid(&state.network) {
        state.network.clone()
    } else {
        cloud.find_network(&state.network)?
    };
    let user_data = renderer.render(state, group);
    let user_data_base64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &user_data);

    let spec = CreateServerSpec {
        name,
        flavor_ref,
        image_ref: Some(resolved_image_id.to_string()),
        key_name: state.sshkey.clone(),
        availability_zone: Some("nova".to_string()),
        network_uuids: vec![network_ref],
        user_data_base64,
        security_groups: state.secgroups.clone(),
        block_device_mapping_v2: Vec::new(),
    };
    let created = cloud.create_server(spec)?;
    wait_for_active_or_error(&created, cloud, timeouts)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloudClient;
    use std::collections::HashMap;

    fn state_s1() -> DesiredState {
        let mut images = HashMap::new();
        images.insert(
            "default".to_string(),
            "550e8400-e29b-41d4-a716-446655440000".to_string(),
        );
        let mut inventory = HashMap::new();
        inventory.insert("m1.small".to_string(), 5u32);
        let mut deployment = indexmap::IndexMap::new();
        deployment.insert(
            "compute".to_string(),
            GroupConfig {
                count: 3,
                flavor: "m1.small".into(),
                image: "default".into(),
                group: None,
                start: None,
                end: None,
                volume: None,
                secondary_htcondor_cluster: false,
            },
        );
        DesiredState {
            images,
            nodes_inventory: inventory,
            network: "galaxy-net".into(),
            sshkey: "cloud2".into(),
            secgroups: vec![],
            pubkeys: vec![],
            graceful: true,
            deployment,
        }
    }

    #[test]
    fn scenario_s1_dry_run_reports_three_adds() {
        let state = state_s1();
        let mut cloud = MockCloudClient::new();
        cloud.expect_list_servers().returning(|| Ok(Vec::new()));

        let renderer = UserDataRenderer {
            template_path: Path::new("userdata.yaml.j2"),
            vars_files: &[],
        };
        let empty_pubkeys: Vec<String> = vec![];
        let ssh_params = SshParams {
            port: 22,
            user: "centos",
            private_key_path: Path::new("/dev/null"),
            trusted_pubkeys: &empty_pubkeys,
        };
        let timeouts = ReconcileTimeouts::default();
        let today: NaiveDate = "2025-06-01".parse().unwrap();

        let outcome = reconcile(
            &state,
            &cloud,
            &renderer,
            &ssh_params,
            &timeouts,
            today,
            true,
        )
        .expect("dry run should not fail");

        assert!(outcome.dry_run);
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].added, 3);
    }
}
