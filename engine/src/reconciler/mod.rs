//! Reconciler
//!
//! Runs one reconciliation session for one resource kind: reads current
//! state, plans the batch, submits it and records every sub-operation in the
//! outcome aggregator.
//!
//! # Batch flow (merged / replaced)
//!
//! 1. Live-read the inventory (and template defaults for `replaced`)
//! 2. Plan every desired resource; any validation error aborts before writes
//! 3. Empty plan: register a single "no changes" record and stop
//! 4. Submit every change set, even after an earlier one failed
//! 5. Only if all submissions succeeded: save, then deploy, stopping at the
//!    first failure

use crate::config::Config;
use crate::planner::{
    normalize, ChangeSet, Inventory, PlanState, Planner, Policy, ResourceKind, TableKind,
};
use crate::results::{FinalReport, OperationType, Results};
use crate::transport::{Coordinator, HttpSender};
use sdk::{
    Fields, OperationRequest, OperationResult, ReconcileError, RequestSender, ResponseEnvelope,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Default budget for reads that must reach the controller
pub const DEFAULT_REFRESH_TIMEOUT: u64 = 10;

/// Requested end state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Merged,
    Replaced,
    Deleted,
    Query,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Merged => "merged",
            State::Replaced => "replaced",
            State::Deleted => "deleted",
            State::Query => "query",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merged" => Ok(State::Merged),
            "replaced" => Ok(State::Replaced),
            "deleted" => Ok(State::Deleted),
            "query" => Ok(State::Query),
            other => Err(ReconcileError::invalid_value(
                "state",
                format!("'{}' is not one of merged, replaced, deleted, query", other),
            )),
        }
    }
}

/// One reconciliation session over one resource kind
pub struct Reconciler {
    coordinator: Coordinator,
    results: Results,
    kind: Arc<dyn ResourceKind>,
    refresh_timeout: u64,
}

impl Reconciler {
    /// The aggregator takes its check mode from the coordinator settings
    pub fn new(coordinator: Coordinator, kind: Arc<dyn ResourceKind>) -> Self {
        let mut results = Results::new();
        results.set_check_mode(coordinator.settings().check_mode());
        Self {
            coordinator,
            results,
            kind,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Timeout budget for live reads, in seconds
    pub fn with_refresh_timeout(mut self, refresh_timeout: u64) -> Self {
        self.refresh_timeout = refresh_timeout.max(1);
        self
    }

    pub fn from_config(
        config: &Config,
        sender: Arc<dyn RequestSender>,
        kind: Arc<dyn ResourceKind>,
    ) -> Result<Self, ReconcileError> {
        let settings = config.transport.settings()?;
        Ok(Self::new(Coordinator::with_sender(sender, settings), kind)
            .with_refresh_timeout(config.transport.refresh_timeout_secs))
    }

    /// Build an HTTP-backed reconciler for a `[[kinds]]` entry
    ///
    /// # Errors
    ///
    /// Returns `Config` if no kind of that name is configured or the HTTP
    /// client cannot be built.
    pub fn connect(config: &Config, kind_name: &str) -> Result<Self, ReconcileError> {
        let kind_config = config.kind(kind_name).ok_or_else(|| {
            ReconcileError::Config(format!("No resource kind named '{}' configured", kind_name))
        })?;
        let sender = HttpSender::new(
            config.transport.base_url.as_str(),
            config.transport.request_timeout(),
        )?;
        Self::from_config(
            config,
            Arc::new(sender),
            Arc::new(TableKind::from_config(kind_config)),
        )
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn results(&self) -> &Results {
        &self.results
    }

    /// Run the session and reduce it into the final report
    ///
    /// Unsuccessful submissions are recorded and surface as `failed = true`.
    ///
    /// # Errors
    ///
    /// Validation errors, failed mandatory reads and configuration errors.
    pub async fn run(mut self, state: State, desired: &[Fields]) -> Result<FinalReport, ReconcileError> {
        let span = info_span!("reconcile", kind = %self.kind.name(), state = %state);

        async {
            self.results.set_state(state.as_str());
            match state {
                State::Merged => self.reconcile(Policy::Merge, desired).await,
                State::Replaced => self.reconcile(Policy::Replace, desired).await,
                State::Deleted => self.delete(desired).await,
                State::Query => self.query(desired).await,
            }
        }
        .instrument(span)
        .await?;

        let report = self.results.build_final_result();
        info!(
            "{} {} finished: changed={}, failed={}, {} task(s)",
            self.kind.name(),
            state,
            report.changed,
            report.failed,
            report.result.len()
        );
        Ok(report)
    }

    async fn reconcile(&mut self, policy: Policy, desired: &[Fields]) -> Result<(), ReconcileError> {
        let kind = Arc::clone(&self.kind);
        let planner = Planner::new(kind.as_ref());

        let inventory = self.fetch_inventory().await?;
        let templates = match policy {
            Policy::Merge => BTreeMap::new(),
            Policy::Replace => self.fetch_templates(&planner, desired, &inventory).await?,
        };

        let plan = planner.plan_batch(policy, desired, &inventory, &templates)?;
        for resource in &plan.resources {
            match resource.state {
                PlanState::NotOnController => info!(
                    "{} {} is not on the controller, skipping",
                    kind.name(),
                    resource.name
                ),
                PlanState::NoDiff => debug!("{} {} already matches", kind.name(), resource.name),
                PlanState::Diff(_) => {}
            }
        }

        if plan.is_empty() {
            info!("No changes required for {}", kind.name());
            self.register_no_changes();
            return Ok(());
        }

        let commits: Vec<&ChangeSet> = plan.commits().collect();
        for change_set in &commits {
            let resource_type = change_set.resource_type.as_deref().unwrap_or_default();
            let request =
                kind.update_request(&change_set.resource, resource_type, change_set.payload.clone());
            self.submit(
                OperationType::Update,
                &change_set.resource,
                request,
                change_set.payload.clone(),
            )
            .await?;
        }

        if self.results.any_failed() {
            warn!(
                "At least one {} update failed; skipping save and deploy for the batch",
                kind.name()
            );
            return Ok(());
        }

        self.save_and_deploy(&commits).await
    }

    async fn save_and_deploy(&mut self, commits: &[&ChangeSet]) -> Result<(), ReconcileError> {
        let kind = Arc::clone(&self.kind);

        for change_set in commits {
            let Some(request) = kind.save_request(&change_set.resource) else {
                continue;
            };
            let diff = self.identity_diff(&change_set.resource);
            let result = self
                .submit(OperationType::Save, &change_set.resource, request, diff)
                .await?;
            if !result.success {
                warn!("Save of {} failed; skipping remaining steps", change_set.resource);
                return Ok(());
            }
        }

        for change_set in commits {
            if !self.deploy_requested(change_set) {
                debug!("{} {} not flagged for deploy", kind.name(), change_set.resource);
                continue;
            }
            let Some(request) = kind.deploy_request(&change_set.resource) else {
                continue;
            };
            let diff = self.identity_diff(&change_set.resource);
            let result = self
                .submit(OperationType::Deploy, &change_set.resource, request, diff)
                .await?;
            if !result.success {
                warn!("Deploy of {} failed; skipping remaining deploys", change_set.resource);
                return Ok(());
            }
        }

        Ok(())
    }

    /// An absent or unreadable deploy flag means no deploy
    fn deploy_requested(&self, change_set: &ChangeSet) -> bool {
        change_set
            .payload
            .get(&self.kind.identity().deploy)
            .and_then(normalize::parse_bool)
            .unwrap_or(false)
    }

    async fn delete(&mut self, desired: &[Fields]) -> Result<(), ReconcileError> {
        let kind = Arc::clone(&self.kind);
        let names = self.desired_names(desired)?;
        let inventory = self.fetch_inventory().await?;

        let mut requests = Vec::new();
        for name in names {
            if !inventory.contains_key(&name) {
                info!("{} {} is not on the controller, nothing to delete", kind.name(), name);
                continue;
            }
            let request = kind.delete_request(&name).ok_or_else(|| {
                ReconcileError::Config(format!("{} has no delete endpoint", kind.name()))
            })?;
            requests.push((name, request));
        }

        if requests.is_empty() {
            self.register_no_changes();
            return Ok(());
        }

        for (name, request) in requests {
            let diff = self.identity_diff(&name);
            self.submit(OperationType::Delete, &name, request, diff).await?;
        }
        Ok(())
    }

    /// One read-only record per desired resource, or per current resource
    /// when nothing is named
    async fn query(&mut self, desired: &[Fields]) -> Result<(), ReconcileError> {
        let names = self.desired_names(desired)?;
        let inventory = self.fetch_inventory().await?;
        let names = if desired.is_empty() {
            inventory.keys().cloned().collect()
        } else {
            names
        };

        self.results.set_action(format!("{}_query", self.kind.name()));
        self.results.set_operation_type(OperationType::Query);
        for name in names {
            let current = inventory.get(&name);
            self.results
                .record_response(current.cloned().unwrap_or_default());
            self.results
                .record_result(OperationResult::read(current.is_some(), true).to_fields());
            self.results.record_metadata(resource_metadata(&name));
            self.results.register_task_result();
        }
        Ok(())
    }

    fn desired_names(&self, desired: &[Fields]) -> Result<Vec<String>, ReconcileError> {
        let planner = Planner::new(self.kind.as_ref());
        let mut seen = BTreeSet::new();
        let mut names = Vec::with_capacity(desired.len());
        for resource in desired {
            let name = planner.resource_name(resource)?;
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn identity_diff(&self, name: &str) -> Fields {
        let mut diff = Fields::new();
        diff.insert(self.kind.identity().name.clone(), Value::from(name));
        diff
    }

    async fn fetch_inventory(&mut self) -> Result<Inventory, ReconcileError> {
        let request = self.kind.inventory_request();
        match self.live_read(request).await? {
            Some(data) => self.kind.parse_inventory(&data),
            None => Ok(Inventory::new()),
        }
    }

    /// Template defaults for every resource type in play, one read per type
    async fn fetch_templates(
        &mut self,
        planner: &Planner<'_>,
        desired: &[Fields],
        inventory: &Inventory,
    ) -> Result<BTreeMap<String, Fields>, ReconcileError> {
        let mut templates = BTreeMap::new();

        for resource in desired {
            let Ok(name) = planner.resource_name(resource) else {
                continue;
            };
            let Some(current) = inventory.get(&name) else {
                continue;
            };
            let Some(resource_type) = planner.resource_type(resource, Some(current)) else {
                continue;
            };
            if templates.contains_key(&resource_type) {
                continue;
            }

            let request = self.kind.template_request(&resource_type).ok_or_else(|| {
                ReconcileError::Config(format!(
                    "{} has no template endpoint for the replaced state",
                    self.kind.name()
                ))
            })?;
            if let Some(data) = self.live_read(request).await? {
                let defaults = self.kind.parse_template(&data)?;
                debug!(
                    "Loaded {} template default(s) for {}",
                    defaults.len(),
                    resource_type
                );
                templates.insert(resource_type, defaults);
            }
        }

        Ok(templates)
    }

    /// Read that always reaches the controller, even in check mode
    ///
    /// Returns `None` when the controller reports the resource absent.
    async fn live_read(&mut self, request: OperationRequest) -> Result<Option<Value>, ReconcileError> {
        let path = request.path.clone();
        let mut live = self.coordinator.force_live(self.refresh_timeout);
        live.configure(request);
        let result = live.commit().await?;

        if !result.success {
            let message = live
                .response_current()
                .and_then(|response| response.message.clone())
                .unwrap_or_else(|| "no message".to_string());
            error!("Mandatory read of {} failed: {}", path, message);
            return Err(ReconcileError::ControllerResponse { path, message });
        }
        if result.found == Some(false) {
            debug!("{} reported not found", path);
            return Ok(None);
        }
        Ok(live.response_current().map(|response| response.data.clone()))
    }

    /// Commit one write and register it as a task
    async fn submit(
        &mut self,
        operation_type: OperationType,
        resource: &str,
        request: OperationRequest,
        diff: Fields,
    ) -> Result<OperationResult, ReconcileError> {
        info!("{} {} ({})", request.verb, request.path, resource);

        self.results
            .set_action(format!("{}_{}", self.kind.name(), operation_type.as_str()));
        self.results.set_operation_type(operation_type);

        self.coordinator.configure(request);
        let result = self.coordinator.commit().await?;
        let response = self
            .coordinator
            .response_current()
            .map(ResponseEnvelope::to_fields)
            .unwrap_or_default();

        self.results.record_diff(diff);
        self.results.record_response(response);
        self.results.record_result(result.to_fields());
        self.results.record_metadata(resource_metadata(resource));
        self.results.register_task_result();

        Ok(result)
    }

    fn register_no_changes(&mut self) {
        self.results
            .set_action(format!("{}_no_changes", self.kind.name()));
        self.results.set_operation_type(OperationType::Update);
        self.results
            .record_result(OperationResult { success: true, changed: Some(false), found: None }.to_fields());
        self.results.register_task_result();
    }
}

fn resource_metadata(resource: &str) -> Fields {
    let mut metadata = Fields::new();
    metadata.insert("resource".to_string(), Value::from(resource));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{IdentityFields, KindPaths};
    use crate::transport::TransportSettings;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers reads from a fixed inventory and accepts every write
    struct StaticSender {
        inventory: Value,
        writes: Mutex<Vec<OperationRequest>>,
    }

    #[async_trait]
    impl RequestSender for StaticSender {
        fn name(&self) -> &str {
            "static"
        }

        async fn send(&self, request: &OperationRequest) -> Result<ResponseEnvelope, ReconcileError> {
            if request.verb == sdk::Verb::Get {
                return Ok(ResponseEnvelope::new(200, "OK", self.inventory.clone()));
            }
            self.writes.lock().unwrap().push(request.clone());
            Ok(ResponseEnvelope::new(200, "OK", json!({})))
        }
    }

    fn kind() -> Arc<dyn ResourceKind> {
        Arc::new(TableKind::new(
            "fabric",
            IdentityFields::new("NAME", "TYPE", "DEPLOY"),
            KindPaths {
                inventory: "/fabrics".to_string(),
                update: "/fabrics/{name}".to_string(),
                ..Default::default()
            },
        ))
    }

    fn reconciler(inventory: Value) -> (Reconciler, Arc<StaticSender>) {
        let sender = Arc::new(StaticSender {
            inventory,
            writes: Mutex::new(Vec::new()),
        });
        let settings = TransportSettings::new(1, 1).unwrap().with_fast_test(true);
        let coordinator = Coordinator::with_sender(sender.clone(), settings);
        (Reconciler::new(coordinator, kind()), sender)
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!("Merged".parse::<State>().unwrap(), State::Merged);
        assert_eq!("query".parse::<State>().unwrap(), State::Query);
        assert!(matches!(
            "overridden".parse::<State>().unwrap_err(),
            ReconcileError::InvalidValue { ref field, .. } if field == "state"
        ));
    }

    #[tokio::test]
    async fn test_empty_plan_registers_single_no_changes_record() {
        let (reconciler, sender) = reconciler(json!([{"NAME": "F1", "X": "5"}]));
        let desired = vec![fields(json!({"NAME": "F1", "X": 5}))];

        let report = reconciler.run(State::Merged, &desired).await.unwrap();

        assert!(!report.changed);
        assert!(!report.failed);
        assert_eq!(report.result.len(), 1);
        assert_eq!(report.result[0]["success"], json!(true));
        assert_eq!(report.metadata[0]["action"], json!("fabric_no_changes"));
        assert!(sender.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_flag_without_endpoint_is_skipped() {
        let (reconciler, sender) = reconciler(json!([{"NAME": "F1", "X": "5"}]));
        let desired = vec![fields(json!({"NAME": "F1", "X": 6, "DEPLOY": true}))];

        let report = reconciler.run(State::Merged, &desired).await.unwrap();

        assert!(report.changed);
        assert_eq!(report.result.len(), 1);
        assert_eq!(sender.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_without_endpoint_is_config_error() {
        let (reconciler, sender) = reconciler(json!([{"NAME": "F1"}]));
        let desired = vec![fields(json!({"NAME": "F1"}))];

        let err = reconciler.run(State::Deleted, &desired).await.unwrap_err();

        assert!(matches!(err, ReconcileError::Config(_)));
        assert!(sender.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_without_names_lists_inventory() {
        let (reconciler, _sender) = reconciler(json!([{"NAME": "F1"}, {"NAME": "F2"}]));

        let report = reconciler.run(State::Query, &[]).await.unwrap();

        assert_eq!(report.result.len(), 2);
        assert!(report.result.iter().all(|r| r["found"] == json!(true)));
        assert!(!report.changed);
    }
}
