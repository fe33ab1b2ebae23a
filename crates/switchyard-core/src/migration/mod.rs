//! Migration engine
//!
//! Moves the application from one provider instance to another:
//!
//! ```text
//! plan_migration ──> validate_migration ──> execute_migration
//!                                              │
//!        validate → backup → prepare target → export → [transform]
//!        → import → verify → switch default → (diagnostics)
//!                                              │
//!                         failure / cancel ──> rollback
//! ```
//!
//! ## Guarantees
//!
//! - Steps run strictly in plan order, one at a time
//! - Cancellation is observed only between steps
//! - Only `export-data` and `import-data` move application data, through the
//!   providers' setup automation
//! - Rollback restores the source from the recorded backup and removes a
//!   target created by the run
//! - Finished runs move into a bounded history

pub mod plan;
pub mod transform;

pub use plan::{
    Compatibility, MigrationPlan, MigrationStep, RiskLevel, StepKind, StepStatus, TargetSpec,
    schema_compatible,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::error::{Error, Result};
use crate::registry::events::{EventDraft, lock};
use crate::registry::{EventType, LifecycleOptions, ProviderRegistry};
use crate::traits::{DataExport, HealthStatus, Provider};
use plan::ProviderProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Planning,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }
}

/// Mutable record of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationProgress {
    pub migration_id: Uuid,
    pub plan_id: Uuid,
    pub source: String,
    pub target: String,
    pub status: MigrationStatus,
    /// Step currently running, or the step that ended the run
    pub current_step: Option<String>,
    pub completed_steps: usize,
    pub total_steps: usize,
    /// Live copy of the plan's steps
    pub steps: Vec<MigrationStep>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub bytes_transferred: u64,
    pub records_transferred: u64,
    /// Backup taken by `create-backup`, used for rollback
    pub backup_id: Option<String>,
    pub rolled_back: bool,
}

impl MigrationProgress {
    fn new(plan: &MigrationPlan) -> Self {
        Self {
            migration_id: Uuid::new_v4(),
            plan_id: plan.id,
            source: plan.source.clone(),
            target: plan.target.clone(),
            status: MigrationStatus::Planning,
            current_step: None,
            completed_steps: 0,
            total_steps: plan.steps.len(),
            steps: plan.steps.clone(),
            started_at: Utc::now(),
            completed_at: None,
            errors: Vec::new(),
            warnings: plan.compatibility.warnings.clone(),
            bytes_transferred: 0,
            records_transferred: 0,
            backup_id: None,
            rolled_back: false,
        }
    }

    /// Completed fraction in `0.0..=1.0`
    pub fn percent_complete(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }
}

/// Called at start, on every step transition and at the end of a run
pub type ProgressCallback = Arc<dyn Fn(&MigrationProgress) + Send + Sync>;

/// Execution switches
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Never write to the source: rollback skips the backup restore
    pub preserve_source: bool,
    /// Keep going when an optional step fails
    pub continue_on_warnings: bool,
    /// Stop and unregister the source after a completed run
    pub decommission_source: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl ExecuteOptions {
    pub fn preserve_source(mut self) -> Self {
        self.preserve_source = true;
        self
    }

    pub fn continue_on_warnings(mut self) -> Self {
        self.continue_on_warnings = true;
        self
    }

    pub fn decommission_source(mut self) -> Self {
        self.decommission_source = true;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MigrationProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("preserve_source", &self.preserve_source)
            .field("continue_on_warnings", &self.continue_on_warnings)
            .field("decommission_source", &self.decommission_source)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Result of `validate_migration`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

struct ActiveMigration {
    progress: MigrationProgress,
    cancel: Arc<AtomicBool>,
}

/// Side effects a run accumulates for later steps and for rollback
#[derive(Default)]
struct RunState {
    target_created: bool,
    export: Option<DataExport>,
    transformed: Option<DataExport>,
    /// Category default replaced by `update-configuration`
    replaced_default: Option<(String, Option<String>)>,
}

enum StepEnd {
    Continue,
    Abort { rollback: bool },
}

/// Plans and executes migrations against a registry
pub struct MigrationEngine {
    registry: Arc<ProviderRegistry>,
    config: MigrationConfig,
    active: Mutex<BTreeMap<Uuid, ActiveMigration>>,
    history: Mutex<VecDeque<MigrationProgress>>,
}

impl MigrationEngine {
    /// Create an engine over `registry`; a zero history capacity or step
    /// timeout is raised to one
    pub fn new(registry: Arc<ProviderRegistry>, mut config: MigrationConfig) -> Self {
        config.history_capacity = config.history_capacity.max(1);
        config.step_timeout_secs = config.step_timeout_secs.max(1);
        Self {
            registry,
            config,
            active: Mutex::new(BTreeMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Registry the engine migrates between
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Planning
    // ---------------------------------------------------------------------

    async fn registered_profile(&self, name: &str) -> Result<ProviderProfile> {
        let info = self.registry.provider_info(name).await?;
        let provider = self.registry.provider_handle(name).await?;
        Ok(ProviderProfile {
            name: info.name,
            provider_type: info.provider_type,
            category: info.category,
            family: info.family,
            capabilities: info.capabilities,
            setup_automation: provider.setup_automation().is_some(),
        })
    }

    fn planned_profile(&self, name: &str, spec: &TargetSpec) -> Result<ProviderProfile> {
        let descriptor = self.registry.factories().describe(&spec.provider_type)?;
        Ok(ProviderProfile {
            name: name.to_string(),
            category: spec.config.category.clone().unwrap_or(descriptor.category),
            provider_type: descriptor.provider_type,
            family: descriptor.family,
            capabilities: descriptor.capabilities,
            // Known only once the instance exists; import-data fails otherwise
            setup_automation: true,
        })
    }

    /// Source data size: latest recorded snapshot, then a live reading, else 0
    async fn estimate_data_size(&self, source: &str) -> u64 {
        if let Ok(Some(metrics)) = self.registry.latest_metrics(source).await
            && let Some(size) = metrics.data_size_bytes
        {
            return size;
        }
        match self.registry.provider_handle(source).await {
            Ok(provider) => provider
                .metrics()
                .await
                .ok()
                .and_then(|metrics| metrics.data_size_bytes)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Compute a plan for moving `source` to `target`
    ///
    /// The source must be registered. The target is either registered or
    /// described by `target_spec` and created during execution.
    pub async fn plan_migration(
        &self,
        source: &str,
        target: &str,
        target_spec: Option<&TargetSpec>,
    ) -> Result<MigrationPlan> {
        if source == target {
            return Err(Error::invalid_state(format!(
                "cannot migrate '{}' onto itself",
                source
            )));
        }

        let source_profile = self.registered_profile(source).await?;
        let (target_profile, target_exists) = if self.registry.contains(target).await {
            (self.registered_profile(target).await?, true)
        } else {
            let spec = target_spec.ok_or_else(|| {
                Error::not_found(format!(
                    "target '{}' is not registered and no target configuration was given",
                    target
                ))
            })?;
            (self.planned_profile(target, spec)?, false)
        };

        let data_size = self.estimate_data_size(source).await;
        let plan = plan::build_plan(
            &source_profile,
            &target_profile,
            target_exists,
            data_size,
            &self.config,
        );

        info!(
            "Planned migration {} -> {}: risk {:?}, {} step(s), ~{}s",
            source,
            target,
            plan.risk_level,
            plan.steps.len(),
            plan.estimated_duration_secs
        );
        Ok(plan)
    }

    /// Check that a plan can still be executed, without executing it
    pub async fn validate_migration(
        &self,
        plan: &MigrationPlan,
        target_spec: Option<&TargetSpec>,
    ) -> ValidationReport {
        let mut report = ValidationReport {
            errors: Vec::new(),
            warnings: plan.compatibility.warnings.clone(),
        };

        match self.registry.provider_info(&plan.source).await {
            Ok(info) => {
                if info.provider_type != plan.source_type {
                    report.errors.push(format!(
                        "source '{}' is now of type {}, plan expects {}",
                        plan.source, info.provider_type, plan.source_type
                    ));
                }
                if !info.status.is_running() {
                    report
                        .warnings
                        .push(format!("source '{}' is {}", plan.source, info.status));
                }
                if let Ok(provider) = self.registry.provider_handle(&plan.source).await
                    && provider.setup_automation().is_none()
                {
                    report
                        .errors
                        .push(format!("source '{}' cannot export data", plan.source));
                }
            }
            Err(_) => report
                .errors
                .push(format!("source '{}' is not registered", plan.source)),
        }

        let target_registered = self.registry.contains(&plan.target).await;
        match (plan.target_exists, target_registered) {
            (true, false) => report
                .errors
                .push(format!("target '{}' is no longer registered", plan.target)),
            (false, true) => report.errors.push(format!(
                "target name '{}' has been registered since planning",
                plan.target
            )),
            (false, false) => match target_spec {
                None => report.errors.push(format!(
                    "target '{}' must be created but no target configuration was given",
                    plan.target
                )),
                Some(spec) if spec.provider_type != plan.target_type => {
                    report.errors.push(format!(
                        "target configuration is for type {}, plan expects {}",
                        spec.provider_type, plan.target_type
                    ))
                }
                Some(spec) => {
                    if let Err(e) = self
                        .registry
                        .factories()
                        .validate(&spec.provider_type, &spec.config)
                    {
                        report.errors.push(e.to_string());
                    }
                    for dependency in spec.config.dependencies.iter().filter(|d| d.required) {
                        if !self.registry.contains(&dependency.name).await {
                            report.errors.push(format!(
                                "target dependency '{}' is not registered",
                                dependency.name
                            ));
                        }
                    }
                }
            },
            (true, true) => {
                if let Ok(provider) = self.registry.provider_handle(&plan.target).await
                    && provider.setup_automation().is_none()
                {
                    report
                        .errors
                        .push(format!("target '{}' cannot import data", plan.target));
                }
            }
        }

        let busy = lock(&self.active)
            .values()
            .any(|run| run.progress.source == plan.source || run.progress.target == plan.target);
        if busy {
            report.errors.push(format!(
                "a migration involving '{}' or '{}' is already running",
                plan.source, plan.target
            ));
        }

        report
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    /// Run a plan step by step
    ///
    /// Returns the final progress record of every run that started,
    /// whether it completed, failed or was cancelled. Plans that fail
    /// validation are refused with `InvalidState`.
    pub async fn execute_migration(
        &self,
        plan: &MigrationPlan,
        target_spec: Option<TargetSpec>,
        options: ExecuteOptions,
    ) -> Result<MigrationProgress> {
        let mut progress = MigrationProgress::new(plan);
        let cancel = Arc::new(AtomicBool::new(false));

        {
            // Admission is re-checked under the lock; validation awaits
            let report = self.validate_migration(plan, target_spec.as_ref()).await;
            if !report.is_valid() {
                return Err(Error::invalid_state(format!(
                    "migration plan {} is not executable: {}",
                    plan.id,
                    report.errors.join("; ")
                )));
            }

            let mut active = lock(&self.active);
            if active
                .values()
                .any(|run| run.progress.source == plan.source || run.progress.target == plan.target)
            {
                return Err(Error::invalid_state(format!(
                    "a migration involving '{}' or '{}' is already running",
                    plan.source, plan.target
                )));
            }
            progress.status = MigrationStatus::InProgress;
            active.insert(
                progress.migration_id,
                ActiveMigration {
                    progress: progress.clone(),
                    cancel: Arc::clone(&cancel),
                },
            );
        }

        info!(
            "Migration {} started: {} -> {}",
            progress.migration_id, plan.source, plan.target
        );
        self.registry.emit(
            EventDraft::info(EventType::MigrationStarted, &plan.source).with_payload(json!({
                "migration_id": progress.migration_id,
                "target": plan.target,
                "risk_level": plan.risk_level,
            })),
        );
        self.report(&mut progress, &options);

        let mut run = RunState::default();
        let mut outcome = StepEnd::Continue;

        for index in 0..progress.steps.len() {
            if cancel.load(Ordering::SeqCst) {
                progress.status = MigrationStatus::Cancelled;
                info!(
                    "Migration {} cancelled before {}",
                    progress.migration_id, progress.steps[index].id
                );
                outcome = StepEnd::Abort {
                    rollback: progress.backup_id.is_some(),
                };
                break;
            }

            let step_id = progress.steps[index].id.clone();
            progress.current_step = Some(step_id.clone());
            progress.steps[index].status = StepStatus::InProgress;
            progress.steps[index].started_at = Some(Utc::now());
            self.report(&mut progress, &options);

            let kind = progress.steps[index].kind;
            let result = match tokio::time::timeout(
                self.config.step_timeout(),
                self.run_step(kind, plan, target_spec.as_ref(), &mut progress, &mut run),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::step(
                    &step_id,
                    format!("timed out after {}s", self.config.step_timeout_secs),
                )),
            };

            progress.steps[index].completed_at = Some(Utc::now());
            match result {
                Ok(value) => {
                    let step = &mut progress.steps[index];
                    step.status = StepStatus::Completed;
                    step.result = Some(value);
                    progress.completed_steps += 1;
                    info!("Migration {}: {} completed", progress.migration_id, step_id);
                    self.registry.emit(
                        EventDraft::info(EventType::MigrationStepCompleted, &plan.source)
                            .with_payload(json!({
                                "migration_id": progress.migration_id,
                                "step": step_id,
                            })),
                    );
                    self.report(&mut progress, &options);
                }
                Err(e) => {
                    let error = match e {
                        Error::MigrationStepFailure { .. } => e,
                        other => Error::step(&step_id, other.to_string()),
                    };
                    let step = &mut progress.steps[index];
                    step.status = StepStatus::Failed;
                    step.error = Some(error.to_string());
                    let required = step.required;

                    warn!("Migration {}: {}", progress.migration_id, error);
                    self.registry.emit(EventDraft::error(
                        EventType::MigrationStepFailed,
                        &plan.source,
                        error.to_string(),
                    ).with_payload(json!({
                        "migration_id": progress.migration_id,
                        "step": step_id,
                        "required": required,
                    })));

                    if required {
                        progress.errors.push(error.to_string());
                        progress.status = MigrationStatus::Failed;
                        self.report(&mut progress, &options);
                        outcome = StepEnd::Abort { rollback: true };
                        break;
                    }

                    progress.warnings.push(error.to_string());
                    if !options.continue_on_warnings {
                        progress.status = MigrationStatus::Failed;
                        self.report(&mut progress, &options);
                        outcome = StepEnd::Abort { rollback: false };
                        break;
                    }
                    self.report(&mut progress, &options);
                }
            }
        }

        // A cancel that lands during the last step is honored at the
        // boundary after it
        if matches!(outcome, StepEnd::Continue) && cancel.load(Ordering::SeqCst) {
            progress.status = MigrationStatus::Cancelled;
            info!(
                "Migration {} cancelled after its last step",
                progress.migration_id
            );
            outcome = StepEnd::Abort {
                rollback: progress.backup_id.is_some(),
            };
        }

        match outcome {
            StepEnd::Continue => {
                progress.status = MigrationStatus::Completed;
                progress.current_step = None;
                if options.decommission_source {
                    self.decommission(&plan.source, &mut progress).await;
                }
            }
            StepEnd::Abort { rollback } => {
                for step in progress
                    .steps
                    .iter_mut()
                    .filter(|step| step.status == StepStatus::Pending)
                {
                    step.status = StepStatus::Skipped;
                }
                if rollback {
                    self.rollback(plan, &options, &mut progress, &run).await;
                } else if progress.status == MigrationStatus::Cancelled {
                    self.undo_target_changes(plan, &mut progress, &run).await;
                }
            }
        }

        progress.completed_at = Some(Utc::now());
        self.finish(plan, &mut progress, &options);
        Ok(progress)
    }

    async fn run_step(
        &self,
        kind: StepKind,
        plan: &MigrationPlan,
        target_spec: Option<&TargetSpec>,
        progress: &mut MigrationProgress,
        run: &mut RunState,
    ) -> Result<serde_json::Value> {
        match kind {
            StepKind::ValidateMigration => {
                let source = self.registry.provider_info(&plan.source).await?;
                Ok(json!({
                    "source_status": source.status,
                    "target_exists": self.registry.contains(&plan.target).await,
                }))
            }

            StepKind::CreateBackup => {
                let backup_id = self.registry.backup_provider(&plan.source).await?;
                progress.backup_id = Some(backup_id.clone());
                Ok(json!({ "backup_id": backup_id }))
            }

            StepKind::PrepareTarget => {
                if !self.registry.contains(&plan.target).await {
                    let spec = target_spec.ok_or_else(|| {
                        Error::config_invalid(format!("no configuration to create '{}'", plan.target))
                    })?;
                    self.registry
                        .register_provider(&plan.target, &spec.provider_type, spec.config.clone())
                        .await?;
                    run.target_created = true;
                }
                self.registry
                    .start_provider(&plan.target, LifecycleOptions::default().with_dependencies())
                    .await?;
                Ok(json!({ "created": run.target_created }))
            }

            StepKind::ExportData => {
                let source = self.registry.provider_handle(&plan.source).await?;
                let setup = source
                    .setup_automation()
                    .ok_or_else(|| Error::unsupported(&plan.source, "setup_automation"))?;
                let export = setup.export_data().await?;
                let summary = json!({
                    "records": export.record_count(),
                    "bytes": export.size_bytes(),
                    "collections": export.collections.len(),
                });
                run.export = Some(export);
                Ok(summary)
            }

            StepKind::TransformData => {
                let export = run
                    .export
                    .as_ref()
                    .ok_or_else(|| Error::step(kind.id(), "nothing was exported"))?;
                let family = self.registry.provider_info(&plan.target).await?.family;
                let transformed = transform::transform(export, &family)?;
                progress.warnings.extend(transformed.warnings.iter().cloned());
                let summary = json!({
                    "family": family,
                    "records": transformed.data.record_count(),
                    "warnings": transformed.warnings.len(),
                });
                run.transformed = Some(transformed.data);
                Ok(summary)
            }

            StepKind::ImportData => {
                let data = run
                    .transformed
                    .as_ref()
                    .or(run.export.as_ref())
                    .ok_or_else(|| Error::step(kind.id(), "nothing was exported"))?;
                let target = self.registry.provider_handle(&plan.target).await?;
                let setup = target
                    .setup_automation()
                    .ok_or_else(|| Error::unsupported(&plan.target, "setup_automation"))?;
                let report = setup.import_data(data).await?;
                progress.records_transferred += report.records_imported;
                progress.bytes_transferred += report.bytes_imported;
                progress.warnings.extend(report.warnings.iter().cloned());
                Ok(json!({
                    "records": report.records_imported,
                    "bytes": report.bytes_imported,
                }))
            }

            StepKind::VerifyData => {
                let expected = run
                    .transformed
                    .as_ref()
                    .or(run.export.as_ref())
                    .ok_or_else(|| Error::step(kind.id(), "nothing was exported"))?;
                let target = self.registry.provider_handle(&plan.target).await?;
                verify_import(&plan.target, target.as_ref(), expected).await
            }

            StepKind::UpdateConfiguration => {
                let category = self.registry.provider_info(&plan.target).await?.category;
                let previous = self.registry.default_provider(&category).await;
                self.registry.switch_default(&category, &plan.target).await?;
                run.replaced_default = Some((category.clone(), previous.clone()));
                Ok(json!({ "category": category, "previous": previous }))
            }

            StepKind::TestFunctionality => {
                let results = self.registry.run_diagnostics(&plan.target).await?;
                let failed: Vec<String> = results
                    .iter()
                    .filter(|result| !result.passed)
                    .map(|result| match &result.message {
                        Some(message) => format!("{}: {}", result.name, message),
                        None => result.name.clone(),
                    })
                    .collect();
                if !failed.is_empty() {
                    return Err(Error::step(
                        kind.id(),
                        format!("diagnostics failed: {}", failed.join(", ")),
                    ));
                }
                let health = self.registry.check_provider_health(&plan.target).await?;
                if health.health == HealthStatus::Unhealthy {
                    return Err(Error::step(kind.id(), "target reports unhealthy"));
                }
                Ok(json!({ "diagnostics": results.len(), "health": health.health }))
            }
        }
    }

    async fn rollback(
        &self,
        plan: &MigrationPlan,
        options: &ExecuteOptions,
        progress: &mut MigrationProgress,
        run: &RunState,
    ) {
        warn!("Rolling back migration {}", progress.migration_id);
        let mut restored = false;

        if let Some(backup_id) = progress.backup_id.clone() {
            if options.preserve_source {
                info!(
                    "Source {} preserved; backup {} left unapplied",
                    plan.source, backup_id
                );
            } else {
                match self.registry.restore_provider(&plan.source, &backup_id).await {
                    Ok(()) => restored = true,
                    Err(e) => {
                        error!("Failed to restore {} from {}: {}", plan.source, backup_id, e);
                        progress.errors.push(format!("rollback restore failed: {}", e));
                    }
                }
            }
        }

        self.undo_target_changes(plan, progress, run).await;

        progress.rolled_back = true;
        self.registry.emit(
            EventDraft::warning(EventType::MigrationRolledBack, &plan.source).with_payload(json!({
                "migration_id": progress.migration_id,
                "backup_restored": restored,
                "target_removed": run.target_created,
            })),
        );
        self.report(progress, options);
    }

    /// Point the category default back and remove a target this run created
    async fn undo_target_changes(
        &self,
        plan: &MigrationPlan,
        progress: &mut MigrationProgress,
        run: &RunState,
    ) {
        if let Some((category, Some(previous))) = &run.replaced_default
            && previous != &plan.target
            && let Err(e) = self.registry.switch_default(category, previous).await
        {
            progress
                .errors
                .push(format!("rollback of default {} failed: {}", category, e));
        }

        if run.target_created
            && self.registry.contains(&plan.target).await
            && let Err(e) = self.registry.unregister_provider(&plan.target).await
        {
            error!("Failed to remove created target {}: {}", plan.target, e);
            progress
                .errors
                .push(format!("rollback cleanup of {} failed: {}", plan.target, e));
        }
    }

    async fn decommission(&self, source: &str, progress: &mut MigrationProgress) {
        if let Err(e) = self
            .registry
            .stop_provider(source, LifecycleOptions::default().forced())
            .await
        {
            warn!("Decommission: failed to stop {}: {}", source, e);
        }
        match self.registry.unregister_provider(source).await {
            Ok(()) => info!("Decommissioned source {}", source),
            Err(e) => progress
                .warnings
                .push(format!("decommission of {} failed: {}", source, e)),
        }
    }

    /// Publish progress to the active map and the caller's callback
    fn report(&self, progress: &mut MigrationProgress, options: &ExecuteOptions) {
        if let Some(run) = lock(&self.active).get_mut(&progress.migration_id) {
            run.progress = progress.clone();
        }
        if let Some(callback) = &options.on_progress
            && catch_unwind(AssertUnwindSafe(|| callback(progress))).is_err()
        {
            error!(
                "Progress callback panicked for migration {}",
                progress.migration_id
            );
        }
    }

    fn finish(&self, plan: &MigrationPlan, progress: &mut MigrationProgress, options: &ExecuteOptions) {
        lock(&self.active).remove(&progress.migration_id);
        {
            let mut history = lock(&self.history);
            while history.len() >= self.config.history_capacity && history.pop_front().is_some() {}
            history.push_back(progress.clone());
        }

        let payload = json!({
            "migration_id": progress.migration_id,
            "target": plan.target,
            "records_transferred": progress.records_transferred,
            "rolled_back": progress.rolled_back,
        });
        let draft = match progress.status {
            MigrationStatus::Completed => {
                info!(
                    "Migration {} completed: {} record(s) moved to {}",
                    progress.migration_id, progress.records_transferred, plan.target
                );
                EventDraft::info(EventType::MigrationCompleted, &plan.source)
            }
            MigrationStatus::Cancelled => EventDraft::warning(EventType::MigrationCancelled, &plan.source),
            _ => EventDraft::error(
                EventType::MigrationFailed,
                &plan.source,
                progress.errors.join("; "),
            ),
        };
        self.registry.emit(draft.with_payload(payload));
        self.report(progress, options);
    }

    /// Request cooperative cancellation; observed before the next step
    pub fn cancel_migration(&self, migration_id: Uuid) -> Result<()> {
        let active = lock(&self.active);
        let run = active
            .get(&migration_id)
            .ok_or_else(|| Error::not_found(format!("active migration {}", migration_id)))?;
        run.cancel.store(true, Ordering::SeqCst);
        info!("Cancellation requested for migration {}", migration_id);
        Ok(())
    }

    /// Runs in flight
    pub fn active_migrations(&self) -> Vec<MigrationProgress> {
        lock(&self.active)
            .values()
            .map(|run| run.progress.clone())
            .collect()
    }

    /// Progress of an active or finished run
    pub fn migration_progress(&self, migration_id: Uuid) -> Option<MigrationProgress> {
        if let Some(run) = lock(&self.active).get(&migration_id) {
            return Some(run.progress.clone());
        }
        lock(&self.history)
            .iter()
            .find(|progress| progress.migration_id == migration_id)
            .cloned()
    }

    /// Finished runs, oldest first
    pub fn migration_history(&self) -> Vec<MigrationProgress> {
        lock(&self.history).iter().cloned().collect()
    }
}

/// Every exported collection must hold at least as many records on the target
async fn verify_import(
    target_name: &str,
    target: &dyn Provider,
    expected: &DataExport,
) -> Result<serde_json::Value> {
    let setup = target
        .setup_automation()
        .ok_or_else(|| Error::unsupported(target_name, "setup_automation"))?;
    let actual = setup.export_data().await?;

    let mut short = Vec::new();
    for (collection, records) in &expected.collections {
        let found = actual.collections.get(collection).map_or(0, Vec::len);
        if found < records.len() {
            short.push(format!("{} ({} of {})", collection, found, records.len()));
        }
    }

    if !short.is_empty() {
        return Err(Error::step(
            StepKind::VerifyData.id(),
            format!("missing records in {}", short.join(", ")),
        ));
    }

    Ok(json!({
        "collections": expected.collections.len(),
        "records": actual.record_count(),
    }))
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("config", &self.config)
            .field("active", &lock(&self.active).len())
            .finish_non_exhaustive()
    }
}
