//! Migration planning
//!
//! Planning is pure: it takes profiles of the source and target providers
//! and produces an immutable [`MigrationPlan`]. Nothing is touched until the
//! plan is executed.
//!
//! ## Compatibility Matrix
//!
//! | source \ target | same family | document <-> key_value | other |
//! |-----------------|-------------|-------------------------|-------|
//! | schema          | yes         | yes                     | no    |
//! | data            | yes         | no                      | no    |
//!
//! Feature compatibility holds when the target advertises every capability
//! the source does.
//!
//! ## Risk Scoring
//!
//! | signal                       | points |
//! |------------------------------|--------|
//! | schema incompatible          | 3      |
//! | data incompatible            | 2      |
//! | feature incompatible         | 1      |
//! | data above large threshold   | 2      |
//! | more than three warnings     | 1      |
//!
//! A total of 5 or more is `high`, 2 or more is `medium`, otherwise `low`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{MigrationConfig, ProviderConfig};
use crate::traits::ProviderFamily;

/// Target to create during execution when it is not registered yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub provider_type: String,
    #[serde(flatten)]
    pub config: ProviderConfig,
}

impl TargetSpec {
    pub fn new(provider_type: impl Into<String>, config: ProviderConfig) -> Self {
        Self {
            provider_type: provider_type.into(),
            config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn from_score(score: u32) -> Self {
        match score {
            s if s >= 5 => RiskLevel::High,
            s if s >= 2 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    ValidateMigration,
    CreateBackup,
    PrepareTarget,
    ExportData,
    TransformData,
    ImportData,
    VerifyData,
    UpdateConfiguration,
    TestFunctionality,
}

impl StepKind {
    /// Stable step id
    pub fn id(&self) -> &'static str {
        match self {
            StepKind::ValidateMigration => "validate-migration",
            StepKind::CreateBackup => "create-backup",
            StepKind::PrepareTarget => "prepare-target",
            StepKind::ExportData => "export-data",
            StepKind::TransformData => "transform-data",
            StepKind::ImportData => "import-data",
            StepKind::VerifyData => "verify-data",
            StepKind::UpdateConfiguration => "update-configuration",
            StepKind::TestFunctionality => "test-functionality",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StepKind::ValidateMigration => "Validate migration",
            StepKind::CreateBackup => "Back up source data",
            StepKind::PrepareTarget => "Prepare target provider",
            StepKind::ExportData => "Export source data",
            StepKind::TransformData => "Transform data for target family",
            StepKind::ImportData => "Import data into target",
            StepKind::VerifyData => "Verify imported data",
            StepKind::UpdateConfiguration => "Switch category default to target",
            StepKind::TestFunctionality => "Run target diagnostics",
        }
    }

    /// Fixed duration estimate in seconds
    pub fn estimated_secs(&self) -> u64 {
        match self {
            StepKind::ValidateMigration => 5,
            StepKind::CreateBackup => 30,
            StepKind::PrepareTarget => 10,
            StepKind::ExportData => 60,
            StepKind::TransformData => 45,
            StepKind::ImportData => 60,
            StepKind::VerifyData => 20,
            StepKind::UpdateConfiguration => 5,
            StepKind::TestFunctionality => 15,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// One step of a migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub id: String,
    pub kind: StepKind,
    pub name: String,
    pub required: bool,
    pub estimated_secs: u64,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl MigrationStep {
    fn new(kind: StepKind, required: bool) -> Self {
        Self {
            id: kind.id().to_string(),
            kind,
            name: kind.title().to_string(),
            required,
            estimated_secs: kind.estimated_secs(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Result of comparing source and target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compatibility {
    pub schema_compatible: bool,
    pub data_compatible: bool,
    pub feature_compatible: bool,
    /// Source capabilities the target lacks
    pub missing_capabilities: Vec<String>,
    /// Advisory, never plan-blocking by themselves
    pub warnings: Vec<String>,
}

/// Immutable migration plan
///
/// Recompute the plan whenever source, target or their configuration changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub id: Uuid,
    pub source: String,
    pub source_type: String,
    pub target: String,
    pub target_type: String,
    /// Whether the target was registered when the plan was computed
    pub target_exists: bool,
    pub steps: Vec<MigrationStep>,
    pub estimated_duration_secs: u64,
    pub compatibility: Compatibility,
    pub risk_level: RiskLevel,
    pub backup_required: bool,
    pub data_size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl MigrationPlan {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_duration_secs)
    }

    pub fn step(&self, kind: StepKind) -> Option<&MigrationStep> {
        self.steps.iter().find(|step| step.kind == kind)
    }

    pub fn has_step(&self, kind: StepKind) -> bool {
        self.step(kind).is_some()
    }
}

/// What planning needs to know about one side of a migration
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProviderProfile {
    pub name: String,
    pub provider_type: String,
    pub category: String,
    pub family: ProviderFamily,
    pub capabilities: Vec<String>,
    pub setup_automation: bool,
}

/// Static schema compatibility between two families
pub fn schema_compatible(source: &ProviderFamily, target: &ProviderFamily) -> bool {
    source == target
        || matches!(
            (source, target),
            (ProviderFamily::Document, ProviderFamily::KeyValue)
                | (ProviderFamily::KeyValue, ProviderFamily::Document)
        )
}

pub(crate) fn assess(source: &ProviderProfile, target: &ProviderProfile) -> Compatibility {
    let schema_compatible = schema_compatible(&source.family, &target.family);
    let data_compatible = source.family == target.family;
    let missing_capabilities: Vec<String> = source
        .capabilities
        .iter()
        .filter(|capability| !target.capabilities.contains(capability))
        .cloned()
        .collect();

    let mut warnings = Vec::new();
    if !schema_compatible {
        warnings.push(format!(
            "Schema of {} ({}) does not map onto {} ({})",
            source.name, source.family, target.name, target.family
        ));
    }
    if !data_compatible {
        warnings.push(format!(
            "Data must be transformed from {} to {}",
            source.family, target.family
        ));
    }
    for capability in &missing_capabilities {
        warnings.push(format!("Target {} lacks capability {}", target.name, capability));
    }
    if source.category != target.category {
        warnings.push(format!(
            "Category changes from {} to {}",
            source.category, target.category
        ));
    }
    if !source.setup_automation {
        warnings.push(format!("Source {} cannot export data", source.name));
    }
    if !target.setup_automation {
        warnings.push(format!("Target {} cannot import data", target.name));
    }

    Compatibility {
        schema_compatible,
        data_compatible,
        feature_compatible: missing_capabilities.is_empty(),
        missing_capabilities,
        warnings,
    }
}

pub(crate) fn score_risk(
    compatibility: &Compatibility,
    data_size_bytes: u64,
    large_data_threshold_bytes: u64,
) -> RiskLevel {
    let mut score = 0;
    if !compatibility.schema_compatible {
        score += 3;
    }
    if !compatibility.data_compatible {
        score += 2;
    }
    if !compatibility.feature_compatible {
        score += 1;
    }
    if data_size_bytes > large_data_threshold_bytes {
        score += 2;
    }
    if compatibility.warnings.len() > 3 {
        score += 1;
    }
    RiskLevel::from_score(score)
}

pub(crate) fn synthesize_steps(
    compatibility: &Compatibility,
    backup_required: bool,
) -> Vec<MigrationStep> {
    let mut steps = vec![
        MigrationStep::new(StepKind::ValidateMigration, true),
        MigrationStep::new(StepKind::CreateBackup, backup_required),
        MigrationStep::new(StepKind::PrepareTarget, true),
        MigrationStep::new(StepKind::ExportData, true),
    ];
    if !compatibility.data_compatible {
        steps.push(MigrationStep::new(StepKind::TransformData, true));
    }
    steps.extend([
        MigrationStep::new(StepKind::ImportData, true),
        MigrationStep::new(StepKind::VerifyData, true),
        MigrationStep::new(StepKind::UpdateConfiguration, true),
        MigrationStep::new(StepKind::TestFunctionality, false),
    ]);
    steps
}

pub(crate) fn build_plan(
    source: &ProviderProfile,
    target: &ProviderProfile,
    target_exists: bool,
    data_size_bytes: u64,
    config: &MigrationConfig,
) -> MigrationPlan {
    let compatibility = assess(source, target);
    let risk_level = score_risk(
        &compatibility,
        data_size_bytes,
        config.large_data_threshold_bytes,
    );
    let backup_required = risk_level != RiskLevel::Low;
    let steps = synthesize_steps(&compatibility, backup_required);

    MigrationPlan {
        id: Uuid::new_v4(),
        source: source.name.clone(),
        source_type: source.provider_type.clone(),
        target: target.name.clone(),
        target_type: target.provider_type.clone(),
        target_exists,
        estimated_duration_secs: steps.iter().map(|step| step.estimated_secs).sum(),
        steps,
        compatibility,
        risk_level,
        backup_required,
        data_size_bytes,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, family: ProviderFamily, capabilities: &[&str]) -> ProviderProfile {
        ProviderProfile {
            name: name.to_string(),
            provider_type: format!("{}-type", name),
            category: "database".to_string(),
            family,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            setup_automation: true,
        }
    }

    #[test]
    fn same_family_superset_is_low_risk() {
        let source = profile("old", ProviderFamily::Relational, &["transactions"]);
        let target = profile("new", ProviderFamily::Relational, &["transactions", "joins"]);

        let plan = build_plan(&source, &target, true, 0, &MigrationConfig::default());

        assert!(plan.compatibility.schema_compatible);
        assert!(plan.compatibility.data_compatible);
        assert!(plan.compatibility.feature_compatible);
        assert_eq!(plan.risk_level, RiskLevel::Low);
        assert!(!plan.backup_required);
        assert!(!plan.has_step(StepKind::TransformData));
        assert_eq!(plan.steps[0].kind, StepKind::ValidateMigration);
        assert!(!plan.step(StepKind::CreateBackup).unwrap().required);
        assert!(!plan.step(StepKind::TestFunctionality).unwrap().required);
        assert_eq!(plan.estimated_duration_secs, 5 + 30 + 10 + 60 + 60 + 20 + 5 + 15);
    }

    #[test]
    fn relational_to_document_is_high_risk_with_transform() {
        let source = profile("sql", ProviderFamily::Relational, &["transactions", "joins"]);
        let target = profile("docs", ProviderFamily::Document, &["nested_documents"]);

        let plan = build_plan(&source, &target, false, 0, &MigrationConfig::default());

        assert!(!plan.compatibility.schema_compatible);
        assert!(!plan.compatibility.data_compatible);
        assert!(!plan.compatibility.feature_compatible);
        assert_eq!(plan.compatibility.missing_capabilities, vec!["transactions", "joins"]);
        assert_eq!(plan.risk_level, RiskLevel::High);
        assert!(plan.backup_required);
        assert!(plan.step(StepKind::CreateBackup).unwrap().required);
        assert!(plan.has_step(StepKind::TransformData));

        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "validate-migration",
                "create-backup",
                "prepare-target",
                "export-data",
                "transform-data",
                "import-data",
                "verify-data",
                "update-configuration",
                "test-functionality",
            ]
        );
    }

    #[test]
    fn document_and_key_value_share_schema_but_not_data() {
        assert!(schema_compatible(&ProviderFamily::Document, &ProviderFamily::KeyValue));
        assert!(!schema_compatible(&ProviderFamily::Relational, &ProviderFamily::Document));

        let source = profile("docs", ProviderFamily::Document, &[]);
        let target = profile("kv", ProviderFamily::KeyValue, &[]);
        let compatibility = assess(&source, &target);

        assert!(compatibility.schema_compatible);
        assert!(!compatibility.data_compatible);
        // data +2 only
        assert_eq!(score_risk(&compatibility, 0, u64::MAX), RiskLevel::Medium);
    }

    #[test]
    fn large_data_alone_is_medium_risk() {
        let source = profile("a", ProviderFamily::Relational, &[]);
        let target = profile("b", ProviderFamily::Relational, &[]);
        let compatibility = assess(&source, &target);

        assert_eq!(score_risk(&compatibility, 10, 100), RiskLevel::Low);
        assert_eq!(score_risk(&compatibility, 101, 100), RiskLevel::Medium);
    }

    #[test]
    fn missing_setup_automation_and_category_change_are_warnings() {
        let source = ProviderProfile {
            setup_automation: false,
            ..profile("a", ProviderFamily::Relational, &[])
        };
        let target = ProviderProfile {
            category: "analytics".to_string(),
            ..profile("b", ProviderFamily::Relational, &[])
        };

        let compatibility = assess(&source, &target);
        assert_eq!(compatibility.warnings.len(), 2);
        assert_eq!(score_risk(&compatibility, 0, u64::MAX), RiskLevel::Low);
    }
}
