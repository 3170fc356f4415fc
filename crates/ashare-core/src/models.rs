//! The four primary entities: Company, SourceDocument, BusinessConceptMaster,
//! CheckpointRecord.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Filing kind; drives the directory-convention and the company-upsert
/// policy difference between annual reports and research reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    AnnualReport,
    ResearchReport,
}

impl DocType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnnualReport => "annual_report",
            Self::ResearchReport => "research_report",
        }
    }
}

/// The three-value closed set of business-concept categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConceptCategory {
    #[serde(rename = "核心业务")]
    Core,
    #[serde(rename = "新兴业务")]
    Emerging,
    #[serde(rename = "战略布局")]
    StrategicLayout,
}

impl ConceptCategory {
    /// Parses the closed-set Chinese category string; any other value is
    /// rejected as `invalid_category` at the fusion layer rather than here,
    /// so `Fusion Engine` can skip a single concept without aborting the batch.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "核心业务" => Some(Self::Core),
            "新兴业务" => Some(Self::Emerging),
            "战略布局" => Some(Self::StrategicLayout),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "核心业务",
            Self::Emerging => "新兴业务",
            Self::StrategicLayout => "战略布局",
        }
    }
}

/// Registry of an issuer. At most one active row per `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Company {
    pub code: String,
    pub name_full: String,
    pub name_short: String,
    pub exchange: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One archived extraction of a source filing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceDocument {
    pub doc_id: Uuid,
    pub company_code: String,
    #[sqlx(try_from = "String")]
    pub doc_type: DocTypeColumn,
    pub doc_date: NaiveDate,
    pub report_title: String,
    pub file_path: String,
    pub file_hash: String,
    pub original_content: Option<String>,
    pub raw_llm_output: serde_json::Value,
    pub extraction_metadata: serde_json::Value,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Thin newtype so `sqlx::FromRow`'s `try_from = "String"` can bridge the
/// text column to [`DocType`] without requiring a custom `Type` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocTypeColumn(pub DocType);

impl TryFrom<String> for DocTypeColumn {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "annual_report" => Ok(Self(DocType::AnnualReport)),
            "research_report" => Ok(Self(DocType::ResearchReport)),
            other => Err(format!("unknown doc_type column value {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Completed,
    Failed,
}

/// Nested concept detail payload merged by the fusion engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptDetails {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metrics: serde_json::Value,
    #[serde(default)]
    pub timeline: serde_json::Value,
    #[serde(default)]
    pub relations: Relations,
    #[serde(default)]
    pub source_sentences: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relations {
    #[serde(default)]
    pub customers: Vec<String>,
    #[serde(default)]
    pub partners: Vec<String>,
    #[serde(default)]
    pub subsidiaries_or_investees: Vec<String>,
}

/// The authoritative per-(company, concept-name) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessConceptMaster {
    pub concept_id: Uuid,
    pub company_code: String,
    pub concept_name: String,
    pub concept_category: ConceptCategory,
    pub importance_score: Decimal,
    pub development_stage: String,
    pub embedding: Option<Vec<f32>>,
    pub concept_details: ConceptDetails,
    pub last_updated_from_doc_id: Option<Uuid>,
    pub version: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stage's recorded outcome inside a [`CheckpointRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    pub timestamp: Option<DateTime<Utc>>,
    /// Canonical extracted-JSON path (Extract), archived doc_id (Archive),
    /// concept counts (Fuse), vector counts (Vectorize) — whichever the
    /// owning stage writes. Unknown keys are ignored by older readers.
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Default for StageState {
    fn default() -> Self {
        Self {
            status: StageStatus::Pending,
            timestamp: None,
            fields: serde_json::Map::new(),
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Extraction,
    Archive,
    Fusion,
    Vectorization,
}

impl StageName {
    pub const ALL: [Self; 4] = [
        Self::Extraction,
        Self::Archive,
        Self::Fusion,
        Self::Vectorization,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Archive => "archive",
            Self::Fusion => "fusion",
            Self::Vectorization => "vectorization",
        }
    }
}

/// Process-local, per-source-file state, persisted as a versioned envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Envelope format version; readers treat an unrecognized value as "no
    /// checkpoint" rather than erroring, per the forward-compatibility note.
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub file_path: String,
    pub file_hash: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub stages: indexmap::IndexMap<StageName, StageState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

fn current_schema_version() -> u32 {
    CHECKPOINT_SCHEMA_VERSION
}

impl CheckpointRecord {
    /// A fresh record with all four stages `pending`.
    #[must_use]
    pub fn fresh(file_path: impl Into<String>, file_hash: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut stages = indexmap::IndexMap::new();
        for stage in StageName::ALL {
            stages.insert(stage, StageState::default());
        }
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            file_path: file_path.into(),
            file_hash: file_hash.into(),
            last_modified: None,
            stages,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn stage_status(&self, stage: StageName) -> StageStatus {
        self.stages
            .get(&stage)
            .map_or(StageStatus::Pending, |s| s.status.clone())
    }

    pub fn is_success(&self, stage: StageName) -> bool {
        matches!(self.stage_status(stage), StageStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concept_category_round_trips_known_values() {
        for raw in ["核心业务", "新兴业务", "战略布局"] {
            let parsed = ConceptCategory::parse(raw).expect("known category");
            assert_eq!(parsed.as_str(), raw);
        }
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert!(ConceptCategory::parse("unknown").is_none());
    }

    #[test]
    fn fresh_checkpoint_has_all_stages_pending() {
        let now = Utc::now();
        let record = CheckpointRecord::fresh("a.md", "hash", now);
        for stage in StageName::ALL {
            assert_eq!(record.stage_status(stage), StageStatus::Pending);
            assert!(!record.is_success(stage));
        }
    }
}
