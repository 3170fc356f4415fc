#![forbid(unsafe_code)]
//! Durable per-source-file state: the checkpoint store.
//!
//! Every mutation is flushed to disk as a temp-file-then-rename, so a
//! process killed mid-write never leaves a half-written checkpoint for the
//! next run to misread.

use std::fs;
use std::path::{Path, PathBuf};

use ashare_core::error::Result;
use ashare_core::models::{CheckpointRecord, StageName, StageState, StageStatus, CHECKPOINT_SCHEMA_VERSION};
use chrono::Utc;

/// Where the checkpoint file for `source_path` would live under `checkpoints_dir`.
#[must_use]
pub fn checkpoint_path(checkpoints_dir: &Path, source_path: &Path) -> PathBuf {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());
    checkpoints_dir.join(format!("{stem}_checkpoint.json"))
}

/// Loads the checkpoint for `source_path`, or constructs a fresh one (all
/// stages `pending`) if no file exists or it fails to parse. A checkpoint
/// whose `schema_version` is newer than this reader understands is treated
/// the same as "absent" rather than as an error.
pub fn load(
    checkpoints_dir: &Path,
    source_path: &Path,
    file_hash: &str,
) -> Result<CheckpointRecord> {
    let path = checkpoint_path(checkpoints_dir, source_path);
    match fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice::<CheckpointRecord>(&bytes) {
            Ok(record) if record.schema_version <= CHECKPOINT_SCHEMA_VERSION => Ok(record),
            _ => Ok(fresh(source_path, file_hash)),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(fresh(source_path, file_hash)),
        Err(e) => Err(e.into()),
    }
}

fn fresh(source_path: &Path, file_hash: &str) -> CheckpointRecord {
    CheckpointRecord::fresh(source_path.to_string_lossy().into_owned(), file_hash, Utc::now())
}

/// Marks all four stages `success` because the store already contains a
/// `SourceDocument` whose `file_hash` matches the current file — used when
/// no checkpoint file exists on disk but the work is already done.
#[must_use]
pub fn reconstruct_from_db(source_path: &Path, file_hash: &str, doc_id: uuid::Uuid) -> CheckpointRecord {
    let mut record = fresh(source_path, file_hash);
    for stage in StageName::ALL {
        let mut fields = serde_json::Map::new();
        if stage == StageName::Archive {
            fields.insert("doc_id".to_string(), serde_json::Value::String(doc_id.to_string()));
        }
        record.stages.insert(
            stage,
            StageState {
                status: StageStatus::Success,
                timestamp: Some(Utc::now()),
                fields,
                reason: None,
            },
        );
    }
    record
}

/// Updates one stage's status (and optional fields/reason), refreshes
/// `updated_at`, and persists the whole record atomically via
/// temp-file-then-rename in the same directory as the final path (so the
/// rename is on a single filesystem and therefore atomic).
pub fn update_stage(
    checkpoints_dir: &Path,
    record: &mut CheckpointRecord,
    stage: StageName,
    status: StageStatus,
    fields: serde_json::Map<String, serde_json::Value>,
    reason: Option<String>,
) -> Result<()> {
    let now = Utc::now();
    record.stages.insert(
        stage,
        StageState {
            status,
            timestamp: Some(now),
            fields,
            reason,
        },
    );
    record.updated_at = now;
    persist(checkpoints_dir, record)
}

fn persist(checkpoints_dir: &Path, record: &CheckpointRecord) -> Result<()> {
    fs::create_dir_all(checkpoints_dir)?;
    let source_path = Path::new(&record.file_path);
    let final_path = checkpoint_path(checkpoints_dir, source_path);
    let tmp_path = final_path.with_extension("json.tmp");

    let json = serde_json::to_vec_pretty(record)?;
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}
