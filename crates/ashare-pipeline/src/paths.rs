//! Canonical on-disk locations and the small derivations (doc_date,
//! report_title) that the orchestrator's Archive stage needs.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ashare_adapters::llm::ExtractionData;
use ashare_core::config::Config;
use ashare_core::models::DocType;
use chrono::{Datelike, NaiveDate, Utc};

fn year_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"(19|20)\d{2}").expect("valid"))
}

fn year_from_filename(path: &Path) -> Option<i32> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    year_pattern().find(&name)?.as_str().parse().ok()
}

/// The canonical extracted-JSON path for a source file: `{doc_type}s/{stem}_extracted.json`.
#[must_use]
pub fn extracted_json_path(cfg: &Config, doc_type: DocType, source_path: &Path) -> PathBuf {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());
    cfg.extracted_dir
        .join(format!("{}s", doc_type.as_str()))
        .join(format!("{stem}_extracted.json"))
}

/// A four-digit year parsed from the filename, collapsed to Dec 31 for
/// annual reports (the filing year's fiscal year-end); falls back to
/// today's date when no year can be parsed.
#[must_use]
pub fn derive_doc_date(source_path: &Path, doc_type: DocType) -> NaiveDate {
    let today = Utc::now().date_naive();
    let year = year_from_filename(source_path).unwrap_or(today.year());
    match doc_type {
        DocType::AnnualReport => NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
        DocType::ResearchReport => {
            if year_from_filename(source_path).is_some() {
                NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today)
            } else {
                today
            }
        }
    }
}

/// `extraction_data.report_title`, else `company_name_full`, else the
/// source file's stem.
#[must_use]
pub fn derive_report_title(extraction_data: &ExtractionData, source_path: &Path) -> String {
    extraction_data
        .report_title
        .clone()
        .or_else(|| extraction_data.company_name_full.clone())
        .unwrap_or_else(|| {
            source_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "untitled".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annual_report_date_collapses_to_year_end() {
        let path = Path::new("300257_2023_annual_report.md");
        let date = derive_doc_date(path, DocType::AnnualReport);
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn extracted_path_uses_doc_type_plural_and_stem() {
        let mut cfg = Config::default();
        cfg.extracted_dir = PathBuf::from("data/extracted");
        let path = extracted_json_path(&cfg, DocType::AnnualReport, Path::new("300257_2023.md"));
        assert_eq!(
            path,
            PathBuf::from("data/extracted/annual_reports/300257_2023_extracted.json")
        );
    }
}
