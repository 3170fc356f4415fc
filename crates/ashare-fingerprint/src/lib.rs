#![forbid(unsafe_code)]
//! Content hashing, document-type classification, and company-code
//! extraction from filename and body text.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use ashare_core::error::{Error, Result};
use ashare_core::models::DocType;
use sha2::{Digest, Sha256};

const HASH_BLOCK_SIZE: usize = 4096;
const BODY_SCAN_BYTES: usize = 2000;

/// SHA-256 of the full file contents, streamed in 4 KiB blocks, as a
/// lowercase 64-character hex string.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Classifies a filing by directory substring first, filename heuristics
/// second. Defaults to `ResearchReport`.
#[must_use]
pub fn infer_doc_type(path: &Path) -> DocType {
    let path_str = path.to_string_lossy().to_lowercase();
    if path_str.contains("annual_report") {
        return DocType::AnnualReport;
    }
    if path_str.contains("research_report") {
        return DocType::ResearchReport;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if file_name.contains("年度报告") || file_name.contains("annual") {
        DocType::AnnualReport
    } else {
        DocType::ResearchReport
    }
}

/// Reads `path`, decoding with UTF-8 first and falling back through a
/// deterministic list of legacy Chinese encodings. Returns the decoded text
/// and the encoding that succeeded.
pub fn read_text_with_fallback(path: &Path) -> Result<(String, &'static str)> {
    let bytes = std::fs::read(path)?;
    if let Ok(text) = String::from_utf8(bytes.clone()) {
        return Ok((text, "utf-8"));
    }
    for (name, encoding) in [
        ("gbk", encoding_rs::GBK),
        ("gb2312", encoding_rs::GBK), // GB2312 is a strict subset decodable by the GBK table.
        ("gb18030", encoding_rs::GB18030),
        ("big5", encoding_rs::BIG5),
    ] {
        let (decoded, _, had_errors) = encoding.decode(&bytes);
        if !had_errors {
            return Ok((decoded.into_owned(), name));
        }
    }
    Err(Error::UndecodableText {
        path: path.display().to_string(),
    })
}

fn company_code_patterns() -> &'static Vec<regex::Regex> {
    static PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?:股票代码|证券代码|代码)\s*[：:]\s*\**(\d{6})\**",
            r"\|\s*(\d{6})\s*\|",
            r"[（(](\d{6})[）)]",
            r"(?m)^(\d{6})\b",
            r"A股代码\s*[：:]\s*(\d{6})",
            r"(\d{6})[、/](?:\d{6}|\d{5})",
            r"(?:^|\s)(\d{6})(?:\s|$)",
            r"(?i)(?:SZ|SH)\s*(\d{6})",
            r">(\d{6})<",
            r"股票代码[^0-9]{0,20}(\d{6})",
            r"(?:股票|证券|代码|简称)[^0-9]{0,50}(\d{6})",
        ]
        .iter()
        .map(|p| regex::Regex::new(p).expect("static company-code pattern is valid"))
        .collect()
    })
}

fn filename_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"(\d{6})(?:_|[^\d])").expect("valid"))
}

fn is_valid_code(candidate: &str) -> bool {
    if candidate.len() != 6 || !candidate.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match candidate.parse::<u32>() {
        Ok(n) => n > 0 && n <= 999_999,
        Err(_) => false,
    }
}

/// Extracts a 6-digit company code, trying the filename first and falling
/// back to an ordered list of body patterns scanned over the first 2000
/// bytes of the file. Returns `None` if no pattern matches a valid code.
#[must_use]
pub fn extract_company_code(path: &Path, body: Option<&str>) -> Option<String> {
    if let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
        if let Some(caps) = filename_pattern().captures(&file_name) {
            let candidate = &caps[1];
            if is_valid_code(candidate) {
                return Some(candidate.to_string());
            }
        }
    }

    let body = body?;
    let scan_end = body
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&i| i <= BODY_SCAN_BYTES)
        .last()
        .unwrap_or(0);
    let window = &body[..scan_end];

    for pattern in company_code_patterns() {
        if let Some(caps) = pattern.captures(window) {
            let candidate = &caps[1];
            if is_valid_code(candidate) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_is_stable_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world").unwrap();
        let h = hash_file(&path).unwrap();
        assert_eq!(
            h,
            "b94d27b9934d3e08a52e52d7da7dacefbe65e1bb9c0b6b5242f55d3ff27e0b1",
        );
    }

    #[test]
    fn infer_doc_type_by_directory() {
        assert_eq!(
            infer_doc_type(Path::new("data/annual_reports/x.md")),
            DocType::AnnualReport
        );
        assert_eq!(
            infer_doc_type(Path::new("data/research_reports/x.md")),
            DocType::ResearchReport
        );
    }

    #[test]
    fn infer_doc_type_by_filename_heuristic() {
        assert_eq!(
            infer_doc_type(Path::new("other/300257_2024_annual.md")),
            DocType::AnnualReport
        );
        assert_eq!(
            infer_doc_type(Path::new("other/300257_年度报告.md")),
            DocType::AnnualReport
        );
        assert_eq!(
            infer_doc_type(Path::new("other/300257_broker_note.md")),
            DocType::ResearchReport
        );
    }

    #[test]
    fn extracts_code_from_filename() {
        let code = extract_company_code(Path::new("300257_开山股份_2024_annual_report.md"), None);
        assert_eq!(code.as_deref(), Some("300257"));
    }

    #[test]
    fn extracts_code_from_body_when_filename_lacks_one() {
        let code = extract_company_code(
            Path::new("report.md"),
            Some("公司基本信息\n股票代码：300257\n其他内容"),
        );
        assert_eq!(code.as_deref(), Some("300257"));
    }

    #[test]
    fn rejects_out_of_range_numeric_code() {
        assert!(!is_valid_code("000000"));
        assert!(!is_valid_code("12345"));
        assert!(is_valid_code("300257"));
    }

    #[test]
    fn reads_utf8_text_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all("你好世界".as_bytes()).unwrap();
        let (text, enc) = read_text_with_fallback(&path).unwrap();
        assert_eq!(text, "你好世界");
        assert_eq!(enc, "utf-8");
    }
}
