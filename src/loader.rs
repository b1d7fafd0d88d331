//! Document loader: walks a source folder and extracts plain text.
//!
//! Files are selected with the `[loader]` include/exclude globs (matched
//! against the path relative to the folder) and converted by extension:
//!
//! | Extension | Content type | Extraction |
//! |-----------|--------------|------------|
//! | `.pdf` | `application/pdf` | `pdf-extract` |
//! | `.csv` | `text/csv` | one `header: value` block per row |
//! | anything else | `text/plain` | UTF-8 (lossy) |
//!
//! Documents are returned sorted by relative path so chunk ids are stable
//! across rebuilds.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use report_harness_core::models::SourceDocument;

use crate::config::LoaderConfig;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_TEXT: &str = "text/plain";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source folder does not exist: {0}")]
    MissingFolder(PathBuf),

    #[error("invalid glob pattern '{pattern}': {message}")]
    BadGlob { pattern: String, message: String },

    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed for {path}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("CSV parsing failed for {path}: {message}")]
    Csv { path: PathBuf, message: String },
}

/// Load every matching file under `root`.
pub fn load_folder(root: &Path, config: &LoaderConfig) -> Result<Vec<SourceDocument>, LoadError> {
    if !root.is_dir() {
        return Err(LoadError::MissingFolder(root.to_path_buf()));
    }

    let include_set = build_globset(&config.include_globs, true)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes, false)?;

    let mut docs = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry.map_err(|e| LoadError::Walk {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let doc = read_document(path, &rel_str)?;
        tracing::debug!(source = %doc.source, content_type = %doc.content_type, chars = doc.body.chars().count(), "loaded document");
        docs.push(doc);
    }

    docs.sort_by(|a, b| a.source.cmp(&b.source));

    Ok(docs)
}

/// Content type implied by the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => MIME_PDF,
        Some("csv") => MIME_CSV,
        _ => MIME_TEXT,
    }
}

/// Read one file and extract its text.
pub fn read_document(path: &Path, relative: &str) -> Result<SourceDocument, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let content_type = content_type_for(path);

    let body = match content_type {
        MIME_PDF => extract_pdf(path, &bytes)?,
        MIME_CSV => csv_to_text(&bytes).map_err(|e| LoadError::Csv {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        _ => String::from_utf8_lossy(&bytes).into_owned(),
    };

    Ok(SourceDocument {
        source: relative.to_string(),
        content_type: content_type.to_string(),
        body,
    })
}

/// Extract the text layer of a PDF.
pub fn extract_pdf(path: &Path, bytes: &[u8]) -> Result<String, LoadError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| LoadError::Pdf {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Render CSV rows as `header: value` lines, one blank-line-separated
/// block per row.
pub fn csv_to_text(bytes: &[u8]) -> Result<String, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut blocks = Vec::new();
    for record in reader.records() {
        let record = record?;
        let lines: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(i, value)| match headers.get(i) {
                Some(h) if !h.is_empty() => format!("{}: {}", h, value),
                _ => value.to_string(),
            })
            .collect();
        blocks.push(lines.join("\n"));
    }
    Ok(blocks.join("\n\n"))
}

/// Include globs match case-insensitively so `REPORT.PDF` is picked up.
fn build_globset(patterns: &[String], case_insensitive: bool) -> Result<GlobSet, LoadError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| LoadError::BadGlob {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| LoadError::BadGlob {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_folder() {
        let err = load_folder(Path::new("/definitely/not/here"), &LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, LoadError::MissingFolder(_)));
    }

    #[test]
    fn test_loads_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "第二篇").unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "第一篇").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        std::fs::write(dir.path().join(".hidden.txt"), "ignored").unwrap();

        let docs = load_folder(dir.path(), &LoaderConfig::default()).unwrap();
        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["b.txt", "sub/a.txt"]);
        assert_eq!(docs[1].body, "第一篇");
        assert_eq!(docs[1].content_type, MIME_TEXT);
    }

    #[test]
    fn test_includes_ignore_extension_case() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("NOTES.TXT"), "大写").unwrap();
        std::fs::write(dir.path().join("data.Csv"), "年份,产值\n2024,1310\n").unwrap();
        std::fs::write(dir.path().join("README.MD"), "ignored").unwrap();

        let docs = load_folder(dir.path(), &LoaderConfig::default()).unwrap();
        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["NOTES.TXT", "data.Csv"]);
        assert_eq!(docs[1].content_type, MIME_CSV);
        assert_eq!(docs[1].body, "年份: 2024\n产值: 1310");
    }

    #[test]
    fn test_exclude_globs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "keep").unwrap();
        std::fs::write(dir.path().join("drop.txt"), "drop").unwrap();
        let cfg = LoaderConfig {
            exclude_globs: vec!["drop.txt".to_string()],
            ..LoaderConfig::default()
        };
        let docs = load_folder(dir.path(), &cfg).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "keep.txt");
    }

    #[test]
    fn test_csv_rendered_as_row_blocks() {
        let text = csv_to_text("时间,人员,次数\n2020.1.10,张三,1212\n2020.1.15,李四,2\n".as_bytes()).unwrap();
        assert_eq!(
            text,
            "时间: 2020.1.10\n人员: 张三\n次数: 1212\n\n时间: 2020.1.15\n人员: 李四\n次数: 2"
        );
    }

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a/B.PDF")), MIME_PDF);
        assert_eq!(content_type_for(Path::new("t.csv")), MIME_CSV);
        assert_eq!(content_type_for(Path::new("readme")), MIME_TEXT);
    }

    #[test]
    fn test_garbage_pdf_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        assert!(matches!(
            read_document(&path, "broken.pdf"),
            Err(LoadError::Pdf { .. })
        ));
    }
}
