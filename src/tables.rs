//! Table commands: `rh table extract|interpret`.
//!
//! `extract` sends an image to the vision model, splits the answer into
//! named tables with [`parse_tables`] and writes each one as `<name>.csv`.
//! `interpret` renders a CSV file as text and streams an analysis of it.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use report_harness_core::llm::stream_text;
use report_harness_core::parse::{parse_tables, ParsedTable};
use report_harness_core::prompts::{table_extract_prompt, table_interpret_request};

use crate::config::Config;
use crate::llm::HttpLlmClient;
use crate::progress::ProgressMode;
use crate::report_cmd::file_stem;

/// MIME type for an image file, by extension.
pub fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Parse the comma-separated body of an extracted table into rows.
pub fn table_records(body: &str) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

pub fn write_csv(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Invalid CSV: {}", path.display()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Render a table as `表格名称: <name>` followed by `a, b, c` rows.
pub fn table_text(name: &str, rows: &[Vec<String>]) -> String {
    let mut out = format!("表格名称: {}\n", name);
    for row in rows {
        out.push_str(&row.join(", "));
        out.push('\n');
    }
    out
}

/// Write every table to `<out_dir>/<name>.csv`.
///
/// Names that map to the same file stem get `-2`, `-3`, ... suffixes.
pub fn write_tables(out_dir: &Path, tables: &[ParsedTable]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let mut written = Vec::with_capacity(tables.len());
    let mut stems = HashSet::new();
    for table in tables {
        let rows = table_records(&table.body)
            .with_context(|| format!("Table '{}' is not valid CSV", table.name))?;
        let base = file_stem(&table.name);
        let mut stem = base.clone();
        let mut n = 1;
        while !stems.insert(stem.clone()) {
            n += 1;
            stem = format!("{}-{}", base, n);
        }
        if n > 1 {
            tracing::warn!(table = %table.name, file = %stem, "table file name already taken");
        }
        let path = out_dir.join(format!("{}.csv", stem));
        write_csv(&path, &rows)?;
        written.push(path);
    }
    Ok(written)
}

/// Extract the tables in `image` to CSV files.
pub async fn run_table_extract(config: &Config, image: &Path, out_dir: &Path) -> Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {}", image.display()))?;
    let client = HttpLlmClient::new(&config.llm)?;

    let response = client
        .complete_with_image(
            &table_extract_prompt(),
            &bytes,
            image_mime(image),
            config.llm.temperature,
        )
        .await
        .context("Table extraction failed")?;

    let tables = parse_tables(&response);
    if tables.is_empty() {
        eprintln!("{}", response);
        bail!("No tables found in the model's answer for {}", image.display());
    }

    let written = write_tables(out_dir, &tables)?;
    println!("table extract {}", image.display());
    for (table, path) in tables.iter().zip(&written) {
        println!("  {}: {}", table.name, path.display());
    }
    Ok(())
}

/// Stream an interpretation of the table in `csv_path`.
pub async fn run_table_interpret(
    config: &Config,
    csv_path: &Path,
    background: Option<String>,
    progress: ProgressMode,
) -> Result<()> {
    let rows = read_csv(csv_path)?;
    if rows.is_empty() {
        bail!("{} has no rows", csv_path.display());
    }
    let name = csv_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let table = table_text(&name, &rows);

    let client = HttpLlmClient::new(&config.llm)?;
    let request = table_interpret_request(
        &table,
        background.as_deref().unwrap_or(""),
        config.llm.temperature,
    );
    let mut sink = progress.sink("interpret");
    match stream_text(&client, &request, sink.as_mut()).await {
        Ok(text) => {
            println!("{}", text.trim());
            Ok(())
        }
        Err(e) => {
            if let Some(partial) = e.partial_text() {
                println!("{}", partial);
            }
            Err(e).context("Table interpretation failed")
        }
    }
}
