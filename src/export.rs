//! `rh report export`: the finished report as a standalone HTML page.
//!
//! Outline-numbered lines (`1 总述`, `1.1 背景`) become headings, other
//! lines become paragraphs. The page has inline styles only, so it opens
//! offline and prints cleanly.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::report_cmd::workspace;

const STYLE: &str = "body{font-family:'Microsoft YaHei',Arial,sans-serif;line-height:1.6;color:#333;\
background:#f8f9fa;padding:20px}\
.container{max-width:1000px;margin:0 auto;background:#fff;padding:40px;border-radius:8px}\
.header{text-align:center;border-bottom:2px solid #2c3e50;margin-bottom:30px;padding-bottom:20px}\
.header h1{color:#2c3e50}.subtitle{color:#7f8c8d}\
h2{color:#2c3e50;margin-top:30px}h3,h4{color:#34495e}p{text-indent:2em;margin:10px 0}";

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Heading depth of an outline-numbered line: `1 x` is 1, `1.2 x` is 2.
fn heading_level(line: &str) -> Option<usize> {
    let (number, rest) = line.split_once(char::is_whitespace)?;
    let number = number.trim_end_matches('.');
    if rest.trim().is_empty() || !number.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    if !number.chars().all(|c| c.is_ascii_digit() || c == '.') || number.contains("..") {
        return None;
    }
    // A bare number longer than two digits is a year or a figure.
    if !number.contains('.') && number.len() > 2 {
        return None;
    }
    Some(number.split('.').count())
}

/// Render `report` as a complete HTML document.
pub fn render_html(title: &str, report: &str, generated: &str) -> String {
    let mut body = String::new();
    for line in report.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match heading_level(line) {
            Some(level) => {
                // h1 is the page title.
                let tag = format!("h{}", (level + 1).min(4));
                body.push_str(&format!("<{tag}>{}</{tag}>\n", escape_html(line)));
            }
            None => body.push_str(&format!("<p>{}</p>\n", escape_html(line))),
        }
    }

    let title = escape_html(title);
    format!(
        "<!DOCTYPE html>\n<html lang=\"zh-CN\">\n<head>\n<meta charset=\"UTF-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<div class=\"container\">\n\
<div class=\"header\">\n<h1>{title}</h1>\n<div class=\"subtitle\">{}</div>\n</div>\n\
{body}</div>\n</body>\n</html>\n",
        escape_html(generated)
    )
}

/// Write `<title>.html`, or `output` when given.
///
/// Uses the optimized report; `draft` exports the compiled draft instead.
pub fn run_report_export(
    config: &Config,
    title: &str,
    output: Option<&Path>,
    draft: bool,
) -> Result<()> {
    let ws = workspace(config, title)?;
    let state = ws.require()?;

    let text = if draft {
        match &state.draft {
            Some(d) => d.clone(),
            None => bail!(
                "Report '{}' has no draft yet. Run: rh report compile --title \"{}\"",
                title.trim(),
                title.trim()
            ),
        }
    } else {
        match state.final_report() {
            Some(r) => r,
            None => bail!(
                "Report '{}' is not optimized yet (stage: {}). Run: rh report optimize --title \"{}\" --all, \
                 or export the draft with --draft",
                title.trim(),
                state.stage,
                title.trim()
            ),
        }
    };

    let generated = chrono::Local::now().format("%Y年%m月%d日").to_string();
    let html = render_html(&state.request.title, &text, &generated);

    let path = output.map(Path::to_path_buf).unwrap_or_else(|| ws.path("html"));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, html).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("report {}", state.request.title);
    println!("  html: {}", path.display());
    Ok(())
}
