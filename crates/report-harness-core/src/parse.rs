//! Best-effort parsers for LLM output.
//!
//! Model output is free text that usually, but not always, follows the
//! markers the prompts ask for. Nothing here returns an `Err`: a response
//! that cannot be parsed becomes [`ParsedScheme::Unparsed`] with the raw
//! text kept for manual correction, and a paragraph response without its
//! content marker falls back to the whole response.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ParseError;

/// Leaf-section line listing what to write, in outlines.
pub const WRITE_ITEMS_MARKER: &str = "撰写内容包括：";
/// Starts the comma-separated paragraph-name list in a scheme response.
pub const NAMES_MARKER: &str = "段落名称为：";
/// Starts the annotated template in a scheme response.
pub const TEMPLATE_MARKER: &str = "解析后的报告模版：";
/// Starts the paragraph body in a paragraph response.
pub const CONTENT_MARKER: &str = "[段落内容]";
/// Starts the reasoning block in a paragraph response.
pub const REASONING_MARKER: &str = "[思考过程]";
/// Precedes each table name in a table-extraction response.
pub const TABLE_NAME_MARKER: &str = "表格名称为";
/// Precedes each table body (CSV text) in a table-extraction response.
pub const TABLE_BODY_MARKER: &str = "表格正文如下:";

/// Result of parsing an outline into paragraph names and a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParsedScheme {
    Parsed {
        /// Outline text with a `{name}` token after every paragraph name.
        template: String,
        /// Paragraph names in generation order, unique.
        placeholders: Vec<String>,
    },
    /// The response did not contain the expected blocks.
    Unparsed { raw_text: String, reason: ParseError },
}

impl ParsedScheme {
    pub fn is_parsed(&self) -> bool {
        matches!(self, ParsedScheme::Parsed { .. })
    }

    /// Empty when unparsed.
    pub fn placeholders(&self) -> &[String] {
        match self {
            ParsedScheme::Parsed { placeholders, .. } => placeholders,
            ParsedScheme::Unparsed { .. } => &[],
        }
    }

    /// `""` when unparsed.
    pub fn template(&self) -> &str {
        match self {
            ParsedScheme::Parsed { template, .. } => template,
            ParsedScheme::Unparsed { .. } => "",
        }
    }
}

/// Matches `{name}` tokens: no nested braces, no line breaks.
pub fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([^{}\n]+)\}").expect("placeholder pattern is valid")
    })
}

/// Distinct `{name}` tokens of `template`, in first-appearance order.
pub fn placeholder_tokens(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cap in placeholder_re().captures_iter(template) {
        let name = cap[1].trim().to_string();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Parse a scheme response: a name list after `段落名称为：` followed by
/// an annotated template after `解析后的报告模版：`.
///
/// Names are split on `,` `，` and line breaks. Template tokens missing from
/// the name list are appended so every placeholder gets a paragraph.
pub fn parse_scheme(text: &str) -> ParsedScheme {
    let unparsed = |reason: ParseError| {
        warn!(%reason, "scheme response could not be parsed");
        ParsedScheme::Unparsed {
            raw_text: text.to_string(),
            reason,
        }
    };

    let Some(names_at) = text.find(NAMES_MARKER) else {
        return unparsed(ParseError::MissingMarker(NAMES_MARKER.to_string()));
    };
    let after_names = &text[names_at + NAMES_MARKER.len()..];
    let Some(template_at) = after_names.find(TEMPLATE_MARKER) else {
        return unparsed(ParseError::MissingMarker(TEMPLATE_MARKER.to_string()));
    };

    let mut placeholders = split_names(&after_names[..template_at]);
    if placeholders.is_empty() {
        return unparsed(ParseError::EmptyBlock(NAMES_MARKER.to_string()));
    }

    let template_block = &after_names[template_at + TEMPLATE_MARKER.len()..];
    let template = strip_code_fences(template_block.trim_start_matches([' ', '\t']))
        .trim_start_matches(['\r', '\n'])
        .trim_end()
        .to_string();
    if template.trim().is_empty() {
        return unparsed(ParseError::EmptyBlock(TEMPLATE_MARKER.to_string()));
    }

    for token in placeholder_tokens(&template) {
        if !placeholders.contains(&token) {
            warn!(name = %token, "template placeholder missing from name list; appending");
            placeholders.push(token);
        }
    }

    ParsedScheme::Parsed {
        template,
        placeholders,
    }
}

fn split_names(block: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in block.split([',', '，', '\n']) {
        let name = item.trim().trim_matches('`').trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Rule-based scheme for an outline, without an LLM.
///
/// Every `撰写内容包括：a、b` line becomes `a{a}、b{b}`; items are split on
/// `、` `，` `,` `；` `;`. Other lines are kept as they are.
pub fn annotate_outline(outline: &str) -> ParsedScheme {
    let mut placeholders: Vec<String> = Vec::new();
    let mut lines: Vec<String> = Vec::new();

    for line in outline.lines() {
        let Some(pos) = line.find(WRITE_ITEMS_MARKER) else {
            lines.push(line.to_string());
            continue;
        };
        let indent = &line[..line.len() - line.trim_start().len()];
        let prefix = line[..pos].trim();
        let rest = &line[pos + WRITE_ITEMS_MARKER.len()..];

        let items: Vec<String> = rest
            .split(['、', '，', ',', '；', ';'])
            .map(|s| s.trim().trim_end_matches(['。', '.', '…']).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let annotated: Vec<String> = items
            .iter()
            .map(|name| format!("{name}{{{name}}}"))
            .collect();
        for name in items {
            if !placeholders.contains(&name) {
                placeholders.push(name);
            }
        }

        let mut out = String::from(indent);
        if !prefix.is_empty() {
            out.push_str(prefix);
            out.push('\n');
            out.push_str(indent);
        }
        out.push_str(&annotated.join("、"));
        lines.push(out);
    }

    if placeholders.is_empty() {
        return ParsedScheme::Unparsed {
            raw_text: outline.to_string(),
            reason: ParseError::MissingMarker(WRITE_ITEMS_MARKER.to_string()),
        };
    }

    ParsedScheme::Parsed {
        template: lines.join("\n"),
        placeholders,
    }
}

/// Paragraph body from a paragraph response: the text after the last
/// `[段落内容]`, trimmed, with code fences removed.
///
/// Without the marker the whole response is used.
pub fn extract_paragraph(response: &str) -> String {
    let body = match response.rfind(CONTENT_MARKER) {
        Some(pos) => &response[pos + CONTENT_MARKER.len()..],
        None => {
            warn!(
                marker = CONTENT_MARKER,
                "paragraph response has no content marker; keeping full text"
            );
            response
        }
    };
    strip_code_fences(body).trim().to_string()
}

/// Drop Markdown fence lines (```` ``` ````, ```` ```plaintext ````).
pub fn strip_code_fences(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect();
    let mut out = kept.join("\n");
    if text.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

/// One table recovered from a vision-model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTable {
    pub name: String,
    /// Comma-separated rows, one per line.
    pub body: String,
}

/// Split a table-extraction response into named tables.
///
/// Each table starts with `表格名称为<name>` and carries its rows after
/// `表格正文如下:` up to the next table. A repeated name replaces the
/// earlier table in place.
pub fn parse_tables(text: &str) -> Vec<ParsedTable> {
    let mut tables: Vec<ParsedTable> = Vec::new();

    for segment in text.split(TABLE_NAME_MARKER).skip(1) {
        let name = segment
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .trim_start_matches([':', '：'])
            .trim()
            .to_string();
        let Some(pos) = segment.find(TABLE_BODY_MARKER) else {
            continue;
        };
        let body = strip_code_fences(&segment[pos + TABLE_BODY_MARKER.len()..])
            .trim()
            .to_string();
        if name.is_empty() || body.is_empty() {
            continue;
        }

        match tables.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.body = body,
            None => tables.push(ParsedTable { name, body }),
        }
    }

    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheme_well_formed() {
        let text = "段落名称为：\n报告撰写的目的,报告撰写的背景\n\n解析后的报告模版：\n1\\总述\n   报告撰写的目的{报告撰写的目的}、报告撰写的背景{报告撰写的背景}\n";
        let scheme = parse_scheme(text);
        assert!(scheme.is_parsed());
        assert_eq!(scheme.placeholders(), &["报告撰写的目的", "报告撰写的背景"]);
        assert!(scheme.template().starts_with("1\\总述"));
        assert!(scheme.template().contains("{报告撰写的背景}"));
    }

    #[test]
    fn test_parse_scheme_fullwidth_commas_and_missing_names() {
        let text = "段落名称为：目的，背景\n解析后的报告模版：\n目的{目的}\n背景{背景}\n现状{现状}";
        let scheme = parse_scheme(text);
        assert_eq!(scheme.placeholders(), &["目的", "背景", "现状"]);
    }

    #[test]
    fn test_parse_scheme_missing_marker_is_unparsed() {
        let scheme = parse_scheme("这是一段没有标记的回复");
        match &scheme {
            ParsedScheme::Unparsed { raw_text, reason } => {
                assert_eq!(raw_text, "这是一段没有标记的回复");
                assert_eq!(reason, &ParseError::MissingMarker(NAMES_MARKER.to_string()));
            }
            other => panic!("expected Unparsed, got {:?}", other),
        }
        assert!(scheme.placeholders().is_empty());
        assert_eq!(scheme.template(), "");
    }

    #[test]
    fn test_parse_scheme_missing_template_marker() {
        let scheme = parse_scheme("段落名称为：目的,背景");
        assert_eq!(
            scheme,
            ParsedScheme::Unparsed {
                raw_text: "段落名称为：目的,背景".to_string(),
                reason: ParseError::MissingMarker(TEMPLATE_MARKER.to_string()),
            }
        );
    }

    #[test]
    fn test_parse_scheme_empty_template() {
        let scheme = parse_scheme("段落名称为：目的\n解析后的报告模版：\n   ");
        assert!(matches!(
            scheme,
            ParsedScheme::Unparsed {
                reason: ParseError::EmptyBlock(_),
                ..
            }
        ));
    }

    #[test]
    fn test_annotate_outline() {
        let scheme = annotate_outline("1 总述\n1.1 背景\n撰写内容包括：目的、背景\n");
        assert_eq!(scheme.placeholders(), &["目的", "背景"]);
        assert_eq!(scheme.template(), "1 总述\n1.1 背景\n目的{目的}、背景{背景}");
    }

    #[test]
    fn test_annotate_outline_keeps_indent_and_heading_prefix() {
        let outline = "1\\总述\n   1.1\\背景 撰写内容包括：目的；现状。";
        let scheme = annotate_outline(outline);
        assert_eq!(scheme.placeholders(), &["目的", "现状"]);
        assert_eq!(
            scheme.template(),
            "1\\总述\n   1.1\\背景\n   目的{目的}、现状{现状}"
        );
    }

    #[test]
    fn test_annotate_outline_without_items() {
        assert!(!annotate_outline("1 总述\n1.1 背景").is_parsed());
    }

    #[test]
    fn test_extract_paragraph() {
        let resp = "[思考过程]\n```plaintext\n思考……\n```\n[段落内容]\n  本区人口稳定增长。\n";
        assert_eq!(extract_paragraph(resp), "本区人口稳定增长。");
        assert_eq!(extract_paragraph("  直接正文  "), "直接正文");
    }

    #[test]
    fn test_placeholder_tokens_unique_in_order() {
        let tokens = placeholder_tokens("{a}{b}\n{a}{ c }{}{x\ny}");
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_tables() {
        let text = "图片中有两个表格。\n表格名称为技术记录表\n\n表格正文如下:\n时间,人员,次数\n2020.1.10,张三,1212\n\n表格名称为：人员表\n\n表格正文如下:\n```csv\n姓名,年龄\n张三,30\n```\n";
        let tables = parse_tables(text);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "技术记录表");
        assert_eq!(tables[0].body, "时间,人员,次数\n2020.1.10,张三,1212");
        assert_eq!(tables[1].name, "人员表");
        assert_eq!(tables[1].body, "姓名,年龄\n张三,30");
    }

    #[test]
    fn test_parse_tables_skips_bodiless() {
        assert!(parse_tables("表格名称为空表\n\n没有正文").is_empty());
        assert!(parse_tables("no tables here").is_empty());
    }

    #[test]
    fn test_scheme_serde_roundtrip_tagged() {
        let scheme = ParsedScheme::Unparsed {
            raw_text: "x".into(),
            reason: ParseError::MissingMarker(NAMES_MARKER.into()),
        };
        let json = serde_json::to_string(&scheme).unwrap();
        assert!(json.contains("\"status\":\"unparsed\""));
        let back: ParsedScheme = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scheme);
    }
}
