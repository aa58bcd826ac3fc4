//! HTML rendering of a submission for the notification email.

use std::fmt::Write;

use serde_json::Value;

use crate::record::SubmissionRecord;

const TABLE_STYLE: &str = "width:100%;border-collapse:collapse;border: 1px solid #ccc;";
const LABEL_STYLE: &str = "padding: 8px; border-bottom: 1px solid #ddd;";
const VALUE_STYLE: &str = "padding: 8px; border-bottom: 1px solid #ddd; width:100%;";

/// Renders the record as a two-column table, one row per field.
#[must_use]
pub fn render_table(record: &SubmissionRecord) -> String {
    let mut html = format!("<table style=\"{TABLE_STYLE}\">");
    for (field, value) in record.fields() {
        let _ = write!(
            html,
            "\n<tr><td style=\"{LABEL_STYLE}\"><b>{}</b></td><td style=\"{VALUE_STYLE}\">{}</td></tr>",
            escape_html(&title_case(field)),
            escape_html(&render_value(value)),
        );
    }
    html.push_str("</table>");
    html
}

/// Turns a field name into a label: `legal_first_name` becomes
/// `Legal First Name`, `dateOfBirth` becomes `Date Of Birth`.
///
/// Words break at punctuation and whitespace, at lower-to-upper case
/// changes, at the end of an acronym (`HTTPServer` -> `HTTP Server`) and
/// between letters and digits.
#[must_use]
pub fn title_case(field: &str) -> String {
    let chars: Vec<char> = field.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            flush(&mut words, &mut current);
            continue;
        }
        if let Some(prev) = current.chars().last() {
            let next = chars.get(i + 1).copied();
            let breaks = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_alphabetic() && c.is_numeric())
                || (prev.is_numeric() && c.is_alphabetic())
                || (prev.is_uppercase()
                    && c.is_uppercase()
                    && next.is_some_and(char::is_lowercase));
            if breaks {
                flush(&mut words, &mut current);
            }
        }
        current.push(c);
    }
    flush(&mut words, &mut current);

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn flush(words: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

/// Text shown for a value: strings as-is, everything else as JSON.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escapes the five HTML-significant characters.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
