use std::path::Path;

use crate::error::{KwsError, Result};
use crate::timeline::TokenEvent;

/// Parses one CTM line: `document channel start duration token posterior`.
///
/// The token is lowercased. `line_no` is 1-based and only used in errors.
pub fn parse_ctm_line(line: &str, line_no: usize) -> Result<TokenEvent> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[document_id, channel_id, start, duration, token, posterior] = fields.as_slice() else {
        return Err(KwsError::MalformedRecord {
            line: line_no,
            reason: format!("expected 6 fields, got {}", fields.len()),
        });
    };

    let number = |name: &str, value: &str| -> Result<f64> {
        value.parse::<f64>().map_err(|_| KwsError::MalformedRecord {
            line: line_no,
            reason: format!("invalid {name} '{value}'"),
        })
    };

    Ok(TokenEvent::new(
        document_id,
        channel_id,
        number("start time", start)?,
        number("duration", duration)?,
        token,
        number("posterior", posterior)?,
    ))
}

/// Parses CTM content, skipping blank lines and `;;` comments.
pub fn parse_ctm_str(content: &str) -> Result<Vec<TokenEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with(";;")
        })
        .map(|(i, line)| parse_ctm_line(line, i + 1))
        .collect()
}

/// Reads and parses a CTM file.
pub fn parse_ctm(path: impl AsRef<Path>) -> anyhow::Result<Vec<TokenEvent>> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| anyhow::anyhow!("Failed to read CTM '{}': {}", path.as_ref().display(), e))?;
    parse_ctm_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse CTM '{}': {}", path.as_ref().display(), e))
}

/// Splits a multi-document event stream into per-document streams, in order
/// of first appearance. Event order within a document is preserved.
pub fn group_by_document(events: Vec<TokenEvent>) -> Vec<(String, Vec<TokenEvent>)> {
    let mut groups: Vec<(String, Vec<TokenEvent>)> = Vec::new();
    for event in events {
        match groups.iter_mut().find(|(id, _)| *id == event.document_id) {
            Some((_, group)) => group.push(event),
            None => groups.push((event.document_id.clone(), vec![event])),
        }
    }
    groups
}
