//! Splitting of input lines into requests.

use crate::error::ScpiError;

/// One `;`-separated request of an input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    /// Command header without the trailing `?`.
    pub header: &'a str,
    /// Argument text, trimmed, if any.
    pub argument: Option<&'a str>,
    pub query: bool,
}

/// Split `line` into its requests, one result per segment in line order.
///
/// Empty segments (`A;;B`, a trailing `;`) are skipped. The header ends at the
/// first whitespace; everything after it is the argument. A segment with a
/// malformed header yields [`ScpiError::InvalidSyntax`] in its own position,
/// so the segments before it remain usable.
pub fn split_line(line: &str) -> Vec<Result<Request<'_>, ScpiError>> {
    line.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(parse_segment)
        .collect()
}

fn parse_segment(segment: &str) -> Result<Request<'_>, ScpiError> {
    let (head, argument) = match segment.find(char::is_whitespace) {
        Some(index) => {
            let rest = segment[index..].trim();
            (&segment[..index], (!rest.is_empty()).then_some(rest))
        }
        None => (segment, None),
    };

    let (header, query) = match head.strip_suffix('?') {
        Some(header) => (header, true),
        None => (head, false),
    };

    if !is_valid_header(header) {
        return Err(ScpiError::InvalidSyntax(head.to_string()));
    }

    Ok(Request {
        header,
        argument,
        query,
    })
}

fn is_valid_header(header: &str) -> bool {
    if let Some(name) = header.strip_prefix('*') {
        return !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric());
    }

    let header = header.strip_prefix(':').unwrap_or(header);
    !header.is_empty()
        && header
            .split(':')
            .all(|node| !node.is_empty() && node.chars().all(|c| c.is_ascii_alphanumeric()))
}
