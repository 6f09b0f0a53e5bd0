//! Topic names and subscription pattern matching.
//!
//! Event names are dot-delimited (`database.user_added`). Patterns use the same
//! shape and may contain wildcards:
//! - `*` matches exactly one segment;
//! - a trailing `**` matches one or more remaining segments.
//!
//! Matching is a plain walk over segments; no regex engine is involved.

use super::error::BusError;

pub const SEPARATOR: char = '.';
pub const SINGLE_WILDCARD: &str = "*";
pub const MULTI_WILDCARD: &str = "**";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Single,
    Rest,
}

/// Split a pattern into tagged segments.
///
/// `**` only acts as a wildcard in the final position. Anywhere else it is kept
/// as a literal, which can never match an emitted name.
fn segments(pattern: &str) -> Vec<Segment<'_>> {
    let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
    let last = parts.len() - 1;
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| match part {
            MULTI_WILDCARD if i == last => Segment::Rest,
            SINGLE_WILDCARD => Segment::Single,
            other => Segment::Literal(other),
        })
        .collect()
}

/// Returns true if `pattern` selects the event `name`.
pub fn matches(pattern: &str, name: &str) -> bool {
    if pattern == name {
        return true;
    }

    let mut parts = name.split(SEPARATOR);
    for segment in segments(pattern) {
        match segment {
            Segment::Rest => return parts.next().is_some_and(|part| !part.is_empty()),
            Segment::Single => match parts.next() {
                Some(part) if !part.is_empty() => {}
                _ => return false,
            },
            Segment::Literal(literal) => {
                if parts.next() != Some(literal) {
                    return false;
                }
            }
        }
    }

    parts.next().is_none()
}

/// Returns true if the pattern contains any wildcard segment.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern
        .split(SEPARATOR)
        .any(|part| part == SINGLE_WILDCARD || part == MULTI_WILDCARD)
}

/// Check that `name` can be emitted: non-empty, no wildcard characters and
/// no empty segments.
pub fn validate_name(name: &str) -> Result<(), BusError> {
    if name.is_empty() {
        return Err(BusError::invalid_name(name, "name is empty"));
    }
    if name.contains('*') {
        return Err(BusError::invalid_name(
            name,
            "wildcards are only allowed in patterns",
        ));
    }
    if name.split(SEPARATOR).any(str::is_empty) {
        return Err(BusError::invalid_name(name, "name has an empty segment"));
    }
    Ok(())
}

/// Strict pattern check.
///
/// The bus itself accepts any non-empty pattern; this is for callers that want
/// misplaced wildcards (`a.**.b`, `a*`) rejected up front.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    if pattern.is_empty() {
        return Err(BusError::EmptyPattern);
    }
    let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            return Err(BusError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern has an empty segment",
            });
        }
        if *part == MULTI_WILDCARD && i != last {
            return Err(BusError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "'**' must be the last segment",
            });
        }
        if part.contains('*') && *part != SINGLE_WILDCARD && *part != MULTI_WILDCARD {
            return Err(BusError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "wildcards must span a whole segment",
            });
        }
    }
    Ok(())
}
