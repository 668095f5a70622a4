//! Readers for the line-based topology (`.rvr`) and parameter (`.prm`) files.
//!
//! Both formats start with a single-integer header, then alternate a line
//! holding a lone link id with a line describing that link. Blank lines are
//! ignored everywhere.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use super::{LinkAttributes, LinkId, LinkParameters, Topology};

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Non-blank lines with their 1-based line numbers.
fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
}

fn parse_token<T: std::str::FromStr>(token: &str, path: &Path, line: usize, what: &str) -> Result<T> {
    token
        .parse::<T>()
        .map_err(|_| Error::parse(path, line, format!("expected {what}, found '{token}'")))
}

pub fn read_rvr(path: &Path) -> Result<Topology> {
    let topology = parse_rvr(&read_text(path)?, path)?;
    info!(
        path = %path.display(),
        links = topology.len(),
        entries = topology.primary_entries,
        "topology loaded"
    );
    Ok(topology)
}

/// Parses a topology description.
///
/// ```text
/// 3          <- number of links
/// 10         <- link id
/// 2 20 30    <- tributary count, then tributary ids
/// 20
/// 0          <- lone integer: no tributaries
/// ```
pub fn parse_rvr(text: &str, path: &Path) -> Result<Topology> {
    let mut lines = content_lines(text);
    let (header_line, header) = lines
        .next()
        .ok_or_else(|| Error::parse(path, 1, "missing link-count header"))?;
    let declared: usize = parse_token(header, path, header_line, "link count")?;
    let mut topology = Topology::new(declared);

    let mut pending: Option<(usize, LinkId)> = None;
    for (line_no, line) in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match (pending.take(), tokens.len()) {
            (None, 1) => {
                let id = parse_token(tokens[0], path, line_no, "link id")?;
                pending = Some((line_no, id));
            }
            (None, _) => {
                return Err(Error::parse(path, line_no, "tributary list without a preceding link id"));
            }
            (Some((_, id)), 1) => {
                // Lone count (normally 0): no tributaries.
                let count: usize = parse_token(tokens[0], path, line_no, "tributary count")?;
                if count != 0 {
                    return Err(Error::parse(
                        path,
                        line_no,
                        format!("link {id} declares {count} tributaries but lists none"),
                    ));
                }
                topology.add_link(id, &[])?;
            }
            (Some((_, id)), _) => {
                let count: usize = parse_token(tokens[0], path, line_no, "tributary count")?;
                let tributaries = tokens[1..]
                    .iter()
                    .map(|t| parse_token::<LinkId>(t, path, line_no, "tributary link id"))
                    .collect::<Result<Vec<_>>>()?;
                if count != tributaries.len() {
                    return Err(Error::parse(
                        path,
                        line_no,
                        format!("link {id} declares {count} tributaries but lists {}", tributaries.len()),
                    ));
                }
                topology.add_link(id, &tributaries)?;
            }
        }
    }
    if let Some((line_no, id)) = pending {
        return Err(Error::parse(path, line_no, format!("link {id} has no tributary line")));
    }
    Ok(topology)
}

pub fn read_prm(path: &Path) -> Result<LinkParameters> {
    let params = parse_prm(&read_text(path)?, path)?;
    info!(path = %path.display(), links = params.entries.len(), "link parameters loaded");
    Ok(params)
}

/// Parses a parameter description: a field-count header, then pairs of a
/// link id line and an `upstream_area hillslope_area length` line.
pub fn parse_prm(text: &str, path: &Path) -> Result<LinkParameters> {
    let mut lines = content_lines(text);
    let (header_line, header) = lines
        .next()
        .ok_or_else(|| Error::parse(path, 1, "missing field-count header"))?;
    let declared_fields: usize = parse_token(header, path, header_line, "field count")?;
    let mut params = LinkParameters { declared_fields, entries: Vec::new() };

    let mut pending: Option<(usize, LinkId)> = None;
    for (line_no, line) in lines {
        match pending.take() {
            None => {
                let id = parse_token(line, path, line_no, "link id")?;
                pending = Some((line_no, id));
            }
            Some((_, id)) => {
                let values = line
                    .split_whitespace()
                    .map(|t| parse_token::<f64>(t, path, line_no, "numeric attribute"))
                    .collect::<Result<Vec<_>>>()?;
                if values.len() < 3 {
                    return Err(Error::parse(
                        path,
                        line_no,
                        format!("link {id} needs 3 attributes, found {}", values.len()),
                    ));
                }
                params.entries.push((id, LinkAttributes {
                    upstream_area: values[0],
                    hillslope_area: values[1],
                    length: values[2],
                }));
            }
        }
    }
    if let Some((line_no, id)) = pending {
        return Err(Error::parse(path, line_no, format!("link {id} has no attribute line")));
    }
    Ok(params)
}
