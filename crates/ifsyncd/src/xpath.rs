//! Datastore path construction and inspection
//!
//! Paths follow the ietf-interfaces grammar:
//!
//! ```text
//! /ietf-interfaces:interfaces/interface[name='eth0']/type
//! /ietf-interfaces:interfaces/interface[name='eth0']/ietf-ip:ipv4/mtu
//! /ietf-interfaces:interfaces/interface[name='eth0']/ietf-ip:ipv4/address[ip='10.0.0.1']/ip
//! /ietf-interfaces:interfaces-state/interface[name='eth0']/oper-status
//! ```

use crate::tables::*;

/// `.../interfaces/interface[name='<name>']/<field>`
pub fn interface(name: &str, field: &str) -> String {
    format!("{}/interface[name='{}']/{}", IF_CONFIG_ROOT, name, field)
}

/// `.../interfaces/interface[name='<name>']/ietf-ip:ipv4/<field>`
pub fn ipv4(name: &str, field: &str) -> String {
    format!(
        "{}/interface[name='{}']/{}/{}",
        IF_CONFIG_ROOT, name, IPV4_CONTAINER, field
    )
}

/// `.../ietf-ip:ipv4/address[ip='<ip>']/<leaf>`
pub fn ipv4_address(name: &str, ip: &str, leaf: &str) -> String {
    ipv4(
        name,
        &format!("{}[{}='{}']/{}", ipv4_fields::ADDRESS, ipv4_fields::IP, ip, leaf),
    )
}

/// `.../interfaces-state/interface[name='<name>']/<field>`
pub fn state(name: &str, field: &str) -> String {
    format!("{}/interface[name='{}']/{}", IF_STATE_ROOT, name, field)
}

/// Splits a path into its node segments, keeping predicates attached.
///
/// Slashes inside `[...]` predicates do not split.
fn segments(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;

    for (i, c) in path.char_indices() {
        match (c, quote) {
            ('\'', None) | ('"', None) if depth > 0 => quote = Some(c),
            (q, Some(open)) if q == open => quote = None,
            ('[', None) => depth += 1,
            (']', None) => depth = depth.saturating_sub(1),
            ('/', None) if depth == 0 => {
                if i > start {
                    out.push(&path[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < path.len() {
        out.push(&path[start..]);
    }
    out
}

/// Strips predicates and any module prefix from a segment.
fn bare_name(segment: &str) -> &str {
    let name = segment.split('[').next().unwrap_or(segment);
    name.rsplit(':').next().unwrap_or(name)
}

/// Name of the last node of `path`, without predicates or module prefix.
///
/// `/ietf-interfaces:interfaces-state/interface[name='eth0']` → `interface`
pub fn node_name(path: &str) -> Option<&str> {
    segments(path)
        .last()
        .copied()
        .map(bare_name)
        .filter(|s| !s.is_empty())
}

/// Value of the list key `key` on the first `list` node of `path`.
///
/// `key_value("/a:x/interface[name='eth0']/mtu", "interface", "name")` →
/// `Some("eth0")`
pub fn key_value<'a>(path: &'a str, list: &str, key: &str) -> Option<&'a str> {
    let segment = segments(path)
        .into_iter()
        .find(|s| bare_name(s) == list && s.contains('['))?;

    let mut rest = &segment[segment.find('[')?..];
    while let Some(open) = rest.find('[') {
        let close = rest[open..].find(']')? + open;
        let predicate = &rest[open + 1..close];
        if let Some((k, v)) = predicate.split_once('=') {
            if k.trim() == key {
                let v = v.trim();
                return Some(v.trim_matches(|c| c == '\'' || c == '"'));
            }
        }
        rest = &rest[close + 1..];
    }
    None
}
