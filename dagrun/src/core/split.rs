//! Argument-text splitting against a capability's declared parameters.
//!
//! The plan grammar gives us `name=value` pairs in free text, but values
//! may themselves contain `=` or commas, so naive splitting is unsafe.
//! Instead we split on `name=` boundaries for the declared parameter names
//! only, ordered so that a name never gets cut at the position of another
//! name it contains as a substring (e.g. `stock_code` before `code`).

use crate::core::literal::parse_literal;
use crate::core::types::StepArgs;

/// Split raw argument text into an ordered argument map.
///
/// Unknown text before the first recognized `name=` is dropped, matching
/// the lossy-by-design parsing contract. Values go through the safe
/// literal evaluator; unparseable values are kept as raw text.
pub fn split_args(raw: &str, names: &[&str]) -> StepArgs {
    let mut out = StepArgs::new();
    if raw.trim().is_empty() || names.is_empty() {
        return out;
    }

    let mut rest = raw.to_string();
    let mut open_key: Option<String> = None;
    for name in order_names(raw, names) {
        let marker = format!("{name}=");
        if let Some(pos) = rest.find(&marker) {
            if let Some(key) = open_key.take() {
                let value = rest[..pos].trim().trim_end_matches(',');
                out.insert(key, parse_literal(value));
            }
            rest = rest[pos + marker.len()..].to_string();
            open_key = Some(name.to_string());
        }
    }
    if let Some(key) = open_key {
        let value = rest.trim().trim_end_matches(',').trim_end_matches(')');
        out.insert(key, parse_literal(value));
    }
    out
}

/// Order names by first occurrence in the text, then re-order so that no
/// name is split before another name that contains it as a substring.
fn order_names<'a>(text: &str, names: &[&'a str]) -> Vec<&'a str> {
    let mut by_position: Vec<&str> = names.to_vec();
    by_position.sort_by_key(|name| text.find(*name).unwrap_or(usize::MAX));

    // Stable topological pass over the is-substring-of relation: a name is
    // emitted only once no remaining name contains it.
    let mut ordered = Vec::with_capacity(by_position.len());
    while !by_position.is_empty() {
        let pick = by_position.iter().position(|name| {
            by_position
                .iter()
                .all(|other| other == name || !other.contains(name))
        });
        match pick {
            Some(index) => ordered.push(by_position.remove(index)),
            // Unreachable for distinct names; guard against a stall anyway.
            None => ordered.append(&mut by_position),
        }
    }
    ordered
}
