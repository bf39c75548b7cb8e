//! Layered resolution of symbolic references into concrete values.
//!
//! A consuming step does not statically know the output shape of its
//! producer, so resolution is a fault-tolerant heuristic chain: exact
//! field match, then the consumer's own parameter name, then the
//! producer's declared inputs, then an edit-distance guess. The chain
//! never errors; the worst case returns the literal unchanged and lets
//! the invoked capability surface a clear failure itself.
//!
//! Waiting on dependency order is explicitly *not* this module's job: a
//! missing result-table entry degrades to the literal, it never blocks.

use std::sync::LazyLock;

use serde_json::Value;
use tracing::debug;

use crate::capability::ParamSpec;
use crate::capability::context::{ResolvedDependency, ResolvedDependencyRecord};
use crate::capability::output::OutputFields;
use crate::core::deps::{ID_RE, first_digit_run, has_marker, strip_markers};
use crate::core::distance::levenshtein;
use crate::core::types::{Step, StepAction, StepArgs, value_to_text};
use crate::session::{Session, StepOutcome, StepRecord};

/// The full reference expression, including an optional element index and
/// dotted field suffix: `${2}`, `$2[0]`, `${2}[0].code`.
static REF_EXPR_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{?\d+\}?(?:\[\d+\])?(?:\.\w+)?").expect("valid reference expression")
});

/// Resolve every argument of a step against the session's result table.
///
/// Returns the resolved argument map alongside the record of which
/// producing step and field supplied each consumed argument.
pub fn resolve_args(step: &Step, session: &Session) -> (StepArgs, ResolvedDependencyRecord) {
    let mut record = ResolvedDependencyRecord::new();
    let mut resolved = StepArgs::new();
    for (name, value) in &step.args {
        let spec = param_spec(step, name);
        let value = resolve_value(value, name, &spec, step, session, &mut record);
        resolved.insert(name.clone(), value);
    }
    (resolved, record)
}

fn param_spec(step: &Step, name: &str) -> ParamSpec {
    match &step.action {
        StepAction::Invoke(capability) => capability
            .param(name)
            .cloned()
            .unwrap_or_else(|| ParamSpec::new(name, "")),
        StepAction::Join => ParamSpec::new(name, ""),
    }
}

fn resolve_value(
    value: &Value,
    field: &str,
    spec: &ParamSpec,
    step: &Step,
    session: &Session,
    record: &mut ResolvedDependencyRecord,
) -> Value {
    match value {
        Value::String(text) => resolve_text(text, field, spec, step, session, record),
        // List arguments resolve element-wise under the same field name.
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, field, spec, step, session, record))
                .collect(),
        ),
        // Objects are not part of the plan grammar; coerce to text.
        Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

fn resolve_text(
    text: &str,
    field: &str,
    spec: &ParamSpec,
    step: &Step,
    session: &Session,
    record: &mut ResolvedDependencyRecord,
) -> Value {
    if !spec.resolve {
        return Value::String(text.to_string());
    }
    if !has_marker(text) {
        return Value::String(text.to_string());
    }

    let marker_count = ID_RE.find_iter(text).count();
    if marker_count > 1 {
        return Value::String(resolve_composite(text, session));
    }

    let Some(index) = extract_index(text, step, session) else {
        return Value::String(text.to_string());
    };
    let Some(producer) = session.result(index) else {
        // Missing dependency: a producer-side bug surfaced later by the
        // capability, never a stall at this layer.
        return Value::String(text.to_string());
    };
    let StepOutcome::Success(output) = &producer.outcome else {
        return Value::String(text.to_string());
    };
    let Some(fields) = &output.fields else {
        return Value::String(text.to_string());
    };

    let Some((value, produced_field)) = match_descriptor(text, field, fields, &producer) else {
        return Value::String(text.to_string());
    };
    debug!(
        consumer = step.index,
        producer = index,
        field,
        produced_field,
        "resolved reference via output descriptor"
    );
    record.insert(
        field,
        ResolvedDependency {
            producer: index,
            field: produced_field,
        },
    );
    if spec.partial {
        Value::String(substitute_reference(text, &value))
    } else {
        value
    }
}

/// Multiple markers in one string: substitute each left-to-right,
/// preserving surrounding text. A single pass over the original markers;
/// substituted text is never re-scanned, so a producer whose result
/// itself contains `$n` (a dollar amount, say) cannot loop resolution.
fn resolve_composite(text: &str, session: &Session) -> String {
    let mut out = String::new();
    let mut cursor = 0;
    for caps in ID_RE.captures_iter(text) {
        let Some(marker) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[cursor..marker.start()]);
        let substituted = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|index| session.result(index))
            .and_then(|producer| match &producer.outcome {
                StepOutcome::Success(output) => Some(value_to_text(&output.value)),
                _ => None,
            });
        match substituted {
            Some(value) => out.push_str(&value),
            None => out.push_str(marker.as_str()),
        }
        cursor = marker.end();
    }
    out.push_str(&text[cursor..]);
    out
}

/// Extract the referenced step index from a single-marker argument.
///
/// `$2`/`${2}` reduce cleanly; `${2}[0].code` falls back to the first
/// digit run; a marker-flavored argument with no digits at all falls back
/// to the most recent non-`join` step already logged.
fn extract_index(text: &str, step: &Step, session: &Session) -> Option<usize> {
    let stripped = strip_markers(text);
    if stripped != text {
        if let Ok(index) = stripped.trim().parse::<usize>() {
            return Some(index);
        }
        return first_digit_run(&stripped);
    }
    session.latest_non_join_index(step.index)
}

/// The descriptor lookup chain, in priority order.
///
/// Returns the resolved value plus the name of the producing field.
fn match_descriptor(
    text: &str,
    consuming_field: &str,
    fields: &OutputFields,
    producer: &StepRecord,
) -> Option<(Value, String)> {
    // (a) exact field named after the final `.` in the reference.
    if text.contains('.') {
        let dotted = text.rsplit('.').next().unwrap_or_default();
        if let Some(value) = fields.get(dotted) {
            return Some((value.clone(), dotted.to_string()));
        }
    }
    // (b) field matching the consuming parameter's own name.
    if text.contains('$')
        && let Some(value) = fields.get(consuming_field)
    {
        return Some((value.clone(), consuming_field.to_string()));
    }
    // (c) pass-through: same-name match against the producer's own
    // declared inputs, as long as the value is itself fully resolved.
    if let Some(value) = producer.step.args.get(consuming_field) {
        let usable = match value {
            Value::String(text) => !text.contains('$'),
            _ => true,
        };
        if usable {
            return Some((value.clone(), consuming_field.to_string()));
        }
    }
    // (d) last resort: minimum edit distance between the consuming field
    // name and the descriptor's field names. Deliberately imprecise; a
    // mismatch here is a likely replanning trigger.
    let best = fields
        .names()
        .min_by_key(|name| levenshtein(consuming_field, name))?
        .to_string();
    fields.get(&best).map(|value| (value.clone(), best))
}

/// Replace only the reference expression inside the argument, preserving
/// surrounding text (partial resolution).
fn substitute_reference(text: &str, value: &Value) -> String {
    match REF_EXPR_RE.find(text) {
        Some(found) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..found.start()]);
            out.push_str(&value_to_text(value));
            out.push_str(&text[found.end()..]);
            out
        }
        None => value_to_text(value),
    }
}
