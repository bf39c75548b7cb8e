//! Reference-marker scanning and dependency extraction.
//!
//! Steps reference each other's future outputs with the textual syntax
//! `$n`, `${n}`, or `${n}.field`. Dependencies are extracted from the raw
//! (pre-resolution) argument text so that whatever the resolver later does
//! with a marker, the scheduler already knows the causal edge.

use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Matches `$1` and `${1}`, capturing the index.
pub static ID_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{?(\d+)\}?").expect("valid reference pattern"));

static DIGITS_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\d+").expect("valid digits pattern"));

/// All indices referenced by markers in `text`, in match order, duplicates
/// included.
pub fn referenced_indices(text: &str) -> Vec<usize> {
    ID_RE
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .collect()
}

/// Dependency set for a step: distinct referenced indices in `[1, index)`.
///
/// A `join` step depends on every prior index regardless of its literal
/// argument text.
pub fn dependencies(index: usize, is_join: bool, raw_args: &str) -> BTreeSet<usize> {
    if is_join {
        return (1..index).collect();
    }
    referenced_indices(raw_args)
        .into_iter()
        .filter(|&dep| dep >= 1 && dep < index)
        .collect()
}

/// Whether an argument is reference-flavored at all.
///
/// Besides `$` markers, arguments fully wrapped in `{...}` or `<...>` are
/// treated as references the planner failed to express cleanly; they still
/// deserve a descriptor-match attempt.
pub fn has_marker(text: &str) -> bool {
    if text.contains('$') {
        return true;
    }
    (text.starts_with('{') && text.ends_with('}'))
        || (text.starts_with('<') && text.ends_with('>'))
}

/// Strip markers down to their indices: `use ${2} and $4` becomes
/// `use 2 and 4`. Used when deciding whether a whole argument reduces to a
/// single index.
pub fn strip_markers(text: &str) -> String {
    ID_RE.replace_all(text, "$1").into_owned()
}

/// First run of digits in `text`, for references like `${2}[0].code` whose
/// stripped form is not a clean integer.
pub fn first_digit_run(text: &str) -> Option<usize> {
    DIGITS_RE
        .find(text)
        .and_then(|m| m.as_str().parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_both_marker_forms() {
        assert_eq!(referenced_indices("avg of $2 and ${4}"), vec![2, 4]);
    }

    #[test]
    fn dependencies_are_distinct_and_range_restricted() {
        let deps = dependencies(4, false, "x=$1, y=${1}, z=$4, w=$9");
        assert_eq!(deps, BTreeSet::from([1]));
    }

    #[test]
    fn join_depends_on_all_prior_indices() {
        let deps = dependencies(4, true, "");
        assert_eq!(deps, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn marker_detection_covers_wrapped_forms() {
        assert!(has_marker("${1}.returns"));
        assert!(has_marker("{start_date}"));
        assert!(has_marker("<date>"));
        assert!(!has_marker("AAPL"));
    }

    #[test]
    fn stripping_and_digit_fallback() {
        assert_eq!(strip_markers("${2}"), "2");
        assert_eq!(strip_markers("${2}[0].code"), "2[0].code");
        assert_eq!(first_digit_run("2[0].code"), Some(2));
        assert_eq!(first_digit_run("no digits"), None);
    }
}
