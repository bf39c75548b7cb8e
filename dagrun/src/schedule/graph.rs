//! Graphviz rendering of a round's dependency structure.
//!
//! Purely diagnostic: the scheduler never consults this, it exists so a
//! plan can be inspected (`dot -Tsvg`) when execution order surprises
//! someone.

use std::fmt::Write;

use crate::core::types::Step;

/// Render steps as a DOT digraph with synthetic `__start__`/`__end__`
/// sentinels. Steps with no in-round dependencies hang off `__start__`;
/// steps nothing depends on feed `__end__`.
pub fn to_dot(steps: &[Step]) -> String {
    let indices: Vec<usize> = steps.iter().map(|step| step.index).collect();
    let mut depended_upon: Vec<usize> = Vec::new();
    for step in steps {
        depended_upon.extend(step.dependencies.iter().copied());
    }

    let mut out = String::from("digraph plan {\n");
    out.push_str("  rankdir=TB;\n");
    out.push_str("  \"__start__\" [shape=ellipse];\n");
    out.push_str("  \"__end__\" [shape=ellipse];\n");

    for step in steps {
        let shape = if step.is_join() { "diamond" } else { "box" };
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}. {}\", shape={}];",
            step.index,
            step.index,
            escape(step.name()),
            shape
        );
    }

    for step in steps {
        let in_round: Vec<usize> = step
            .dependencies
            .iter()
            .copied()
            .filter(|dep| indices.contains(dep))
            .collect();
        if in_round.is_empty() {
            let _ = writeln!(out, "  \"__start__\" -> \"{}\";", step.index);
        }
        for dep in in_round {
            let _ = writeln!(out, "  \"{}\" -> \"{}\";", dep, step.index);
        }
    }

    for step in steps {
        if !depended_upon.contains(&step.index) {
            let _ = writeln!(out, "  \"{}\" -> \"__end__\";", step.index);
        }
    }

    out.push_str("}\n");
    out
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
