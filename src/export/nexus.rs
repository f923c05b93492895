use std::fmt::Write as _;

use crate::annotate::AnnotatedTree;
use crate::tree::{NodeId, Tree};

/// Write the tree as NEXUS with FigTree-style `[&key="value"]` comments on
/// the annotated tips.
pub fn render(tree: &Tree, annotated: &AnnotatedTree) -> String {
    let mut out = String::from("#NEXUS\n\n");

    let tips = tree.tips();
    out.push_str("begin taxa;\n");
    let _ = writeln!(out, "\tdimensions ntax={};", tips.len());
    out.push_str("\ttaxlabels\n");
    for tip in &tips {
        if let Some(name) = &tip.name {
            let _ = writeln!(out, "\t{}", quote_name(name));
        }
    }
    out.push_str(";\nend;\n\n");

    let label = tree
        .label
        .clone()
        .unwrap_or_else(|| format!("tree_{}", tree.id + 1));
    out.push_str("begin trees;\n");
    let _ = write!(out, "\ttree {} = [&R] ", quote_name(&label));
    if let Some(root) = tree.root() {
        write_subtree(&mut out, tree, annotated, root.id);
    }
    out.push_str(";\nend;\n");
    out
}

fn write_subtree(out: &mut String, tree: &Tree, annotated: &AnnotatedTree, node_id: NodeId) {
    let Some(node) = tree.node(node_id) else {
        return;
    };

    if !node.is_leaf() {
        out.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_subtree(out, tree, annotated, child);
        }
        out.push(')');
    }

    if let Some(name) = &node.name {
        out.push_str(&quote_name(name));
    }

    if node.is_leaf() {
        let pairs: Vec<String> = annotated
            .columns
            .iter()
            .filter_map(|column| {
                node.get_attribute(column)
                    .map(|value| format!("{}=\"{}\"", annotation_key(column), annotation_value(value)))
            })
            .collect();
        if !pairs.is_empty() {
            let _ = write!(out, "[&{}]", pairs.join(","));
        }
    }

    if let Some(length) = node.length {
        let _ = write!(out, ":{length}");
    }
}

fn needs_quotes(name: &str) -> bool {
    name.chars()
        .any(|c| c.is_whitespace() || "()[]{}',:;=\"".contains(c))
}

fn quote_name(name: &str) -> String {
    if needs_quotes(name) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

/// Annotation keys may not carry characters that end the comment early.
fn annotation_key(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_whitespace() || "[]=,\"".contains(c) { '_' } else { c })
        .collect()
}

/// Values sit inside `"..."` within a bracket comment, so quotes and
/// brackets are swapped for look-alikes that cannot end either.
fn annotation_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '[' => '(',
            ']' => ')',
            other => other,
        })
        .collect()
}
