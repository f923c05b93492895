use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use phylotree::tree::{NewickFormat, Tree as PhyloTree};

use crate::error::AnnotateError;
use crate::tree::{Tree, TreeBundle, TreeFileFormat};

pub mod metadata;

pub use metadata::{load_metadata, Delimiter};

/// Stand-in for a quoted label while the Newick parser runs; the parser
/// would otherwise keep the quotes and drop embedded whitespace.
const QUOTED_LABEL_PREFIX: &str = "treemetaQuotedLabel";

pub fn load_trees(path: &Path) -> Result<TreeBundle> {
    let raw = fs::read_to_string(path).map_err(|source| AnnotateError::MissingInput {
        kind: "tree",
        path: path.to_path_buf(),
        source,
    })?;

    let format = detect_format(&raw);
    let trees = match format {
        TreeFileFormat::Newick => parse_newick(&raw),
        TreeFileFormat::Nexus => parse_nexus(&raw),
    }
    .with_context(|| format!("failed to parse tree file: {}", path.display()))?;

    if trees.is_empty() {
        return Err(AnnotateError::EmptyTreeFile.into());
    }

    debug!("loaded {} tree(s) from {}", trees.len(), path.display());
    Ok(TreeBundle::new(format, trees))
}

fn detect_format(raw: &str) -> TreeFileFormat {
    for line in raw.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        // Bracket-only lines are comments in both formats.
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            continue;
        }

        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("#NEXUS") || upper.starts_with("BEGIN ") || upper.starts_with("TREE ")
        {
            return TreeFileFormat::Nexus;
        }

        // First significant line decides; anything else is read as Newick.
        return TreeFileFormat::Newick;
    }

    TreeFileFormat::Newick
}

fn parse_newick(raw: &str) -> Result<Vec<Tree>> {
    let mut trees = Vec::new();
    let (statements, rest) = split_statements(raw);

    for statement in statements {
        let body = statement.trim().trim_end_matches(';').trim();
        if body.is_empty() {
            continue;
        }

        let tree = build_tree(trees.len(), None, normalise_newick(body))?;
        trees.push(tree);
    }

    let mut open_comment = false;
    if !strip_comments(rest, &mut open_comment, false).trim().is_empty() {
        return Err(AnnotateError::MalformedTree(format!(
            "tree {} is missing its terminating `;`",
            trees.len() + 1
        ))
        .into());
    }

    Ok(trees)
}

/// Split at every `;` outside quoted labels and bracket comments. Returns
/// the terminated statements and whatever trails the last `;`.
fn split_statements(raw: &str) -> (Vec<&str>, &str) {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quoted = false;

    for (i, ch) in raw.char_indices() {
        match ch {
            '\'' if depth == 0 => quoted = !quoted,
            _ if quoted => {}
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            ';' if depth == 0 => {
                statements.push(&raw[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    (statements, &raw[start..])
}

/// State carried across lines while scanning a NEXUS file.
#[derive(Default)]
struct NexusScan {
    in_trees_block: bool,
    in_comment: bool,
    /// Lines of the `TREE` statement being accumulated.
    statement: Vec<String>,
    /// Lines of a `TRANSLATE` command being accumulated.
    translate: Option<Vec<String>>,
    translation: HashMap<String, String>,
    trees: Vec<Tree>,
}

impl NexusScan {
    fn finish_statement(&mut self) {
        if self.statement.is_empty() {
            return;
        }
        let line = self.statement.join(" ");
        self.statement.clear();

        let parsed = parse_nexus_tree_line(&line)
            .and_then(|(label, newick)| build_tree(self.trees.len(), label, newick));
        match parsed {
            Ok(mut tree) => {
                if !self.translation.is_empty() {
                    tree.rename_tips(&self.translation);
                }
                self.trees.push(tree);
            }
            Err(err) => warn!("skipping NEXUS tree statement: {err:#}"),
        }
    }

    fn finish_translate(&mut self) {
        if let Some(lines) = self.translate.take() {
            self.translation = parse_translate(&lines.join(" "));
            debug!("translate table with {} entries", self.translation.len());
        }
    }
}

fn parse_nexus(raw: &str) -> Result<Vec<Tree>> {
    let mut scan = NexusScan::default();

    for line in raw.lines() {
        let is_tree_line = !scan.statement.is_empty()
            || line.trim_start().to_ascii_lowercase().starts_with("tree ")
            || line.trim_start().to_ascii_lowercase().starts_with("utree ");
        let cleaned = strip_comments(line, &mut scan.in_comment, is_tree_line && scan.in_trees_block);
        let cleaned = cleaned.trim();

        if cleaned.is_empty() {
            continue;
        }

        let upper = cleaned.to_ascii_uppercase();

        if upper.starts_with("BEGIN TREES") {
            scan.in_trees_block = true;
            continue;
        }

        if ends_block(&upper, !scan.statement.is_empty()) {
            scan.finish_statement();
            scan.finish_translate();
            scan.in_trees_block = false;
            continue;
        }

        if !scan.in_trees_block {
            continue;
        }

        if let Some(lines) = scan.translate.as_mut() {
            lines.push(cleaned.to_string());
            if cleaned.ends_with(';') {
                scan.finish_translate();
            }
            continue;
        }

        let lower = cleaned.to_ascii_lowercase();
        if lower.starts_with("translate") {
            scan.translate = Some(vec![cleaned["translate".len()..].to_string()]);
            if cleaned.ends_with(';') {
                scan.finish_translate();
            }
            continue;
        }

        if lower.starts_with("tree ") || lower.starts_with("utree ") {
            scan.finish_statement();
            scan.statement.push(cleaned.to_string());
        } else if !scan.statement.is_empty() {
            scan.statement.push(cleaned.to_string());
        } else {
            continue;
        }

        if cleaned.ends_with(';') {
            scan.finish_statement();
        }
    }

    scan.finish_statement();
    Ok(scan.trees)
}

/// `END;` / `ENDBLOCK;` closes a block. Inside a multi-line tree statement
/// only the bare keyword counts, so taxa such as `Endozoicomonas` do not.
fn ends_block(upper: &str, in_statement: bool) -> bool {
    if in_statement {
        return upper == "END;" || upper == "ENDBLOCK;";
    }
    let word = upper
        .split(|c: char| c == ';' || c.is_whitespace())
        .next()
        .unwrap_or("");
    word == "END" || word == "ENDBLOCK"
}

/// Remove `[...]` comments from one line. `in_comment` carries an unclosed
/// comment over to the next line. FigTree `[&...]` annotations are kept
/// when `keep_annotations` is set so the Newick parser sees them.
fn strip_comments(line: &str, in_comment: &mut bool, keep_annotations: bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut depth = usize::from(*in_comment);
    let mut keeping = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            _ if keeping => {
                keeping = ch != ']';
                out.push(ch);
            }
            '\'' if depth == 0 => {
                quoted = !quoted;
                out.push(ch);
            }
            _ if quoted => out.push(ch),
            '[' if depth == 0 && keep_annotations && chars.peek() == Some(&'&') => {
                keeping = true;
                out.push(ch);
            }
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth > 0 => {}
            _ => out.push(ch),
        }
    }

    *in_comment = depth > 0;
    out
}

fn parse_translate(body: &str) -> HashMap<String, String> {
    body.trim()
        .trim_end_matches(';')
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (token, name) = entry.split_once(char::is_whitespace)?;
            let name = unquote(name.trim());
            if name.is_empty() {
                return None;
            }
            Some((token.to_string(), name))
        })
        .collect()
}

fn unquote(raw: &str) -> String {
    match raw.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => raw.trim_matches('"').to_owned(),
    }
}

/// Swap every single-quoted label for a placeholder token. Returns the
/// rewritten string and the placeholder -> label map (`''` unescaped).
fn protect_quoted_labels(newick: &str) -> (String, HashMap<String, String>) {
    let mut out = String::with_capacity(newick.len());
    let mut labels = HashMap::new();
    let mut depth = 0usize;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '[' => {
                depth += 1;
                out.push(ch);
            }
            ']' if depth > 0 => {
                depth -= 1;
                out.push(ch);
            }
            '\'' if depth == 0 => {
                let mut label = String::new();
                while let Some(c) = chars.next() {
                    if c != '\'' {
                        label.push(c);
                    } else if chars.peek() == Some(&'\'') {
                        chars.next();
                        label.push('\'');
                    } else {
                        break;
                    }
                }
                let placeholder = format!("{QUOTED_LABEL_PREFIX}{}", labels.len());
                out.push_str(&placeholder);
                labels.insert(placeholder, label);
            }
            _ => out.push(ch),
        }
    }

    (out, labels)
}

fn build_tree(index: usize, label: Option<String>, newick: String) -> Result<Tree> {
    let (protected, quoted) = protect_quoted_labels(&newick);
    let phylo = PhyloTree::from_newick(&protected)
        .map_err(|err| AnnotateError::MalformedTree(err.to_string()))?;
    let canonical_newick = if quoted.is_empty() {
        phylo
            .to_formatted_newick(NewickFormat::NoComments)
            .unwrap_or_else(|_| newick.clone())
    } else {
        newick.clone()
    };

    let mut tree = Tree::new(index, label, canonical_newick, &phylo);
    tree.restore_labels(&quoted);
    Ok(tree)
}

fn parse_nexus_tree_line(line: &str) -> Result<(Option<String>, String)> {
    let lower = line.to_ascii_lowercase();
    let tree_start = if lower.starts_with("tree ") {
        5
    } else if lower.starts_with("utree ") {
        6
    } else {
        return Err(anyhow!("invalid tree line: {line}"));
    };

    let (label_part, tree_part) = line[tree_start..]
        .split_once('=')
        .ok_or_else(|| anyhow!("missing tree definition in nexus line: {line}"))?;

    // `*` marks the default tree in some writers.
    let cleaned_label = label_part.trim().trim_start_matches('*').trim();
    let label = (!cleaned_label.is_empty()).then(|| unquote(cleaned_label));

    let mut payload = tree_part.trim().trim_end_matches(';').trim();

    // Rooting comments such as [&R] / [&U] precede the topology.
    while payload.starts_with('[') {
        match payload.find(']') {
            Some(end_idx) => payload = payload[end_idx + 1..].trim(),
            None => break,
        }
    }

    Ok((label, normalise_newick(payload)))
}

fn normalise_newick(raw: &str) -> String {
    let mut cleaned = raw.trim().trim_end_matches(';').trim().to_owned();
    cleaned.push(';');
    cleaned
}
