//! Joining tree tips to rows of sample metadata.
//!
//! The join is a pure function of a [`Tree`] and a [`MetadataTable`]: tips
//! are matched to records by exact equality between the tip name and the
//! record's key column. The first record carrying a key wins; later records
//! with the same key are reported in [`JoinReport::duplicate_keys`].

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::AnnotateError;
use crate::tree::{NodeId, Tree};

/// Number of unmatched tip names carried in an [`AnnotateError::UnmatchedTips`].
const UNMATCHED_SAMPLE: usize = 5;

/// One data row of a metadata table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based line number in the source file.
    pub line: usize,
    pub values: Vec<String>,
}

impl Record {
    pub fn new(line: usize, values: Vec<String>) -> Self {
        Self { line, values }
    }

    pub fn value(&self, column: usize) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }
}

/// Header plus rows, as read from a spreadsheet export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTable {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl MetadataTable {
    pub fn new(columns: Vec<String>, records: Vec<Record>) -> Self {
        Self { columns, records }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A tip and, when it matched, the attribute values of its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedTip {
    pub node: NodeId,
    pub name: Option<String>,
    /// Values aligned with [`AnnotatedTree::columns`].
    pub attributes: Option<Vec<String>>,
}

impl AnnotatedTip {
    pub fn is_matched(&self) -> bool {
        self.attributes.is_some()
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<unnamed tip {}>", self.node),
        }
    }
}

/// Per-tip annotation table produced by [`join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedTree {
    /// Name of the join column.
    pub key: String,
    /// Attribute columns: every metadata column except the key.
    pub columns: Vec<String>,
    pub tips: Vec<AnnotatedTip>,
}

impl AnnotatedTree {
    /// Column/value pairs of a matched tip in column order; `None` when the
    /// tip had no record.
    pub fn attributes<'a>(
        &'a self,
        tip: &'a AnnotatedTip,
    ) -> Option<impl Iterator<Item = (&'a str, &'a str)> + 'a> {
        let values = tip.attributes.as_ref()?;
        Some(
            self.columns
                .iter()
                .map(String::as_str)
                .zip(values.iter().map(String::as_str)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKey {
    pub key: String,
    /// Source lines carrying this key; the first one is the record used.
    pub lines: Vec<usize>,
}

/// Diagnostics gathered while joining.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub tips: usize,
    pub matched: usize,
    pub unmatched_tips: Vec<String>,
    /// Keys present in the metadata but on no tip, sorted.
    pub unused_keys: Vec<String>,
    pub duplicate_keys: Vec<DuplicateKey>,
    pub blank_key_rows: Vec<usize>,
}

impl JoinReport {
    pub fn is_clean(&self) -> bool {
        self.unmatched_tips.is_empty()
            && self.unused_keys.is_empty()
            && self.duplicate_keys.is_empty()
            && self.blank_key_rows.is_empty()
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum JoinPolicy {
    /// Unmatched tips are reported but not fatal.
    #[default]
    Lenient,
    /// Any unmatched tip fails the run.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub annotated: AnnotatedTree,
    pub report: JoinReport,
}

impl Join {
    pub fn check(&self, policy: JoinPolicy) -> Result<(), AnnotateError> {
        if policy == JoinPolicy::Strict && !self.report.unmatched_tips.is_empty() {
            return Err(AnnotateError::UnmatchedTips {
                count: self.report.unmatched_tips.len(),
                sample: self
                    .report
                    .unmatched_tips
                    .iter()
                    .take(UNMATCHED_SAMPLE)
                    .cloned()
                    .collect(),
            });
        }
        Ok(())
    }

    pub fn log_diagnostics(&self) {
        let report = &self.report;
        if report.is_clean() {
            debug!("every tip matched exactly one metadata record");
            return;
        }
        for tip in &report.unmatched_tips {
            warn!("tip {tip} has no metadata record");
        }
        for duplicate in &report.duplicate_keys {
            warn!(
                "key {} appears on lines {:?}; using line {}",
                duplicate.key, duplicate.lines, duplicate.lines[0]
            );
        }
        for line in &report.blank_key_rows {
            warn!("metadata line {line} has an empty `{}` value", self.annotated.key);
        }
        if !report.unused_keys.is_empty() {
            info!(
                "{} metadata record(s) did not match any tip",
                report.unused_keys.len()
            );
            for key in &report.unused_keys {
                debug!("unused metadata key {key}");
            }
        }
    }
}

/// Join every tip of `tree` to the record in `table` whose `key` column
/// equals the tip name.
pub fn join(tree: &Tree, table: &MetadataTable, key: &str) -> Result<Join, AnnotateError> {
    let key_index = table
        .column_index(key)
        .ok_or_else(|| AnnotateError::MissingKeyColumn {
            key: key.to_string(),
            available: table.columns().to_vec(),
        })?;

    let mut index: HashMap<&str, &Record> = HashMap::new();
    let mut duplicates: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut blank_key_rows = Vec::new();

    for record in table.records() {
        let value = record.value(key_index);
        if value.is_empty() {
            blank_key_rows.push(record.line);
            continue;
        }
        match index.get(value) {
            Some(first) => duplicates
                .entry(value)
                .or_insert_with(|| vec![first.line])
                .push(record.line),
            None => {
                index.insert(value, record);
            }
        }
    }

    let columns: Vec<String> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != key_index)
        .map(|(_, column)| column.clone())
        .collect();

    let mut used: HashSet<&str> = HashSet::new();
    let mut tips = Vec::new();
    let mut unmatched_tips = Vec::new();

    for node in tree.tips() {
        let record = node
            .name
            .as_deref()
            .and_then(|name| index.get_key_value(name));
        let attributes = record.map(|(matched_key, record)| {
            used.insert(*matched_key);
            (0..table.columns().len())
                .filter(|i| *i != key_index)
                .map(|i| record.value(i).to_string())
                .collect::<Vec<_>>()
        });

        let tip = AnnotatedTip {
            node: node.id,
            name: node.name.clone(),
            attributes,
        };
        if !tip.is_matched() {
            unmatched_tips.push(tip.display_name());
        }
        tips.push(tip);
    }

    let mut unused_keys: Vec<String> = index
        .keys()
        .filter(|key| !used.contains(*key))
        .map(|key| key.to_string())
        .collect();
    unused_keys.sort();

    let matched = tips.len() - unmatched_tips.len();
    let report = JoinReport {
        tips: tips.len(),
        matched,
        unmatched_tips,
        unused_keys,
        duplicate_keys: duplicates
            .into_iter()
            .map(|(key, lines)| DuplicateKey {
                key: key.to_string(),
                lines,
            })
            .collect(),
        blank_key_rows,
    };

    Ok(Join {
        annotated: AnnotatedTree {
            key: key.to_string(),
            columns,
            tips,
        },
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylotree::tree::Tree as PhyloTree;

    impl AnnotatedTree {
        fn tip(&self, name: &str) -> Option<&AnnotatedTip> {
            self.tips.iter().find(|tip| tip.name.as_deref() == Some(name))
        }

        fn attribute(&self, name: &str, column: &str) -> Option<&str> {
            self.attributes(self.tip(name)?)?
                .find(|(c, _)| *c == column)
                .map(|(_, value)| value)
        }
    }

    fn tree_from(newick: &str) -> Tree {
        let phylo = PhyloTree::from_newick(newick).expect("valid test newick");
        Tree::new(0, None, newick.to_string(), &phylo)
    }

    fn table(rows: &[(&str, &str)]) -> MetadataTable {
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (id, sample))| Record::new(i + 2, vec![id.to_string(), sample.to_string()]))
            .collect();
        MetadataTable::new(vec!["biosample_id".into(), "sample_id".into()], records)
    }

    #[test]
    fn matches_tips_and_flags_missing_ones() {
        let tree = tree_from("(SRA1:0.1,SRA2:0.2,SRA3:0.3);");
        let meta = table(&[("SRA1", "A"), ("SRA2", "B")]);

        let join = join(&tree, &meta, "biosample_id").unwrap();

        assert_eq!(join.annotated.columns, vec!["sample_id"]);
        assert_eq!(join.annotated.attribute("SRA1", "sample_id"), Some("A"));
        assert_eq!(join.annotated.attribute("SRA2", "sample_id"), Some("B"));
        assert_eq!(join.annotated.attribute("SRA3", "sample_id"), None);
        assert!(join.annotated.tip("SRA3").unwrap().attributes.is_none());
        assert_eq!(join.report.matched, 2);
        assert_eq!(join.report.unmatched_tips, vec!["SRA3"]);
        assert!(join.report.unused_keys.is_empty());
    }

    #[test]
    fn matched_tip_carries_exactly_its_record() {
        let tree = tree_from("(X:1,Y:1);");
        let meta = MetadataTable::new(
            vec!["host".into(), "id".into(), "year".into()],
            vec![
                Record::new(2, vec!["cow".into(), "Y".into(), "2019".into()]),
                Record::new(3, vec!["pig".into(), "X".into(), "2021".into()]),
            ],
        );

        let join = join(&tree, &meta, "id").unwrap();

        assert_eq!(join.annotated.columns, vec!["host", "year"]);
        assert_eq!(
            join.annotated.tip("X").unwrap().attributes,
            Some(vec!["pig".to_string(), "2021".to_string()])
        );
        assert_eq!(
            join.annotated.tip("Y").unwrap().attributes,
            Some(vec!["cow".to_string(), "2019".to_string()])
        );
        assert!(join.report.is_clean());

        let pairs: Vec<_> = join
            .annotated
            .attributes(join.annotated.tip("X").unwrap())
            .unwrap()
            .collect();
        assert_eq!(pairs, vec![("host", "pig"), ("year", "2021")]);
    }

    #[test]
    fn first_duplicate_wins_and_is_reported() {
        let tree = tree_from("(SRA1,SRA2);");
        let meta = table(&[("SRA1", "A"), ("SRA2", "B"), ("SRA1", "Z")]);

        let join = join(&tree, &meta, "biosample_id").unwrap();

        assert_eq!(join.annotated.attribute("SRA1", "sample_id"), Some("A"));
        assert_eq!(
            join.report.duplicate_keys,
            vec![DuplicateKey {
                key: "SRA1".into(),
                lines: vec![2, 4],
            }]
        );
    }

    #[test]
    fn join_is_idempotent() {
        let tree = tree_from("((SRA1,SRA2),SRA3);");
        let meta = table(&[("SRA1", "A"), ("SRA3", "C"), ("SRA9", "Q")]);

        let first = join(&tree, &meta, "biosample_id").unwrap();
        let second = join(&tree, &meta, "biosample_id").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn record_order_does_not_change_result() {
        let tree = tree_from("((SRA1,SRA2),(SRA3,SRA4));");
        let forward = table(&[("SRA1", "A"), ("SRA2", "B"), ("SRA3", "C"), ("SRA7", "G"), ("SRA5", "E")]);
        let reversed = table(&[("SRA5", "E"), ("SRA7", "G"), ("SRA3", "C"), ("SRA2", "B"), ("SRA1", "A")]);

        let a = join(&tree, &forward, "biosample_id").unwrap();
        let b = join(&tree, &reversed, "biosample_id").unwrap();

        assert_eq!(a.annotated, b.annotated);
        assert_eq!(a.report.unmatched_tips, b.report.unmatched_tips);
        assert_eq!(a.report.unused_keys, vec!["SRA5", "SRA7"]);
        assert_eq!(a.report.unused_keys, b.report.unused_keys);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let tree = tree_from("(sra1,SRA2);");
        let meta = table(&[("SRA1", "A"), ("SRA2", "B")]);

        let join = join(&tree, &meta, "biosample_id").unwrap();

        assert_eq!(join.report.unmatched_tips, vec!["sra1"]);
        assert_eq!(join.report.unused_keys, vec!["SRA1"]);
    }

    #[test]
    fn blank_keys_are_skipped() {
        let tree = tree_from("(SRA1,SRA2);");
        let meta = table(&[("", "orphan"), ("SRA1", "A"), ("SRA2", "B")]);

        let join = join(&tree, &meta, "biosample_id").unwrap();

        assert_eq!(join.report.blank_key_rows, vec![2]);
        assert_eq!(join.report.matched, 2);
    }

    #[test]
    fn unknown_key_column_is_an_error() {
        let tree = tree_from("(SRA1,SRA2);");
        let meta = table(&[("SRA1", "A")]);

        let err = join(&tree, &meta, "accession").unwrap_err();
        assert!(matches!(err, AnnotateError::MissingKeyColumn { ref key, .. } if key == "accession"));
    }

    #[test]
    fn strict_policy_rejects_unmatched_tips() {
        let tree = tree_from("(SRA1,SRA2,SRA3);");
        let meta = table(&[("SRA1", "A")]);

        let join = join(&tree, &meta, "biosample_id").unwrap();

        assert!(join.check(JoinPolicy::Lenient).is_ok());
        match join.check(JoinPolicy::Strict) {
            Err(AnnotateError::UnmatchedTips { count, sample }) => {
                assert_eq!(count, 2);
                assert_eq!(sample, vec!["SRA2", "SRA3"]);
            }
            other => panic!("expected unmatched tips error, got {other:?}"),
        }
    }

    #[test]
    fn annotations_land_on_tree_nodes() {
        let mut tree = tree_from("(SRA1,SRA2);");
        let meta = table(&[("SRA1", "A")]);

        let join = join(&tree, &meta, "biosample_id").unwrap();
        tree.apply_annotations(&join.annotated);

        let tips = tree.tips();
        assert_eq!(tips[0].get_attribute("sample_id").map(String::as_str), Some("A"));
        assert!(tips[1].attributes.is_empty());
    }
}
