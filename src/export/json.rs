use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::annotate::{Join, JoinReport};
use crate::tree::{NodeId, Tree};

#[derive(Serialize)]
struct JsonExport<'a> {
    tree: String,
    key: &'a str,
    columns: &'a [String],
    tips: Vec<JsonTip<'a>>,
    report: &'a JoinReport,
}

#[derive(Serialize)]
struct JsonTip<'a> {
    tip: Option<&'a str>,
    node: NodeId,
    attributes: Option<BTreeMap<&'a str, &'a str>>,
}

pub fn render(tree: &Tree, join: &Join) -> Result<String> {
    let annotated = &join.annotated;
    let tips = annotated
        .tips
        .iter()
        .map(|tip| JsonTip {
            tip: tip.name.as_deref(),
            node: tip.node,
            attributes: annotated.attributes(tip).map(Iterator::collect),
        })
        .collect();

    let export = JsonExport {
        tree: tree.display_name(),
        key: &annotated.key,
        columns: &annotated.columns,
        tips,
        report: &join.report,
    };

    let mut text = serde_json::to_string_pretty(&export)?;
    text.push('\n');
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{self, MetadataTable, Record};
    use phylotree::tree::Tree as PhyloTree;

    #[test]
    fn json_carries_attributes_and_report() {
        let newick = "(SRA1:0.1,SRA2:0.2,SRA3:0.3);";
        let phylo = PhyloTree::from_newick(newick).unwrap();
        let tree = Tree::new(0, Some("demo".into()), newick.into(), &phylo);
        let meta = MetadataTable::new(
            vec!["biosample_id".into(), "sample_id".into()],
            vec![
                Record::new(2, vec!["SRA1".into(), "A".into()]),
                Record::new(3, vec!["SRA2".into(), "B".into()]),
            ],
        );
        let join = annotate::join(&tree, &meta, "biosample_id").unwrap();

        let value: serde_json::Value = serde_json::from_str(&render(&tree, &join).unwrap()).unwrap();

        assert_eq!(value["tree"], "demo");
        assert_eq!(value["key"], "biosample_id");
        assert_eq!(value["tips"][0]["tip"], "SRA1");
        assert_eq!(value["tips"][0]["attributes"]["sample_id"], "A");
        assert!(value["tips"][2]["attributes"].is_null());
        assert_eq!(value["report"]["matched"], 2);
        assert_eq!(value["report"]["unmatched_tips"][0], "SRA3");
    }
}
