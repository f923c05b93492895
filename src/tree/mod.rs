use std::collections::{BTreeMap, HashMap};

use phylotree::tree::{Node as PhyloNode, Tree as PhyloTree};

use crate::annotate::AnnotatedTree;

pub type NodeId = phylotree::tree::NodeId;

/// Representation of a phylogenetic tree with an explicit node list.
#[derive(Debug, Clone)]
pub struct Tree {
    pub id: usize,
    pub label: Option<String>,
    pub newick: String,
    pub root: Option<NodeId>,
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn new(id: usize, label: Option<String>, newick: String, phylo: &PhyloTree) -> Self {
        let nodes = Self::build_nodes_from_phylo(phylo);
        let root = phylo
            .get_root()
            .ok()
            .or_else(|| nodes.iter().find(|node| node.parent.is_none()).map(|node| node.id));
        Self {
            id,
            label,
            newick,
            root,
            nodes,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.and_then(|id| self.nodes.get(id))
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    /// Tip nodes in id order, which follows their order in the source file.
    pub fn tips(&self) -> Vec<&TreeNode> {
        self.nodes.iter().filter(|node| node.is_leaf()).collect()
    }

    pub fn internal_nodes(&self) -> Vec<&TreeNode> {
        self.nodes.iter().filter(|node| !node.is_leaf()).collect()
    }

    /// Human readable name used in summaries and logs.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("tree #{}", self.id + 1),
        }
    }

    /// Replace tip names through a NEXUS translate table. Tokens without an
    /// entry keep their name.
    pub fn rename_tips(&mut self, table: &HashMap<String, String>) {
        for node in self.nodes.iter_mut().filter(|node| node.is_leaf()) {
            if let Some(full) = node.name.as_ref().and_then(|name| table.get(name)) {
                node.name = Some(full.clone());
            }
        }
    }

    /// Put back labels that were swapped for placeholders before parsing.
    /// Applies to every node, since internal labels may be quoted too.
    pub fn restore_labels(&mut self, labels: &HashMap<String, String>) {
        if labels.is_empty() {
            return;
        }
        for node in &mut self.nodes {
            if let Some(label) = node.name.as_ref().and_then(|name| labels.get(name)) {
                node.name = (!label.is_empty()).then(|| label.clone());
            }
        }
    }

    /// Copy matched metadata onto the tip nodes so writers can read
    /// attributes by name per tip.
    pub fn apply_annotations(&mut self, annotated: &AnnotatedTree) {
        for tip in &annotated.tips {
            let Some(pairs) = annotated.attributes(tip) else {
                continue;
            };
            let Some(node) = self.nodes.get_mut(tip.node) else {
                continue;
            };
            for (column, value) in pairs {
                node.set_attribute(column.to_string(), value.to_string());
            }
        }
    }

    fn build_nodes_from_phylo(phylo: &PhyloTree) -> Vec<TreeNode> {
        let mut nodes = Vec::with_capacity(phylo.size());
        for idx in 0..phylo.size() {
            match phylo.get(&idx) {
                Ok(node) => nodes.push(TreeNode::from_phylo(node)),
                Err(_) => nodes.push(TreeNode::new(idx, None, None)),
            }
        }
        nodes
    }
}

/// Node within a phylogenetic tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: NodeId,
    pub name: Option<String>,
    pub length: Option<f64>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: BTreeMap<String, String>,
}

impl TreeNode {
    pub fn new(id: NodeId, name: Option<String>, length: Option<f64>) -> Self {
        Self {
            id,
            name,
            length,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn set_attribute(&mut self, key: String, value: String) {
        self.attributes.insert(key, value);
    }

    pub fn get_attribute(&self, key: &str) -> Option<&String> {
        self.attributes.get(key)
    }

    pub(crate) fn from_phylo(node: &PhyloNode) -> Self {
        // The parser reports unnamed nodes as either `None` or an empty name.
        let name = node.name.clone().filter(|name| !name.is_empty());
        let mut tree_node = TreeNode::new(node.id, name, node.parent_edge);
        tree_node.parent = node.parent;
        tree_node.children = node.children.clone();
        tree_node
    }
}

/// Container for the full contents of an imported file.
#[derive(Debug, Clone)]
pub struct TreeBundle {
    pub format: TreeFileFormat,
    pub trees: Vec<Tree>,
}

impl TreeBundle {
    pub fn new(format: TreeFileFormat, trees: Vec<Tree>) -> Self {
        Self { format, trees }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TreeFileFormat {
    Newick,
    Nexus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_from(newick: &str) -> Tree {
        let phylo = PhyloTree::from_newick(newick).expect("valid test newick");
        Tree::new(0, None, newick.to_string(), &phylo)
    }

    #[test]
    fn tips_follow_source_order() {
        let tree = tree_from("((SRA1:0.1,SRA2:0.2):0.3,SRA3:0.4);");
        let names: Vec<_> = tree
            .tips()
            .iter()
            .map(|node| node.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["SRA1", "SRA2", "SRA3"]);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.internal_nodes().len(), 2);
        assert!(tree.root().is_some_and(|root| root.parent.is_none()));
    }

    #[test]
    fn parent_child_links_are_consistent() {
        let tree = tree_from("((A:1,B:1):1,(C:1,D:1):1);");
        for node in &tree.nodes {
            for &child in &node.children {
                assert_eq!(tree.nodes[child].parent, Some(node.id));
            }
        }
    }

    #[test]
    fn rename_tips_uses_translate_table() {
        let mut tree = tree_from("(1:0.1,2:0.2,3:0.3);");
        let table = HashMap::from([
            ("1".to_string(), "SRA1".to_string()),
            ("2".to_string(), "SRA2".to_string()),
        ]);
        tree.rename_tips(&table);
        let names: Vec<_> = tree.tips().iter().map(|n| n.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                Some("SRA1".to_string()),
                Some("SRA2".to_string()),
                Some("3".to_string())
            ]
        );
    }

    #[test]
    fn restore_labels_covers_internal_nodes() {
        let mut tree = tree_from("((q0:1,q1:1)q2:1,q3:1);");
        let labels = HashMap::from([
            ("q0".to_string(), "E. coli".to_string()),
            ("q2".to_string(), "clade A".to_string()),
            ("q3".to_string(), String::new()),
        ]);
        tree.restore_labels(&labels);
        let names: Vec<_> = tree.nodes.iter().filter_map(|n| n.name.clone()).collect();
        assert!(names.contains(&"E. coli".to_string()));
        assert!(names.contains(&"clade A".to_string()));
        assert!(names.contains(&"q1".to_string()));
        assert!(!names.contains(&"q3".to_string()));
    }

    #[test]
    fn display_name_falls_back_to_index() {
        let mut tree = tree_from("(A,B);");
        assert_eq!(tree.display_name(), "tree #1");
        tree.label = Some("best".into());
        assert_eq!(tree.display_name(), "best");
    }
}
