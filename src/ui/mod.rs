use crate::annotate::{Join, MetadataTable};
use crate::tree::{Tree, TreeBundle};

const LIST_LIMIT: usize = 10;

pub fn render_summary(bundle: &TreeBundle, tree: &Tree, join: &Join) {
    let report = &join.report;

    println!(
        "Loaded {:?} file with {} tree(s); annotating {} ({} tips, {} internal nodes).",
        bundle.format,
        bundle.trees.len(),
        tree.display_name(),
        tree.leaf_count(),
        tree.internal_nodes().len()
    );
    let preview = if tree.newick.chars().count() > 64 {
        format!("{}...", tree.newick.chars().take(64).collect::<String>())
    } else {
        tree.newick.clone()
    };
    println!("- {preview}");
    println!(
        "Joined {} of {} tip(s) on `{}` ({} attribute column(s)).",
        report.matched,
        report.tips,
        join.annotated.key,
        join.annotated.columns.len()
    );

    print_list("Tips without metadata", &report.unmatched_tips);

    if !report.duplicate_keys.is_empty() {
        println!("Duplicate keys (first line used):");
        for duplicate in report.duplicate_keys.iter().take(LIST_LIMIT) {
            let lines: Vec<String> = duplicate.lines.iter().map(usize::to_string).collect();
            println!("- {} on lines {}", duplicate.key, lines.join(", "));
        }
        if report.duplicate_keys.len() > LIST_LIMIT {
            println!("... ({} more omitted)", report.duplicate_keys.len() - LIST_LIMIT);
        }
    }

    print_list("Metadata keys not in the tree", &report.unused_keys);

    if !report.blank_key_rows.is_empty() {
        println!(
            "{} metadata row(s) had an empty key and were skipped.",
            report.blank_key_rows.len()
        );
    }
}

pub fn render_columns(table: &MetadataTable) {
    println!("{} record(s); columns:", table.len());
    for (i, column) in table.columns().iter().enumerate() {
        println!("{:>3}. {}", i + 1, column);
    }
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{title} ({}):", items.len());
    for item in items.iter().take(LIST_LIMIT) {
        println!("- {item}");
    }
    if items.len() > LIST_LIMIT {
        println!("... ({} more omitted)", items.len() - LIST_LIMIT);
    }
}
