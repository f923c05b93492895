use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};

use crate::annotate::{self, JoinPolicy};
use crate::error::AnnotateError;
use crate::export::{self, OutputFormat};
use crate::io::{self, Delimiter};
use crate::ui;

const DEMO_TREE: &str = "data/demo.nwk";
const DEMO_METADATA: &str = "data/demo_metadata.tsv";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "treemeta",
    about = "Join phylogenetic tree tips to sample metadata and report the match."
)]
pub struct AppConfig {
    /// Tree file to load (Newick or Nexus formats).
    #[arg(value_name = "TREE_FILE")]
    pub tree_path: Option<PathBuf>,

    /// Sample metadata exported from a spreadsheet (CSV or TSV).
    #[arg(value_name = "METADATA_FILE")]
    pub metadata_path: Option<PathBuf>,

    /// Metadata column holding the tip names. Defaults to the first column.
    #[arg(short, long, value_name = "COLUMN")]
    pub key: Option<String>,

    /// Field separator of the metadata file
    #[arg(short, long, default_value_t = Delimiter::Auto)]
    pub delimiter: Delimiter,

    /// Which tree to annotate when the file holds several (1-based)
    #[arg(short, long, default_value_t = 1)]
    pub tree: usize,

    /// Fail when any tip has no metadata record
    #[arg(long)]
    pub strict: bool,

    /// Write the annotated tips to this path.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Output format; inferred from the output extension when omitted
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Print the metadata columns and exit
    #[arg(long)]
    pub list_columns: bool,
}

impl AppConfig {
    pub fn policy(&self) -> JoinPolicy {
        if self.strict {
            JoinPolicy::Strict
        } else {
            JoinPolicy::Lenient
        }
    }
}

pub struct TreeMetaApp;

impl TreeMetaApp {
    pub fn run(config: &AppConfig) -> Result<()> {
        let metadata_path = Self::input_path(config.metadata_path.as_deref(), DEMO_METADATA)
            .ok_or_else(|| anyhow!("METADATA_FILE argument is required"))?;
        let table = io::load_metadata(&metadata_path, config.delimiter)?;
        if table.is_empty() {
            warn!("{} holds no metadata records", metadata_path.display());
        }

        if config.list_columns {
            ui::render_columns(&table);
            return Ok(());
        }

        let tree_path = Self::input_path(config.tree_path.as_deref(), DEMO_TREE)
            .ok_or_else(|| anyhow!("TREE_FILE argument is required"))?;
        let bundle = io::load_trees(&tree_path)?;

        let available = bundle.trees.len();
        let index = config
            .tree
            .checked_sub(1)
            .filter(|index| *index < available)
            .ok_or(AnnotateError::TreeIndexOutOfRange {
                requested: config.tree,
                available,
            })?;
        let mut tree = bundle.trees[index].clone();

        let key = match &config.key {
            Some(key) => key.clone(),
            None => table
                .columns()
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("metadata has no columns"))?,
        };
        info!("joining {} on column `{key}`", tree.display_name());

        let join = annotate::join(&tree, &table, &key)
            .with_context(|| format!("cannot join {}", metadata_path.display()))?;
        join.log_diagnostics();
        ui::render_summary(&bundle, &tree, &join);
        join.check(config.policy())?;

        if let Some(dest) = &config.output {
            tree.apply_annotations(&join.annotated);
            let format = OutputFormat::resolve(config.format, dest);
            export::write_output(&tree, &join, format, dest)?;
        }

        Ok(())
    }

    /// Use the given path, or the bundled demo file when it is present.
    fn input_path(given: Option<&Path>, demo: &str) -> Option<PathBuf> {
        if let Some(path) = given {
            return Some(path.to_path_buf());
        }
        const MANIFEST_DIR: &str = env!("CARGO_MANIFEST_DIR");
        let candidate = PathBuf::from(MANIFEST_DIR).join(demo);
        if candidate.exists() {
            info!("Using demo input at {}", candidate.display());
            Some(candidate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(args: &[&str]) -> AppConfig {
        AppConfig::parse_from(std::iter::once("treemeta").chain(args.iter().copied()))
    }

    fn scratch(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("treemeta-app-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn parses_arguments() {
        let cfg = config(&["t.nwk", "m.csv", "-k", "biosample_id", "--strict", "-t", "2"]);
        assert_eq!(cfg.tree_path, Some(PathBuf::from("t.nwk")));
        assert_eq!(cfg.metadata_path, Some(PathBuf::from("m.csv")));
        assert_eq!(cfg.key.as_deref(), Some("biosample_id"));
        assert_eq!(cfg.tree, 2);
        assert_eq!(cfg.policy(), JoinPolicy::Strict);
        assert_eq!(cfg.delimiter, Delimiter::Auto);
    }

    #[test]
    fn runs_join_and_writes_output() {
        let tree = scratch("run.nwk", "(SRA1:0.1,SRA2:0.2,SRA3:0.3);\n");
        let meta = scratch("run.tsv", "biosample_id\tsample_id\nSRA1\tA\nSRA2\tB\n");
        let out = std::env::temp_dir().join(format!("treemeta-app-{}-run.csv", std::process::id()));

        let cfg = config(&[
            tree.to_str().unwrap(),
            meta.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ]);
        TreeMetaApp::run(&cfg).unwrap();

        let written = fs::read_to_string(&out).unwrap();
        for path in [&tree, &meta, &out] {
            fs::remove_file(path).ok();
        }
        assert_eq!(
            written,
            "tip,sample_id,matched\nSRA1,A,yes\nSRA2,B,yes\nSRA3,,no\n"
        );
    }

    #[test]
    fn strict_run_fails_on_unmatched_tip() {
        let tree = scratch("strict.nwk", "(SRA1,SRA2,SRA3);\n");
        let meta = scratch("strict.tsv", "biosample_id\tsample_id\nSRA1\tA\nSRA2\tB\n");

        let cfg = config(&[tree.to_str().unwrap(), meta.to_str().unwrap(), "--strict"]);
        let err = TreeMetaApp::run(&cfg).unwrap_err();
        fs::remove_file(&tree).ok();
        fs::remove_file(&meta).ok();

        assert!(matches!(
            err.downcast_ref::<AnnotateError>(),
            Some(AnnotateError::UnmatchedTips { count: 1, .. })
        ));
    }

    #[test]
    fn tree_index_is_checked() {
        let tree = scratch("index.nwk", "(A,B);\n(C,D);\n");
        let meta = scratch("index.tsv", "id\nA\n");

        let cfg = config(&[tree.to_str().unwrap(), meta.to_str().unwrap(), "-t", "3"]);
        let err = TreeMetaApp::run(&cfg).unwrap_err();
        fs::remove_file(&tree).ok();
        fs::remove_file(&meta).ok();

        assert!(matches!(
            err.downcast_ref::<AnnotateError>(),
            Some(AnnotateError::TreeIndexOutOfRange {
                requested: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn unknown_key_column_fails() {
        let tree = scratch("key.nwk", "(A,B);\n");
        let meta = scratch("key.csv", "id,x\nA,1\n");

        let cfg = config(&[tree.to_str().unwrap(), meta.to_str().unwrap(), "-k", "accession"]);
        let err = TreeMetaApp::run(&cfg).unwrap_err();
        fs::remove_file(&tree).ok();
        fs::remove_file(&meta).ok();

        assert!(matches!(
            err.downcast_ref::<AnnotateError>(),
            Some(AnnotateError::MissingKeyColumn { .. })
        ));
    }

    #[test]
    fn demo_data_joins_cleanly() {
        let cfg = config(&["--strict"]);
        TreeMetaApp::run(&cfg).unwrap();
    }
}
