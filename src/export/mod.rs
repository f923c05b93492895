use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::info;

use crate::annotate::Join;
use crate::tree::Tree;

pub mod json;
pub mod nexus;
pub mod table;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Tsv,
    Csv,
    Json,
    Nexus,
}

impl OutputFormat {
    /// Explicit choice first, then the output extension, then TSV.
    pub fn resolve(explicit: Option<OutputFormat>, path: &Path) -> OutputFormat {
        explicit
            .or_else(|| Self::from_extension(path))
            .unwrap_or(OutputFormat::Tsv)
    }

    fn from_extension(path: &Path) -> Option<OutputFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tsv" | "tab" | "txt" => Some(OutputFormat::Tsv),
            "csv" => Some(OutputFormat::Csv),
            "json" => Some(OutputFormat::Json),
            "nex" | "nexus" | "nxs" | "tre" | "tree" | "trees" => Some(OutputFormat::Nexus),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Tsv => write!(f, "tsv"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Nexus => write!(f, "nexus"),
        }
    }
}

/// Render the join in `format`.
pub fn render(tree: &Tree, join: &Join, format: OutputFormat) -> Result<String> {
    let text = match format {
        OutputFormat::Tsv => table::render(&join.annotated, '\t'),
        OutputFormat::Csv => table::render(&join.annotated, ','),
        OutputFormat::Json => json::render(tree, join)?,
        OutputFormat::Nexus => nexus::render(tree, &join.annotated),
    };
    Ok(text)
}

pub fn write_output(tree: &Tree, join: &Join, format: OutputFormat, path: &Path) -> Result<()> {
    let text = render(tree, join, format)?;
    fs::write(path, text)
        .with_context(|| format!("failed to write {format} output: {}", path.display()))?;
    info!("wrote {format} output to {}", path.display());
    Ok(())
}
