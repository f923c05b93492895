//! Delimited-text reader for sample metadata exported from a spreadsheet.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::{debug, warn};

use crate::annotate::{MetadataTable, Record};
use crate::error::AnnotateError;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum)]
pub enum Delimiter {
    /// Pick from the file extension, then from the header line.
    #[default]
    Auto,
    Tab,
    Comma,
    Semicolon,
}

impl Delimiter {
    fn as_char(self) -> Option<char> {
        match self {
            Delimiter::Auto => None,
            Delimiter::Tab => Some('\t'),
            Delimiter::Comma => Some(','),
            Delimiter::Semicolon => Some(';'),
        }
    }

    fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Delimiter::Comma),
            "tsv" | "tab" => Some(Delimiter::Tab),
            _ => None,
        }
    }

    fn sniff(header: &str) -> Self {
        [Delimiter::Tab, Delimiter::Comma, Delimiter::Semicolon]
            .into_iter()
            .filter_map(|d| {
                let ch = d.as_char()?;
                let count = header.matches(ch).count();
                (count > 0).then_some((d, count))
            })
            // Ties keep the earlier candidate, so tab wins over comma.
            .fold(None, |best: Option<(Delimiter, usize)>, (d, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((d, count)),
            })
            .map(|(d, _)| d)
            .unwrap_or(Delimiter::Tab)
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delimiter::Auto => write!(f, "auto"),
            Delimiter::Tab => write!(f, "tab"),
            Delimiter::Comma => write!(f, "comma"),
            Delimiter::Semicolon => write!(f, "semicolon"),
        }
    }
}

pub fn load_metadata(path: &Path, delimiter: Delimiter) -> Result<MetadataTable> {
    let raw = fs::read_to_string(path).map_err(|source| AnnotateError::MissingInput {
        kind: "metadata",
        path: path.to_path_buf(),
        source,
    })?;

    let delimiter = match delimiter {
        Delimiter::Auto => Delimiter::from_extension(path).unwrap_or_else(|| {
            let header = raw.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
            Delimiter::sniff(header)
        }),
        explicit => explicit,
    };
    debug!("reading {} as {delimiter}-delimited", path.display());

    let table = parse_table(&raw, delimiter)
        .with_context(|| format!("failed to read metadata file: {}", path.display()))?;
    debug!(
        "metadata has {} column(s) and {} record(s)",
        table.columns().len(),
        table.len()
    );
    if table.columns().len() == 1 && !table.is_empty() {
        warn!(
            "{} has a single column `{}`; pass --delimiter if the file is not {delimiter}-delimited",
            path.display(),
            table.columns()[0]
        );
    }
    Ok(table)
}

fn parse_table(raw: &str, delimiter: Delimiter) -> Result<MetadataTable, AnnotateError> {
    let sep = delimiter.as_char().unwrap_or('\t');
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let mut lines = raw
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((header_line, header)) = lines.next() else {
        return Err(AnnotateError::Metadata {
            line: 1,
            message: "file has no header row".to_string(),
        });
    };

    let columns = split_fields(header, sep, header_line)?;
    let mut seen = HashSet::new();
    for column in &columns {
        if column.is_empty() {
            return Err(AnnotateError::Metadata {
                line: header_line,
                message: "header contains an empty column name".to_string(),
            });
        }
        if !seen.insert(column.as_str()) {
            return Err(AnnotateError::Metadata {
                line: header_line,
                message: format!("column `{column}` appears more than once"),
            });
        }
    }

    let mut records = Vec::new();
    for (line_no, line) in lines {
        let mut values = split_fields(line, sep, line_no)?;
        if values.len() > columns.len() {
            // Trailing empty cells are a common spreadsheet export artefact.
            while values.len() > columns.len() && values.last().is_some_and(String::is_empty) {
                values.pop();
            }
            if values.len() > columns.len() {
                return Err(AnnotateError::Metadata {
                    line: line_no,
                    message: format!(
                        "row has {} fields but the header has {}",
                        values.len(),
                        columns.len()
                    ),
                });
            }
        }
        if values.len() < columns.len() {
            warn!(
                "metadata line {line_no} has {} of {} fields; padding with empty values",
                values.len(),
                columns.len()
            );
            values.resize(columns.len(), String::new());
        }
        records.push(Record::new(line_no, values));
    }

    Ok(MetadataTable::new(columns, records))
}

/// Split one line into trimmed fields, honouring double quotes.
fn split_fields(line: &str, sep: char, line_no: usize) -> Result<Vec<String>, AnnotateError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' if field.trim().is_empty() && !quoted => {
                field.clear();
                quoted = true;
                in_quotes = true;
            }
            c if c == sep => {
                fields.push(finish_field(&mut field, quoted));
                quoted = false;
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err(AnnotateError::Metadata {
            line: line_no,
            message: "unterminated quoted field".to_string(),
        });
    }
    fields.push(finish_field(&mut field, quoted));
    Ok(fields)
}

fn finish_field(field: &mut String, quoted: bool) -> String {
    let value = std::mem::take(field);
    if quoted {
        // Keep whitespace inside the quotes, drop what trails the closing quote.
        value.trim_end().to_string()
    } else {
        value.trim().to_string()
    }
}
