use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ocrlabel::{label, table_record, write_table_records, ExporterBuilder, MergeRange};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Exports OCR training data from an annotated image directory
#[derive(Parser, Debug)]
#[command(name = "ocrlabel")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crop every labelled box and write rec_gt.txt next to Label.txt
    Crops {
        /// Path to Label.txt; a fileState.txt next to it limits the export to
        /// checked images
        #[arg(long)]
        label: PathBuf,

        /// Directory the image paths in Label.txt are relative to
        #[arg(long)]
        image_root: Option<PathBuf>,

        /// Pixels of padding around each box
        #[arg(long, default_value = "0")]
        padding: u32,

        /// Also crop boxes marked as difficult
        #[arg(long)]
        include_difficult: bool,
    },
    /// Write the table ground truth record of one image
    Table {
        /// Path to Label.txt
        #[arg(long)]
        label: PathBuf,

        /// Image entry as it appears in Label.txt
        #[arg(long)]
        image: String,

        #[arg(long)]
        rows: usize,

        #[arg(long)]
        cols: usize,

        /// Merged cells as start_row:end_row:start_col:end_col, zero-indexed
        #[arg(long = "merge", value_parser = parse_merge)]
        merges: Vec<MergeRange>,

        /// Output file, defaults to gt.txt next to Label.txt
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_merge(value: &str) -> Result<MergeRange, String> {
    let parts = value
        .split(':')
        .map(|part| part.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid merge range {value:?}: {err}"))?;
    match parts[..] {
        [sr, er, sc, ec] => Ok(MergeRange::new(sr, er, sc, ec)),
        _ => Err(format!("merge range {value:?} needs four numbers")),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Args::parse().command {
        Command::Crops {
            label: label_path,
            image_root,
            padding,
            include_difficult,
        } => {
            let entries = label::read_label_file(&label_path)
                .with_context(|| format!("failed to read {}", label_path.display()))?;
            let out_dir = label_path.parent().map(PathBuf::from).unwrap_or_default();
            let mut builder = ExporterBuilder::new()
                .padding(padding)
                .skip_difficult(!include_difficult);
            if let Some(root) = image_root {
                builder = builder.image_root(root);
            }
            let checked = label::read_file_state(&label_path.with_file_name("fileState.txt"))?;
            if !checked.is_empty() {
                builder = builder.checked_images(checked);
            }
            let report = builder.build().export_crops(&entries, &out_dir)?;
            for failure in &report.failed {
                match failure.index {
                    Some(i) => eprintln!("{} box {i}: {}", failure.image, failure.reason),
                    None => eprintln!("{}: {}", failure.image, failure.reason),
                }
            }
            println!(
                "Wrote {} crops to {}",
                report.written.len(),
                out_dir.display()
            );
        }
        Command::Table {
            label: label_path,
            image,
            rows,
            cols,
            merges,
            out,
        } => {
            let entries = label::read_label_file(&label_path)
                .with_context(|| format!("failed to read {}", label_path.display()))?;
            let Some(entry) = entries.iter().find(|entry| entry.image == image) else {
                bail!("{image} has no entry in {}", label_path.display());
            };
            let record = table_record(&entry.image, &entry.annotations, &merges, rows, cols)?;
            let out = out.unwrap_or_else(|| label_path.with_file_name("gt.txt"));
            write_table_records(&[record], &out)?;
            println!("Table record saved in {}", out.display());
        }
    }
    Ok(())
}
