use std::fmt::{self, Write as _};

use anyhow::Result;
use indicatif::MultiProgress;
use mediacarve::config::CarveConfig;
use mediacarve::process::carver::{Column, DataBlock};
use mediacarve::process::carver_for;
use mediacarve::utils::cancel::CancelFlag;

use super::command::{Cli, ReportFormat, ScanArgs};
use super::{carve_formats, print_suspended, read_input};
use crate::report::{BlockReport, Report};

pub fn cmd_scan(
    args: &ScanArgs,
    cli: &Cli,
    config: &CarveConfig,
    cancel: &CancelFlag,
    multi: Option<&MultiProgress>,
) -> Result<()> {
    log::info!("Scanning {}", args.input.display());

    let data = read_input(&args.input)?;
    let formats = cli.selected_formats();

    match args.output {
        ReportFormat::Text => {
            let count = carve_formats(&data, &formats, config, cancel, multi, |block, pb| {
                let columns = carver_for(block.format, config).columns();
                print_suspended(pb, &describe_block(block, &columns, args.tree)?);
                Ok(())
            })?;
            println!("{count} blocks found");
        }
        ReportFormat::Yaml => {
            let mut blocks = Vec::new();
            carve_formats(&data, &formats, config, cancel, multi, |block, _| {
                blocks.push(BlockReport::new(block, args.tree));
                Ok(())
            })?;
            let report = Report {
                input: args.input.display().to_string(),
                size: data.len() as u64,
                blocks,
            };
            print!("{}", report.to_yaml()?);
        }
    }

    Ok(())
}

/// Values of the format's table columns found in the block, as `name=value`.
fn column_values(block: &DataBlock, columns: &[Column]) -> Vec<String> {
    columns
        .iter()
        .filter_map(|column| {
            let node = block.results.find(column.header)?;
            let attribute = block.results.node(node).attribute(&column.attribute)?;
            Some(format!("{}={}", attribute.name, attribute.display))
        })
        .collect()
}

fn describe_block(block: &DataBlock, columns: &[Column], tree: bool) -> Result<String, fmt::Error> {
    let mut out = String::new();

    write!(
        out,
        "{:#012X}..{:#012X}  {:<16}  {:<14}  {:>10} bytes",
        block.start,
        block.end,
        block.format.to_string(),
        block.codec.to_string(),
        block.len()
    )?;
    if block.is_fragmented || block.fragment_index > 0 {
        write!(out, "  fragment {}", block.fragment_index)?;
    }
    let values = column_values(block, columns);
    if !values.is_empty() {
        write!(out, "  {}", values.join(" "))?;
    }
    out.push('\n');

    for stream in &block.codec_streams {
        writeln!(
            out,
            "    stream {:#04X}  {:<16}  {} bytes in {} ranges",
            stream.stream_id,
            stream.codec.to_string(),
            stream.len(),
            stream.ranges.len()
        )?;
    }

    if tree {
        for (depth, id) in block.results.walk() {
            let node = block.results.node(id);
            let indent = 4 + depth * 2;
            write!(
                out,
                "{:indent$}{} @ {:#X} ({} bytes)",
                "",
                node.name,
                node.offset,
                node.length
            )?;
            if !node.valid {
                out.push_str(" [invalid]");
            }
            out.push('\n');
            for attribute in &node.attributes {
                writeln!(out, "{:indent$}  {attribute}", "", indent = indent)?;
            }
        }
    }

    Ok(out)
}
