pub mod command;
pub mod extract;
pub mod scan;

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mediacarve::config::CarveConfig;
use mediacarve::formats::FormatId;
use mediacarve::process::carver::DataBlock;
use mediacarve::process::detect;
use mediacarve::utils::cancel::CancelFlag;
use mediacarve::utils::errors::ScanError;

use crate::input::InputReader;

pub fn read_input(input_path: &Path) -> Result<Vec<u8>> {
    let mut reader = InputReader::new(input_path)?;
    if reader.is_pipe() {
        log::debug!("Reading input from stdin");
    }
    let data = reader.read_all()?;
    log::info!("Read {} bytes from {}", data.len(), input_path.display());
    Ok(data)
}

fn create_progress_bar(multi: &MultiProgress, total: u64) -> Result<ProgressBar> {
    let pb = multi.add(ProgressBar::new(total));
    pb.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%)\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
    )?);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

/// Runs the carver of every format in `formats` over `data` and hands each
/// block to `on_block`, format by format.
///
/// Returns the number of blocks found. Once `cancel` is raised the scan stops
/// and the blocks found so far are kept.
pub fn carve_formats<F>(
    data: &[u8],
    formats: &[FormatId],
    config: &CarveConfig,
    cancel: &CancelFlag,
    multi: Option<&MultiProgress>,
    mut on_block: F,
) -> Result<usize>
where
    F: FnMut(&DataBlock, Option<&ProgressBar>) -> Result<()>,
{
    let size = data.len() as u64;
    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi, size * formats.len() as u64)?),
        None => None,
    };

    let mut total = 0;
    let mut cancelled = false;
    for (index, &format) in formats.iter().enumerate() {
        let base = size * index as u64;
        if let Some(ref pb) = pb {
            pb.set_message(format!("carving {format}"));
            pb.set_position(base);
        }

        let started = Instant::now();
        let mut count = 0;
        let mut scanner = detect(data, format, config, Some(cancel.clone()));
        while let Some(block) = scanner.next() {
            let block = match block {
                Err(ScanError::Cancelled(offset)) => {
                    log::warn!("{format}: scan interrupted at {offset:#X}");
                    cancelled = true;
                    break;
                }
                block => block?,
            };
            on_block(&block, pb.as_ref())?;
            count += 1;
            if let Some(ref pb) = pb {
                pb.set_position(base + scanner.position());
            }
        }

        log::info!(
            "{format}: {count} blocks in {:.3}s",
            started.elapsed().as_secs_f64()
        );
        total += count;
        if cancelled {
            break;
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(total)
}

/// Prints through the progress bar, if any, so output and bar do not interleave.
pub fn print_suspended(pb: Option<&ProgressBar>, text: &str) {
    match pb {
        Some(pb) => pb.suspend(|| print!("{text}")),
        None => print!("{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // MPEG-2 sequence, GOP and picture headers
    const STREAM: [u8; 35] = [
        0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, 0x23, 0x04, 0x93, 0xE0, 0xA0, //
        0x00, 0x00, 0x01, 0xB8, 0x00, 0x08, 0x00, 0x40, //
        0x00, 0x00, 0x01, 0x00, 0x00, 0x0F, 0xFF, 0xF8, //
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn blocks_are_handed_out_per_format() -> Result<()> {
        let formats = [FormatId::Mpeg2Video, FormatId::H264];
        let mut seen = Vec::new();
        let count = carve_formats(&STREAM, &formats, &CarveConfig::default(), &CancelFlag::default(), None, |block, _| {
            seen.push((block.format, block.range()));
            Ok(())
        })?;
        assert_eq!(count, 1);
        assert_eq!(seen, [(FormatId::Mpeg2Video, 0..28)]);
        Ok(())
    }

    #[test]
    fn cancelled_scan_ends_cleanly() -> Result<()> {
        let cancel = CancelFlag::default();
        cancel.cancel();
        let mut seen = 0;
        let count = carve_formats(&STREAM, &FormatId::ALL, &CarveConfig::default(), &cancel, None, |_, _| {
            seen += 1;
            Ok(())
        })?;
        assert_eq!((count, seen), (0, 0));
        Ok(())
    }
}
