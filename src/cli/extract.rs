use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::MultiProgress;
use mediacarve::config::CarveConfig;
use mediacarve::process::carver::{CodecStream, DataBlock};
use mediacarve::utils::cancel::CancelFlag;

use super::command::{Cli, ExtractArgs};
use super::{carve_formats, read_input};
use crate::input::input_stem;

pub fn cmd_extract(
    args: &ExtractArgs,
    cli: &Cli,
    config: &CarveConfig,
    cancel: &CancelFlag,
    multi: Option<&MultiProgress>,
) -> Result<()> {
    log::info!(
        "Extracting from {} into {}",
        args.input.display(),
        args.output_dir.display()
    );

    let data = read_input(&args.input)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let stem = input_stem(&args.input);
    let mut files = 0;
    let blocks = carve_formats(&data, &cli.selected_formats(), config, cancel, multi, |block, _| {
        let base = block_file_stem(&stem, block);

        let path = args.output_dir.join(format!("{base}.{}", block.codec.extension()));
        write_ranges(&path, &data, std::iter::once(block.range()))?;
        log::debug!("Wrote {} ({} bytes)", path.display(), block.len());
        files += 1;

        for stream in &block.codec_streams {
            let path = stream_path(&args.output_dir, &base, stream);
            write_ranges(&path, &data, stream.ranges.iter().cloned())?;
            log::debug!("Wrote {} ({} bytes)", path.display(), stream.len());
            files += 1;
        }
        Ok(())
    })?;

    log::info!("Wrote {files} files for {blocks} blocks");
    Ok(())
}

/// `<input>_<start offset>_<format>`, with the fragment index for continued blocks.
fn block_file_stem(stem: &str, block: &DataBlock) -> String {
    let mut name = format!("{stem}_{:010X}_{}", block.start, block.format.key());
    if block.fragment_index > 0 {
        name.push_str(&format!("_frag{}", block.fragment_index));
    }
    name
}

fn stream_path(dir: &Path, block_stem: &str, stream: &CodecStream) -> PathBuf {
    dir.join(format!(
        "{block_stem}_stream{:02X}.{}",
        stream.stream_id,
        stream.codec.extension()
    ))
}

fn write_ranges(
    path: &Path,
    data: &[u8],
    ranges: impl Iterator<Item = std::ops::Range<u64>>,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for range in ranges {
        let bytes = data
            .get(range.start as usize..range.end as usize)
            .with_context(|| format!("Range {range:?} lies outside the input"))?;
        writer.write_all(bytes)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediacarve::formats::{CodecId, FormatId};
    use mediacarve::process::carver::DataBlockBuilder;
    use mediacarve::result::ResultTree;

    #[test]
    fn file_names() {
        let mut block = DataBlockBuilder::new(FormatId::MpegSystem, 0x1234, 0x2000).build(ResultTree::default());
        assert_eq!(block_file_stem("disk", &block), "disk_0000001234_mpegps");

        block.fragment_index = 2;
        let stem = block_file_stem("disk", &block);
        assert_eq!(stem, "disk_0000001234_mpegps_frag2");

        let stream = CodecStream::new(0xE0, CodecId::Mpeg2Video);
        assert_eq!(
            stream_path(Path::new("out"), &stem, &stream),
            Path::new("out").join("disk_0000001234_mpegps_frag2_streamE0.m2v")
        );
    }

    #[test]
    fn ranges_are_concatenated() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("mediacarved-extract-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("stream.bin");

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        write_ranges(&path, &data, [1..3, 5..8].into_iter())?;
        assert_eq!(fs::read(&path)?, vec![2, 3, 6, 7, 8]);

        assert!(write_ranges(&path, &data, std::iter::once(6..12)).is_err());
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
