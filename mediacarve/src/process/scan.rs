//! Block scanning over a whole input.

use log::debug;

use crate::process::carver::DataBlock;
use crate::process::carver_state::CarverState;
use crate::utils::errors::ScanError;

#[derive(Clone, Copy, Debug)]
struct PreviousBlock {
    end: u64,
    is_fragmented: bool,
    fragment_index: usize,
}

/// Yields every block a carver finds, in input order.
///
/// A block that starts exactly where a cut block ended continues its fragment
/// chain. The iterator stops after the first error.
pub struct BlockScanner<'a> {
    state: CarverState<'a>,
    limit: u64,
    previous: Option<PreviousBlock>,
    finished: bool,
}

impl<'a> BlockScanner<'a> {
    pub fn new(state: CarverState<'a>) -> Self {
        let limit = state.data_len();
        Self::with_limit(state, limit)
    }

    pub fn with_limit(state: CarverState<'a>, limit: u64) -> Self {
        Self {
            state,
            limit,
            previous: None,
            finished: false,
        }
    }

    /// Offset the next block is searched from.
    pub fn position(&mut self) -> u64 {
        if self.finished {
            return self.limit;
        }
        self.state.position().unwrap_or(self.limit)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl Iterator for BlockScanner<'_> {
    type Item = Result<DataBlock, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.state.carve_block(self.limit) {
            Ok(Some(mut block)) => {
                if let Some(previous) = self
                    .previous
                    .filter(|p| p.is_fragmented && p.end == block.start)
                {
                    block.fragment_index = previous.fragment_index + 1;
                }
                debug!(
                    "{} block {:#X}..{:#X} ({} headers)",
                    block.format,
                    block.start,
                    block.end,
                    block.results.len()
                );
                self.previous = Some(PreviousBlock {
                    end: block.end,
                    is_fragmented: block.is_fragmented,
                    fragment_index: block.fragment_index,
                });
                Some(Ok(block))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::process::carver_state::tests::MagicCarver;
    use crate::utils::bitstream_io::BitstreamReader;

    #[test]
    fn finds_every_block() -> anyhow::Result<()> {
        let data = [
            0xAB, 0xAB, 0xAB, 0x01, 0x00, // record
            0x12, 0x34, // garbage
            0xAB, 0xAB, 0xAB, 0x01, 0x01, 0x99, // record
        ];
        let state = CarverState::new(Box::new(MagicCarver::default()), BitstreamReader::new(&data), Level::Error);
        let blocks = BlockScanner::new(state).collect::<Result<Vec<_>, _>>()?;

        let ranges: Vec<_> = blocks.iter().map(DataBlock::range).collect();
        assert_eq!(ranges, vec![0..5, 7..13]);
        assert!(blocks.iter().all(|b| b.fragment_index == 0));
        Ok(())
    }
}
