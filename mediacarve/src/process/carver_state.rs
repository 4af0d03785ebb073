//! The carve loop.
//!
//! Seeks a candidate with the carver, extends a chain of headers from it while
//! the chain stays valid, then validates the chain. A rejected candidate is
//! retried from one byte past its start, so a genuine header hiding inside a
//! spurious one is never skipped.

use std::io;

use log::{Level, trace};

use crate::process::carver::{DataBlock, DataBlockBuilder, DataBlockCarver};
use crate::process::reader_state::ReaderState;
use crate::utils::bitstream_io::BitstreamReader;
use crate::utils::errors::ScanError;

pub struct CarverState<'a> {
    state: ReaderState<'a>,
    carver: Box<dyn DataBlockCarver>,
}

impl<'a> CarverState<'a> {
    pub fn new(carver: Box<dyn DataBlockCarver>, reader: BitstreamReader<'a>, fail_level: Level) -> Self {
        Self {
            state: ReaderState::new(reader, carver.format(), fail_level),
            carver,
        }
    }

    pub fn carver(&self) -> &dyn DataBlockCarver {
        self.carver.as_ref()
    }

    /// Length of the input in bytes.
    pub fn data_len(&self) -> u64 {
        self.state.data_len()
    }

    pub fn position(&mut self) -> Result<u64, ScanError> {
        let reader = self.state.reader();
        reader.position().map_err(|source| ScanError::Io { offset: 0, source })
    }

    pub fn set_position(&mut self, offset: u64) -> Result<(), ScanError> {
        self.state
            .reader()
            .set_position(offset)
            .map_err(|source| ScanError::Io { offset, source })
    }

    /// Finds the next valid block starting before `limit`.
    ///
    /// `Ok(None)` means no candidate is left in range. Cancellation is an
    /// error and never yields a partial block.
    pub fn carve_block(&mut self, limit: u64) -> Result<Option<DataBlock>, ScanError> {
        self.state.reset();

        loop {
            let position = self.position()?;
            if self.state.reader().is_cancelled() {
                return Err(ScanError::Cancelled(position));
            }
            if position >= limit {
                return Ok(None);
            }

            self.carver.reset();
            if !self.carver.carve(self.state.reader(), limit) {
                return Ok(None);
            }

            let block_start = self.position()?;
            self.state.begin_block();
            while self.state.is_chain_open() {
                let before = self.bit_position(block_start)?;
                self.carver.parse_header(&mut self.state);
                if self.bit_position(block_start)? == before {
                    break;
                }
            }

            if self.state.reader().is_cancelled() {
                return Err(ScanError::Cancelled(block_start));
            }

            let block_end = self.state.last_valid_end();
            if block_end > block_start {
                let mut block = DataBlockBuilder::new(self.carver.format(), block_start, block_end);
                if self.carver.validate_data_block(&mut block, block_start, block_end) {
                    let results = self.state.take_results(block_end);
                    self.set_position(block_end)?;
                    return Ok(Some(block.build(results)));
                }
            }

            trace!(
                "{} candidate at {block_start:#X} rejected after {} headers",
                self.carver.format(),
                self.state.header_count()
            );
            // TODO: let carvers report how far a rejected candidate can be skipped.
            self.set_position(block_start + 1)?;
            self.state.reset();
        }
    }

    fn bit_position(&mut self, offset: u64) -> Result<u64, ScanError> {
        self.state
            .reader()
            .bit_position()
            .map_err(|source: io::Error| ScanError::Io { offset, source })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::formats::FormatId;
    use crate::result::attribute::Reserved;
    use crate::result::HeaderName;
    use crate::utils::cancel::CancelFlag;

    const MAGIC: [u8; 3] = [0xAB, 0xAB, 0xAB];

    /// Toy format: `AB AB AB 01` followed by a length byte and that many bytes.
    #[derive(Default)]
    pub(crate) struct MagicCarver {
        headers: usize,
    }

    impl DataBlockCarver for MagicCarver {
        fn format(&self) -> FormatId {
            FormatId::MpegSystem
        }

        fn reset(&mut self) {
            self.headers = 0;
        }

        fn carve(&mut self, reader: &mut BitstreamReader<'_>, offset_limit: u64) -> bool {
            let Ok(start) = reader.position() else {
                return false;
            };
            let end = offset_limit.min(reader.len()) as usize;
            let data = reader.data();
            let found = (start as usize..end.saturating_sub(2)).find(|&i| data[i..i + 3] == MAGIC);
            match found {
                Some(offset) => reader.set_position(offset as u64).is_ok(),
                None => false,
            }
        }

        fn parse_header(&mut self, state: &mut ReaderState<'_>) {
            if state.parse(HeaderName::Raw("Record"), |s| {
                s.read_formatted("magic".to_owned(), 24, &Reserved(0xABABAB))?;
                s.read_formatted("version".to_owned(), 8, &Reserved(1))?;
                let length = s.read_attribute("length".to_owned(), 8)?;
                s.reader().skip_n(length * 8)?;
                Ok(())
            }) {
                self.headers += 1;
            }
        }

        fn validate_data_block(&mut self, _block: &mut DataBlockBuilder, _start: u64, _end: u64) -> bool {
            self.headers > 0
        }
    }

    fn carver_state(data: &[u8]) -> CarverState<'_> {
        CarverState::new(Box::new(MagicCarver::default()), BitstreamReader::new(data), Level::Error)
    }

    #[test]
    fn rejected_candidate_rewinds_one_byte() -> anyhow::Result<()> {
        // A spurious magic at 2 overlaps the genuine record at 3.
        let data = [0x00, 0x11, 0xAB, 0xAB, 0xAB, 0xAB, 0x01, 0x02, 0xCA, 0xFE, 0x77];
        let mut state = carver_state(&data);

        let block = state.carve_block(data.len() as u64)?.expect("block");
        assert_eq!(block.start, 3);
        assert_eq!(block.end, 10);
        assert_eq!(block.results.roots().len(), 1);
        assert_eq!(state.position()?, 10);
        assert!(state.carve_block(data.len() as u64)?.is_none());
        Ok(())
    }

    #[test]
    fn block_ends_at_last_valid_header() -> anyhow::Result<()> {
        let data = [
            0xAB, 0xAB, 0xAB, 0x01, 0x01, 0x55, // record
            0xAB, 0xAB, 0xAB, 0x01, 0x00, // record
            0xAB, 0xAB, 0xAB, 0x02, 0x00, // bad version
        ];
        let mut state = carver_state(&data);

        let block = state.carve_block(data.len() as u64)?.expect("block");
        assert_eq!(block.range(), 0..11);
        assert_eq!(block.results.roots().len(), 2);
        assert!(block.results.walk().all(|(_, id)| block.results.node(id).valid));
        Ok(())
    }

    #[test]
    fn limit_bounds_the_search() -> anyhow::Result<()> {
        let data = [0x00, 0x00, 0xAB, 0xAB, 0xAB, 0x01, 0x00];
        let mut state = carver_state(&data);
        assert!(state.carve_block(2)?.is_none());
        Ok(())
    }

    #[test]
    fn cancellation_returns_no_block() {
        let data = [0xAB, 0xAB, 0xAB, 0x01, 0x00];
        let flag = CancelFlag::default();
        flag.cancel();
        let mut state = CarverState::new(
            Box::new(MagicCarver::default()),
            BitstreamReader::with_cancel(&data, flag),
            Level::Error,
        );
        assert!(matches!(state.carve_block(5), Err(ScanError::Cancelled(0))));
    }
}
