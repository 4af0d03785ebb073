//! Serializable view of carved blocks for `scan --output yaml`.

use mediacarve::process::carver::{CodecStream, DataBlock};
use mediacarve::result::{NodeId, ResultTree};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Report {
    pub input: String,
    pub size: u64,
    pub blocks: Vec<BlockReport>,
}

#[derive(Debug, Serialize)]
pub struct BlockReport {
    pub format: String,
    pub codec: String,
    pub start: u64,
    pub end: u64,
    #[serde(skip_serializing_if = "is_false")]
    pub fragmented: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub fragment_index: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamReport>,
    pub headers: Vec<HeaderReport>,
}

#[derive(Debug, Serialize)]
pub struct StreamReport {
    pub stream_id: String,
    pub codec: String,
    pub bytes: u64,
    pub ranges: Vec<[u64; 2]>,
}

#[derive(Debug, Serialize)]
pub struct HeaderReport {
    pub name: String,
    pub offset: u64,
    pub length: u64,
    #[serde(skip_serializing_if = "is_true")]
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HeaderReport>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_true(b: &bool) -> bool {
    *b
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl From<&CodecStream> for StreamReport {
    fn from(stream: &CodecStream) -> Self {
        Self {
            stream_id: format!("{:#04X}", stream.stream_id),
            codec: stream.codec.to_string(),
            bytes: stream.len(),
            ranges: stream.ranges.iter().map(|r| [r.start, r.end]).collect(),
        }
    }
}

impl BlockReport {
    /// `with_headers` adds the full result tree, otherwise only block fields are kept.
    pub fn new(block: &DataBlock, with_headers: bool) -> Self {
        let headers = if with_headers {
            block
                .results
                .roots()
                .iter()
                .map(|&root| HeaderReport::new(&block.results, root))
                .collect()
        } else {
            Vec::new()
        };

        Self {
            format: block.format.to_string(),
            codec: block.codec.to_string(),
            start: block.start,
            end: block.end,
            fragmented: block.is_fragmented,
            fragment_index: block.fragment_index,
            streams: block.codec_streams.iter().map(StreamReport::from).collect(),
            headers,
        }
    }
}

impl HeaderReport {
    fn new(tree: &ResultTree, id: NodeId) -> Self {
        let node = tree.node(id);
        Self {
            name: node.name.to_string(),
            offset: node.offset,
            length: node.length,
            valid: node.valid,
            attributes: node.attributes.iter().map(ToString::to_string).collect(),
            children: node
                .children()
                .iter()
                .map(|&child| HeaderReport::new(tree, child))
                .collect(),
        }
    }
}

impl Report {
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediacarve::config::CarveConfig;
    use mediacarve::formats::FormatId;
    use mediacarve::process::detect;

    // sequence header, GOP header and an intra picture, then zero bytes
    const MPEG2_STREAM: [u8; 35] = [
        0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, 0x23, 0x04, 0x93, 0xE0, 0xA0, //
        0x00, 0x00, 0x01, 0xB8, 0x00, 0x08, 0x00, 0x40, //
        0x00, 0x00, 0x01, 0x00, 0x00, 0x0F, 0xFF, 0xF8, //
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn yaml_report() -> anyhow::Result<()> {
        let blocks = detect(&MPEG2_STREAM, FormatId::Mpeg2Video, &CarveConfig::default(), None)
            .collect::<Result<Vec<_>, _>>()?;
        let report = Report {
            input: "stream.m2v".into(),
            size: MPEG2_STREAM.len() as u64,
            blocks: blocks.iter().map(|b| BlockReport::new(b, true)).collect(),
        };
        let yaml = report.to_yaml()?;

        assert!(yaml.starts_with("input: stream.m2v\nsize: 35\nblocks:\n"));
        assert!(yaml.contains("format: MPEG-1/2 Video"));
        assert!(yaml.contains("name: SequenceHeader"));
        assert!(yaml.contains("end: 28"));
        assert!(!yaml.contains("valid:"));
        assert!(!yaml.contains("fragmented"));
        Ok(())
    }
}
