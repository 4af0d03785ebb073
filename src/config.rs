//! YAML carver settings.
//!
//! Every key is optional and overrides the library default:
//!
//! ```yaml
//! h264:
//!   min_nal_unit_count: 5
//!   decode_slice_data: false
//! mpeg_system:
//!   max_zero_byte_stuffing: 16
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::Level;
use mediacarve::config::{CarveConfig, H264Config, Mpeg2VideoConfig, MpegSystemConfig};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    mpeg2_video: Mpeg2VideoSettings,
    h264: H264Settings,
    mpeg_system: MpegSystemSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Mpeg2VideoSettings {
    min_header_count: Option<usize>,
    max_header_count: Option<usize>,
    max_zero_byte_stuffing: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct H264Settings {
    min_nal_unit_count: Option<usize>,
    max_nal_unit_count: Option<usize>,
    max_zero_stuffing: Option<u64>,
    decode_slice_data: Option<bool>,
    min_salvaged_macroblocks: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MpegSystemSettings {
    min_header_count: Option<usize>,
    max_header_count: Option<usize>,
    max_zero_byte_stuffing: Option<u64>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl Mpeg2VideoSettings {
    fn apply(self, config: &mut Mpeg2VideoConfig) {
        set(&mut config.min_header_count, self.min_header_count);
        set(&mut config.max_header_count, self.max_header_count);
        set(&mut config.max_zero_byte_stuffing, self.max_zero_byte_stuffing);
    }
}

impl H264Settings {
    fn apply(self, config: &mut H264Config) {
        set(&mut config.min_nal_unit_count, self.min_nal_unit_count);
        set(&mut config.max_nal_unit_count, self.max_nal_unit_count);
        set(&mut config.max_zero_stuffing, self.max_zero_stuffing);
        set(&mut config.decode_slice_data, self.decode_slice_data);
        set(&mut config.min_salvaged_macroblocks, self.min_salvaged_macroblocks);
    }
}

impl MpegSystemSettings {
    fn apply(self, config: &mut MpegSystemConfig) {
        set(&mut config.min_header_count, self.min_header_count);
        set(&mut config.max_header_count, self.max_header_count);
        set(&mut config.max_zero_byte_stuffing, self.max_zero_byte_stuffing);
    }
}

impl ConfigFile {
    pub fn parse(yaml: &str) -> Result<Self> {
        // an empty document deserializes to unit, not to an empty map
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    pub fn apply(self, config: &mut CarveConfig) {
        self.mpeg2_video.apply(&mut config.mpeg2_video);
        self.h264.apply(&mut config.h264);
        self.mpeg_system.apply(&mut config.mpeg_system);
    }
}

/// Library defaults, overridden by the optional config file and `--strict`.
pub fn load(path: Option<&Path>, strict: bool) -> Result<CarveConfig> {
    let mut config = CarveConfig::default();

    if let Some(path) = path {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        ConfigFile::parse(&yaml)
            .with_context(|| format!("Invalid config file {}", path.display()))?
            .apply(&mut config);
        log::debug!("Loaded carver settings from {}", path.display());
    }

    if strict {
        config.fail_level = Level::Warn;
    }
    Ok(config)
}
