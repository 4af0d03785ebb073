//! Slice group maps (flexible macroblock ordering).
//!
//! A picture with more than one slice group assigns every map unit to a
//! group; the macroblocks of a slice are then visited in raster order
//! restricted to the slice's group.

/// `slice_group_map_type` and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceGroupMapType {
    Interleaved { run_length_minus1: Vec<u32> },
    Dispersed,
    Foreground { top_left: Vec<u32>, bottom_right: Vec<u32> },
    BoxOut { change_direction: bool, change_rate: u32 },
    RasterScan { change_direction: bool, change_rate: u32 },
    Wipe { change_direction: bool, change_rate: u32 },
    Explicit { slice_group_id: Vec<u32> },
}

impl SliceGroupMapType {
    /// `SliceGroupChangeRate` of the evolving map types.
    pub fn change_rate(&self) -> Option<u32> {
        match *self {
            Self::BoxOut { change_rate, .. }
            | Self::RasterScan { change_rate, .. }
            | Self::Wipe { change_rate, .. } => Some(change_rate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceGroups {
    pub count: u32,
    /// `None` with a single slice group.
    pub map_type: Option<SliceGroupMapType>,
}

impl Default for SliceGroups {
    fn default() -> Self {
        Self {
            count: 1,
            map_type: None,
        }
    }
}

/// Picture geometry the map is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapGeometry {
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub frame_mbs_only: bool,
    pub field_pic: bool,
    pub mbaff: bool,
    /// `PicSizeInMbs` of the current picture.
    pub pic_size_in_mbs: u32,
}

impl MapGeometry {
    fn pic_size_in_map_units(&self) -> u32 {
        self.pic_width_in_mbs * self.pic_height_in_map_units
    }
}

/// Bits of `slice_group_change_cycle`: `Ceil(Log2(PicSizeInMapUnits ÷ SliceGroupChangeRate + 1))`.
pub fn change_cycle_bits(pic_size_in_map_units: u32, change_rate: u32) -> u32 {
    let size = u64::from(pic_size_in_map_units);
    let rate = u64::from(change_rate.max(1));
    let mut bits = 0;
    while (1u64 << bits) * rate < size + rate {
        bits += 1;
    }
    bits
}

impl SliceGroups {
    /// `mbToSliceGroupMap`, one entry per macroblock of the picture.
    pub fn mb_to_slice_group_map(&self, geometry: &MapGeometry, change_cycle: u32) -> Vec<u8> {
        let size = geometry.pic_size_in_mbs as usize;
        let Some(map_type) = &self.map_type else {
            return vec![0; size];
        };
        if self.count <= 1 {
            return vec![0; size];
        }

        let units = self.map_unit_to_slice_group_map(map_type, geometry, change_cycle);
        let width = geometry.pic_width_in_mbs as usize;
        (0..size)
            .map(|i| {
                let unit = if geometry.frame_mbs_only || geometry.field_pic {
                    i
                } else if geometry.mbaff {
                    i / 2
                } else {
                    (i / (2 * width)) * width + (i % width)
                };
                units.get(unit).copied().unwrap_or(0)
            })
            .collect()
    }

    fn map_unit_to_slice_group_map(&self, map_type: &SliceGroupMapType, g: &MapGeometry, change_cycle: u32) -> Vec<u8> {
        let size = g.pic_size_in_map_units() as usize;
        let width = g.pic_width_in_mbs as usize;
        let height = g.pic_height_in_map_units as usize;
        let count = self.count as usize;
        let units_in_group0 = map_type
            .change_rate()
            .map_or(0, |rate| (u64::from(change_cycle) * u64::from(rate)).min(size as u64) as usize);
        let mut map = vec![0u8; size];

        match map_type {
            SliceGroupMapType::Interleaved { run_length_minus1 } => {
                interleaved(&mut map, run_length_minus1);
            }
            SliceGroupMapType::Dispersed => {
                for (i, entry) in map.iter_mut().enumerate() {
                    *entry = (((i % width) + (((i / width) * count) / 2)) % count) as u8;
                }
            }
            SliceGroupMapType::Foreground { top_left, bottom_right } => {
                map.fill((count - 1) as u8);
                for group in (0..count - 1).rev() {
                    let (Some(&tl), Some(&br)) = (top_left.get(group), bottom_right.get(group)) else {
                        continue;
                    };
                    let (tl, br) = (tl as usize, br as usize);
                    for y in tl / width..=br / width {
                        for x in tl % width..=br % width {
                            if let Some(entry) = map.get_mut(y * width + x) {
                                *entry = group as u8;
                            }
                        }
                    }
                }
            }
            SliceGroupMapType::BoxOut { change_direction, .. } => {
                box_out(&mut map, width, height, *change_direction, units_in_group0);
            }
            SliceGroupMapType::RasterScan { change_direction, .. } => {
                let upper_left = upper_left_size(size, units_in_group0, *change_direction);
                let dir = u8::from(*change_direction);
                for (i, entry) in map.iter_mut().enumerate() {
                    *entry = if i < upper_left { dir } else { 1 - dir };
                }
            }
            SliceGroupMapType::Wipe { change_direction, .. } => {
                let upper_left = upper_left_size(size, units_in_group0, *change_direction);
                let dir = u8::from(*change_direction);
                let mut k = 0;
                for x in 0..width {
                    for y in 0..height {
                        map[y * width + x] = if k < upper_left { dir } else { 1 - dir };
                        k += 1;
                    }
                }
            }
            SliceGroupMapType::Explicit { slice_group_id } => {
                for (entry, &id) in map.iter_mut().zip(slice_group_id) {
                    *entry = id as u8;
                }
            }
        }
        map
    }
}

fn upper_left_size(size: usize, units_in_group0: usize, change_direction: bool) -> usize {
    if change_direction {
        size - units_in_group0
    } else {
        units_in_group0
    }
}

fn interleaved(map: &mut [u8], run_length_minus1: &[u32]) {
    if run_length_minus1.is_empty() {
        return;
    }
    let size = map.len();
    let mut i = 0;
    while i < size {
        for (group, &run) in run_length_minus1.iter().enumerate() {
            if i >= size {
                break;
            }
            let run = run as usize + 1;
            for entry in map.iter_mut().skip(i).take(run) {
                *entry = group as u8;
            }
            i += run;
        }
    }
}

/// Box-out map: group 0 grows as a spiral from the picture centre.
fn box_out(map: &mut [u8], width: usize, height: usize, change_direction: bool, units_in_group0: usize) {
    map.fill(1);
    if map.is_empty() {
        return;
    }

    let dir = i64::from(change_direction);
    let (w, h) = (width as i64, height as i64);
    let mut x = (w - dir) / 2;
    let mut y = (h - dir) / 2;
    let (mut left, mut top, mut right, mut bottom) = (x, y, x, y);
    let (mut x_dir, mut y_dir) = (dir - 1, dir);

    // Every unit is visited once the box covers the picture.
    let max_steps = 4 * map.len() + 4 * (width + height) + 16;
    let mut k = 0;
    let mut steps = 0;
    while k < units_in_group0 && steps < max_steps {
        steps += 1;
        let index = (y * w + x) as usize;
        let vacant = map[index] == 1;
        if vacant {
            map[index] = 0;
        }

        if x_dir == -1 && x == left {
            left = (left - 1).max(0);
            x = left;
            x_dir = 0;
            y_dir = 2 * dir - 1;
        } else if x_dir == 1 && x == right {
            right = (right + 1).min(w - 1);
            x = right;
            x_dir = 0;
            y_dir = 1 - 2 * dir;
        } else if y_dir == -1 && y == top {
            top = (top - 1).max(0);
            y = top;
            x_dir = 1 - 2 * dir;
            y_dir = 0;
        } else if y_dir == 1 && y == bottom {
            bottom = (bottom + 1).min(h - 1);
            y = bottom;
            x_dir = 2 * dir - 1;
            y_dir = 0;
        } else {
            x += x_dir;
            y += y_dir;
        }

        k += usize::from(vacant);
    }
}

/// `NextMbAddress(n)`: the next macroblock of the same slice group, or
/// `map.len()` past the last one.
pub fn next_mb_address(map: &[u8], n: u32) -> u32 {
    let n = n as usize;
    let group = map.get(n).copied();
    let next = (n + 1..map.len())
        .find(|&i| Some(map[i]) == group)
        .unwrap_or(map.len());
    next as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: u32, height: u32) -> MapGeometry {
        MapGeometry {
            pic_width_in_mbs: width,
            pic_height_in_map_units: height,
            frame_mbs_only: true,
            field_pic: false,
            mbaff: false,
            pic_size_in_mbs: width * height,
        }
    }

    #[test]
    fn dispersed_checkerboard() {
        let groups = SliceGroups {
            count: 2,
            map_type: Some(SliceGroupMapType::Dispersed),
        };
        let map = groups.mb_to_slice_group_map(&geometry(4, 2), 0);
        assert_eq!(map, [0, 1, 0, 1, 1, 0, 1, 0]);
        assert_eq!(next_mb_address(&map, 0), 2);
        assert_eq!(next_mb_address(&map, 2), 5);
        assert_eq!(next_mb_address(&map, 7), 8);
    }

    #[test]
    fn interleaved_runs() {
        let groups = SliceGroups {
            count: 2,
            map_type: Some(SliceGroupMapType::Interleaved {
                run_length_minus1: vec![0, 2],
            }),
        };
        let map = groups.mb_to_slice_group_map(&geometry(3, 2), 0);
        assert_eq!(map, [0, 1, 1, 1, 0, 1]);
    }

    #[test]
    fn foreground_boxes() {
        let groups = SliceGroups {
            count: 2,
            map_type: Some(SliceGroupMapType::Foreground {
                top_left: vec![4],
                bottom_right: vec![5],
            }),
        };
        let map = groups.mb_to_slice_group_map(&geometry(3, 3), 0);
        assert_eq!(map, [1, 1, 1, 1, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn box_out_starts_in_the_centre() {
        let groups = SliceGroups {
            count: 2,
            map_type: Some(SliceGroupMapType::BoxOut {
                change_direction: false,
                change_rate: 1,
            }),
        };
        let map = groups.mb_to_slice_group_map(&geometry(3, 3), 1);
        assert_eq!(map, [1, 1, 1, 1, 0, 1, 1, 1, 1]);
        let map = groups.mb_to_slice_group_map(&geometry(3, 3), 9);
        assert!(map.iter().all(|&g| g == 0));
    }

    #[test]
    fn wipe_fills_columns() {
        let groups = SliceGroups {
            count: 2,
            map_type: Some(SliceGroupMapType::Wipe {
                change_direction: false,
                change_rate: 1,
            }),
        };
        let map = groups.mb_to_slice_group_map(&geometry(3, 2), 3);
        assert_eq!(map, [0, 0, 1, 0, 1, 1]);
    }

    #[test]
    fn field_map_units_cover_two_rows() {
        let groups = SliceGroups {
            count: 2,
            map_type: Some(SliceGroupMapType::Dispersed),
        };
        let geometry = MapGeometry {
            frame_mbs_only: false,
            pic_size_in_mbs: 4,
            ..geometry(2, 1)
        };
        assert_eq!(groups.mb_to_slice_group_map(&geometry, 0), [0, 1, 0, 1]);
    }

    #[test]
    fn change_cycle_width() {
        assert_eq!(change_cycle_bits(99, 1), 7);
        assert_eq!(change_cycle_bits(100, 10), 4);
        assert_eq!(change_cycle_bits(1, 1), 1);
    }
}
