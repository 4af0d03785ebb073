//! Per-block coefficient counts of the current slice, used to predict `nC`
//! for `coeff_token`.

/// Count of a block outside the slice, or not yet decoded.
pub const UNAVAILABLE: u8 = u8::MAX;

/// Count recorded for every block of an `I_PCM` macroblock.
pub const PCM_COEFFICIENTS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Y = 0,
    Cb = 1,
    Cr = 2,
}

/// Arrangement of 4x4 blocks within one macroblock of a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub wide: usize,
    pub high: usize,
}

impl BlockLayout {
    pub const LUMA: Self = Self { wide: 4, high: 4 };
    pub const CHROMA_420: Self = Self { wide: 2, high: 2 };
    pub const CHROMA_422: Self = Self { wide: 2, high: 4 };

    /// Chroma block arrangement for `ChromaArrayType`.
    pub fn chroma(chroma_array_type: u32) -> Self {
        match chroma_array_type {
            2 => Self::CHROMA_422,
            3 => Self::LUMA,
            _ => Self::CHROMA_420,
        }
    }
}

/// Position of luma block `blk_idx` (8x8 quadrant major, then 4x4 within it).
pub fn luma_block_position(blk_idx: usize) -> (usize, usize) {
    let x = (blk_idx % 4) % 2 + ((blk_idx / 4) % 2) * 2;
    let y = (blk_idx % 4) / 2 + ((blk_idx / 4) / 2) * 2;
    (x, y)
}

/// Position of chroma AC block `blk_idx`, raster order two blocks wide.
pub fn chroma_block_position(blk_idx: usize) -> (usize, usize) {
    (blk_idx % 2, blk_idx / 2)
}

#[derive(Debug, Clone)]
pub struct CodedCoefficients {
    width_in_mbs: usize,
    planes: [Vec<[u8; 16]>; 3],
}

impl CodedCoefficients {
    pub fn new(width_in_mbs: u32, size_in_mbs: u32) -> Self {
        let plane = vec![[UNAVAILABLE; 16]; size_in_mbs as usize];
        Self {
            width_in_mbs: width_in_mbs.max(1) as usize,
            planes: [plane.clone(), plane.clone(), plane],
        }
    }

    /// Sets every block of a macroblock in all planes.
    pub fn fill(&mut self, mb_addr: u32, count: u8) {
        for plane in &mut self.planes {
            if let Some(mb) = plane.get_mut(mb_addr as usize) {
                mb.fill(count);
            }
        }
    }

    pub fn set(&mut self, plane: Plane, layout: BlockLayout, mb_addr: u32, (x, y): (usize, usize), count: u8) {
        if let Some(mb) = self.planes[plane as usize].get_mut(mb_addr as usize) {
            mb[y * layout.wide + x] = count;
        }
    }

    fn get(&self, plane: Plane, layout: BlockLayout, mb_addr: usize, x: usize, y: usize) -> u8 {
        self.planes[plane as usize]
            .get(mb_addr)
            .map_or(UNAVAILABLE, |mb| mb[y * layout.wide + x])
    }

    /// `nC` of the block at `(x, y)` from its left and upper neighbours.
    pub fn predict(&self, plane: Plane, layout: BlockLayout, mb_addr: u32, (x, y): (usize, usize)) -> i32 {
        let mb = mb_addr as usize;
        let width = self.width_in_mbs;

        let left = if x > 0 {
            self.get(plane, layout, mb, x - 1, y)
        } else if mb % width != 0 {
            self.get(plane, layout, mb - 1, layout.wide - 1, y)
        } else {
            UNAVAILABLE
        };
        let up = if y > 0 {
            self.get(plane, layout, mb, x, y - 1)
        } else if mb >= width {
            self.get(plane, layout, mb - width, x, layout.high - 1)
        } else {
            UNAVAILABLE
        };

        match (left, up) {
            (UNAVAILABLE, UNAVAILABLE) => 0,
            (n, UNAVAILABLE) | (UNAVAILABLE, n) => i32::from(n),
            (a, b) => (i32::from(a) + i32::from(b) + 1) >> 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_uses_available_neighbours() {
        let mut counts = CodedCoefficients::new(2, 4);
        let luma = BlockLayout::LUMA;

        counts.fill(0, 0);
        assert_eq!(counts.predict(Plane::Y, luma, 0, (0, 0)), 0);

        counts.fill(0, 6);
        assert_eq!(counts.predict(Plane::Y, luma, 2, (0, 0)), 6);

        counts.fill(1, 0);
        counts.set(Plane::Y, luma, 1, (0, 0), 3);
        // left neighbour 6 in macroblock 0, upper neighbour unavailable
        assert_eq!(counts.predict(Plane::Y, luma, 1, (0, 0)), 6);
        // left 3, upper 0
        assert_eq!(counts.predict(Plane::Y, luma, 1, (1, 1)), 0);
        assert_eq!(counts.predict(Plane::Y, luma, 1, (1, 0)), 3);

        counts.fill(3, 0);
        counts.set(Plane::Y, luma, 3, (0, 0), 1);
        // left in undecoded macroblock 2, upper 0 in macroblock 1
        assert_eq!(counts.predict(Plane::Y, luma, 3, (0, 0)), 0);
        counts.fill(2, 4);
        assert_eq!(counts.predict(Plane::Y, luma, 3, (0, 0)), 2);
    }

    #[test]
    fn chroma_uses_its_own_layout() {
        let mut counts = CodedCoefficients::new(2, 4);
        let layout = BlockLayout::chroma(2);
        counts.fill(0, 0);
        counts.set(Plane::Cb, layout, 0, (1, 3), 5);
        counts.fill(1, 0);
        assert_eq!(counts.predict(Plane::Cb, layout, 1, (0, 3)), 3);
        assert_eq!(counts.predict(Plane::Cr, layout, 1, (0, 3)), 0);
        assert_eq!(counts.predict(Plane::Cb, layout, 2, (1, 0)), 5);
    }

    #[test]
    fn block_positions() {
        assert_eq!(luma_block_position(0), (0, 0));
        assert_eq!(luma_block_position(3), (1, 1));
        assert_eq!(luma_block_position(5), (3, 0));
        assert_eq!(luma_block_position(10), (0, 3));
        assert_eq!(luma_block_position(15), (3, 3));
        assert_eq!(chroma_block_position(5), (1, 2));
    }
}
