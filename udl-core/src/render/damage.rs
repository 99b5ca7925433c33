//! Dirty rectangles and their word alignment.

use serde::{Deserialize, Serialize};

/// Word size per-line transfers are aligned to on this machine.
pub const WORD_SIZE: u32 = std::mem::size_of::<usize>() as u32;

/// A rectangle of pixels that needs resending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirtyRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DirtyRegion {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole `xres` x `yres` screen.
    pub const fn full(xres: u32, yres: u32) -> Self {
        Self::new(0, 0, xres, yres)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region lies inside an `xres` x `yres` screen.
    pub fn fits(&self, xres: u32, yres: u32) -> bool {
        self.x as u64 + self.width as u64 <= xres as u64
            && self.y as u64 + self.height as u64 <= yres as u64
    }

    /// Align `x` down and `width` up to a multiple of `word`, keeping
    /// the original pixels covered. `word` must be a power of two.
    pub fn align(&self, word: u32) -> Self {
        debug_assert!(word.is_power_of_two());
        let aligned_x = self.x & !(word - 1);
        let width = (self.width + (self.x - aligned_x)).next_multiple_of(word);
        Self {
            x: aligned_x,
            y: self.y,
            width,
            height: self.height,
        }
    }

    /// Contains every pixel of `other`.
    pub fn covers(&self, other: &DirtyRegion) -> bool {
        self.x <= other.x
            && self.y <= other.y
            && self.x as u64 + self.width as u64 >= other.x as u64 + other.width as u64
            && self.y as u64 + self.height as u64 >= other.y as u64 + other.height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_offset_region() {
        let r = DirtyRegion::new(3, 0, 1024, 768).align(8);
        assert_eq!(r, DirtyRegion::new(0, 0, 1032, 768));
    }

    #[test]
    fn aligned_region_covers_original() {
        for word in [4u32, 8, 16] {
            for x in 0..40 {
                for width in 0..40 {
                    let original = DirtyRegion::new(x, 5, width, 3);
                    let aligned = original.align(word);
                    assert_eq!(aligned.x % word, 0);
                    assert_eq!(aligned.width % word, 0);
                    assert!(aligned.covers(&original), "{original:?} -> {aligned:?}");
                }
            }
        }
    }

    #[test]
    fn fits_checks_both_axes() {
        assert!(DirtyRegion::full(1024, 768).fits(1024, 768));
        assert!(!DirtyRegion::new(0, 700, 1024, 100).fits(1024, 768));
        assert!(!DirtyRegion::new(1, 0, 1024, 1).fits(1024, 768));
        assert!(!DirtyRegion::new(u32::MAX, 0, 2, 1).fits(1024, 768));
    }
}
