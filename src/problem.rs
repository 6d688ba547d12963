//! Problem geometry: image size, work decomposition and candidate
//! work-group shapes.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TunerError};

/// Half-width of the 7×7 receptive field; the source image is padded by
/// this much on every side.
pub const KERNEL_RADIUS: u32 = 3;
/// Side length of one filter.
pub const FILTER_SIDE: usize = 7;
/// Number of weights in one filter.
pub const FILTER_TAPS: usize = FILTER_SIDE * FILTER_SIDE;
/// Number of filters in the filter bank.
pub const FILTER_COUNT: usize = 10;
/// Output pixels produced by a single work-item.
pub const PIXELS_PER_ITEM: u32 = 4;

/// Fallback shape used when no trial completed.
pub const DEFAULT_SHAPE: WorkGroupShape = WorkGroupShape { x: 8, y: 4 };

/// The candidate list swept by the shipped tool.
pub const SHIPPED_CANDIDATES: [WorkGroupShape; 9] = [
    WorkGroupShape { x: 1, y: 1 },
    WorkGroupShape { x: 2, y: 1 },
    WorkGroupShape { x: 2, y: 2 },
    WorkGroupShape { x: 4, y: 2 },
    WorkGroupShape { x: 4, y: 4 },
    WorkGroupShape { x: 8, y: 4 },
    WorkGroupShape { x: 8, y: 8 },
    WorkGroupShape { x: 16, y: 4 },
    WorkGroupShape { x: 16, y: 8 },
];

/// Width and height of the image being convolved.
///
/// Every tensor length used by a trial is a fixed function of this
/// value, so a different size means different buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProblemSize {
    width: u32,
    height: u32,
}

impl ProblemSize {
    /// Both dimensions must be positive and even, and the width must be
    /// a multiple of 8 so that `width / 8` work-items, four outputs each,
    /// cover every one of the `width / 2` output columns.
    ///
    /// A width that is a multiple of 8 but not of 16 is accepted here; it
    /// makes the global size odd and is rejected by the backend at
    /// dispatch time for every local shape with an even `x`.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let invalid = |reason| TunerError::InvalidProblemSize {
            width,
            height,
            reason,
        };
        if width == 0 || height == 0 {
            return Err(invalid("dimensions must be positive"));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(invalid("dimensions must be even"));
        }
        if width % 8 != 0 {
            return Err(invalid("width must be a multiple of 8"));
        }
        // Padded source extents and element count must fit.
        let padded = |d: u32| d.checked_add(2 * KERNEL_RADIUS).map(|d| d as usize);
        match (padded(width), padded(height)) {
            (Some(w), Some(h)) if w.checked_mul(h).is_some() => Ok(Self { width, height }),
            _ => Err(invalid("dimensions too large")),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch of the padded source image.
    pub fn source_pitch(&self) -> usize {
        (self.width + 2 * KERNEL_RADIUS) as usize
    }

    /// Element count of the padded source image.
    pub fn source_len(&self) -> usize {
        self.source_pitch() * (self.height + 2 * KERNEL_RADIUS) as usize
    }

    /// Output columns per row.
    pub fn output_width(&self) -> usize {
        (self.width / 2) as usize
    }

    /// Element count of the output image and of the filter-index map.
    pub fn output_len(&self) -> usize {
        self.output_width() * self.height as usize
    }

    pub fn filter_len(&self) -> usize {
        FILTER_TAPS * FILTER_COUNT
    }

    /// Global work size, independent of the local shape.
    pub fn global_work_size(&self) -> WorkSize {
        WorkSize {
            x: self.width / 8,
            y: self.height,
        }
    }
}

impl Default for ProblemSize {
    fn default() -> Self {
        Self {
            width: 2560,
            height: 1440,
        }
    }
}

impl fmt::Display for ProblemSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Total number of invocations along each dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkSize {
    pub x: u32,
    pub y: u32,
}

impl WorkSize {
    /// Number of work-groups per dimension, or `None` when `local` does
    /// not tile `self` exactly.
    pub fn groups(&self, local: WorkGroupShape) -> Option<(u32, u32)> {
        if local.x == 0 || local.y == 0 {
            return None;
        }
        if self.x % local.x != 0 || self.y % local.y != 0 {
            return None;
        }
        Some((self.x / local.x, self.y / local.y))
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// A 2D local work-group shape: the tuning parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkGroupShape {
    pub x: u32,
    pub y: u32,
}

impl WorkGroupShape {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for WorkGroupShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

impl FromStr for WorkGroupShape {
    type Err = TunerError;

    /// Parses `XxY`, e.g. `16x8`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || TunerError::InvalidShape(s.to_string());
        let (x, y) = s.trim().split_once(['x', 'X']).ok_or_else(bad)?;
        let x: u32 = x.trim().parse().map_err(|_| bad())?;
        let y: u32 = y.trim().parse().map_err(|_| bad())?;
        if x == 0 || y == 0 {
            return Err(bad());
        }
        Ok(Self { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_problem_sizes() {
        let p = ProblemSize::default();
        assert_eq!(p.source_len(), 2566 * 1446);
        assert_eq!(p.output_len(), 1280 * 1440);
        assert_eq!(p.filter_len(), 490);
        assert_eq!(p.global_work_size(), WorkSize { x: 320, y: 1440 });
    }

    #[test]
    fn rejects_odd_and_unaligned_sizes() {
        assert!(ProblemSize::new(0, 16).is_err());
        assert!(ProblemSize::new(16, 15).is_err());
        assert!(ProblemSize::new(20, 16).is_err());
        assert!(ProblemSize::new(24, 16).is_ok());
    }

    #[test]
    fn rejects_sizes_whose_padding_overflows() {
        match ProblemSize::new(8, u32::MAX - 1) {
            Err(TunerError::InvalidProblemSize { reason, .. }) => assert_eq!(reason, "dimensions too large"),
            other => panic!("unexpected {other:?}"),
        }
        let p = ProblemSize::new(8, u32::MAX - 7).unwrap();
        assert_eq!(p.source_len(), 14 * (u32::MAX as usize - 1));
    }

    #[test]
    fn groups_require_exact_tiling() {
        let global = WorkSize { x: 321, y: 1440 };
        assert_eq!(global.groups(WorkGroupShape::new(1, 1)), Some((321, 1440)));
        assert_eq!(global.groups(WorkGroupShape::new(2, 1)), None);
        assert_eq!(global.groups(WorkGroupShape::new(0, 1)), None);
    }

    #[test]
    fn parses_shapes() {
        assert_eq!("16x8".parse::<WorkGroupShape>().unwrap(), WorkGroupShape::new(16, 8));
        assert_eq!(" 4X2 ".parse::<WorkGroupShape>().unwrap(), WorkGroupShape::new(4, 2));
        assert!("0x2".parse::<WorkGroupShape>().is_err());
        assert!("8".parse::<WorkGroupShape>().is_err());
        assert!("axb".parse::<WorkGroupShape>().is_err());
    }
}
