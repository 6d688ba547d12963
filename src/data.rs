//! Reproducible input tensors.

use std::ops::Deref;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, TunerError};
use crate::problem::ProblemSize;

/// Element types the generator can produce.
pub trait Element: Copy + PartialOrd {
    fn to_f64(self) -> f64;
    /// Truncating conversion, matching a plain numeric cast.
    fn from_f64(v: f64) -> Self;
    fn midpoint(a: Self, b: Self) -> Self;
}

impl Element for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn midpoint(a: Self, b: Self) -> Self {
        (a + b) / 2.0
    }
}

impl Element for i32 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as i32
    }

    fn midpoint(a: Self, b: Self) -> Self {
        (a + b) / 2
    }
}

/// Deterministic source of uniform values.
///
/// Every call to [`DataGenerator::fill`] starts from the same seed, so a
/// tensor depends only on the seed, its length and its range.  Trials and
/// the validator therefore always agree on the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataGenerator {
    seed: u64,
}

impl DataGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// `len` values uniform in `[bottom, top)`.
    ///
    /// The unit sample is inclusive of 1.0, so `top` itself is reachable
    /// (rounding can get there too); such values become the midpoint of
    /// the range.
    pub fn fill<T: Element>(&self, len: usize, bottom: T, top: T) -> Vec<T> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..len)
            .map(|_| scale(bottom, top, rng.gen::<u32>() as f64 / u32::MAX as f64))
            .collect()
    }
}

/// Map `unit` in `[0, 1]` onto `[bottom, top)`, clamping anything that
/// lands on `top` to the midpoint.
fn scale<T: Element>(bottom: T, top: T, unit: f64) -> T {
    let span = top.to_f64() - bottom.to_f64();
    let v = T::from_f64(bottom.to_f64() + span * unit);
    if v >= top {
        T::midpoint(bottom, top)
    } else {
        v
    }
}

impl Default for DataGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A host tensor with bounds-checked element access.
#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor<T> {
    name: &'static str,
    data: Vec<T>,
}

impl<T: Copy> HostTensor<T> {
    pub fn new(name: &'static str, data: Vec<T>) -> Self {
        Self { name, data }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn at(&self, index: usize) -> Result<T> {
        self.data.get(index).copied().ok_or(TunerError::IndexOutOfRange {
            tensor: self.name,
            index,
            len: self.data.len(),
        })
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Deref for HostTensor<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

/// The three inputs of one trial.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvolutionInputs {
    pub source: HostTensor<f32>,
    pub filters: HostTensor<f32>,
    pub index_map: HostTensor<i32>,
}

impl ConvolutionInputs {
    /// Source and filters in [-1, 1), filter selectors in [0, 10).
    pub fn generate(problem: &ProblemSize, generator: &DataGenerator) -> Self {
        Self {
            source: HostTensor::new("source", generator.fill(problem.source_len(), -1.0f32, 1.0)),
            filters: HostTensor::new("filter", generator.fill(problem.filter_len(), -1.0f32, 1.0)),
            index_map: HostTensor::new("map", generator.fill(problem.output_len(), 0i32, 10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn values_stay_in_range() {
        let g = DataGenerator::new(0);
        assert!(g.fill(10_000, -1.0f32, 1.0).iter().all(|v| (-1.0..1.0).contains(v)));
        assert!(g.fill(10_000, 0i32, 10).iter().all(|v| (0..10).contains(v)));
    }

    #[test]
    fn top_of_range_clamps_to_midpoint() {
        assert_eq!(scale(-1.0f32, 1.0, 1.0), 0.0);
        assert_eq!(scale(0i32, 10, 1.0), 5);
        // Exact in f64 but rounds up to the bound in f32.
        assert_eq!(scale(-1.0f32, 1.0, 1.0 - 1e-9), 0.0);
        assert_eq!(scale(-1.0f32, 1.0, 0.75), 0.5);
        assert_eq!(scale(0i32, 10, 0.95), 9);
        assert_eq!(scale(0i32, 10, 0.0), 0);
    }

    #[test]
    fn integer_selectors_cover_the_range() {
        let map = DataGenerator::new(0).fill(10_000, 0i32, 10);
        for k in 0..10 {
            assert!(map.contains(&k), "selector {k} never generated");
        }
    }

    #[test]
    fn inputs_match_problem_size() {
        let p = ProblemSize::new(32, 4).unwrap();
        let inputs = ConvolutionInputs::generate(&p, &DataGenerator::default());
        assert_eq!(inputs.source.len(), 38 * 10);
        assert_eq!(inputs.filters.len(), 490);
        assert_eq!(inputs.index_map.len(), 64);
    }

    #[test]
    fn checked_access_reports_index_and_bound() {
        let t = HostTensor::new("map", vec![1i32, 2, 3]);
        assert_eq!(t.at(2).unwrap(), 3);
        match t.at(3) {
            Err(TunerError::IndexOutOfRange { tensor, index, len }) => {
                assert_eq!((tensor, index, len), ("map", 3, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reseed_changes_sequence() {
        let mut g = DataGenerator::new(1);
        let a = g.fill(64, -1.0f32, 1.0);
        g.reseed(2);
        assert_ne!(a, g.fill(64, -1.0f32, 1.0));
    }

    proptest! {
        #[test]
        fn same_seed_same_bytes(seed in any::<u64>(), len in 0usize..512) {
            let a = DataGenerator::new(seed).fill(len, -1.0f32, 1.0);
            let b = DataGenerator::new(seed).fill(len, -1.0f32, 1.0);
            prop_assert_eq!(bytemuck::cast_slice::<f32, u8>(&a), bytemuck::cast_slice::<f32, u8>(&b));
        }

        #[test]
        fn shorter_fill_is_prefix(seed in any::<u64>(), len in 1usize..256) {
            let g = DataGenerator::new(seed);
            let long = g.fill(len * 2, 0i32, 10);
            let short = g.fill(len, 0i32, 10);
            prop_assert_eq!(&long[..len], short.as_slice());
        }
    }
}
