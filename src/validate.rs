//! Host reference check of the device output.

use crate::data::{ConvolutionInputs, HostTensor};
use crate::error::{Result, TunerError};
use crate::problem::{ProblemSize, FILTER_SIDE, FILTER_TAPS};

/// Absolute tolerance used by the shipped tool.
pub const DEFAULT_TOLERANCE: f32 = 0.01;

/// Outcome of a passing check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of output elements compared.
    pub checked: usize,
}

/// Recomputes every output pixel with a direct nested-loop convolution
/// and compares it with the device result.
#[derive(Clone, Copy, Debug)]
pub struct Validator {
    problem: ProblemSize,
    tolerance: f32,
}

impl Validator {
    pub fn new(problem: ProblemSize, tolerance: f32) -> Self {
        Self { problem, tolerance }
    }

    /// Expected value of output pixel `(row, col)`.
    ///
    /// Output row `r` reads source rows `r..r + 7` starting at column
    /// `2 * col + r % 2`: odd rows are shifted by one source column.
    pub fn expected(&self, inputs: &ConvolutionInputs, row: usize, col: usize) -> Result<f32> {
        self.convolve(inputs, row, col).map(|(_, value)| value)
    }

    fn convolve(&self, inputs: &ConvolutionInputs, row: usize, col: usize) -> Result<(usize, f32)> {
        let pitch = self.problem.source_pitch();
        let selector = inputs.index_map.at(row * self.problem.output_width() + col)?;
        let filter_index = usize::try_from(selector).map_err(|_| TunerError::InvalidFilterIndex {
            row,
            col,
            index: selector,
        })?;
        let mut sum = 0.0f32;
        for frow in 0..FILTER_SIDE {
            for fcol in 0..FILTER_SIDE {
                let s = inputs.source.at((row + frow) * pitch + col * 2 + fcol + row % 2)?;
                let f = inputs.filters.at(filter_index * FILTER_TAPS + frow * FILTER_SIDE + fcol)?;
                sum += s * f;
            }
        }
        Ok((filter_index, sum))
    }

    /// Full host-side output image.
    pub fn reference(&self, inputs: &ConvolutionInputs) -> Result<Vec<f32>> {
        let width = self.problem.output_width();
        let mut out = Vec::with_capacity(self.problem.output_len());
        for row in 0..self.problem.height() as usize {
            for col in 0..width {
                out.push(self.expected(inputs, row, col)?);
            }
        }
        Ok(out)
    }

    /// Compare `output` with the host result, stopping at the first
    /// element further than the tolerance from its expectation.  A NaN
    /// on either side counts as a mismatch.
    pub fn check(&self, inputs: &ConvolutionInputs, output: &HostTensor<f32>) -> Result<ValidationReport> {
        let width = self.problem.output_width();
        let mut checked = 0;
        for row in 0..self.problem.height() as usize {
            for col in 0..width {
                let (filter_index, expected) = self.convolve(inputs, row, col)?;
                let actual = output.at(row * width + col)?;
                if !((actual - expected).abs() <= self.tolerance) {
                    return Err(TunerError::Mismatch {
                        row,
                        col,
                        filter_index,
                        expected,
                        actual,
                    });
                }
                checked += 1;
            }
        }
        log::info!("Result check pass.");
        Ok(ValidationReport { checked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataGenerator;

    fn small() -> (ProblemSize, ConvolutionInputs) {
        let problem = ProblemSize::new(16, 6).unwrap();
        let inputs = ConvolutionInputs::generate(&problem, &DataGenerator::new(0));
        (problem, inputs)
    }

    #[test]
    fn reference_output_passes() {
        let (problem, inputs) = small();
        let v = Validator::new(problem, DEFAULT_TOLERANCE);
        let out = HostTensor::new("output", v.reference(&inputs).unwrap());
        assert_eq!(v.check(&inputs, &out).unwrap().checked, problem.output_len());
    }

    #[test]
    fn odd_rows_are_shifted_one_column() {
        let problem = ProblemSize::new(16, 2).unwrap();
        let pitch = problem.source_pitch();
        // Identity-like filter: only the top-left tap is set.
        let mut filters = vec![0.0f32; problem.filter_len()];
        filters[0] = 1.0;
        let source: Vec<f32> = (0..problem.source_len()).map(|i| i as f32).collect();
        let inputs = ConvolutionInputs {
            source: HostTensor::new("source", source),
            filters: HostTensor::new("filter", filters),
            index_map: HostTensor::new("map", vec![0; problem.output_len()]),
        };
        let v = Validator::new(problem, DEFAULT_TOLERANCE);
        assert_eq!(v.expected(&inputs, 0, 3).unwrap(), 6.0);
        assert_eq!(v.expected(&inputs, 1, 3).unwrap(), (pitch + 7) as f32);
    }

    #[test]
    fn first_mismatch_is_reported() {
        let (problem, inputs) = small();
        let v = Validator::new(problem, DEFAULT_TOLERANCE);
        let mut out = HostTensor::new("output", v.reference(&inputs).unwrap());
        let (row, col) = (3, 5);
        let idx = row * problem.output_width() + col;
        let truth = out[idx];
        out.as_mut_slice()[idx] = truth + 1.0;
        out.as_mut_slice()[idx + 1] += 1.0;
        match v.check(&inputs, &out) {
            Err(TunerError::Mismatch {
                row: r,
                col: c,
                filter_index,
                expected,
                actual,
            }) => {
                assert_eq!((r, c), (row, col));
                assert_eq!(filter_index, inputs.index_map[idx] as usize);
                assert_eq!(expected, truth);
                assert_eq!(actual, truth + 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn within_tolerance_passes_and_nan_fails() {
        let (problem, inputs) = small();
        let v = Validator::new(problem, DEFAULT_TOLERANCE);
        let mut out = HostTensor::new("output", v.reference(&inputs).unwrap());
        out.as_mut_slice()[0] += 0.005;
        assert!(v.check(&inputs, &out).is_ok());
        out.as_mut_slice()[0] = f32::NAN;
        assert!(matches!(v.check(&inputs, &out), Err(TunerError::Mismatch { row: 0, col: 0, .. })));
    }

    #[test]
    fn short_output_is_an_index_error() {
        let (problem, inputs) = small();
        let v = Validator::new(problem, DEFAULT_TOLERANCE);
        let mut full = v.reference(&inputs).unwrap();
        full.truncate(problem.output_len() - 1);
        let out = HostTensor::new("output", full);
        assert!(matches!(
            v.check(&inputs, &out),
            Err(TunerError::IndexOutOfRange { tensor: "output", .. })
        ));
    }

    #[test]
    fn negative_selector_is_rejected() {
        let (problem, mut inputs) = small();
        inputs.index_map.as_mut_slice()[2] = -1;
        let v = Validator::new(problem, DEFAULT_TOLERANCE);
        assert!(matches!(
            v.reference(&inputs),
            Err(TunerError::InvalidFilterIndex { row: 0, col: 2, index: -1 })
        ));
    }
}
