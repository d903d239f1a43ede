//! Numerical gradient checking with central differences
//!
//! Compares an analytic gradient against `(f(x + h) - f(x - h)) / 2h` at
//! every coordinate of the evaluation point, in row-major order, and stops
//! at the first coordinate whose relative error exceeds the tolerance.
use std::fmt;

use candle_core::{DType, Tensor};

use crate::{Result, TaggerError};

/// Default finite-difference step
pub const DEFAULT_STEP: f64 = 1e-4;

/// Default relative-error tolerance
pub const DEFAULT_TOLERANCE: f64 = 1e-5;

/// First coordinate where analytic and numeric gradients disagree
#[derive(Debug, Clone, PartialEq)]
pub struct GradientMismatch {
    /// Multi-index of the failing coordinate (empty for a scalar point)
    pub index: Vec<usize>,
    /// Gradient value returned by the function under test
    pub analytic: f64,
    /// Central-difference estimate
    pub numeric: f64,
    /// `|numeric - analytic| / max(1, |numeric|, |analytic|)`
    pub relative_error: f64,
}

impl fmt::Display for GradientMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "First gradient error found at index {:?}: your gradient {:.6}, numerical gradient {:.6}",
            self.index, self.analytic, self.numeric
        )
    }
}

/// Result of checking one evaluation point
#[derive(Debug, Clone, PartialEq)]
pub enum GradCheckOutcome {
    /// Every coordinate matched
    Passed { coordinates: usize },
    /// Checking stopped at the first mismatch
    Failed(GradientMismatch),
}

impl GradCheckOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, GradCheckOutcome::Passed { .. })
    }

    pub fn mismatch(&self) -> Option<&GradientMismatch> {
        match self {
            GradCheckOutcome::Failed(mismatch) => Some(mismatch),
            GradCheckOutcome::Passed { .. } => None,
        }
    }
}

impl fmt::Display for GradCheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradCheckOutcome::Passed { .. } => write!(f, "Gradient check passed!"),
            GradCheckOutcome::Failed(mismatch) => write!(f, "Gradient check failed. {}", mismatch),
        }
    }
}

/// Relative error with an absolute floor of 1 in the denominator
///
/// NaN whenever either value is NaN, or both are infinite.
pub fn relative_error(numeric: f64, analytic: f64) -> f64 {
    let scale = 1f64.max(numeric.abs()).max(analytic.abs());
    (numeric - analytic).abs() / scale
}

/// Row-major multi-index of a flat offset
fn unravel_index(mut flat: usize, dims: &[usize]) -> Vec<usize> {
    let mut index = vec![0; dims.len()];
    for (axis, &dim) in dims.iter().enumerate().rev() {
        index[axis] = flat % dim;
        flat /= dim;
    }
    index
}

/// Central-difference gradient checker
///
/// Stateless between calls; the step and tolerance are fixed at
/// construction.
#[derive(Debug, Clone, Copy)]
pub struct GradientChecker {
    step: f64,
    tolerance: f64,
}

impl Default for GradientChecker {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl GradientChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Check the gradient of `f` at `x`
    ///
    /// `f` returns the scalar value and the analytic gradient, which must
    /// have the shape of its input. Perturbed points are passed to `f` with
    /// `x`'s dtype and device; `x` itself is left untouched. Only F64 points
    /// carry enough precision to meet the default tolerance.
    ///
    /// A coordinate whose comparison is not finite (NaN loss, NaN or
    /// infinite gradient) counts as a mismatch.
    ///
    /// # Errors
    /// `Config` if the step is not finite and positive or the tolerance is
    /// not finite and non-negative. `ShapeMismatch` if the analytic
    /// gradient's shape differs from `x`'s, plus anything `f` itself returns.
    pub fn check<F>(&self, mut f: F, x: &Tensor) -> Result<GradCheckOutcome>
    where
        F: FnMut(&Tensor) -> Result<(f64, Tensor)>,
    {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(TaggerError::Config(format!(
                "gradient check step must be finite and > 0, got {}",
                self.step
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(TaggerError::Config(format!(
                "gradient check tolerance must be finite and >= 0, got {}",
                self.tolerance
            )));
        }
        if x.dtype() != DType::F64 {
            log::warn!(
                "Checking gradients at a {:?} point; central differences need F64 to be reliable",
                x.dtype()
            );
        }

        let (_fx, grad) = f(x)?;
        if grad.dims() != x.dims() {
            return Err(TaggerError::ShapeMismatch {
                expected: x.dims().to_vec(),
                actual: grad.dims().to_vec(),
            });
        }

        let point = x.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
        let grad = grad.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;

        for flat in 0..point.len() {
            let fx_plus = self.evaluate_perturbed(&mut f, x, &point, flat, self.step)?;
            let fx_minus = self.evaluate_perturbed(&mut f, x, &point, flat, -self.step)?;
            let numeric = (fx_plus - fx_minus) / (2.0 * self.step);

            let reldiff = relative_error(numeric, grad[flat]);
            if !(reldiff <= self.tolerance) {
                let mismatch = GradientMismatch {
                    index: unravel_index(flat, x.dims()),
                    analytic: grad[flat],
                    numeric,
                    relative_error: reldiff,
                };
                log::warn!("Gradient check failed.");
                log::warn!("First gradient error found at index {:?}", mismatch.index);
                log::warn!(
                    "Your gradient: {:.6} \t Numerical gradient: {:.6}",
                    mismatch.analytic,
                    mismatch.numeric
                );
                return Ok(GradCheckOutcome::Failed(mismatch));
            }
        }

        log::info!("Gradient check passed!");
        Ok(GradCheckOutcome::Passed {
            coordinates: point.len(),
        })
    }

    fn evaluate_perturbed<F>(
        &self,
        f: &mut F,
        x: &Tensor,
        point: &[f64],
        flat: usize,
        delta: f64,
    ) -> Result<f64>
    where
        F: FnMut(&Tensor) -> Result<(f64, Tensor)>,
    {
        let mut values = point.to_vec();
        values[flat] += delta;
        let perturbed = Tensor::from_vec(values, x.shape().clone(), x.device())?.to_dtype(x.dtype())?;
        let (value, _) = f(&perturbed)?;
        Ok(value)
    }
}

/// Check `f` at `x` with the default step and tolerance
pub fn gradient_check<F>(f: F, x: &Tensor) -> Result<bool>
where
    F: FnMut(&Tensor) -> Result<(f64, Tensor)>,
{
    Ok(GradientChecker::default().check(f, x)?.passed())
}

/// Runs several named checks, continuing past failing ones
#[derive(Debug, Default)]
pub struct GradCheckSuite {
    checker: GradientChecker,
    outcomes: Vec<(String, GradCheckOutcome)>,
}

impl GradCheckSuite {
    pub fn new(checker: GradientChecker) -> Self {
        Self {
            checker,
            outcomes: Vec::new(),
        }
    }

    /// Check one parameter and record the outcome
    ///
    /// Gradient mismatches are recorded; shape mismatches and errors from
    /// `f` are returned.
    pub fn check<F>(&mut self, name: &str, f: F, x: &Tensor) -> Result<&GradCheckOutcome>
    where
        F: FnMut(&Tensor) -> Result<(f64, Tensor)>,
    {
        log::info!("Checking gradient of {}", name);
        let outcome = self.checker.check(f, x)?;
        self.outcomes.push((name.to_string(), outcome));
        Ok(&self.outcomes[self.outcomes.len() - 1].1)
    }

    pub fn outcomes(&self) -> &[(String, GradCheckOutcome)] {
        &self.outcomes
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.passed())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &GradientMismatch)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.mismatch().map(|m| (name.as_str(), m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn quad(x: &Tensor) -> Result<(f64, Tensor)> {
        let value = x.sqr()?.sum_all()?.to_scalar::<f64>()?;
        Ok((value, (x * 2.0)?))
    }

    fn quad_wrong_grad(x: &Tensor) -> Result<(f64, Tensor)> {
        let value = x.sqr()?.sum_all()?.to_scalar::<f64>()?;
        Ok((value, x.clone()))
    }

    #[test]
    fn test_quadratic_passes_for_scalar() -> Result<()> {
        let x = Tensor::new(123.456f64, &Device::Cpu)?;
        assert!(gradient_check(quad, &x)?);
        Ok(())
    }

    #[test]
    fn test_quadratic_passes_for_vector_and_matrix() -> Result<()> {
        let device = Device::Cpu;
        let v = Tensor::randn(0f64, 1f64, 3, &device)?;
        let m = Tensor::randn(0f64, 1f64, (4, 5), &device)?;
        let t = Tensor::randn(0f64, 1f64, (2, 3, 2), &device)?;

        assert!(gradient_check(quad, &v)?);
        assert!(gradient_check(quad, &m)?);
        let outcome = GradientChecker::new().check(quad, &t)?;
        assert_eq!(outcome, GradCheckOutcome::Passed { coordinates: 12 });
        Ok(())
    }

    #[test]
    fn test_wrong_gradient_reports_first_index() -> Result<()> {
        // Coordinate (0, 0) is zero so both gradients agree there;
        // (0, 1) is the first real disagreement.
        let x = Tensor::new(&[[0f64, 1.5, -2.0], [0.5, 3.0, 1.0]], &Device::Cpu)?;
        let outcome = GradientChecker::new().check(quad_wrong_grad, &x)?;

        let mismatch = outcome.mismatch().expect("check should fail");
        assert_eq!(mismatch.index, vec![0, 1]);
        assert!((mismatch.analytic - 1.5).abs() < 1e-12);
        assert!((mismatch.numeric - 3.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_input_not_mutated() -> Result<()> {
        let x = Tensor::randn(0f64, 1f64, (3, 4), &Device::Cpu)?;
        let before = x.flatten_all()?.to_vec1::<f64>()?;

        GradientChecker::new().check(quad_wrong_grad, &x)?;
        GradientChecker::new().check(quad, &x)?;

        let after = x.flatten_all()?.to_vec1::<f64>()?;
        let before_bits: Vec<u64> = before.iter().map(|v| v.to_bits()).collect();
        let after_bits: Vec<u64> = after.iter().map(|v| v.to_bits()).collect();
        assert_eq!(before_bits, after_bits);
        Ok(())
    }

    #[test]
    fn test_zero_gradients_pass() -> Result<()> {
        assert_eq!(relative_error(0.0, 0.0), 0.0);

        let x = Tensor::randn(0f64, 1f64, 5, &Device::Cpu)?;
        let constant = |x: &Tensor| -> Result<(f64, Tensor)> { Ok((7.0, x.zeros_like()?)) };
        assert!(gradient_check(constant, &x)?);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_is_rejected() -> Result<()> {
        let x = Tensor::randn(0f64, 1f64, (2, 3), &Device::Cpu)?;
        let flat_grad = |x: &Tensor| -> Result<(f64, Tensor)> {
            Ok((x.sum_all()?.to_scalar::<f64>()?, x.ones_like()?.flatten_all()?))
        };

        match GradientChecker::new().check(flat_grad, &x) {
            Err(TaggerError::ShapeMismatch { expected, actual }) => {
                assert_eq!(expected, vec![2, 3]);
                assert_eq!(actual, vec![6]);
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_tanh_derivative() -> Result<()> {
        let x = Tensor::randn(0f64, 1f64, (4, 5), &Device::Cpu)?;
        let tanh_f = |x: &Tensor| -> Result<(f64, Tensor)> {
            let value = x.tanh()?.sum_all()?.to_scalar::<f64>()?;
            let grad = (x.tanh()?.sqr()?.neg()? + 1.0)?;
            Ok((value, grad))
        };
        assert!(gradient_check(tanh_f, &x)?);
        Ok(())
    }

    #[test]
    fn test_suite_continues_past_failures() -> Result<()> {
        let device = Device::Cpu;
        let a = Tensor::new(&[1f64, 2.0], &device)?;
        let b = Tensor::new(&[3f64, -1.0], &device)?;

        let mut suite = GradCheckSuite::new(GradientChecker::default());
        suite.check("a", quad_wrong_grad, &a)?;
        suite.check("b", quad, &b)?;

        assert_eq!(suite.outcomes().len(), 2);
        assert!(!suite.all_passed());
        let failures: Vec<_> = suite.failures().map(|(name, _)| name).collect();
        assert_eq!(failures, vec!["a"]);
        Ok(())
    }

    #[test]
    fn test_nan_gradient_fails() -> Result<()> {
        let x = Tensor::new(&[1f64, 2.0], &Device::Cpu)?;
        let nan_grad = |x: &Tensor| -> Result<(f64, Tensor)> {
            let value = x.sqr()?.sum_all()?.to_scalar::<f64>()?;
            Ok((value, (x.zeros_like()? + f64::NAN)?))
        };

        let outcome = GradientChecker::new().check(nan_grad, &x)?;
        let mismatch = outcome.mismatch().expect("NaN gradient must fail");
        assert_eq!(mismatch.index, vec![0]);
        assert!(mismatch.analytic.is_nan());
        Ok(())
    }

    #[test]
    fn test_nan_loss_fails() -> Result<()> {
        let x = Tensor::new(&[1f64, 2.0], &Device::Cpu)?;
        let nan_loss = |x: &Tensor| -> Result<(f64, Tensor)> { Ok((f64::NAN, (x * 2.0)?)) };

        assert!(!gradient_check(nan_loss, &x)?);
        Ok(())
    }

    #[test]
    fn test_invalid_step_and_tolerance_rejected() -> Result<()> {
        let x = Tensor::new(&[1f64, 2.0], &Device::Cpu)?;
        let linear = |x: &Tensor| -> Result<(f64, Tensor)> {
            Ok((x.sum_all()?.to_scalar::<f64>()?, x.clone()))
        };

        for checker in [
            GradientChecker::new().with_step(0.0),
            GradientChecker::new().with_step(-1e-4),
            GradientChecker::new().with_step(f64::NAN),
            GradientChecker::new().with_tolerance(-1.0),
            GradientChecker::new().with_tolerance(f64::NAN),
        ] {
            assert!(matches!(checker.check(linear, &x), Err(TaggerError::Config(_))));
        }
        Ok(())
    }

    #[test]
    fn test_f32_point_keeps_dtype() -> Result<()> {
        let x = Tensor::new(&[0.5f32, -1.5, 2.0], &Device::Cpu)?;
        let quad_f32 = |x: &Tensor| -> Result<(f64, Tensor)> {
            assert_eq!(x.dtype(), DType::F32);
            let value = x.to_dtype(DType::F64)?.sqr()?.sum_all()?.to_scalar::<f64>()?;
            Ok((value, (x * 2.0)?))
        };

        // F32 rounding of the perturbed points needs a coarser step and tolerance
        let checker = GradientChecker::new().with_step(1e-2).with_tolerance(1e-3);
        assert!(checker.check(quad_f32, &x)?.passed());
        Ok(())
    }

    #[test]
    fn test_unravel_index() {
        assert_eq!(unravel_index(0, &[]), Vec::<usize>::new());
        assert_eq!(unravel_index(7, &[4, 5]), vec![1, 2]);
        assert_eq!(unravel_index(11, &[2, 3, 2]), vec![1, 2, 1]);
    }
}
