//! Time series with interpolation, transforms and distance measures.
//!
//! A [`TimeSeries`] is a sequence of `(time, value)` breakpoints plus an
//! [`InterpolationKind`] that defines the value between breakpoints. The
//! engine uses it both for logged signal traces (raw electrical samples,
//! later mapped to physical units) and for expected traces in tests.
//!
//! Distance between two series is measured in the L2 sense over an interval,
//! and [`assert_almost_everywhere_close`] turns that into the tolerance check
//! used by end-to-end tests: two traces are accepted when their distance is
//! at most `atol + rtol * norm(expected)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default relative tolerance for [`assert_almost_everywhere_close`].
pub const DEFAULT_RTOL: f64 = 1e-7;

/// Default absolute tolerance for [`assert_almost_everywhere_close`].
pub const DEFAULT_ATOL: f64 = 1e-7;

/// Errors from time-series construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    #[error("time and value counts differ: {times} times vs {values} values")]
    LengthMismatch { times: usize, values: usize },

    #[error("a time series needs at least one sample")]
    Empty,

    #[error("sample times must be strictly increasing (violated at index {index})")]
    NonMonotonicTime { index: usize },
}

/// How values between breakpoints are obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationKind {
    /// Hold the most recent breakpoint value (sample-and-hold). The default,
    /// matching how logged hardware signals behave between samples.
    #[default]
    Previous,
    /// Straight line between neighboring breakpoints.
    Linear,
    /// Value of the closest breakpoint; ties resolve to the earlier one.
    Nearest,
}

/// A piecewise-defined signal trace.
///
/// Outside the breakpoint span the series clamps to its first/last value, so
/// evaluation is total. Times are strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    time: Vec<f64>,
    values: Vec<f64>,
    kind: InterpolationKind,
}

impl TimeSeries {
    /// Creates a series from matching time/value breakpoints.
    pub fn new(
        time: Vec<f64>,
        values: Vec<f64>,
        kind: InterpolationKind,
    ) -> Result<Self, SeriesError> {
        if time.len() != values.len() {
            return Err(SeriesError::LengthMismatch {
                times: time.len(),
                values: values.len(),
            });
        }
        if time.is_empty() {
            return Err(SeriesError::Empty);
        }
        for (index, pair) in time.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(SeriesError::NonMonotonicTime { index: index + 1 });
            }
        }
        Ok(Self { time, values, kind })
    }

    /// Same breakpoints, reinterpreted with another interpolation kind.
    #[must_use]
    pub fn with_kind(mut self, kind: InterpolationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Breakpoint times, strictly increasing.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Breakpoint values, one per time.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Interpolation kind between breakpoints.
    pub fn kind(&self) -> InterpolationKind {
        self.kind
    }

    /// First breakpoint time.
    pub fn lower(&self) -> f64 {
        self.time[0]
    }

    /// Last breakpoint time.
    pub fn upper(&self) -> f64 {
        self.time[self.time.len() - 1]
    }

    /// Evaluates the series at `t`.
    ///
    /// Before the first breakpoint the first value is returned; after the
    /// last breakpoint the last value.
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.time.len();
        // Number of breakpoints with time <= t.
        let covered = self.time.partition_point(|&x| x <= t);
        if covered == 0 {
            return self.values[0];
        }
        let i = covered - 1;
        if i == n - 1 {
            return self.values[i];
        }
        match self.kind {
            InterpolationKind::Previous => self.values[i],
            InterpolationKind::Linear => {
                let t0 = self.time[i];
                let t1 = self.time[i + 1];
                let v0 = self.values[i];
                let v1 = self.values[i + 1];
                v0 + (t - t0) * (v1 - v0) / (t1 - t0)
            }
            InterpolationKind::Nearest => {
                if t - self.time[i] <= self.time[i + 1] - t {
                    self.values[i]
                } else {
                    self.values[i + 1]
                }
            }
        }
    }

    /// Returns a series with every value passed through `f`, times unchanged.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            time: self.time.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
            kind: self.kind,
        }
    }

    /// Shifts every breakpoint time by `offset`.
    pub fn shift(&mut self, offset: f64) {
        for t in &mut self.time {
            *t += offset;
        }
    }

    /// L2 norm of the series over `[lower, upper]`.
    pub fn l2_norm(&self, lower: f64, upper: f64) -> f64 {
        let mut grid = vec![lower, upper];
        self.knots(lower, upper, &mut grid);
        finish_grid(&mut grid);
        integrate_squared(|t| self.eval(t), &grid).sqrt()
    }

    /// Collects the points in `(lower, upper)` where this series may change
    /// slope or jump.
    fn knots(&self, lower: f64, upper: f64, out: &mut Vec<f64>) {
        for &t in &self.time {
            if t > lower && t < upper {
                out.push(t);
            }
        }
        if self.kind == InterpolationKind::Nearest {
            // Nearest-neighbor series switch value midway between breakpoints.
            for pair in self.time.windows(2) {
                let mid = 0.5 * (pair[0] + pair[1]);
                if mid > lower && mid < upper {
                    out.push(mid);
                }
            }
        }
    }
}

/// L2 distance between two series over `[lower, upper]`.
pub fn l2_distance(left: &TimeSeries, right: &TimeSeries, lower: f64, upper: f64) -> f64 {
    let mut grid = vec![lower, upper];
    left.knots(lower, upper, &mut grid);
    right.knots(lower, upper, &mut grid);
    finish_grid(&mut grid);
    integrate_squared(|t| left.eval(t) - right.eval(t), &grid).sqrt()
}

/// Returns true if `actual` is almost everywhere close to `expected` over
/// `[lower, upper]`: their L2 distance is at most
/// `atol + rtol * l2_norm(expected)`.
pub fn almost_everywhere_close(
    actual: &TimeSeries,
    expected: &TimeSeries,
    lower: f64,
    upper: f64,
    rtol: f64,
    atol: f64,
) -> bool {
    let distance = l2_distance(actual, expected, lower, upper);
    distance <= atol + rtol * expected.l2_norm(lower, upper)
}

/// Panics unless `actual` is almost everywhere close to `expected` over
/// `[lower, upper]`. Test helper.
pub fn assert_almost_everywhere_close(
    actual: &TimeSeries,
    expected: &TimeSeries,
    lower: f64,
    upper: f64,
    rtol: f64,
    atol: f64,
) {
    let distance = l2_distance(actual, expected, lower, upper);
    let tolerance = atol + rtol * expected.l2_norm(lower, upper);
    assert!(
        distance <= tolerance,
        "time series differ on [{lower}, {upper}]: L2 distance {distance} exceeds tolerance {tolerance}"
    );
}

fn finish_grid(grid: &mut Vec<f64>) {
    grid.sort_by(f64::total_cmp);
    grid.dedup();
}

/// Integrates `f(t)^2` over the grid with two-point Gauss-Legendre per
/// interval. Interior sampling never lands on a grid point, so jumps at the
/// grid nodes do not bias the result; exact for piecewise-linear `f`.
fn integrate_squared(f: impl Fn(f64) -> f64, grid: &[f64]) -> f64 {
    // 1 / (2 * sqrt(3))
    const OFFSET: f64 = 0.288_675_134_594_812_9;
    grid.windows(2)
        .map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            let h = b - a;
            let mid = 0.5 * (a + b);
            let x0 = mid - OFFSET * h;
            let x1 = mid + OFFSET * h;
            0.5 * h * (f(x0).powi(2) + f(x1).powi(2))
        })
        .sum()
}
