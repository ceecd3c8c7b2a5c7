//! Affine maps between physical and electrical value ranges.
//!
//! Targets declare signals in physical units ("flow in l/min, 0..100");
//! devices speak the electrical units of their ports ("DAC counts, 0..4095").
//! Commands translate physical values to electrical ones before dispatch and
//! the logging subsystem translates captured traces back.

use rigrun_proto::{Range, TimeSeries};

/// The map `x ↦ slope * x + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    slope: f64,
    offset: f64,
}

impl AffineMap {
    pub fn new(slope: f64, offset: f64) -> Self {
        Self { slope, offset }
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Applies the map to a single value.
    pub fn apply(&self, value: f64) -> f64 {
        self.slope * value + self.offset
    }

    /// Applies the map to every value of a series, times unchanged.
    pub fn apply_series(&self, series: &TimeSeries) -> TimeSeries {
        series.map_values(|v| self.apply(v))
    }

    /// The inverse map, unless the slope is zero.
    pub fn inverse(&self) -> Option<AffineMap> {
        if self.slope == 0.0 {
            return None;
        }
        Some(AffineMap::new(1.0 / self.slope, -self.offset / self.slope))
    }
}

/// Map taking `source.min..source.max` onto `target.min..target.max`:
///
/// ```text
/// value ↦ (value - source.min) * target.span / source.span + target.min
/// ```
///
/// Degenerate (zero-span) source ranges produce non-finite output; the
/// description validation upstream keeps those out of real testbeds.
pub fn affine_range_map(source: &Range, target: &Range) -> AffineMap {
    let slope = target.span() / source.span();
    AffineMap::new(slope, target.min() - source.min() * slope)
}

/// Scale-only variant of [`affine_range_map`] for slope, rate and amplitude
/// parameters, which transform without the offset.
pub fn linear_range_map(source: &Range, target: &Range) -> AffineMap {
    AffineMap::new(target.span() / source.span(), 0.0)
}
