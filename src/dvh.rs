use crate::types::{Quantity, StructureKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Dose bin width of histograms produced by the dosimetry collaborator.
pub const DEFAULT_BIN_WIDTH_GY: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DvhQueryError {
    #[error("dvh for {key} is unavailable: {message}")]
    Unavailable { key: StructureKey, message: String },
    #[error("dvh histogram is empty")]
    EmptyHistogram,
    #[error("invalid query argument {0}")]
    InvalidArgument(f64),
    #[error("{requested} cc exceeds structure volume {available} cc")]
    VolumeOutOfRange { requested: f64, available: f64 },
}

/// Cumulative dose-volume histogram of one structure. Volumes are in cc and
/// doses in Gy.
pub trait Dvh: fmt::Debug {
    fn volume(&self) -> f64;
    fn min(&self) -> f64;
    fn mean(&self) -> f64;
    fn max(&self) -> f64;
    /// Cumulative volume (cc) receiving at least `i * bin_width()` Gy.
    fn counts(&self) -> &[f64];

    fn bin_width(&self) -> f64 {
        DEFAULT_BIN_WIDTH_GY
    }

    /// Dose received by the hottest `volume_cc` of the structure.
    fn dose_constraint(&self, volume_cc: f64) -> Result<Quantity, DvhQueryError>;

    /// Volume receiving at least `dose_gy`.
    fn volume_constraint(&self, dose_gy: f64) -> Result<Quantity, DvhQueryError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeDvh {
    counts: Vec<f64>,
    bin_width: f64,
    min: f64,
    mean: f64,
    max: f64,
}

impl CumulativeDvh {
    pub fn new(counts: Vec<f64>) -> Self {
        Self::with_bin_width(counts, DEFAULT_BIN_WIDTH_GY)
    }

    pub fn with_bin_width(counts: Vec<f64>, bin_width: f64) -> Self {
        let bin_width = if bin_width.is_finite() && bin_width > 0.0 {
            bin_width
        } else {
            DEFAULT_BIN_WIDTH_GY
        };
        let (min, mean, max) = statistics(&counts, bin_width);
        Self {
            counts,
            bin_width,
            min,
            mean,
            max,
        }
    }
}

// Statistics come from the differential histogram: the volume of bin i is
// counts[i] - counts[i + 1], centred at (i + 0.5) * width.
fn statistics(counts: &[f64], width: f64) -> (f64, f64, f64) {
    let total = counts.first().copied().unwrap_or(0.0);
    if total <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let mut first = None;
    let mut last = 0;
    let mut weighted = 0.0;
    for (i, current) in counts.iter().enumerate() {
        let next = counts.get(i + 1).copied().unwrap_or(0.0);
        let diff = current - next;
        if diff > 0.0 {
            first.get_or_insert(i);
            last = i;
            weighted += diff * (i as f64 + 0.5) * width;
        }
    }
    let min = first.unwrap_or(0) as f64 * width;
    let max = (last + 1) as f64 * width;
    (min, weighted / total, max)
}

impl Dvh for CumulativeDvh {
    fn volume(&self) -> f64 {
        self.counts.first().copied().unwrap_or(0.0)
    }

    fn min(&self) -> f64 {
        self.min
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn max(&self) -> f64 {
        self.max
    }

    fn counts(&self) -> &[f64] {
        &self.counts
    }

    fn bin_width(&self) -> f64 {
        self.bin_width
    }

    fn dose_constraint(&self, volume_cc: f64) -> Result<Quantity, DvhQueryError> {
        if self.counts.is_empty() {
            return Err(DvhQueryError::EmptyHistogram);
        }
        if !volume_cc.is_finite() || volume_cc < 0.0 {
            return Err(DvhQueryError::InvalidArgument(volume_cc));
        }
        let available = self.volume();
        if volume_cc > available {
            return Err(DvhQueryError::VolumeOutOfRange {
                requested: volume_cc,
                available,
            });
        }
        let bin = self
            .counts
            .iter()
            .rposition(|&v| v >= volume_cc)
            .unwrap_or(0);
        Ok(Quantity::gy(bin as f64 * self.bin_width))
    }

    fn volume_constraint(&self, dose_gy: f64) -> Result<Quantity, DvhQueryError> {
        if self.counts.is_empty() {
            return Err(DvhQueryError::EmptyHistogram);
        }
        if !dose_gy.is_finite() || dose_gy < 0.0 {
            return Err(DvhQueryError::InvalidArgument(dose_gy));
        }
        let bin = (dose_gy / self.bin_width + 1e-9).floor() as usize;
        Ok(Quantity::cc(self.counts.get(bin).copied().unwrap_or(0.0)))
    }
}

/// DVH normalized to the structure volume, ready for plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvhCurve {
    pub roi_name: String,
    pub roi_key: StructureKey,
    pub dose_gy: Vec<f64>,
    pub relative_volume: Vec<f64>,
}

impl DvhCurve {
    pub fn from_dvh(roi_name: impl Into<String>, roi_key: StructureKey, dvh: &dyn Dvh) -> Self {
        let counts = dvh.counts();
        let total = counts.first().copied().unwrap_or(0.0);
        let mut relative_volume: Vec<f64> = if total > 0.0 {
            counts.iter().map(|c| c / total).collect()
        } else {
            vec![0.0; counts.len()]
        };
        if relative_volume.last().map_or(false, |v| *v != 0.0) {
            relative_volume.push(0.0);
        }
        let dose_gy = (0..relative_volume.len())
            .map(|i| i as f64 * dvh.bin_width())
            .collect();
        Self {
            roi_name: roi_name.into(),
            roi_key,
            dose_gy,
            relative_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Unit;

    // 10 cc uniformly covering 0-2 Gy, then 4 cc up to 3 Gy, with 1 Gy bins.
    fn coarse() -> CumulativeDvh {
        CumulativeDvh::with_bin_width(vec![10.0, 10.0, 4.0], 1.0)
    }

    #[test]
    fn statistics_follow_differential_histogram() {
        let dvh = coarse();
        assert_eq!(dvh.volume(), 10.0);
        assert_eq!(dvh.min(), 1.0);
        assert_eq!(dvh.max(), 3.0);
        // 6 cc centred at 1.5 Gy, 4 cc centred at 2.5 Gy
        assert!((dvh.mean() - 1.9).abs() < 1e-12);
    }

    #[test]
    fn volume_constraint_reads_cumulative_bin() {
        let dvh = coarse();
        assert_eq!(dvh.volume_constraint(1.5).unwrap(), Quantity::cc(10.0));
        assert_eq!(dvh.volume_constraint(2.0).unwrap(), Quantity::cc(4.0));
        assert_eq!(dvh.volume_constraint(40.0).unwrap(), Quantity::cc(0.0));
        assert!(matches!(
            dvh.volume_constraint(-1.0),
            Err(DvhQueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn volume_constraint_hits_exact_fine_bins() {
        let mut counts = vec![5.0; 2000];
        counts.push(1.0);
        let dvh = CumulativeDvh::new(counts);
        assert_eq!(dvh.volume_constraint(20.0).unwrap().value, 1.0);
        assert_eq!(dvh.volume_constraint(19.99).unwrap().value, 5.0);
    }

    #[test]
    fn dose_constraint_returns_dose_to_hottest_volume() {
        let dvh = coarse();
        let dose = dvh.dose_constraint(4.0).unwrap();
        assert_eq!(dose.unit, Unit::Gy);
        assert_eq!(dose.value, 2.0);
        assert_eq!(dvh.dose_constraint(5.0).unwrap().value, 1.0);
        assert!(matches!(
            dvh.dose_constraint(11.0),
            Err(DvhQueryError::VolumeOutOfRange { .. })
        ));
    }

    #[test]
    fn empty_histogram_queries_fail() {
        let dvh = CumulativeDvh::new(Vec::new());
        assert_eq!(dvh.volume(), 0.0);
        assert_eq!(dvh.volume_constraint(1.0), Err(DvhQueryError::EmptyHistogram));
        assert_eq!(dvh.dose_constraint(1.0), Err(DvhQueryError::EmptyHistogram));
    }

    #[test]
    fn curve_is_normalized_and_terminated() {
        let dvh = coarse();
        let curve = DvhCurve::from_dvh("Heart", StructureKey::new("3"), &dvh);
        assert_eq!(curve.relative_volume, vec![1.0, 1.0, 0.4, 0.0]);
        assert_eq!(curve.dose_gy, vec![0.0, 1.0, 2.0, 3.0]);

        let empty = CumulativeDvh::new(vec![0.0, 0.0]);
        let curve = DvhCurve::from_dvh("Ghost", StructureKey::new("9"), &empty);
        assert_eq!(curve.relative_volume, vec![0.0, 0.0]);
    }
}
