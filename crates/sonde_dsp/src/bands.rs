//! Band Splitting
//!
//! Partitions an amplitude spectrum into contiguous frequency bands and
//! tracks a smoothed power per band.
//!
//! Logarithmic spacing grows each band by `LOG_BASE` relative to the one
//! below it, so low bands stay narrow where pitch resolution matters:
//!
//! ```text
//! edge[i] = low + (high - low) * (LOG_BASE^i - 1) / (LOG_BASE^N - 1)
//! ```

use std::ops::Range;

use crate::error::DspError;

/// Width ratio between neighbouring logarithmic bands
pub const LOG_BASE: f32 = 1.2;

/// Time constant of the band power smoothing filter, in seconds
pub const SMOOTHING_TIME: f32 = 0.05;

/// How band edges are distributed between the low and high frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandSpacing {
    Linear,
    Logarithmic,
}

impl BandSpacing {
    pub const ALL: [BandSpacing; 2] = [BandSpacing::Linear, BandSpacing::Logarithmic];

    pub fn name(self) -> &'static str {
        match self {
            BandSpacing::Linear => "Linear",
            BandSpacing::Logarithmic => "Logarithmic",
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Compute the `bands + 1` edge frequencies between `low` and `high`
///
/// The first and last edges are exactly `low` and `high`; the sequence is
/// strictly increasing.
pub fn band_edges(low: f32, high: f32, bands: usize, spacing: BandSpacing) -> Result<Vec<f32>, DspError> {
    if bands == 0 || !low.is_finite() || !high.is_finite() || low < 0.0 || high <= low {
        return Err(DspError::InvalidBandLayout { low, high, bands });
    }

    let span = high - low;
    let mut edges: Vec<f32> = match spacing {
        BandSpacing::Linear => (0..=bands).map(|i| low + span * i as f32 / bands as f32).collect(),
        BandSpacing::Logarithmic => {
            let total = LOG_BASE.powi(bands as i32) - 1.0;
            (0..=bands)
                .map(|i| low + span * (LOG_BASE.powi(i as i32) - 1.0) / total)
                .collect()
        }
    };
    // Rounding must not move the outer edges
    edges[0] = low;
    edges[bands] = high;

    if edges.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(DspError::InvalidBandLayout { low, high, bands });
    }
    Ok(edges)
}

/// Smoothed per-band power over an amplitude spectrum
#[derive(Debug, Clone)]
pub struct BandPowers {
    edges: Vec<f32>,
    bins: Vec<Range<usize>>,
    raw: Vec<f32>,
    smoothed: Vec<f32>,
    /// Cached smoothing coefficient for the last update interval
    alpha: Option<(f32, f32)>,
}

impl BandPowers {
    /// Map band edges onto the bins of a spectrum with `bin_count` bins
    /// spaced `bin_hz` apart
    pub fn new(edges: Vec<f32>, bin_hz: f32, bin_count: usize) -> Result<Self, DspError> {
        if edges.len() < 2 || !(bin_hz > 0.0) {
            return Err(DspError::InvalidBandLayout {
                low: edges.first().copied().unwrap_or(0.0),
                high: edges.last().copied().unwrap_or(0.0),
                bands: edges.len().saturating_sub(1),
            });
        }

        let band_count = edges.len() - 1;
        let bins = (0..band_count)
            .map(|band| {
                let start = ((edges[band] / bin_hz).ceil() as usize).min(bin_count);
                let end = if band + 1 == band_count {
                    // The top band includes a bin sitting exactly on `high`
                    ((edges[band + 1] / bin_hz).floor() as usize + 1).min(bin_count)
                } else {
                    ((edges[band + 1] / bin_hz).ceil() as usize).min(bin_count)
                };
                start..end.max(start)
            })
            .collect();

        Ok(Self {
            edges,
            bins,
            raw: vec![0.0; band_count],
            smoothed: vec![0.0; band_count],
            alpha: None,
        })
    }

    pub fn band_count(&self) -> usize {
        self.raw.len()
    }

    pub fn edges(&self) -> &[f32] {
        &self.edges
    }

    /// Arithmetic centre frequency of every band
    pub fn centers(&self) -> Vec<f32> {
        self.edges.windows(2).map(|pair| (pair[0] + pair[1]) * 0.5).collect()
    }

    /// Spectrum bins that fall inside a band
    pub fn bins(&self, band: usize) -> Option<Range<usize>> {
        self.bins.get(band).cloned()
    }

    /// Smoothed power of a band
    pub fn power(&self, band: usize) -> Option<f32> {
        self.smoothed.get(band).copied()
    }

    /// Unsmoothed power of a band from the last update
    pub fn raw_power(&self, band: usize) -> Option<f32> {
        self.raw.get(band).copied()
    }

    pub fn powers(&self) -> &[f32] {
        &self.smoothed
    }

    /// Accumulate band power from `magnitudes` and advance the smoothing
    /// filter by `interval` seconds
    pub fn update(&mut self, magnitudes: &[f32], interval: f32) {
        let alpha = match self.alpha {
            Some((cached_interval, alpha)) if cached_interval == interval => alpha,
            _ => {
                let alpha = 1.0 - (-interval.max(0.0) / SMOOTHING_TIME).exp();
                self.alpha = Some((interval, alpha));
                alpha
            }
        };

        for (band, range) in self.bins.iter().enumerate() {
            let end = range.end.min(magnitudes.len());
            let start = range.start.min(end);
            let power: f32 = magnitudes[start..end].iter().map(|m| m * m).sum();
            self.raw[band] = power;
            self.smoothed[band] += (power - self.smoothed[band]) * alpha;
        }
    }

    /// Zero every band
    pub fn reset(&mut self) {
        self.raw.iter_mut().for_each(|p| *p = 0.0);
        self.smoothed.iter_mut().for_each(|p| *p = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_edges_cover_range_exactly() {
        for bands in [1, 2, 10, 31] {
            let edges = band_edges(80.0, 10000.0, bands, BandSpacing::Logarithmic).unwrap();
            assert_eq!(edges.len(), bands + 1);
            assert_eq!(edges[0], 80.0);
            assert_eq!(edges[bands], 10000.0);
            assert!(edges.windows(2).all(|p| p[1] > p[0]), "edges must increase: {:?}", edges);
        }
    }

    #[test]
    fn test_log_bands_grow_by_base() {
        let edges = band_edges(80.0, 10000.0, 10, BandSpacing::Logarithmic).unwrap();
        let widths: Vec<f32> = edges.windows(2).map(|p| p[1] - p[0]).collect();
        for pair in widths.windows(2) {
            assert!((pair[1] / pair[0] - LOG_BASE).abs() < 1e-3);
        }
    }

    #[test]
    fn test_linear_edges() {
        let edges = band_edges(0.0, 1000.0, 4, BandSpacing::Linear).unwrap();
        assert_eq!(edges, vec![0.0, 250.0, 500.0, 750.0, 1000.0]);
    }

    #[test]
    fn test_invalid_layouts() {
        assert!(band_edges(100.0, 100.0, 4, BandSpacing::Linear).is_err());
        assert!(band_edges(100.0, 50.0, 4, BandSpacing::Logarithmic).is_err());
        assert!(band_edges(100.0, 500.0, 0, BandSpacing::Linear).is_err());
        assert!(band_edges(-1.0, 500.0, 2, BandSpacing::Linear).is_err());
    }

    #[test]
    fn test_bins_partition_spectrum() {
        let edges = band_edges(0.0, 1000.0, 4, BandSpacing::Linear).unwrap();
        let powers = BandPowers::new(edges, 10.0, 101).unwrap();
        assert_eq!(powers.bins(0), Some(0..25));
        assert_eq!(powers.bins(1), Some(25..50));
        assert_eq!(powers.bins(3), Some(75..101));
        assert_eq!(powers.bins(4), None);
    }

    #[test]
    fn test_smoothing_converges() {
        let edges = band_edges(0.0, 1000.0, 2, BandSpacing::Linear).unwrap();
        let mut powers = BandPowers::new(edges, 10.0, 101).unwrap();
        let mut magnitudes = vec![0.0_f32; 101];
        magnitudes[20] = 2.0;

        powers.update(&magnitudes, 0.01);
        let first = powers.power(0).unwrap();
        assert!(first > 0.0 && first < 4.0, "first update should be partial: {}", first);
        assert_eq!(powers.raw_power(0), Some(4.0));

        for _ in 0..100 {
            powers.update(&magnitudes, 0.01);
        }
        assert!((powers.power(0).unwrap() - 4.0).abs() < 1e-3);
        assert_eq!(powers.power(1), Some(0.0));

        powers.reset();
        assert_eq!(powers.powers(), &[0.0, 0.0]);
    }

    #[test]
    fn test_centers() {
        let edges = band_edges(0.0, 1000.0, 2, BandSpacing::Linear).unwrap();
        let powers = BandPowers::new(edges, 10.0, 101).unwrap();
        assert_eq!(powers.centers(), vec![250.0, 750.0]);
    }
}
