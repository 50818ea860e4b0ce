//! Band Splitter Stage
//!
//! Partitions the spectrum of an upstream [`Fft`] stage into contiguous
//! bands and tracks a smoothed power per band. Band layout parameters may
//! change at any time; the per-target state is rebuilt on the next frame
//! whenever the layout or the upstream transform size differs from the one
//! it was built for.

use sonde_dsp::{band_edges, BandPowers, BandSpacing};

use crate::command::{Command, RenderCommand, RenderContext, Stage};
use crate::error::RenderResult;
use crate::parameter::{Parameter, ParameterSet};
use crate::stages::fft::{Fft, SpectrumState};
use crate::state::StateHandle;
use crate::target::{RenderTarget, TargetInfo};

const LOW: usize = 0;
const HIGH: usize = 1;
const BANDS: usize = 2;
const SPACING: usize = 3;

const MAX_BANDS: f32 = 128.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Layout {
    low: f32,
    high: f32,
    bands: usize,
    spacing: BandSpacing,
    bin_hz: f32,
    bin_count: usize,
}

/// Splits a shared spectrum into `bands` bands between `low` and `high` Hz
pub struct BandSplitter {
    parameters: ParameterSet,
    spectrum: StateHandle<SpectrumState>,
}

impl BandSplitter {
    pub fn new(fft: &Stage<Fft>, low: f32, high: f32, bands: usize, spacing: BandSpacing) -> Self {
        let names: Vec<&str> = BandSpacing::ALL.iter().map(|s| s.name()).collect();
        let spacing_index = BandSpacing::ALL.iter().position(|s| *s == spacing).unwrap_or(0);
        Self {
            parameters: ParameterSet::new(&[
                Parameter::range("low", "Lower edge of the first band in Hz", 0.0, 20000.0, low),
                Parameter::range("high", "Upper edge of the last band in Hz", 0.0, 24000.0, high),
                Parameter::range("bands", "Number of bands", 1.0, MAX_BANDS, bands as f32),
                Parameter::items("spacing", "Band edge spacing", &names, spacing_index),
            ]),
            spectrum: fft.spectrum(),
        }
    }

    fn layout(&self, spectrum: &SpectrumState) -> Layout {
        let p = &self.parameters;
        let spacing_index = p.value(SPACING).round().max(0.0) as usize;
        Layout {
            low: p.value(LOW),
            high: p.value(HIGH),
            bands: p.value(BANDS).round().clamp(1.0, MAX_BANDS) as usize,
            spacing: BandSpacing::from_index(spacing_index).unwrap_or(BandSpacing::Logarithmic),
            bin_hz: spectrum.bin_hz(),
            bin_count: spectrum.magnitudes().len(),
        }
    }
}

/// Band powers for one target
#[derive(Default)]
pub struct BandState {
    powers: Option<(Layout, BandPowers)>,
    last_analysis: Option<u64>,
}

impl BandState {
    /// Smoothed band powers, empty until the first spectrum arrives
    pub fn powers(&self) -> &[f32] {
        match &self.powers {
            Some((_, powers)) => powers.powers(),
            None => &[],
        }
    }

    pub fn power(&self, band: usize) -> Option<f32> {
        self.powers.as_ref().and_then(|(_, powers)| powers.power(band))
    }

    pub fn centers(&self) -> Vec<f32> {
        self.powers
            .as_ref()
            .map_or_else(Vec::new, |(_, powers)| powers.centers())
    }

    pub fn edges(&self) -> &[f32] {
        match &self.powers {
            Some((_, powers)) => powers.edges(),
            None => &[],
        }
    }

    /// Index of the band with the most power
    pub fn loudest(&self) -> Option<usize> {
        self.powers()
            .iter()
            .enumerate()
            .filter(|(_, p)| **p > 0.0)
            .fold(None, |best: Option<(usize, f32)>, (band, &p)| match best {
                Some((_, q)) if q >= p => best,
                _ => Some((band, p)),
            })
            .map(|(band, _)| band)
    }

    fn update(&mut self, layout: Layout, spectrum: &SpectrumState) -> RenderResult<()> {
        let rebuild = !matches!(&self.powers, Some((current, _)) if *current == layout);
        if rebuild {
            let edges = band_edges(layout.low, layout.high, layout.bands, layout.spacing)?;
            let powers = BandPowers::new(edges, layout.bin_hz, layout.bin_count)?;
            self.powers = Some((layout, powers));
            self.last_analysis = None;
        }

        // Only advance the smoothing filter when the spectrum is new
        if self.last_analysis == Some(spectrum.analyses()) {
            return Ok(());
        }
        self.last_analysis = Some(spectrum.analyses());
        if let Some((_, powers)) = &mut self.powers {
            powers.update(spectrum.magnitudes(), spectrum.interval());
        }
        Ok(())
    }
}

impl Command for BandSplitter {
    type State = BandState;

    fn name(&self) -> &'static str {
        "BandSplitter"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, _target: &TargetInfo) -> RenderResult<BandState> {
        Ok(BandState::default())
    }
}

impl RenderCommand for BandSplitter {
    fn run(&self, state: &mut BandState, cx: &mut RenderContext<'_>) -> RenderResult<()> {
        self.spectrum
            .with(cx, |spectrum| state.update(self.layout(spectrum), spectrum))?
    }
}

impl Stage<BandSplitter> {
    /// Smoothed power of `band` on `target`
    pub fn power(&self, target: &RenderTarget, band: usize) -> RenderResult<Option<f32>> {
        Ok(self
            .state_handle()
            .with_target(target, |state| state.power(band))?
            .flatten())
    }

    /// Every band power on `target`; empty before the stage has run there
    pub fn powers(&self, target: &RenderTarget) -> RenderResult<Vec<f32>> {
        Ok(self
            .state_handle()
            .with_target(target, |state| state.powers().to_vec())?
            .unwrap_or_default())
    }

    /// Band centre frequencies on `target`
    pub fn centers(&self, target: &RenderTarget) -> RenderResult<Vec<f32>> {
        Ok(self
            .state_handle()
            .with_target(target, BandState::centers)?
            .unwrap_or_default())
    }

    /// Band with the most power on `target`
    pub fn loudest(&self, target: &RenderTarget) -> RenderResult<Option<usize>> {
        Ok(self
            .state_handle()
            .with_target(target, BandState::loudest)?
            .flatten())
    }
}
