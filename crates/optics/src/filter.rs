//! Two-stage ratio filter: a block averager followed by a sliding window.
//!
//! Frames arrive at the code rate (50 Hz). Every [`BLOCK_SIZE`] frames the
//! block averager emits one mean per path (5 Hz), which is pushed into that
//! path's [`WindowRing`]; the ring mean is the path's absolute ratio.
//!
//! The window width is derived from a requested -3 dB bandwidth by
//! [`window_for_bandwidth`], which searches the moving-average magnitude
//! response `|H(f)| = sin(π·f·w/fs) / (w·sin(π·f/fs))` for the width whose
//! response at `f` sits closest to the cutoff amplitude.

use core::f32::consts::PI;

use platform::config::{BLOCK_FILTER_SIZE, BLOCK_RATE_HZ};

/// Frames averaged per block.
pub const BLOCK_SIZE: usize = BLOCK_FILTER_SIZE;

/// Largest sliding-window width (about 0.018 Hz of bandwidth).
pub const MAX_WINDOW: usize = 128;

/// Amplitude that defines the filter cutoff (≈ -3 dB).
pub const CUTOFF_AMPLITUDE: f32 = 0.708;

/// Averages `P` parallel streams in blocks of [`BLOCK_SIZE`] samples.
///
/// All streams share one block index, so a block completes for every
/// stream on the same push.
#[derive(Debug, Clone)]
pub struct BlockAverager<const P: usize> {
    blocks: [[f32; BLOCK_SIZE]; P],
    index: usize,
}

impl<const P: usize> BlockAverager<P> {
    /// Create an empty averager.
    pub const fn new() -> Self {
        Self {
            blocks: [[0.0; BLOCK_SIZE]; P],
            index: 0,
        }
    }

    /// Samples collected in the current block.
    pub fn fill(&self) -> usize {
        self.index
    }

    /// Store one sample per stream. Returns the block means once the block
    /// is complete, then starts a new block.
    #[allow(clippy::cast_precision_loss)] // BLOCK_SIZE is 10
    pub fn push(&mut self, samples: [f32; P]) -> Option<[f32; P]> {
        for (block, sample) in self.blocks.iter_mut().zip(samples) {
            if let Some(slot) = block.get_mut(self.index) {
                *slot = sample;
            }
        }
        self.index = self.index.saturating_add(1);
        if self.index < BLOCK_SIZE {
            return None;
        }
        self.index = 0;
        Some(core::array::from_fn(|p| {
            self.blocks
                .get(p)
                .map_or(0.0, |block| block.iter().sum::<f32>() / BLOCK_SIZE as f32)
        }))
    }

    /// Drop the partial block.
    pub fn reset(&mut self) {
        self.index = 0;
    }
}

impl<const P: usize> Default for BlockAverager<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity sliding window with a configurable width.
///
/// Capacity is set at compile time via the const generic `N`; the active
/// width is `1..=N`. Slots not yet written hold zero and count toward the
/// mean, so a freshly configured window ramps up from zero.
#[derive(Debug, Clone)]
pub struct WindowRing<const N: usize> {
    buf: [f32; N],
    /// Index of the next slot to overwrite.
    write: usize,
    width: usize,
}

impl<const N: usize> WindowRing<N> {
    /// Create a zeroed window of `width` samples (clamped to `1..=N`).
    pub fn new(width: usize) -> Self {
        Self {
            buf: [0.0; N],
            write: 0,
            width: width.clamp(1, N.max(1)),
        }
    }

    /// Active width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Change the width and zero the history.
    pub fn set_width(&mut self, width: usize) {
        self.width = width.clamp(1, N.max(1));
        self.clear();
    }

    /// Zero the history.
    pub fn clear(&mut self) {
        self.buf = [0.0; N];
        self.write = 0;
    }

    /// Push the newest sample, evicting the oldest.
    #[allow(clippy::arithmetic_side_effects)] // Safety: width >= 1, so the modulo is well defined
    pub fn push(&mut self, sample: f32) {
        if let Some(slot) = self.buf.get_mut(self.write) {
            *slot = sample;
        }
        self.write = (self.write + 1) % self.width;
    }

    /// Mean over the whole width.
    #[allow(clippy::cast_precision_loss)] // width <= N, small
    pub fn mean(&self) -> f32 {
        let sum: f32 = self.buf.iter().take(self.width).sum();
        sum / self.width as f32
    }
}

/// Window width whose moving-average response at `bandwidth_hz` is closest
/// to [`CUTOFF_AMPLITUDE`], for blocks arriving at [`BLOCK_RATE_HZ`].
///
/// Bandwidths at or above Nyquist, non-positive or NaN return 1; bandwidths
/// too narrow for [`MAX_WINDOW`] return [`MAX_WINDOW`].
#[allow(clippy::cast_precision_loss)] // widths are below 129
pub fn window_for_bandwidth(bandwidth_hz: f32) -> usize {
    let fs = BLOCK_RATE_HZ;
    if !(bandwidth_hz > 0.0) || bandwidth_hz >= fs / 2.0 {
        return 1;
    }
    let denominator = libm::sinf(PI * bandwidth_hz / fs);

    let mut bigger = 1.0f32;
    let mut width = 1usize;
    let smaller = loop {
        let amplitude =
            libm::sinf(PI * bandwidth_hz * width as f32 / fs) / (width as f32 * denominator);
        if amplitude < CUTOFF_AMPLITUDE {
            break amplitude;
        }
        bigger = amplitude;
        width = width.saturating_add(1);
        if width > MAX_WINDOW {
            return MAX_WINDOW;
        }
    };

    let chosen = if bigger - CUTOFF_AMPLITUDE > CUTOFF_AMPLITUDE - smaller {
        width.saturating_add(1)
    } else {
        width
    };
    chosen.min(MAX_WINDOW)
}
