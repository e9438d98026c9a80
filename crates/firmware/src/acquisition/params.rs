//! Acquisition arguments and the derived register plan.

use platform::config::{
    ACQ_DATA_SIZE, FIFO_DEPTH_BYTES, IMPRESP_MAX_SAMPLES, LED_OFFSET_DEFAULT_US, MAX_INTEG_OFFSET_US,
    PATH_COUNT,
};
use platform::adpd410x::INTEG_OFFSET_MASK;

use super::SessionError;

/// Fine steps per µs in the integration offset.
const FINE_STEPS: u32 = 32;

/// Largest sample count one FIFO burst can carry.
const FIFO_SAMPLES: u16 = (FIFO_DEPTH_BYTES / ACQ_DATA_SIZE) as u16;

/// Fluorescence preset: channel, LED width, acquisition width, period.
const FLUO_PRESET: (u8, u8, f32, f32) = (1, 10, 50.0, 2.0);

/// How the integration window is positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    /// Impulse: one FIFO burst samples the whole response.
    Imp,
    /// Transimpedance: the window steps across the response.
    Tia,
    /// Single-sided integration, stepped like TIA at fine resolution.
    Ssi,
}

impl Method {
    /// Command-line name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Imp => "IMP",
            Self::Tia => "TIA",
            Self::Ssi => "SSI",
        }
    }

    /// Parse a command-line name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Imp, Self::Tia, Self::Ssi]
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// Shortest sample period the method supports, in µs.
    pub fn min_period_us(self) -> f32 {
        match self {
            Self::Imp => 2.0,
            Self::Tia => 1.0,
            Self::Ssi => 1.0 / 32.0,
        }
    }

    /// Code stored in fluorescence headers.
    pub fn code(self) -> u8 {
        match self {
            Self::Imp => 0,
            Self::Tia => 1,
            Self::Ssi => 2,
        }
    }

    /// Inverse of [`Method::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Imp),
            1 => Some(Self::Tia),
            2 => Some(Self::Ssi),
            _ => None,
        }
    }
}

/// Parsed acquisition arguments, before clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionRequest {
    /// Optical channel, 1-based.
    pub channel: u8,
    /// LED pulse width (µs).
    pub led_width: u8,
    /// Length of the response to capture (µs).
    pub acq_width: f32,
    /// Sample spacing (µs).
    pub period: f32,
    /// Window positioning.
    pub method: Method,
    /// Number of repetitions averaged.
    pub avg_len: u16,
    /// Extra delay after the LED pulse before the first sample (µs).
    pub start: u8,
    /// Whether a stored reference curve is subtracted (cleared by `NOCALIB`).
    pub calibrated: bool,
}

impl AcquisitionRequest {
    /// Parse `channel led_width acq_width period method [avg_len] [start]`.
    ///
    /// A leading `FLUO` stands for the first four values. `NOCALIB` may
    /// appear anywhere.
    pub fn parse(args: &str) -> Result<Self, SessionError> {
        let mut calibrated = true;
        let mut tokens = args.split_whitespace().filter(|t| {
            let skip = t.eq_ignore_ascii_case("NOCALIB");
            if skip {
                calibrated = false;
            }
            !skip
        });

        let mut first = tokens.next().ok_or(SessionError::Parse)?;
        let (channel, led_width, acq_width, period) = if first.eq_ignore_ascii_case("FLUO") {
            FLUO_PRESET
        } else {
            let channel = number(Some(first))?;
            let led_width = number(tokens.next())?;
            let acq_width = number(tokens.next())?;
            let period = number(tokens.next())?;
            (channel, led_width, acq_width, period)
        };
        first = tokens.next().ok_or(SessionError::Parse)?;
        let method = Method::from_name(first).ok_or(SessionError::Parse)?;
        let avg_len = tokens.next().map_or(Ok(1), |t| number(Some(t)))?;
        let start = tokens.next().map_or(Ok(0), |t| number(Some(t)))?;
        if tokens.next().is_some() {
            return Err(SessionError::Parse);
        }
        drop(tokens);

        let request = Self {
            channel,
            led_width,
            acq_width,
            period,
            method,
            avg_len,
            start,
            calibrated,
        };
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), SessionError> {
        let channel_ok = (1..=PATH_COUNT).contains(&usize::from(self.channel));
        let period_ok = self.period > 0.0 && self.period <= MAX_INTEG_OFFSET_US;
        let acq_ok = self.acq_width >= 0.0 && self.acq_width.is_finite();
        if !channel_ok || self.led_width == 0 || self.avg_len == 0 || !period_ok || !acq_ok {
            return Err(SessionError::Validation);
        }
        Ok(())
    }
}

fn number<T: core::str::FromStr>(token: Option<&str>) -> Result<T, SessionError> {
    token
        .ok_or(SessionError::Parse)?
        .parse()
        .map_err(|_| SessionError::Parse)
}

/// Values the plan had to change, each `Some(new value)` when clamped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clamps {
    /// Period raised to the method minimum.
    pub period: Option<f32>,
    /// Sample count capped by the FIFO, the integration offset range or the buffer.
    pub nb_samples: Option<u16>,
    /// Averaging count capped by the FIFO.
    pub avg_len: Option<u16>,
}

impl Clamps {
    /// Whether anything was clamped.
    pub fn any(&self) -> bool {
        self.period.is_some() || self.nb_samples.is_some() || self.avg_len.is_some()
    }
}

/// Register-level acquisition plan.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionPlan {
    /// Optical channel, 1-based.
    pub channel: u8,
    /// LED pulse width (µs).
    pub led_width: u8,
    /// Delay after the pulse before the first sample (µs).
    pub start: u8,
    /// Window positioning.
    pub method: Method,
    /// Clamped sample spacing (µs).
    pub period: f32,
    /// Whole µs part of the period.
    pub period_upper: u16,
    /// 1/32 µs part of the period.
    pub period_lower: u8,
    /// Samples in the averaged result.
    pub nb_samples: u16,
    /// Repetitions averaged.
    pub avg_len: u16,
    /// Samples per FIFO burst (the FIFO threshold).
    pub fifo_samples: u16,
    /// Bursts to collect.
    pub data_cycles: u16,
    /// Whether a stored reference curve is subtracted.
    pub calibrated: bool,
    base32: u32,
    period32: u32,
}

impl AcquisitionPlan {
    /// Clamp `req` to what the device and buffers can do.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // rounded, floored and bounded before each cast
    pub fn from_request(req: &AcquisitionRequest) -> Result<(Self, Clamps), SessionError> {
        let mut clamps = Clamps::default();

        let period = if req.period < req.method.min_period_us() {
            clamps.period = Some(req.method.min_period_us());
            req.method.min_period_us()
        } else {
            req.period
        };
        let period32 = (libm::roundf(period * FINE_STEPS as f32) as u32).max(1);
        let period_upper = u16::try_from(period32 / FINE_STEPS).map_err(|_| SessionError::Validation)?;
        #[allow(clippy::arithmetic_side_effects)] // Safety: remainder of a division by 32
        let period_lower = (period32 % FINE_STEPS) as u8;

        let wanted = libm::floorf(req.acq_width / period) + 1.0;
        let wanted = wanted.min(f32::from(u16::MAX)) as u16;

        let base32 = (u32::from(LED_OFFSET_DEFAULT_US) + u32::from(req.led_width) + u32::from(req.start))
            .saturating_mul(FINE_STEPS);
        let (nb_samples, avg_len, fifo_samples, data_cycles) = match req.method {
            Method::Imp => {
                let nb = wanted.min(FIFO_SAMPLES);
                (nb, req.avg_len, nb, req.avg_len)
            }
            Method::Tia | Method::Ssi => {
                let room = u32::from(INTEG_OFFSET_MASK)
                    .checked_sub(base32)
                    .ok_or(SessionError::Validation)?;
                let reach = (room / period32).saturating_add(1);
                let cap = u16::try_from(reach).unwrap_or(u16::MAX).min(IMPRESP_MAX_SAMPLES as u16);
                let nb = wanted.min(cap);
                let avg = req.avg_len.min(FIFO_SAMPLES);
                (nb, avg, avg, nb)
            }
        };
        if nb_samples < wanted {
            clamps.nb_samples = Some(nb_samples);
        }
        if avg_len < req.avg_len {
            clamps.avg_len = Some(avg_len);
        }
        if clamps.any() {
            warn!("acquisition clamped: {} samples, {} averages", nb_samples, avg_len);
        }

        let plan = Self {
            channel: req.channel,
            led_width: req.led_width,
            start: req.start,
            method: req.method,
            period,
            period_upper,
            period_lower,
            nb_samples,
            avg_len,
            fifo_samples,
            data_cycles,
            calibrated: req.calibrated,
            base32,
            period32,
        };
        Ok((plan, clamps))
    }

    /// Integration offset register value for `cycle`: coarse µs above bit 5, fine 1/32 µs below.
    pub fn integ_offset_code(&self, cycle: u16) -> u16 {
        let code = self
            .period32
            .saturating_mul(u32::from(cycle))
            .saturating_add(self.base32);
        #[allow(clippy::cast_possible_truncation)] // masked to 13 bits
        let code = (code & u32::from(INTEG_OFFSET_MASK)) as u16;
        code
    }

    /// Time of sample `index` after the LED pulse, in µs.
    #[allow(clippy::cast_precision_loss)] // sample indices stay below 2^24
    pub fn sample_time(&self, index: usize) -> f32 {
        f32::from(self.start) + index as f32 * self.period
    }

    /// Time of the last sample, in µs.
    pub fn end_time(&self) -> f32 {
        self.sample_time(usize::from(self.nb_samples.saturating_sub(1)))
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positional() {
        let req = AcquisitionRequest::parse("1 10 50 2 imp").unwrap();
        assert_eq!(req.channel, 1);
        assert_eq!(req.led_width, 10);
        assert_eq!(req.acq_width, 50.0);
        assert_eq!(req.method, Method::Imp);
        assert_eq!((req.avg_len, req.start), (1, 0));
        assert!(req.calibrated);
    }

    #[test]
    fn test_parse_fluo_preset_and_nocalib() {
        let req = AcquisitionRequest::parse("NOCALIB FLUO TIA 8 3").unwrap();
        assert_eq!((req.channel, req.led_width), (1, 10));
        assert_eq!((req.acq_width, req.period), (50.0, 2.0));
        assert_eq!((req.avg_len, req.start), (8, 3));
        assert!(!req.calibrated);
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(AcquisitionRequest::parse(""), Err(SessionError::Parse));
        assert_eq!(AcquisitionRequest::parse("1 10 50 2 XYZ"), Err(SessionError::Parse));
        assert_eq!(AcquisitionRequest::parse("1 10 x 2 TIA"), Err(SessionError::Parse));
        assert_eq!(AcquisitionRequest::parse("1 10 50 2 TIA 1 0 9"), Err(SessionError::Parse));
        assert_eq!(AcquisitionRequest::parse("9 10 50 2 TIA"), Err(SessionError::Validation));
        assert_eq!(AcquisitionRequest::parse("1 0 50 2 TIA"), Err(SessionError::Validation));
        assert_eq!(AcquisitionRequest::parse("1 10 50 2 TIA 0"), Err(SessionError::Validation));
        assert_eq!(AcquisitionRequest::parse("1 10 50 0 TIA"), Err(SessionError::Validation));
    }

    #[test]
    fn test_imp_plan() {
        let req = AcquisitionRequest::parse("1 10 50 2 IMP 4").unwrap();
        let (plan, clamps) = AcquisitionPlan::from_request(&req).unwrap();
        assert!(!clamps.any());
        assert_eq!(plan.nb_samples, 26);
        assert_eq!((plan.fifo_samples, plan.data_cycles), (26, 4));
        assert_eq!((plan.period_upper, plan.period_lower), (2, 0));
    }

    #[test]
    fn test_imp_capped_by_fifo() {
        let req = AcquisitionRequest::parse("1 10 300 2 IMP").unwrap();
        let (plan, clamps) = AcquisitionPlan::from_request(&req).unwrap();
        assert_eq!(plan.nb_samples, 128);
        assert_eq!(clamps.nb_samples, Some(128));
    }

    #[test]
    fn test_period_raised_to_method_minimum() {
        let req = AcquisitionRequest::parse("1 10 10 0.5 TIA").unwrap();
        let (plan, clamps) = AcquisitionPlan::from_request(&req).unwrap();
        assert_eq!(plan.period, 1.0);
        assert_eq!(clamps.period, Some(1.0));
        assert_eq!(plan.nb_samples, 11);
    }

    #[test]
    fn test_tia_plan_and_offsets() {
        let req = AcquisitionRequest::parse("2 10 20 1.5 TIA 300 4").unwrap();
        let (plan, clamps) = AcquisitionPlan::from_request(&req).unwrap();
        assert_eq!(clamps.avg_len, Some(128));
        assert_eq!((plan.fifo_samples, plan.data_cycles), (128, 14));
        assert_eq!((plan.period_upper, plan.period_lower), (1, 16));
        // (52 + 10 + 4) µs = 66 coarse, 0 fine
        assert_eq!(plan.integ_offset_code(0), 66 << 5);
        // + 3 × 1.5 µs = 70.5 µs
        assert_eq!(plan.integ_offset_code(3), (70 << 5) | 16);
        assert_eq!(plan.end_time(), 4.0 + 13.0 * 1.5);
    }

    #[test]
    fn test_ssi_capped_by_integration_offset() {
        let req = AcquisitionRequest::parse("1 10 250 0.03125 SSI").unwrap();
        let (plan, clamps) = AcquisitionPlan::from_request(&req).unwrap();
        // (0x1FFF - 62·32) / 1 + 1 = 6208, then the buffer limit.
        assert_eq!(plan.nb_samples, 1950);
        assert_eq!(clamps.nb_samples, Some(1950));

        let req = AcquisitionRequest::parse("1 200 100 1 TIA").unwrap();
        let (plan, _) = AcquisitionPlan::from_request(&req).unwrap();
        // (0x1FFF - 252·32) / 32 + 1 = 4
        assert_eq!(plan.nb_samples, 4);
        assert_eq!(plan.integ_offset_code(3), 255 << 5);
    }

    #[test]
    fn test_window_past_offset_range_rejected() {
        let req = AcquisitionRequest::parse("1 255 10 1 TIA").unwrap();
        assert_eq!(AcquisitionPlan::from_request(&req), Err(SessionError::Validation));
    }
}
