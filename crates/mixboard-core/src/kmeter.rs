//! K-meter: dual-ballistics metering (smoothed RMS + peak with hold/fall).
//!
//! Each meter produces, per audio period, an RMS-like value smoothed by a
//! two-pole filter and a digital peak that holds for ~0.5 s and then falls
//! at 10.5 dB/s. The RMS accumulator keeps the maximum since the last read;
//! readers request a reset through a shared flag which takes effect at the
//! start of the next `process()` call.

/// Per-port K-meter state.
///
/// Plain data owned by the audio thread; published values flow out through
/// the channel's shared atomic block once per period.
#[derive(Debug, Clone)]
pub struct Kmeter {
    /// First ballistics filter state.
    z1: f32,
    /// Second ballistics filter state.
    z2: f32,
    /// Max RMS value since the last reset.
    rms: f32,
    /// Current digital peak value.
    dpk: f32,
    /// Peak hold countdown, in periods.
    cnt: u32,
    /// Number of periods to hold the peak.
    hold: u32,
    /// Per-period multiplicative peak decay.
    fall: f32,
    /// Ballistics filter constant.
    omega: f32,
}

impl Kmeter {
    pub fn new(period: u32, sample_rate: u32) -> Self {
        let (hold, fall) = hold_fall(period, sample_rate);
        Self {
            z1: 0.0,
            z2: 0.0,
            rms: 0.0,
            dpk: 0.0,
            cnt: 0,
            hold,
            fall,
            omega: 9.72 / sample_rate as f32,
        }
    }

    /// Re-derive the hold/fall constants after a period-size change.
    pub fn set_period(&mut self, period: u32, sample_rate: u32) {
        let (hold, fall) = hold_fall(period, sample_rate);
        self.hold = hold;
        self.fall = fall;
    }

    /// Re-derive every rate-dependent constant after a sample-rate change.
    pub fn set_sample_rate(&mut self, period: u32, sample_rate: u32) {
        self.omega = 9.72 / sample_rate as f32;
        self.set_period(period, sample_rate);
    }

    /// Zero the RMS accumulator. Called when a reader has consumed the
    /// current value, before the next block is processed.
    pub fn reset_rms(&mut self) {
        self.rms = 0.0;
    }

    /// Feed one period worth of samples through the meter.
    pub fn process(&mut self, samples: &[f32]) {
        let mut z1 = self.z1;
        let mut z2 = self.z2;
        let mut t = 0.0f32;

        for &sample in samples {
            let s = sample * sample;
            if t < s {
                t = s;
            }
            z1 += self.omega * (s - z1);
            z2 += self.omega * (z1 - z2);
        }
        let t = t.sqrt();

        // Anti-denormal offsets; keep even with FTZ/DAZ enabled.
        self.z1 = z1 + 1e-20;
        self.z2 = z2 + 1e-20;

        let s = (2.0 * z2).sqrt();
        if s > self.rms {
            self.rms = s;
        }

        if t > self.dpk {
            self.dpk = t;
            self.cnt = self.hold;
        } else if self.cnt > 0 {
            self.cnt -= 1;
        } else {
            self.dpk *= self.fall;
            self.dpk += 1e-10;
        }
    }

    /// Current peak value (linear).
    #[inline]
    pub fn dpk(&self) -> f32 {
        self.dpk
    }

    /// Max RMS value since the last reset (linear).
    #[inline]
    pub fn rms(&self) -> f32 {
        self.rms
    }
}

/// Hold count and per-period fall multiplier for a given period length:
/// hold the peak for ~0.5 s, then decay at 10.5 dB per second.
fn hold_fall(period: u32, sample_rate: u32) -> (u32, f32) {
    let t = period as f32 / sample_rate as f32;
    let hold = (0.5 / t + 0.5) as u32;
    let fall = 10.0f32.powf(-0.05 * 10.5 * t);
    (hold, fall)
}
