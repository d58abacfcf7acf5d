//! Fader math: dB conversions, click-free interpolation, and ramp state.
//!
//! Volume transitions interpolate in dB space so a fader move sounds even
//! across its whole travel, with a short linear taper near zero where the
//! dB line would never actually reach silence. Balance transitions use the
//! same ramp bookkeeping with plain linear interpolation.

/// Length of a volume/balance transition in seconds.
pub const VOLUME_TRANSITION_SECONDS: f32 = 0.01;

/// Fraction of the ramp handled linearly when fading from or into silence.
const FADE_FRACTION: f64 = 0.01;

/// Linear gain to dBFS. Non-positive values map to `-inf`.
#[inline]
pub fn value_to_db(value: f32) -> f32 {
    if value <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * value.log10()
    }
}

/// dBFS to linear gain.
#[inline]
pub fn db_to_value(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Number of per-sample transition steps at a given sample rate.
#[inline]
pub fn transition_steps(sample_rate: u32) -> u32 {
    (VOLUME_TRANSITION_SECONDS * sample_rate as f32) as u32 + 1
}

/// Value at `step` of `steps` along a dB-space line from `start` to `end`.
///
/// Near zero the dB line is replaced by a linear taper over the first (or
/// last) `FADE_FRACTION` of the ramp, so fades in and out of silence finish
/// in finite time.
pub fn interpolate(start: f64, end: f64, step: u32, steps: u32) -> f64 {
    let step = step as f64;
    let steps = steps as f64;

    let db = |v: f64| 20.0 * v.log10();
    let lin = |d: f64| 10.0f64.powf(d / 20.0);

    if start <= 0.0 {
        if step <= FADE_FRACTION * steps {
            FADE_FRACTION * end * step / steps
        } else {
            let floor = FADE_FRACTION * end;
            lin(db(floor) + (db(end) - db(floor)) * step / steps)
        }
    } else if end <= 0.0 {
        if step >= (1.0 - FADE_FRACTION) * steps {
            FADE_FRACTION * start * (1.0 - step / steps)
        } else {
            let floor = FADE_FRACTION * start;
            lin(db(start) + (db(floor) - db(start)) * step / steps)
        }
    } else {
        lin(db(start) + (db(end) - db(start)) * step / steps)
    }
}

/// Interpolation curve of a [`Ramp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// dB-space interpolation with near-zero taper; used for volume.
    Db,
    /// Plain linear interpolation; used for balance.
    Linear,
}

/// Per-parameter transition state: current value, target value, and the
/// per-sample step index.
///
/// Steady state is `current == target` with `idx == 0`; while ramping,
/// [`advance()`](Ramp::advance) moves `idx` once per sample and snaps back
/// to steady state after `steps` samples.
#[derive(Debug, Clone)]
pub struct Ramp {
    curve: Curve,
    current: f32,
    target: f32,
    idx: u32,
}

impl Ramp {
    pub fn new(curve: Curve, initial: f32) -> Self {
        Self {
            curve,
            current: initial,
            target: initial,
            idx: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.current != self.target
    }

    /// Point a ramp at a new target, returning whether the target changed.
    ///
    /// If a previous transition is still in progress the current value is
    /// first snapped to the in-flight interpolated point so the new ramp
    /// starts from where the fader audibly is, not from where it began.
    pub fn retarget(&mut self, target: f32, steps: u32) -> bool {
        if self.current != self.target {
            self.current = self.value_at(self.idx, steps);
        }
        self.idx = 0;
        let changed = self.target != target;
        self.target = target;
        changed
    }

    /// Force both current and target, dropping any transition.
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.idx = 0;
    }

    /// Interpolated value for the current step.
    #[inline]
    pub fn value(&self, steps: u32) -> f32 {
        if self.current == self.target {
            self.current
        } else {
            self.value_at(self.idx, steps)
        }
    }

    /// Advance one sample; snap to the target at the end of the ramp.
    #[inline]
    pub fn advance(&mut self, steps: u32) {
        if self.current == self.target {
            return;
        }
        self.idx += 1;
        if self.idx >= steps {
            self.current = self.target;
            self.idx = 0;
        }
    }

    fn value_at(&self, step: u32, steps: u32) -> f32 {
        match self.curve {
            Curve::Db => interpolate(self.current as f64, self.target as f64, step, steps) as f32,
            Curve::Linear => {
                self.current + step as f32 * (self.target - self.current) / steps as f32
            }
        }
    }
}
