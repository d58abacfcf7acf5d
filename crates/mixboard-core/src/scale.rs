//! Piecewise-linear mapping between dBFS and a normalized fader position.
//!
//! A scale is an ordered list of `(dB, norm)` thresholds with `norm` in
//! `[0, 1]`. Between two adjacent thresholds the mapping is linear in dB;
//! below the first threshold everything maps to 0, at or above the last to 1.
//! The MIDI path uses a scale to translate 7-bit CC values into gains and
//! back into CC feedback values.

/// One scale threshold with the linear coefficients of the segment that
/// ends at it: `norm = a * db + b`.
#[derive(Debug, Clone, Copy)]
struct Threshold {
    db: f64,
    norm: f64,
    a: f64,
    b: f64,
}

impl Threshold {
    fn new(db: f64, norm: f64) -> Self {
        Self {
            db,
            norm,
            a: 0.0,
            b: 0.0,
        }
    }

    fn coefficients_from(&mut self, prev: &Threshold) {
        self.a = (prev.norm - self.norm) / (prev.db - self.db);
        self.b = self.norm - self.a * self.db;
    }

    #[inline]
    fn db_to_norm(&self, db: f64) -> f64 {
        self.a * db + self.b
    }

    #[inline]
    fn norm_to_db(&self, norm: f64) -> f64 {
        (norm - self.b) / self.a
    }
}

/// Piecewise-linear dB <-> normalized-position scale.
///
/// Thresholds are walked in insertion order; callers must add them with
/// monotonically increasing dB. Coefficients are only recomputed by
/// [`finalize()`](Scale::finalize), so adding a threshold after finalizing
/// requires finalizing again.
#[derive(Debug, Clone, Default)]
pub struct Scale {
    thresholds: Vec<Threshold>,
}

impl Scale {
    pub fn new() -> Self {
        Self {
            thresholds: Vec::new(),
        }
    }

    /// The stock scale used for MIDI mapping: -70 dB -> 0.0, 0 dB -> 1.0.
    pub fn standard() -> Self {
        let mut scale = Self::new();
        scale.add_threshold(-70.0, 0.0);
        scale.add_threshold(0.0, 1.0);
        scale.finalize();
        scale
    }

    /// IEC 60268-18 style fader scale with uneven segments, useful where a
    /// two-point scale wastes most of the fader travel on inaudible levels.
    pub fn iec_268() -> Self {
        let mut scale = Self::new();
        scale.add_threshold(-70.0, 0.0);
        scale.add_threshold(-60.0, 0.05);
        scale.add_threshold(-50.0, 0.075);
        scale.add_threshold(-40.0, 0.15);
        scale.add_threshold(-30.0, 0.3);
        scale.add_threshold(-20.0, 0.5);
        scale.add_threshold(-10.0, 0.75);
        scale.add_threshold(0.0, 1.0);
        scale.finalize();
        scale
    }

    pub fn add_threshold(&mut self, db: f64, norm: f64) {
        self.thresholds.push(Threshold::new(db, norm));
    }

    /// Compute the per-segment linear coefficients.
    pub fn finalize(&mut self) {
        for i in 1..self.thresholds.len() {
            let prev = self.thresholds[i - 1];
            self.thresholds[i].coefficients_from(&prev);
        }
    }

    /// Convert a dBFS value into the normalized range `[0, 1]`.
    pub fn db_to_norm(&self, db: f64) -> f64 {
        let mut prev: Option<&Threshold> = None;
        for threshold in &self.thresholds {
            if db < threshold.db {
                if prev.is_none() {
                    return 0.0;
                }
                return threshold.db_to_norm(db);
            }
            prev = Some(threshold);
        }
        1.0
    }

    /// Convert a normalized `[0, 1]` position into dBFS.
    ///
    /// Positions at or below the first threshold map to `-inf`.
    pub fn norm_to_db(&self, norm: f64) -> f64 {
        let mut prev: Option<&Threshold> = None;
        for threshold in &self.thresholds {
            if norm <= threshold.norm {
                if prev.is_none() {
                    return f64::NEG_INFINITY;
                }
                return threshold.norm_to_db(norm);
            }
            prev = Some(threshold);
        }
        match self.thresholds.last() {
            Some(last) => last.norm_to_db(norm),
            None => f64::NEG_INFINITY,
        }
    }
}
