use super::error::CorrelationError;

/// An ordered set of frame offsets at which correlation functions are evaluated.
///
/// Lags are non-negative and strictly increasing, and a schedule always holds at
/// least one lag. Whether the largest lag fits a given FrameSeries is checked when
/// the schedule is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagSchedule {
    lags: Vec<usize>,
}

impl LagSchedule {
    /// Create a schedule from explicit lags.
    ///
    /// Lags are taken as signed values so that negative input can be reported instead
    /// of silently wrapping.
    pub fn new(lags: &[i64]) -> Result<Self, CorrelationError> {
        if lags.is_empty() {
            return Err(CorrelationError::InvalidLagSchedule(String::from(
                "schedule is empty",
            )));
        }
        if let Some(lag) = lags.iter().find(|lag| **lag < 0) {
            return Err(CorrelationError::InvalidLagSchedule(format!(
                "lag {lag} is negative"
            )));
        }
        if let Some(pair) = lags.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(CorrelationError::InvalidLagSchedule(format!(
                "lags are not strictly increasing ({} followed by {})",
                pair[0], pair[1]
            )));
        }
        Ok(Self {
            lags: lags.iter().map(|lag| *lag as usize).collect(),
        })
    }

    /// Generate a multi-tau schedule for a series of `n_frames` frames.
    ///
    /// The first level holds `points_per_level` lags spaced by one frame. Every
    /// following level doubles the spacing and adds half as many points, so short
    /// lags are sampled densely and long lags sparsely.
    pub fn multi_tau(
        n_frames: usize,
        points_per_level: usize,
        include_zero: bool,
    ) -> Result<Self, CorrelationError> {
        if points_per_level == 0 {
            return Err(CorrelationError::InvalidLagSchedule(String::from(
                "multi-tau levels need at least one point",
            )));
        }
        let mut lags = Vec::new();
        if include_zero && n_frames > 0 {
            lags.push(0);
        }
        let mut lag = 1;
        let mut step = 1;
        let mut points = points_per_level;
        'levels: loop {
            for _ in 0..points {
                if lag >= n_frames {
                    break 'levels;
                }
                lags.push(lag);
                lag += step;
            }
            step *= 2;
            points = (points_per_level / 2).max(1);
            // keep the next level aligned to its own spacing
            lag = lag.div_ceil(step) * step;
        }
        if lags.is_empty() {
            return Err(CorrelationError::InvalidLagSchedule(format!(
                "no lags fit a series of {n_frames} frames"
            )));
        }
        Ok(Self { lags })
    }

    pub fn lags(&self) -> &[usize] {
        &self.lags
    }

    pub fn len(&self) -> usize {
        self.lags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lags.is_empty()
    }

    pub fn max_lag(&self) -> usize {
        self.lags.last().copied().unwrap_or(0)
    }

    /// Check the schedule fits a series of `n_frames` frames
    pub fn validate_for(&self, n_frames: usize) -> Result<(), CorrelationError> {
        if self.max_lag() >= n_frames {
            return Err(CorrelationError::InvalidLagSchedule(format!(
                "lag {} does not fit a series of {} frames",
                self.max_lag(),
                n_frames
            )));
        }
        Ok(())
    }

    /// Delay times in seconds for a given frame interval
    pub fn delay_times(&self, frame_interval: f64) -> Vec<f64> {
        self.lags
            .iter()
            .map(|lag| *lag as f64 * frame_interval)
            .collect()
    }
}
