use ndarray::{Array2, Array3, ArrayD, ArrayView2, Axis, Ix2, Ix3};

use super::error::FrameError;

/// An ordered stack of 2D detector images, each tagged with an acquisition time.
///
/// The stack is stored as an `Array3` of shape `(n_frames, rows, cols)`, so every
/// frame in a series is guaranteed to have the same shape. Timestamps are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSeries {
    data: Array3<f64>,
    timestamps: Vec<f64>,
}

impl FrameSeries {
    /// Create a new FrameSeries. The number of timestamps must match the number of frames.
    pub fn new(data: Array3<f64>, timestamps: Vec<f64>) -> Result<Self, FrameError> {
        let frames = data.len_of(Axis(0));
        if frames != timestamps.len() {
            return Err(FrameError::TimestampCount {
                frames,
                timestamps: timestamps.len(),
            });
        }
        Ok(Self { data, timestamps })
    }

    /// Create a FrameSeries with frames spaced evenly by `interval` seconds, starting at 0
    pub fn with_interval(data: Array3<f64>, interval: f64) -> Self {
        let timestamps = (0..data.len_of(Axis(0)))
            .map(|idx| idx as f64 * interval)
            .collect();
        Self { data, timestamps }
    }

    /// Build a series from a dynamically shaped array. A 2D array becomes a single frame.
    pub fn from_dyn(data: ArrayD<f64>, interval: f64) -> Result<Self, FrameError> {
        match data.ndim() {
            2 => {
                let image = data
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| FrameError::BadDimensionality(2))?;
                Ok(Self::with_interval(image.insert_axis(Axis(0)), interval))
            }
            3 => {
                let stack = data
                    .into_dimensionality::<Ix3>()
                    .map_err(|_| FrameError::BadDimensionality(3))?;
                Ok(Self::with_interval(stack, interval))
            }
            n => Err(FrameError::BadDimensionality(n)),
        }
    }

    pub fn n_frames(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.n_frames() == 0
    }

    /// Shape of a single frame as (rows, cols)
    pub fn frame_shape(&self) -> (usize, usize) {
        let shape = self.data.shape();
        (shape[1], shape[2])
    }

    pub fn frame(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Replace the timestamps of the series
    pub fn set_timestamps(&mut self, timestamps: Vec<f64>) -> Result<(), FrameError> {
        if timestamps.len() != self.n_frames() {
            return Err(FrameError::TimestampCount {
                frames: self.n_frames(),
                timestamps: timestamps.len(),
            });
        }
        self.timestamps = timestamps;
        Ok(())
    }

    /// Mean spacing between consecutive timestamps. None for fewer than two frames.
    pub fn frame_interval(&self) -> Option<f64> {
        let n = self.timestamps.len();
        if n < 2 {
            return None;
        }
        Some((self.timestamps[n - 1] - self.timestamps[0]) / (n - 1) as f64)
    }

    /// Time-averaged image. None for an empty series.
    pub fn mean_image(&self) -> Option<Array2<f64>> {
        self.data.mean_axis(Axis(0))
    }

    /// Size of the intensity stack in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }

    /// A copy of the series with every intensity multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            data: &self.data * factor,
            timestamps: self.timestamps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array};

    #[test]
    fn test_timestamp_count() {
        let data = Array3::<f64>::zeros((3, 2, 2));
        assert_eq!(
            FrameSeries::new(data, vec![0.0, 1.0]),
            Err(FrameError::TimestampCount {
                frames: 3,
                timestamps: 2
            })
        );
    }

    #[test]
    fn test_single_image_from_dyn() {
        let image = arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn();
        let series = FrameSeries::from_dyn(image, 0.5).unwrap();
        assert_eq!(series.n_frames(), 1);
        assert_eq!(series.frame_shape(), (2, 2));
        assert_eq!(series.frame(0)[[1, 0]], 3.0);
        assert_eq!(series.frame_interval(), None);
    }

    #[test]
    fn test_bad_dimensionality() {
        let line = Array::from_vec(vec![1.0, 2.0]).into_dyn();
        assert_eq!(
            FrameSeries::from_dyn(line, 1.0),
            Err(FrameError::BadDimensionality(1))
        );
    }

    #[test]
    fn test_mean_image_and_interval() {
        let mut data = Array3::<f64>::zeros((4, 1, 2));
        for t in 0..4 {
            data[[t, 0, 0]] = t as f64;
            data[[t, 0, 1]] = 2.0;
        }
        let series = FrameSeries::with_interval(data, 0.25);
        let mean = series.mean_image().unwrap();
        assert_eq!(mean[[0, 0]], 1.5);
        assert_eq!(mean[[0, 1]], 2.0);
        assert_eq!(series.frame_interval(), Some(0.25));
        assert_eq!(series.size_bytes(), 8 * 8);
    }
}
