//! The XPCS correlation engine.
//!
//! [compute_g2] evaluates the normalized intensity autocorrelation function
//!
//! ```text
//! g2(b, τ) = <I(t)·I(t+τ)> / (<I(t)> · <I(t+τ)>)
//! ```
//!
//! for every q bin `b` and every lag `τ` of a [LagSchedule], where all averages run over
//! the valid pixels of the bin and all frame pairs `(t, t+τ)` inside the series.
//! [compute_two_time] evaluates the same ratio between pairs of absolute frame times for
//! a single bin. Both are pure, single pass batch computations.
//!
//! Structural problems (empty series, mismatched shapes, a schedule that does not fit)
//! abort the computation. A bin or lag without enough data does not: that entry is
//! reported as [G2Entry::Missing] and the rest of the result is still computed.
use ndarray::{Array2, ArrayView3};

use super::error::CorrelationError;
use super::frames::FrameSeries;
use super::lag_schedule::LagSchedule;
use super::mask::Mask;
use super::qmap::QBinMap;

/// Why an entry of a correlation result could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// The bin contains no unmasked pixels
    NoValidPixels,
    /// There are no frame pairs separated by this lag with finite intensities
    NoValidPairs,
    /// The mean intensity in the denominator is zero
    ZeroMeanIntensity,
}

/// A single (bin, lag) entry of a [CorrelationResult]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum G2Entry {
    Value {
        g2: f64,
        std_error: f64,
        /// Number of (pixel, frame pair) samples that contributed
        n_samples: usize,
    },
    Missing(MissingReason),
}

impl G2Entry {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value { g2, .. } => Some(*g2),
            Self::Missing(_) => None,
        }
    }

    pub fn std_error(&self) -> Option<f64> {
        match self {
            Self::Value { std_error, .. } => Some(*std_error),
            Self::Missing(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }
}

/// The g2 function for every (bin, lag) pair of an analysis.
///
/// Entries are indexed as `[bin, lag_index]`, where `lag_index` indexes into [CorrelationResult::lags].
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationResult {
    lags: Vec<usize>,
    entries: Array2<G2Entry>,
    pixel_counts: Vec<usize>,
    q_centers: Option<Vec<f64>>,
}

impl CorrelationResult {
    pub fn num_bins(&self) -> usize {
        self.entries.nrows()
    }

    pub fn lags(&self) -> &[usize] {
        &self.lags
    }

    /// Number of valid pixels that fed each bin
    pub fn pixel_counts(&self) -> &[usize] {
        &self.pixel_counts
    }

    pub fn q_centers(&self) -> Option<&[f64]> {
        self.q_centers.as_deref()
    }

    pub fn entries(&self) -> &Array2<G2Entry> {
        &self.entries
    }

    pub fn get(&self, bin: usize, lag_index: usize) -> Option<&G2Entry> {
        self.entries.get((bin, lag_index))
    }

    /// Look up an entry by lag value rather than by position in the schedule
    pub fn get_lag(&self, bin: usize, lag: usize) -> Option<&G2Entry> {
        let lag_index = self.lags.iter().position(|l| *l == lag)?;
        self.get(bin, lag_index)
    }

    /// g2 values as a dense array; missing entries are NaN and flagged in [Self::missing_flags]
    pub fn g2_values(&self) -> Array2<f64> {
        self.entries.map(|e| e.value().unwrap_or(f64::NAN))
    }

    pub fn std_errors(&self) -> Array2<f64> {
        self.entries.map(|e| e.std_error().unwrap_or(f64::NAN))
    }

    /// 1 where the entry is missing, 0 otherwise
    pub fn missing_flags(&self) -> Array2<u8> {
        self.entries.map(|e| e.is_missing() as u8)
    }

    pub fn n_missing(&self) -> usize {
        self.entries.iter().filter(|e| e.is_missing()).count()
    }
}

/// A two-time correlation map for one q bin. Entries are `None` where the ratio is undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoTimeMap {
    pub bin: usize,
    pub values: Array2<Option<f64>>,
}

impl TwoTimeMap {
    /// Dense copy with NaN for undefined entries
    pub fn to_array(&self) -> Array2<f64> {
        self.values.map(|v| v.unwrap_or(f64::NAN))
    }
}

/// Structural checks shared by the correlation functions
fn check_inputs(
    frames: &FrameSeries,
    mask: Option<&Mask>,
    bins: &QBinMap,
) -> Result<(), CorrelationError> {
    if frames.is_empty() {
        return Err(CorrelationError::EmptySeries);
    }
    let expected = frames.frame_shape();
    if let Some(mask) = mask {
        if mask.shape() != expected {
            return Err(CorrelationError::ShapeMismatch {
                what: "mask",
                found: mask.shape(),
                expected,
            });
        }
    }
    if bins.shape() != expected {
        return Err(CorrelationError::ShapeMismatch {
            what: "q bin assignment",
            found: bins.shape(),
            expected,
        });
    }
    Ok(())
}

/// Running sums for one (bin, lag) pair
#[derive(Debug, Default)]
struct PairSums {
    n: usize,
    product: f64,
    product_sq: f64,
    left: f64,
    right: f64,
}

impl PairSums {
    fn accumulate(data: &ArrayView3<'_, f64>, pixels: &[(usize, usize)], lag: usize) -> Self {
        let n_frames = data.shape()[0];
        let mut sums = Self::default();
        for t in 0..n_frames.saturating_sub(lag) {
            for (row, col) in pixels {
                let left = data[[t, *row, *col]];
                let right = data[[t + lag, *row, *col]];
                if !(left.is_finite() && right.is_finite()) {
                    continue;
                }
                let product = left * right;
                sums.n += 1;
                sums.product += product;
                sums.product_sq += product * product;
                sums.left += left;
                sums.right += right;
            }
        }
        sums
    }

    fn into_entry(self) -> G2Entry {
        if self.n == 0 {
            return G2Entry::Missing(MissingReason::NoValidPairs);
        }
        let n = self.n as f64;
        let mean_product = self.product / n;
        let norm = (self.left / n) * (self.right / n);
        if norm == 0.0 {
            return G2Entry::Missing(MissingReason::ZeroMeanIntensity);
        }
        let variance = if self.n > 1 {
            ((self.product_sq - n * mean_product * mean_product) / (n - 1.0)).max(0.0)
        } else {
            0.0
        };
        G2Entry::Value {
            g2: mean_product / norm,
            std_error: (variance / n).sqrt() / norm.abs(),
            n_samples: self.n,
        }
    }
}

/// Compute the multi-tau normalized intensity autocorrelation g2 for every q bin.
///
/// `mask` may be None, in which case no pixels are excluded beyond those the bin map
/// leaves unassigned. Fails with `EmptySeries` for a series without frames, with
/// `ShapeMismatch` if the mask or bin map do not match the frame shape, and with
/// `InvalidLagSchedule` if any lag does not fit the series.
pub fn compute_g2(
    frames: &FrameSeries,
    mask: Option<&Mask>,
    bins: &QBinMap,
    lags: &LagSchedule,
) -> Result<CorrelationResult, CorrelationError> {
    check_inputs(frames, mask, bins)?;
    lags.validate_for(frames.n_frames())?;

    let data = frames.data().view();
    let groups = bins.pixels_by_bin(mask);
    let mut entries = Array2::from_elem(
        (groups.len(), lags.len()),
        G2Entry::Missing(MissingReason::NoValidPixels),
    );
    for (bin, pixels) in groups.iter().enumerate() {
        if pixels.is_empty() {
            spdlog::debug!("Bin {bin} has no valid pixels; all lags are missing");
            continue;
        }
        for (lag_index, lag) in lags.lags().iter().enumerate() {
            entries[[bin, lag_index]] = PairSums::accumulate(&data, pixels, *lag).into_entry();
        }
    }

    let result = CorrelationResult {
        lags: lags.lags().to_vec(),
        entries,
        pixel_counts: groups.iter().map(Vec::len).collect(),
        q_centers: bins.q_centers().map(<[f64]>::to_vec),
    };
    spdlog::debug!(
        "Computed g2 for {} bins and {} lags ({} entries missing)",
        result.num_bins(),
        result.lags().len(),
        result.n_missing()
    );
    Ok(result)
}

/// Compute the two-time correlation map C(t1, t2) of a single q bin.
///
/// Each entry is `<I(t1)·I(t2)>_p / (<I(t1)>_p · <I(t2)>_p)` over the valid pixels `p`
/// of the bin. The map is symmetric. Entries are None when the bin has no valid pixels,
/// when either frame has zero mean intensity in the bin, or when the ratio is not finite.
pub fn compute_two_time(
    frames: &FrameSeries,
    mask: Option<&Mask>,
    bins: &QBinMap,
    bin: usize,
) -> Result<TwoTimeMap, CorrelationError> {
    check_inputs(frames, mask, bins)?;
    if bin >= bins.num_bins() {
        return Err(CorrelationError::BinOutOfRange {
            bin,
            num_bins: bins.num_bins(),
        });
    }

    let n_frames = frames.n_frames();
    let pixels = bins.pixels_by_bin(mask).swap_remove(bin);
    let mut values = Array2::<Option<f64>>::from_elem((n_frames, n_frames), None);
    if pixels.is_empty() {
        return Ok(TwoTimeMap { bin, values });
    }

    // intensities of the bin, one row per frame
    let n_pixels = pixels.len();
    let data = frames.data();
    let intensities = Array2::from_shape_fn((n_frames, n_pixels), |(t, p)| {
        let (row, col) = pixels[p];
        data[[t, row, col]]
    });
    let means: Vec<f64> = intensities
        .rows()
        .into_iter()
        .map(|row| row.sum() / n_pixels as f64)
        .collect();

    for t1 in 0..n_frames {
        for t2 in t1..n_frames {
            let norm = means[t1] * means[t2];
            if norm == 0.0 {
                continue;
            }
            let product = intensities.row(t1).dot(&intensities.row(t2)) / n_pixels as f64;
            let value = Some(product / norm).filter(|v| v.is_finite());
            values[[t1, t2]] = value;
            values[[t2, t1]] = value;
        }
    }
    Ok(TwoTimeMap { bin, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};

    /// A single pixel series in a single bin
    fn single_pixel(intensities: &[f64]) -> (FrameSeries, QBinMap) {
        let data = Array3::from_shape_vec((intensities.len(), 1, 1), intensities.to_vec()).unwrap();
        let bins = QBinMap::new(arr2(&[[Some(0)]]), 1).unwrap();
        (FrameSeries::with_interval(data, 1.0), bins)
    }

    /// Deterministic fluctuating data on a 2x3 detector, two bins
    fn speckle() -> (FrameSeries, QBinMap) {
        let n_frames = 12;
        let data = Array3::from_shape_fn((n_frames, 2, 3), |(t, row, col)| {
            let phase = (t * 7 + row * 3 + col * 5) % 11;
            1.0 + phase as f64 + (row + col) as f64 * 0.5
        });
        let bins = QBinMap::new(
            arr2(&[[Some(0), Some(0), Some(1)], [Some(1), None, Some(0)]]),
            2,
        )
        .unwrap();
        (FrameSeries::with_interval(data, 0.1), bins)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_alternating_single_pixel() {
        let (frames, bins) = single_pixel(&[1.0, 2.0, 1.0, 2.0, 1.0]);
        let lags = LagSchedule::new(&[0, 1]).unwrap();
        let result = compute_g2(&frames, None, &bins, &lags).unwrap();
        let g2_0 = result.get(0, 0).unwrap().value().unwrap();
        let g2_1 = result.get(0, 1).unwrap().value().unwrap();
        assert_close(g2_0, 2.2 / 1.96);
        assert_close(g2_1, 2.0 / 2.25);
        assert!((g2_0 - 1.122).abs() < 1e-3);
        assert!((g2_1 - 0.889).abs() < 1e-3);
        match result.get_lag(0, 1) {
            Some(G2Entry::Value { n_samples, std_error, .. }) => {
                assert_eq!(*n_samples, 4);
                // every product is 2, so there is no spread
                assert_close(*std_error, 0.0);
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn test_zero_lag_at_least_one() {
        let (frames, bins) = speckle();
        let lags = LagSchedule::new(&[0, 1, 2]).unwrap();
        let result = compute_g2(&frames, None, &bins, &lags).unwrap();
        for bin in 0..2 {
            assert!(result.get(bin, 0).unwrap().value().unwrap() >= 1.0);
        }
    }

    #[test]
    fn test_scale_invariance() {
        let (frames, bins) = speckle();
        let lags = LagSchedule::multi_tau(frames.n_frames(), 4, true).unwrap();
        let base = compute_g2(&frames, None, &bins, &lags).unwrap();
        let scaled = compute_g2(&frames.scaled(37.5), None, &bins, &lags).unwrap();
        for (a, b) in base.g2_values().iter().zip(scaled.g2_values().iter()) {
            assert!((a - b).abs() < 1e-9 * a.abs().max(1.0));
        }
    }

    #[test]
    fn test_fully_masked_bin_is_missing() {
        let (frames, bins) = speckle();
        let mut mask = Mask::new((2, 3));
        // bin 1 is pixels (0, 2) and (1, 0)
        mask.set_excluded(0, 2, true);
        mask.set_excluded(1, 0, true);
        let lags = LagSchedule::new(&[0, 1, 5]).unwrap();
        let result = compute_g2(&frames, Some(&mask), &bins, &lags).unwrap();
        assert_eq!(result.pixel_counts(), &[3, 0]);
        for lag_index in 0..3 {
            assert_eq!(
                result.get(1, lag_index),
                Some(&G2Entry::Missing(MissingReason::NoValidPixels))
            );
            assert!(!result.get(0, lag_index).unwrap().is_missing());
        }
        assert_eq!(result.n_missing(), 3);
        assert!(result.g2_values()[[1, 0]].is_nan());
        assert_eq!(result.missing_flags()[[1, 2]], 1);
        assert_eq!(result.missing_flags()[[0, 2]], 0);
    }

    #[test]
    fn test_masked_pixel_contributes_nothing() {
        let data = Array3::from_shape_fn((6, 1, 2), |(t, _, col)| {
            if col == 0 {
                [1.0, 3.0, 2.0, 5.0, 1.0, 4.0][t]
            } else {
                1000.0 * (t + 1) as f64
            }
        });
        let frames = FrameSeries::with_interval(data, 1.0);
        let bins = QBinMap::new(arr2(&[[Some(0), Some(0)]]), 1).unwrap();
        let mut mask = Mask::new((1, 2));
        mask.set_excluded(0, 1, true);
        let lags = LagSchedule::new(&[0, 2]).unwrap();
        let masked = compute_g2(&frames, Some(&mask), &bins, &lags).unwrap();

        let (single, single_bins) = single_pixel(&[1.0, 3.0, 2.0, 5.0, 1.0, 4.0]);
        let expected = compute_g2(&single, None, &single_bins, &lags).unwrap();
        assert_eq!(masked.g2_values(), expected.g2_values());
    }

    #[test]
    fn test_standard_error() {
        let (frames, bins) = single_pixel(&[1.0, 2.0, 3.0]);
        let lags = LagSchedule::new(&[0, 1]).unwrap();
        let result = compute_g2(&frames, None, &bins, &lags).unwrap();
        // lag 0: products 1, 4, 9 have sample std 7/√3, normalized by 2·2
        let zero = result.get(0, 0).unwrap();
        assert_close(zero.value().unwrap(), 14.0 / 12.0);
        assert_close(zero.std_error().unwrap(), 7.0 / 12.0);
        // lag 1: products 2, 6 have sample std √8, normalized by 1.5·2.5
        let one = result.get(0, 1).unwrap();
        assert_close(one.value().unwrap(), 4.0 / 3.75);
        assert_close(one.std_error().unwrap(), 2.0 / 3.75);
    }

    #[test]
    fn test_non_finite_samples_are_skipped() {
        let (frames, bins) = single_pixel(&[1.0, f64::NAN, 1.0, 2.0, 1.0, 2.0]);
        let lags = LagSchedule::new(&[0, 1]).unwrap();
        let result = compute_g2(&frames, None, &bins, &lags).unwrap();
        let (clean, clean_bins) = single_pixel(&[1.0, 1.0, 2.0, 1.0, 2.0]);
        let expected = compute_g2(&clean, None, &clean_bins, &LagSchedule::new(&[0]).unwrap())
            .unwrap();
        assert_close(
            result.get(0, 0).unwrap().value().unwrap(),
            expected.get(0, 0).unwrap().value().unwrap(),
        );
        // the pairs touching the NaN frame are dropped, the other three remain
        match result.get(0, 1) {
            Some(G2Entry::Value { g2, n_samples, .. }) => {
                assert_eq!(*n_samples, 3);
                assert!(g2.is_finite());
            }
            other => panic!("unexpected entry {other:?}"),
        }

        let (all_nan, nan_bins) = single_pixel(&[f64::NAN, f64::NAN]);
        let result = compute_g2(&all_nan, None, &nan_bins, &lags).unwrap();
        assert_eq!(
            result.get(0, 0),
            Some(&G2Entry::Missing(MissingReason::NoValidPairs))
        );
        assert!(result.g2_values().iter().all(|v| v.is_nan()));
        assert_eq!(result.n_missing(), 2);

        let map = compute_two_time(&frames, None, &bins, 0).unwrap();
        assert_eq!(map.values[[1, 2]], None);
        assert!(map.values[[0, 2]].is_some());
    }

    #[test]
    fn test_zero_intensity_is_missing() {
        let (frames, bins) = single_pixel(&[0.0, 0.0, 0.0]);
        let lags = LagSchedule::new(&[0, 1]).unwrap();
        let result = compute_g2(&frames, None, &bins, &lags).unwrap();
        assert_eq!(
            result.get(0, 0),
            Some(&G2Entry::Missing(MissingReason::ZeroMeanIntensity))
        );
        assert_eq!(result.n_missing(), 2);
    }

    #[test]
    fn test_invalid_lag_schedules() {
        assert!(matches!(
            LagSchedule::new(&[2, 1]),
            Err(CorrelationError::InvalidLagSchedule(_))
        ));
        assert!(matches!(
            LagSchedule::new(&[-1, 3]),
            Err(CorrelationError::InvalidLagSchedule(_))
        ));
        let (frames, bins) = single_pixel(&[1.0, 2.0, 3.0]);
        let too_long = LagSchedule::new(&[0, 3]).unwrap();
        assert!(matches!(
            compute_g2(&frames, None, &bins, &too_long),
            Err(CorrelationError::InvalidLagSchedule(_))
        ));
    }

    #[test]
    fn test_empty_series() {
        let frames = FrameSeries::with_interval(Array3::zeros((0, 2, 2)), 1.0);
        // even with inputs that would otherwise be rejected
        let bins = QBinMap::new(arr2(&[[Some(0)]]), 1).unwrap();
        let mask = Mask::new((5, 5));
        let lags = LagSchedule::new(&[0, 10]).unwrap();
        assert_eq!(
            compute_g2(&frames, Some(&mask), &bins, &lags),
            Err(CorrelationError::EmptySeries)
        );
        assert_eq!(
            compute_two_time(&frames, None, &bins, 0),
            Err(CorrelationError::EmptySeries)
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let (frames, bins) = speckle();
        let lags = LagSchedule::new(&[0]).unwrap();
        let mask = Mask::new((3, 2));
        assert_eq!(
            compute_g2(&frames, Some(&mask), &bins, &lags),
            Err(CorrelationError::ShapeMismatch {
                what: "mask",
                found: (3, 2),
                expected: (2, 3)
            })
        );
        let small_bins = QBinMap::new(arr2(&[[Some(0)]]), 1).unwrap();
        assert!(matches!(
            compute_g2(&frames, None, &small_bins, &lags),
            Err(CorrelationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_two_time() {
        let (frames, bins) = speckle();
        let map = compute_two_time(&frames, None, &bins, 0).unwrap();
        let n = frames.n_frames();
        assert_eq!(map.values.dim(), (n, n));
        for t1 in 0..n {
            for t2 in 0..n {
                assert_eq!(map.values[[t1, t2]], map.values[[t2, t1]]);
            }
        }

        // the diagonal is the zero lag g2 of each individual frame
        let pixels = bins.pixels_by_bin(None).swap_remove(0);
        let frame = frames.frame(3);
        let values: Vec<f64> = pixels.iter().map(|(r, c)| frame[[*r, *c]]).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let mean_sq = values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
        assert_close(map.values[[3, 3]].unwrap(), mean_sq / (mean * mean));

        assert_eq!(
            compute_two_time(&frames, None, &bins, 2),
            Err(CorrelationError::BinOutOfRange {
                bin: 2,
                num_bins: 2
            })
        );
    }

    #[test]
    fn test_two_time_masked_bin() {
        let (frames, bins) = speckle();
        let mut mask = Mask::new((2, 3));
        mask.set_excluded(0, 2, true);
        mask.set_excluded(1, 0, true);
        let map = compute_two_time(&frames, Some(&mask), &bins, 1).unwrap();
        assert!(map.values.iter().all(Option::is_none));
        assert!(map.to_array()[[0, 0]].is_nan());
    }
}
