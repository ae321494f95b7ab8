use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::error::CorrelationError;
use super::mask::Mask;
use super::qmap::QBinMap;

/// A 1D SAXS curve: mean intensity per q bin.
///
/// Bins without any valid pixel have `None` intensity and error.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialProfile {
    pub q: Option<Vec<f64>>,
    pub intensity: Vec<Option<f64>>,
    pub std_error: Vec<Option<f64>>,
    pub pixel_counts: Vec<usize>,
}

/// Result of a Guinier fit, ln I(q) = ln I(0) - (Rg² / 3) q²
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuinierFit {
    pub radius_of_gyration: f64,
    pub i_zero: f64,
    pub n_points: usize,
}

/// Average a 2D image over azimuth, one value per q bin
pub fn azimuthal_average(
    image: ArrayView2<'_, f64>,
    mask: Option<&Mask>,
    bins: &QBinMap,
) -> Result<RadialProfile, CorrelationError> {
    let expected = image.dim();
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

    let groups = bins.pixels_by_bin(mask);
    let mut intensity = Vec::with_capacity(groups.len());
    let mut std_error = Vec::with_capacity(groups.len());
    for pixels in groups.iter() {
        if pixels.is_empty() {
            intensity.push(None);
            std_error.push(None);
            continue;
        }
        let n = pixels.len() as f64;
        let mean = pixels.iter().map(|(r, c)| image[[*r, *c]]).sum::<f64>() / n;
        let error = if pixels.len() > 1 {
            let variance = pixels
                .iter()
                .map(|(r, c)| (image[[*r, *c]] - mean).powi(2))
                .sum::<f64>()
                / (n - 1.0);
            (variance / n).sqrt()
        } else {
            0.0
        };
        intensity.push(Some(mean));
        std_error.push(Some(error));
    }

    Ok(RadialProfile {
        q: bins.q_centers().map(<[f64]>::to_vec),
        intensity,
        std_error,
        pixel_counts: groups.iter().map(Vec::len).collect(),
    })
}

/// Kratky representation (q, q²·I(q)); empty bins are skipped
pub fn kratky(profile: &RadialProfile) -> Result<Vec<(f64, f64)>, CorrelationError> {
    let q = profile.q.as_ref().ok_or(CorrelationError::MissingQCenters)?;
    Ok(q.iter()
        .zip(profile.intensity.iter())
        .filter_map(|(q, i)| i.map(|i| (*q, q * q * i)))
        .collect())
}

/// Guinier representation (q², ln I(q)); empty bins and non-positive intensities are skipped
pub fn guinier(profile: &RadialProfile) -> Result<Vec<(f64, f64)>, CorrelationError> {
    let q = profile.q.as_ref().ok_or(CorrelationError::MissingQCenters)?;
    Ok(q.iter()
        .zip(profile.intensity.iter())
        .filter_map(|(q, i)| match i {
            Some(i) if *i > 0.0 => Some((q * q, i.ln())),
            _ => None,
        })
        .collect())
}

/// Fit a line to the Guinier representation for q <= q_max
pub fn guinier_fit(profile: &RadialProfile, q_max: f64) -> Result<GuinierFit, CorrelationError> {
    let points: Vec<(f64, f64)> = guinier(profile)?
        .into_iter()
        .filter(|(q2, _)| q2.sqrt() <= q_max)
        .collect();
    if points.len() < 2 {
        return Err(CorrelationError::GuinierError(format!(
            "{} points below q = {q_max}, need at least 2",
            points.len()
        )));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    if sxx == 0.0 {
        return Err(CorrelationError::GuinierError(String::from(
            "all points share the same q",
        )));
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    if slope >= 0.0 {
        return Err(CorrelationError::GuinierError(format!(
            "slope {slope} is not negative"
        )));
    }
    Ok(GuinierFit {
        radius_of_gyration: (-3.0 * slope).sqrt(),
        i_zero: intercept.exp(),
        n_points: points.len(),
    })
}
