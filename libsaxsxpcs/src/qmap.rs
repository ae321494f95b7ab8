use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::error::{CorrelationError, GeometryError};
use super::mask::Mask;

/// hc in keV·Å, used to convert photon energy to wavelength
const HC_KEV_ANGSTROM: f64 = 12.398419843320026;

/// Convert a photon energy in keV to a wavelength in Å
pub fn wavelength_from_energy(energy_kev: f64) -> f64 {
    HC_KEV_ANGSTROM / energy_kev
}

/// The scattering geometry of a detector.
///
/// Beam center is in pixels as (x = column, y = row). Distances and pixel sizes are
/// in metres, the wavelength in Å, so q comes out in Å⁻¹.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamGeometry {
    pub beam_center_x: f64,
    pub beam_center_y: f64,
    pub detector_distance: f64,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub wavelength: f64,
}

impl BeamGeometry {
    /// Check that every physical length is positive
    pub fn validate(&self) -> Result<(), GeometryError> {
        for (name, value) in [
            ("detector_distance", self.detector_distance),
            ("pixel_size_x", self.pixel_size_x),
            ("pixel_size_y", self.pixel_size_y),
            ("wavelength", self.wavelength),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(GeometryError::NonPositive(name, value));
            }
        }
        Ok(())
    }

    /// Magnitude of the scattering vector at pixel (row, col)
    pub fn q_at(&self, row: usize, col: usize) -> f64 {
        let dx = (col as f64 - self.beam_center_x) * self.pixel_size_x;
        let dy = (row as f64 - self.beam_center_y) * self.pixel_size_y;
        let two_theta = (dx.hypot(dy) / self.detector_distance).atan();
        4.0 * std::f64::consts::PI / self.wavelength * (two_theta / 2.0).sin()
    }

    /// Compute q for every pixel of a detector with the given (rows, cols) shape
    pub fn q_map(&self, shape: (usize, usize)) -> Result<Array2<f64>, GeometryError> {
        self.validate()?;
        Ok(Array2::from_shape_fn(shape, |(row, col)| self.q_at(row, col)))
    }
}

/// Beam geometry where any parameter may still be unknown.
///
/// Geometry is assembled from several sources (user overrides, file metadata,
/// beamline defaults), each filling in what the previous left open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialGeometry {
    pub beam_center_x: Option<f64>,
    pub beam_center_y: Option<f64>,
    pub detector_distance: Option<f64>,
    pub pixel_size_x: Option<f64>,
    pub pixel_size_y: Option<f64>,
    pub wavelength: Option<f64>,
}

impl PartialGeometry {
    /// Take every known parameter from self, the rest from `fallback`
    pub fn or(self, fallback: Self) -> Self {
        Self {
            beam_center_x: self.beam_center_x.or(fallback.beam_center_x),
            beam_center_y: self.beam_center_y.or(fallback.beam_center_y),
            detector_distance: self.detector_distance.or(fallback.detector_distance),
            pixel_size_x: self.pixel_size_x.or(fallback.pixel_size_x),
            pixel_size_y: self.pixel_size_y.or(fallback.pixel_size_y),
            wavelength: self.wavelength.or(fallback.wavelength),
        }
    }

    /// Resolve into a full geometry for a detector of (rows, cols) `shape`.
    ///
    /// A missing beam center falls back to the middle of the detector, and a missing
    /// vertical pixel size to the horizontal one.
    pub fn resolve(&self, shape: (usize, usize)) -> Result<BeamGeometry, GeometryError> {
        let pixel_size_x = self
            .pixel_size_x
            .or(self.pixel_size_y)
            .ok_or(GeometryError::MissingParameter("pixel_size_x"))?;
        let geometry = BeamGeometry {
            beam_center_x: self.beam_center_x.unwrap_or(shape.1 as f64 / 2.0),
            beam_center_y: self.beam_center_y.unwrap_or(shape.0 as f64 / 2.0),
            detector_distance: self
                .detector_distance
                .ok_or(GeometryError::MissingParameter("detector_distance"))?,
            pixel_size_x,
            pixel_size_y: self.pixel_size_y.unwrap_or(pixel_size_x),
            wavelength: self
                .wavelength
                .ok_or(GeometryError::MissingParameter("wavelength"))?,
        };
        geometry.validate()?;
        Ok(geometry)
    }
}

/// Assignment of detector pixels to discrete q bins.
///
/// `None` marks a pixel that belongs to no bin. Every assigned index is below
/// `num_bins`.
#[derive(Debug, Clone, PartialEq)]
pub struct QBinMap {
    bins: Array2<Option<usize>>,
    num_bins: usize,
    q_centers: Option<Vec<f64>>,
}

impl QBinMap {
    /// Create a map from explicit assignments, checking every index against `num_bins`
    pub fn new(bins: Array2<Option<usize>>, num_bins: usize) -> Result<Self, CorrelationError> {
        for ((row, col), bin) in bins.indexed_iter() {
            if let Some(bin) = bin {
                if *bin >= num_bins {
                    return Err(CorrelationError::InvalidBinIndex {
                        row,
                        col,
                        bin: *bin,
                        num_bins,
                    });
                }
            }
        }
        Ok(Self {
            bins,
            num_bins,
            q_centers: None,
        })
    }

    /// Attach the q value at the center of each bin. There must be one per bin.
    pub fn with_q_centers(mut self, q_centers: Vec<f64>) -> Result<Self, CorrelationError> {
        if q_centers.len() != self.num_bins {
            return Err(CorrelationError::QCenterCount {
                found: q_centers.len(),
                num_bins: self.num_bins,
            });
        }
        self.q_centers = Some(q_centers);
        Ok(self)
    }

    /// Bin a q map into `n_bins` linear bins spanning `q_range`.
    ///
    /// Without an explicit range the range of the unmasked, finite q values is used.
    /// Masked pixels and pixels outside the range are left unassigned.
    pub fn from_q_map(
        q_map: ArrayView2<'_, f64>,
        mask: Option<&Mask>,
        n_bins: usize,
        q_range: Option<(f64, f64)>,
    ) -> Result<Self, GeometryError> {
        if n_bins == 0 {
            return Err(GeometryError::NoBins);
        }
        let is_valid = |row: usize, col: usize, q: f64| {
            q.is_finite() && !mask.is_some_and(|m| m.is_excluded(row, col))
        };

        let (q_min, q_max) = match q_range {
            Some(range) => range,
            None => q_map
                .indexed_iter()
                .filter(|((row, col), q)| is_valid(*row, *col, **q))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, q)| {
                    (lo.min(*q), hi.max(*q))
                }),
        };
        if !(q_min.is_finite() && q_max.is_finite()) || q_max < q_min {
            return Err(GeometryError::InvalidQRange(q_min, q_max));
        }

        let width = (q_max - q_min) / n_bins as f64;
        let bins = Array2::from_shape_fn(q_map.dim(), |(row, col)| {
            let q = q_map[[row, col]];
            if !is_valid(row, col, q) || q < q_min || q > q_max {
                return None;
            }
            if width == 0.0 {
                return Some(0);
            }
            Some((((q - q_min) / width) as usize).min(n_bins - 1))
        });
        let q_centers = (0..n_bins)
            .map(|idx| q_min + (idx as f64 + 0.5) * width)
            .collect();

        Ok(Self {
            bins,
            num_bins: n_bins,
            q_centers: Some(q_centers),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.bins.dim()
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn bin(&self, row: usize, col: usize) -> Option<usize> {
        self.bins.get((row, col)).copied().flatten()
    }

    pub fn q_centers(&self) -> Option<&[f64]> {
        self.q_centers.as_deref()
    }

    /// (row, col) of every unmasked pixel, grouped by bin
    pub fn pixels_by_bin(&self, mask: Option<&Mask>) -> Vec<Vec<(usize, usize)>> {
        let mut groups = vec![Vec::new(); self.num_bins];
        for ((row, col), bin) in self.bins.indexed_iter() {
            if let Some(bin) = bin {
                if mask.is_some_and(|m| m.is_excluded(row, col)) {
                    continue;
                }
                groups[*bin].push((row, col));
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn geometry() -> BeamGeometry {
        BeamGeometry {
            beam_center_x: 1.0,
            beam_center_y: 1.0,
            detector_distance: 1.0,
            pixel_size_x: 1.0e-3,
            pixel_size_y: 1.0e-3,
            wavelength: 1.0,
        }
    }

    #[test]
    fn test_q_map() {
        let q = geometry().q_map((3, 3)).unwrap();
        assert_eq!(q[[1, 1]], 0.0);
        // symmetric about the beam center
        assert!((q[[0, 1]] - q[[2, 1]]).abs() < 1e-15);
        assert!((q[[1, 0]] - q[[1, 2]]).abs() < 1e-15);
        let expected = 4.0 * std::f64::consts::PI * ((1.0e-3f64).atan() / 2.0).sin();
        assert!((q[[1, 2]] - expected).abs() < 1e-12);
        assert!(q[[0, 0]] > q[[0, 1]]);
    }

    #[test]
    fn test_invalid_geometry() {
        let mut geo = geometry();
        geo.wavelength = 0.0;
        assert_eq!(
            geo.q_map((2, 2)),
            Err(GeometryError::NonPositive("wavelength", 0.0))
        );
    }

    #[test]
    fn test_wavelength_from_energy() {
        assert!((wavelength_from_energy(12.398419843320026) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_geometry() {
        let overrides = PartialGeometry {
            detector_distance: Some(2.0),
            ..Default::default()
        };
        let defaults = PartialGeometry {
            detector_distance: Some(5.0),
            pixel_size_x: Some(75e-6),
            wavelength: Some(1.24),
            ..Default::default()
        };
        let geometry = overrides.or(defaults).resolve((100, 200)).unwrap();
        assert_eq!(geometry.detector_distance, 2.0);
        assert_eq!(geometry.pixel_size_y, 75e-6);
        assert_eq!(geometry.beam_center_x, 100.0);
        assert_eq!(geometry.beam_center_y, 50.0);

        assert_eq!(
            overrides.resolve((10, 10)),
            Err(GeometryError::MissingParameter("pixel_size_x"))
        );
    }

    #[test]
    fn test_from_q_map() {
        let q = arr2(&[[0.0, 1.0, 2.0], [3.0, 4.0, f64::NAN]]);
        let mut mask = Mask::new((2, 3));
        mask.set_excluded(1, 1, true);
        let bins = QBinMap::from_q_map(q.view(), Some(&mask), 3, None).unwrap();
        assert_eq!(bins.num_bins(), 3);
        assert_eq!(bins.bin(0, 0), Some(0));
        assert_eq!(bins.bin(0, 1), Some(1));
        assert_eq!(bins.bin(0, 2), Some(2));
        assert_eq!(bins.bin(1, 0), Some(2));
        assert_eq!(bins.bin(1, 1), None);
        assert_eq!(bins.bin(1, 2), None);
        assert_eq!(bins.q_centers(), Some(&[0.5, 1.5, 2.5][..]));
        assert_eq!(
            bins.pixels_by_bin(None),
            vec![vec![(0, 0)], vec![(0, 1)], vec![(0, 2), (1, 0)]]
        );
    }

    #[test]
    fn test_explicit_range_and_bad_index() {
        let q = arr2(&[[0.0, 1.0], [2.0, 3.0]]);
        let bins = QBinMap::from_q_map(q.view(), None, 1, Some((0.5, 2.5))).unwrap();
        assert_eq!(bins.bin(0, 0), None);
        assert_eq!(bins.bin(1, 0), Some(0));
        assert_eq!(bins.bin(1, 1), None);

        let assignments = arr2(&[[Some(0), None], [Some(2), Some(1)]]);
        assert_eq!(
            QBinMap::new(assignments, 2),
            Err(CorrelationError::InvalidBinIndex {
                row: 1,
                col: 0,
                bin: 2,
                num_bins: 2
            })
        );
        assert!(matches!(
            QBinMap::from_q_map(q.view(), None, 0, None),
            Err(GeometryError::NoBins)
        ));
    }

    #[test]
    fn test_q_center_count() {
        let bins = QBinMap::new(arr2(&[[Some(0), Some(1)]]), 2).unwrap();
        assert_eq!(
            bins.clone().with_q_centers(vec![0.1]),
            Err(CorrelationError::QCenterCount {
                found: 1,
                num_bins: 2
            })
        );
        let bins = bins.with_q_centers(vec![0.1, 0.2]).unwrap();
        assert_eq!(bins.q_centers(), Some(&[0.1, 0.2][..]));
    }
}
