use hdf5::types::VarLenUnicode;
use hdf5::File;
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::beamline::{ScanMetadata, StoredResults};
use super::correlation::{CorrelationResult, TwoTimeMap};
use super::error::HDF5WriterError;
use super::frames::FrameSeries;
use super::saxs::{self, GuinierFit, RadialProfile};

const XPCS_NAME: &str = "xpcs";
const SAXS_NAME: &str = "saxs";
const TWOTIME_NAME: &str = "twotime";
const STORED_NAME: &str = "stored";
/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

/// Run summary written next to the HDF5 file
#[derive(Debug, Clone, Default, Serialize)]
struct ResultSummary {
    version: String,
    created: String,
    source: String,
    metadata: ScanMetadata,
    n_frames: usize,
    frame_shape: (usize, usize),
    data_size: String,
    lags: Vec<usize>,
    n_q_bins: usize,
    g2_missing: usize,
    two_time_bins: Vec<usize>,
    guinier: Option<GuinierFit>,
    stored_results: Vec<String>,
}

fn write_string_attr(group: &hdf5::Group, name: &str, value: &str) -> Result<(), HDF5WriterError> {
    let value =
        VarLenUnicode::from_str(value).map_err(|e| HDF5WriterError::StringError(e.to_string()))?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_u64(values: &[usize]) -> Array1<u64> {
    values.iter().map(|v| *v as u64).collect()
}

/// (x, y) points as an [n, 2] array
fn to_columns(points: &[(f64, f64)]) -> Array2<f64> {
    Array2::from_shape_fn((points.len(), 2), |(row, col)| {
        if col == 0 {
            points[row].0
        } else {
            points[row].1
        }
    })
}

/// A simple struct which wraps around the hdf5-rust library.
///
/// Opens an HDF5 file for writing the results of one scan.
#[derive(Debug)]
pub struct ResultWriter {
    file_handle: File,
    sidecar_path: PathBuf,
    xpcs_group: hdf5::Group,
    saxs_group: hdf5::Group,
    twotime_group: hdf5::Group,
    summary: ResultSummary,
}
// Structure
// xpcs - version, created, source, beamline, sample_name
// |---- g2, g2_err, g2_missing (dset, [bin, lag])
// |---- lags, tau, q, pixel_counts, timestamps (dset)
// saxs - radius_of_gyration, i_zero (when fitted)
// |---- q, intensity, intensity_err, pixel_counts (dset)
// |---- kratky, guinier (dset, [point, (x, y)], when q is known)
// |---- mean_image (dset)
// twotime
// |---- bin_# (dset, [t1, t2])
// stored (only when the data file carries beamline results)
// |---- g2, tau, twotime, intensity (dset, as found)

impl ResultWriter {
    /// Create the writer, opening a file at path and creating the data groups
    pub fn new(path: &Path, source: &Path, metadata: &ScanMetadata) -> Result<Self, HDF5WriterError> {
        let file_handle = File::create(path)?;
        let sidecar_path = path.with_extension("yml");

        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
        let created = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let source = source.to_string_lossy().to_string();

        let xpcs_group = file_handle.create_group(XPCS_NAME)?;
        write_string_attr(&xpcs_group, "version", &version)?;
        write_string_attr(&xpcs_group, "created", &created)?;
        write_string_attr(&xpcs_group, "source", &source)?;
        write_string_attr(&xpcs_group, "beamline", &metadata.beamline)?;
        if let Some(sample) = metadata.sample_name.as_deref() {
            write_string_attr(&xpcs_group, "sample_name", sample)?;
        }
        let saxs_group = file_handle.create_group(SAXS_NAME)?;
        let twotime_group = file_handle.create_group(TWOTIME_NAME)?;

        Ok(Self {
            file_handle,
            sidecar_path,
            xpcs_group,
            saxs_group,
            twotime_group,
            summary: ResultSummary {
                version,
                created,
                source,
                metadata: metadata.clone(),
                ..Default::default()
            },
        })
    }

    /// Write the frame timestamps and the time averaged detector image
    pub fn write_frames_info(&mut self, frames: &FrameSeries) -> Result<(), HDF5WriterError> {
        self.xpcs_group
            .new_dataset_builder()
            .with_data(&Array1::from_vec(frames.timestamps().to_vec()))
            .create("timestamps")?;
        if let Some(mean) = frames.mean_image() {
            self.saxs_group
                .new_dataset_builder()
                .with_data(&mean)
                .create("mean_image")?;
        }
        self.summary.n_frames = frames.n_frames();
        self.summary.frame_shape = frames.frame_shape();
        self.summary.data_size = human_bytes::human_bytes(frames.size_bytes() as f64);
        Ok(())
    }

    /// Write g2 with its errors. Missing entries are NaN in g2/g2_err and flagged in g2_missing.
    pub fn write_correlation(
        &mut self,
        result: &CorrelationResult,
        tau: &[f64],
    ) -> Result<(), HDF5WriterError> {
        let group = &self.xpcs_group;
        group
            .new_dataset_builder()
            .with_data(&result.g2_values())
            .create("g2")?;
        group
            .new_dataset_builder()
            .with_data(&result.std_errors())
            .create("g2_err")?;
        group
            .new_dataset_builder()
            .with_data(&result.missing_flags())
            .create("g2_missing")?;
        group
            .new_dataset_builder()
            .with_data(&to_u64(result.lags()))
            .create("lags")?;
        group
            .new_dataset_builder()
            .with_data(&Array1::from_vec(tau.to_vec()))
            .create("tau")?;
        group
            .new_dataset_builder()
            .with_data(&to_u64(result.pixel_counts()))
            .create("pixel_counts")?;
        if let Some(q) = result.q_centers() {
            group
                .new_dataset_builder()
                .with_data(&Array1::from_vec(q.to_vec()))
                .create("q")?;
        }

        self.summary.lags = result.lags().to_vec();
        self.summary.n_q_bins = result.num_bins();
        self.summary.g2_missing = result.n_missing();
        Ok(())
    }

    /// Write the azimuthally averaged profile, and its Guinier fit if there is one
    pub fn write_profile(
        &mut self,
        profile: &RadialProfile,
        guinier: Option<&GuinierFit>,
    ) -> Result<(), HDF5WriterError> {
        let group = &self.saxs_group;
        let dense = |values: &[Option<f64>]| -> Array1<f64> {
            values.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
        };
        group
            .new_dataset_builder()
            .with_data(&dense(&profile.intensity))
            .create("intensity")?;
        group
            .new_dataset_builder()
            .with_data(&dense(&profile.std_error))
            .create("intensity_err")?;
        group
            .new_dataset_builder()
            .with_data(&to_u64(&profile.pixel_counts))
            .create("pixel_counts")?;
        if let Some(q) = profile.q.as_ref() {
            group
                .new_dataset_builder()
                .with_data(&Array1::from_vec(q.clone()))
                .create("q")?;
            if let Ok(points) = saxs::kratky(profile) {
                group
                    .new_dataset_builder()
                    .with_data(&to_columns(&points))
                    .create("kratky")?;
            }
            if let Ok(points) = saxs::guinier(profile) {
                group
                    .new_dataset_builder()
                    .with_data(&to_columns(&points))
                    .create("guinier")?;
            }
        }
        if let Some(fit) = guinier {
            group
                .new_attr::<f64>()
                .create("radius_of_gyration")?
                .write_scalar(&fit.radius_of_gyration)?;
            group
                .new_attr::<f64>()
                .create("i_zero")?
                .write_scalar(&fit.i_zero)?;
            self.summary.guinier = Some(*fit);
        }
        Ok(())
    }

    /// Write the two-time map of one bin. Undefined entries are NaN.
    pub fn write_two_time(&mut self, map: &TwoTimeMap) -> Result<(), HDF5WriterError> {
        self.twotime_group
            .new_dataset_builder()
            .with_data(&map.to_array())
            .create(format!("bin_{}", map.bin).as_str())?;
        self.summary.two_time_bins.push(map.bin);
        Ok(())
    }

    /// Copy the results the beamline software stored in the data file, if there are any
    pub fn write_stored_results(&mut self, stored: &StoredResults) -> Result<(), HDF5WriterError> {
        if stored.is_empty() {
            return Ok(());
        }
        let group = self.file_handle.create_group(STORED_NAME)?;
        for (name, data) in [
            ("g2", &stored.g2),
            ("tau", &stored.tau),
            ("twotime", &stored.twotime),
            ("intensity", &stored.intensity),
        ] {
            if let Some(data) = data {
                group.new_dataset_builder().with_data(data).create(name)?;
                self.summary.stored_results.push(name.to_string());
            }
        }
        Ok(())
    }

    /// Write the yaml summary and flush the file, consuming the writer
    pub fn close(self) -> Result<(), HDF5WriterError> {
        let mut sidecar = std::fs::File::create(&self.sidecar_path)?;
        sidecar.write_all(serde_yaml::to_string(&self.summary)?.as_bytes())?;
        self.file_handle.flush()?;
        spdlog::info!(
            "Wrote g2 for {} q bins and {} lags ({} missing) from {} frames ({}).",
            self.summary.n_q_bins,
            self.summary.lags.len(),
            self.summary.g2_missing,
            self.summary.n_frames,
            self.summary.data_size
        );
        Ok(())
    }
}
