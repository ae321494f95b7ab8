use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::beamline::{detect_profile, profile_by_key, BeamlineProfile};
use super::error::{ConfigError, ReaderError};
use super::lag_schedule::LagSchedule;
use super::mask::MaskPolarity;
use super::qmap::PartialGeometry;
use super::reader::{is_supported_file, DatasetReader};

/// Profile key which asks for the beamline to be detected from the file contents
pub const AUTO_BEAMLINE: &str = "auto";

/// Structure representing the application configuration. Contains pathing and analysis parameters
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml. Missing fields
/// take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data files, or directories whose HDF5/NeXus files are all analyzed
    pub input_files: Vec<PathBuf>,
    pub output_path: PathBuf,
    /// "auto" or the key of a built-in or custom profile
    pub beamline: String,
    pub custom_profiles: Vec<BeamlineProfile>,
    pub strict_nexus: bool,
    /// External mask, merged with any mask stored in the data file
    pub mask_path: Option<PathBuf>,
    pub mask_polarity: MaskPolarity,
    /// Overrides for the beam geometry found in the file
    pub geometry: PartialGeometry,
    pub n_q_bins: usize,
    pub q_range: Option<(f64, f64)>,
    /// Explicit lags in frames. If absent, a multi-tau schedule is generated.
    pub lags: Option<Vec<i64>>,
    pub multi_tau_points: usize,
    pub include_zero_lag: bool,
    pub two_time_bins: Vec<usize>,
    pub guinier_q_max: Option<f64>,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. Paths are empty/invalid
    fn default() -> Self {
        Self {
            input_files: vec![],
            output_path: PathBuf::from("None"),
            beamline: String::from(AUTO_BEAMLINE),
            custom_profiles: vec![],
            strict_nexus: false,
            mask_path: None,
            mask_polarity: MaskPolarity::ZeroExcludes,
            geometry: PartialGeometry::default(),
            n_q_bins: 50,
            q_range: None,
            lags: None,
            multi_tau_points: 8,
            include_zero_lag: true,
            two_time_bins: vec![],
            guinier_q_max: None,
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Expand the input list into data files. Directories contribute every supported
    /// file they hold, in name order.
    pub fn collect_input_files(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut files = Vec::new();
        for input in self.input_files.iter() {
            if input.is_dir() {
                let mut found: Vec<PathBuf> = std::fs::read_dir(input)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|path| path.is_file() && is_supported_file(path))
                    .collect();
                found.sort();
                files.append(&mut found);
            } else if input.exists() {
                files.push(input.clone());
            } else {
                return Err(ConfigError::BadFilePath(input.clone()));
            }
        }
        Ok(files)
    }

    /// Get the path to the output hdf5 file for an input file
    pub fn get_output_file_name(&self, input_file: &Path) -> Result<PathBuf, ConfigError> {
        let stem = input_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("scan"));
        if self.output_path.exists() {
            Ok(self.output_path.join(format!("{stem}_xpcs.h5")))
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn is_auto_beamline(&self) -> bool {
        self.beamline.eq_ignore_ascii_case(AUTO_BEAMLINE)
    }

    /// The beamline profile used to read a file, either named in the config or detected
    pub fn beamline_profile(&self, reader: &dyn DatasetReader) -> Result<BeamlineProfile, ReaderError> {
        if self.is_auto_beamline() {
            detect_profile(reader, &self.custom_profiles, self.strict_nexus)
        } else {
            profile_by_key(&self.beamline, &self.custom_profiles)
        }
    }

    /// The lag schedule for a series of `n_frames` frames
    pub fn lag_schedule(&self, n_frames: usize) -> Result<LagSchedule, ConfigError> {
        match &self.lags {
            Some(lags) => Ok(LagSchedule::new(lags)?),
            None => Ok(LagSchedule::multi_tau(
                n_frames,
                self.multi_tau_points,
                self.include_zero_lag,
            )?),
        }
    }
}
