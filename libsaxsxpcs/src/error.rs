use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrelationError {
    #[error("Correlation requires at least one frame, but the FrameSeries is empty")]
    EmptySeries,
    #[error("Shape mismatch in {what}: found {found:?}, expected frame shape {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        found: (usize, usize),
        expected: (usize, usize),
    },
    #[error("Invalid lag schedule: {0}")]
    InvalidLagSchedule(String),
    #[error("Bin {bin} is out of range for a QBinMap with {num_bins} bins")]
    BinOutOfRange { bin: usize, num_bins: usize },
    #[error("Pixel ({row}, {col}) was assigned to bin {bin}, but the QBinMap only has {num_bins} bins")]
    InvalidBinIndex {
        row: usize,
        col: usize,
        bin: usize,
        num_bins: usize,
    },
    #[error("Found {found} q bin centers for a QBinMap with {num_bins} bins")]
    QCenterCount { found: usize, num_bins: usize },
    #[error("Profile has no q values; the QBinMap must carry bin centers")]
    MissingQCenters,
    #[error("Guinier fit failed: {0}")]
    GuinierError(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("FrameSeries has {frames} frames but {timestamps} timestamps")]
    TimestampCount { frames: usize, timestamps: usize },
    #[error("Frame data must be 2D or 3D, found {0} dimensions")]
    BadDimensionality(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Beam geometry parameter {0} must be positive and finite, found {1}")]
    NonPositive(&'static str, f64),
    #[error("Beam geometry is missing parameter {0}")]
    MissingParameter(&'static str),
    #[error("Invalid q range [{0}, {1}]")]
    InvalidQRange(f64, f64),
    #[error("Number of q bins must be at least 1")]
    NoBins,
}

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("Could not load mask as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Mask file {0:?} has an unsupported format")]
    UnsupportedFormat(PathBuf),
    #[error("Mask failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Mask failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Mask file contained no datasets")]
    NoDatasets,
    #[error("Mask data must be 2D, found {0} dimensions")]
    BadDimensionality(usize),
    #[error("Mask text file has ragged rows; row {0} has {1} entries, expected {2}")]
    RaggedRows(usize, usize, usize),
    #[error("Mask text file failed to parse a number: {0}")]
    ParsingError(#[from] std::num::ParseFloatError),
    #[error("Malformed NPY file: {0}")]
    BadNpy(String),
    #[error("Mask failed to encode attribute string: {0}")]
    StringError(String),
    #[error("Mask shape {0:?} does not match {1:?}")]
    ShapeMismatch((usize, usize), (usize, usize)),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Could not open data file as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Reader failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Dataset {0} does not exist in the data file")]
    MissingDataset(String),
    #[error("Dataset {0} does not hold a string")]
    NotAString(String),
    #[error("No frame data was found in the data file using profile {0}")]
    NoFrameData(String),
    #[error("No beamline profile matched the data file {0:?}")]
    NoMatchingProfile(PathBuf),
    #[error("Unknown beamline profile {0}")]
    UnknownProfile(String),
    #[error("Reader failed due to frame error: {0}")]
    FrameError(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum HDF5WriterError {
    #[error("ResultWriter failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("ResultWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ResultWriter failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("ResultWriter failed to format a timestamp: {0}")]
    TimeError(#[from] time::error::Format),
    #[error("ResultWriter failed to write a string attribute: {0}")]
    StringError(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config failed to build a lag schedule: {0}")]
    LagError(#[from] CorrelationError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Reader error: {0}")]
    ReaderError(#[from] ReaderError),
    #[error("Processor failed due to Mask error: {0}")]
    MaskError(#[from] MaskError),
    #[error("Processor failed due to Correlation error: {0}")]
    CorrelationError(#[from] CorrelationError),
    #[error("Processor failed due to Geometry error: {0}")]
    GeometryError(#[from] GeometryError),
    #[error("Processor failed due to ResultWriter error: {0}")]
    HDFError(#[from] HDF5WriterError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
