use fxhash::FxHashMap;
use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
use ndarray::ArrayD;
use std::path::{Path, PathBuf};

use super::error::ReaderError;

/// File extensions recognized as HDF5/NeXus data files
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["h5", "hdf5", "nxs", "nx"];

/// Check a file extension against [SUPPORTED_EXTENSIONS]
pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

/// Read-only access to the datasets of a hierarchical data file.
///
/// Paths are slash separated, with or without a leading slash. All numeric data is
/// handed out as `f64`; the backing library performs the type conversion.
pub trait DatasetReader {
    /// Where the data came from, for logging
    fn source(&self) -> &Path;

    /// Does a dataset exist at path
    fn can_read(&self, path: &str) -> bool;

    fn read_dataset(&self, path: &str) -> Result<ArrayD<f64>, ReaderError>;

    fn read_string(&self, path: &str) -> Result<String, ReaderError>;

    fn has_group(&self, path: &str) -> bool;

    /// Every string valued attribute of the root group as (name, value)
    fn root_attr_strings(&self) -> Vec<(String, String)>;

    /// The NX_class attribute of a group, if any
    fn group_class(&self, path: &str) -> Option<String>;

    /// Does anything (group or dataset) exist at path
    fn exists(&self, path: &str) -> bool {
        self.can_read(path) || self.has_group(path)
    }

    /// Read a single number. Datasets holding exactly one element also count.
    fn read_scalar(&self, path: &str) -> Option<f64> {
        let data = self.read_dataset(path).ok()?;
        if data.len() == 1 {
            data.iter().next().copied()
        } else {
            None
        }
    }

    /// Read the first dataset of `paths` that exists, returning the path it was found at
    fn read_first(&self, paths: &[String]) -> Option<(String, ArrayD<f64>)> {
        for path in paths {
            if !self.can_read(path) {
                continue;
            }
            match self.read_dataset(path) {
                Ok(data) => return Some((path.clone(), data)),
                Err(e) => spdlog::debug!("Could not read {path}: {e}"),
            }
        }
        None
    }

    /// Read the first scalar of `paths` that exists
    fn read_first_scalar(&self, paths: &[String]) -> Option<f64> {
        paths.iter().find_map(|path| self.read_scalar(path))
    }

    /// Read the first string of `paths` that exists
    fn read_first_string(&self, paths: &[String]) -> Option<String> {
        paths
            .iter()
            .filter(|path| self.can_read(path))
            .find_map(|path| self.read_string(path).ok())
    }
}

/// Strip the leading slash so that "/entry/data" and "entry/data" name the same thing
fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn attr_to_string(attr: &hdf5::Attribute) -> Option<String> {
    if let Ok(s) = attr.read_scalar::<VarLenUnicode>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = attr.read_scalar::<VarLenAscii>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = attr.read_scalar::<FixedAscii<256>>() {
        return Some(s.as_str().to_string());
    }
    None
}

/// A [DatasetReader] backed by an HDF5 file opened read-only
#[derive(Debug)]
pub struct Hdf5Reader {
    file: hdf5::File,
    path: PathBuf,
}

impl Hdf5Reader {
    /// Open the file at path
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        if !path.exists() {
            return Err(ReaderError::BadFilePath(path.to_path_buf()));
        }
        let file = hdf5::File::open(path)?;
        spdlog::debug!("Opened HDF5 file {}", path.to_string_lossy());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Check every link along the path, as HDF5 refuses to resolve links below a missing group
    fn link_exists(&self, path: &str) -> bool {
        let mut current = String::new();
        for part in normalize(path).split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if !self.file.link_exists(&current) {
                return false;
            }
        }
        !current.is_empty()
    }

    /// Full paths of every dataset in the file
    pub fn list_datasets(&self) -> Result<Vec<String>, ReaderError> {
        let mut datasets = Vec::new();
        let mut groups = vec![String::from("/")];
        while let Some(group_path) = groups.pop() {
            let group = self.file.group(&group_path)?;
            for name in group.member_names()? {
                let full = if group_path == "/" {
                    format!("/{name}")
                } else {
                    format!("{group_path}/{name}")
                };
                if group.dataset(&name).is_ok() {
                    datasets.push(full);
                } else if group.group(&name).is_ok() {
                    groups.push(full);
                }
            }
        }
        datasets.sort();
        Ok(datasets)
    }
}

impl DatasetReader for Hdf5Reader {
    fn source(&self) -> &Path {
        &self.path
    }

    fn can_read(&self, path: &str) -> bool {
        self.link_exists(path) && self.file.dataset(normalize(path)).is_ok()
    }

    fn read_dataset(&self, path: &str) -> Result<ArrayD<f64>, ReaderError> {
        if !self.link_exists(path) {
            return Err(ReaderError::MissingDataset(path.to_string()));
        }
        let data = self.file.dataset(normalize(path))?.read_dyn::<f64>()?;
        spdlog::debug!("Read dataset {path} with shape {:?}", data.shape());
        Ok(data)
    }

    fn read_string(&self, path: &str) -> Result<String, ReaderError> {
        if !self.link_exists(path) {
            return Err(ReaderError::MissingDataset(path.to_string()));
        }
        let dataset = self.file.dataset(normalize(path))?;
        if let Ok(s) = dataset.read_scalar::<VarLenUnicode>() {
            return Ok(s.as_str().to_string());
        }
        if let Ok(s) = dataset.read_scalar::<VarLenAscii>() {
            return Ok(s.as_str().to_string());
        }
        if let Some(s) = dataset.read_raw::<VarLenUnicode>()?.first() {
            return Ok(s.as_str().to_string());
        }
        Err(ReaderError::NotAString(path.to_string()))
    }

    fn has_group(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || (self.link_exists(path) && self.file.group(path).is_ok())
    }

    fn root_attr_strings(&self) -> Vec<(String, String)> {
        let names = match self.file.attr_names() {
            Ok(names) => names,
            Err(_) => return vec![],
        };
        names
            .into_iter()
            .filter_map(|name| {
                let attr = self.file.attr(&name).ok()?;
                attr_to_string(&attr).map(|value| (name, value))
            })
            .collect()
    }

    fn group_class(&self, path: &str) -> Option<String> {
        if !self.has_group(path) {
            return None;
        }
        let group = self.file.group(normalize(path)).ok()?;
        attr_to_string(&group.attr("NX_class").ok()?)
    }
}

/// A [DatasetReader] over data already held in memory.
///
/// Useful when frames arrive from somewhere other than a file, and for exercising
/// beamline profiles without touching the disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    name: PathBuf,
    datasets: FxHashMap<String, ArrayD<f64>>,
    strings: FxHashMap<String, String>,
    classes: FxHashMap<String, String>,
    root_attrs: Vec<(String, String)>,
}

impl MemoryReader {
    pub fn new(name: &str) -> Self {
        Self {
            name: PathBuf::from(name),
            ..Default::default()
        }
    }

    pub fn with_dataset(mut self, path: &str, data: ArrayD<f64>) -> Self {
        self.datasets.insert(normalize(path).to_string(), data);
        self
    }

    pub fn with_string(mut self, path: &str, value: &str) -> Self {
        self.strings
            .insert(normalize(path).to_string(), value.to_string());
        self
    }

    pub fn with_group_class(mut self, path: &str, class: &str) -> Self {
        self.classes
            .insert(normalize(path).to_string(), class.to_string());
        self
    }

    pub fn with_root_attr(mut self, name: &str, value: &str) -> Self {
        self.root_attrs.push((name.to_string(), value.to_string()));
        self
    }
}

impl DatasetReader for MemoryReader {
    fn source(&self) -> &Path {
        &self.name
    }

    fn can_read(&self, path: &str) -> bool {
        let path = normalize(path);
        self.datasets.contains_key(path) || self.strings.contains_key(path)
    }

    fn read_dataset(&self, path: &str) -> Result<ArrayD<f64>, ReaderError> {
        self.datasets
            .get(normalize(path))
            .cloned()
            .ok_or_else(|| ReaderError::MissingDataset(path.to_string()))
    }

    fn read_string(&self, path: &str) -> Result<String, ReaderError> {
        self.strings
            .get(normalize(path))
            .cloned()
            .ok_or_else(|| ReaderError::MissingDataset(path.to_string()))
    }

    fn has_group(&self, path: &str) -> bool {
        let prefix = format!("{}/", normalize(path));
        self.classes.contains_key(normalize(path))
            || self
                .datasets
                .keys()
                .chain(self.strings.keys())
                .any(|key| key.starts_with(&prefix))
    }

    fn root_attr_strings(&self) -> Vec<(String, String)> {
        self.root_attrs.clone()
    }

    fn group_class(&self, path: &str) -> Option<String> {
        self.classes.get(normalize(path)).cloned()
    }
}
