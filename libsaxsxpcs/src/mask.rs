use bitvec::vec::BitVec;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hdf5::types::VarLenUnicode;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use super::error::MaskError;

const HDF5_MASK_NAMES: [&str; 3] = ["mask", "data", "array"];
const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const NPY_ALIGNMENT: usize = 64;

/// How stored mask values map onto excluded pixels.
///
/// Mask files written by this library use `1 = valid, 0 = masked`, while detector
/// pixel masks found in beamline files usually flag bad pixels with nonzero values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskPolarity {
    #[default]
    ZeroExcludes,
    NonzeroExcludes,
}

impl MaskPolarity {
    fn excludes(&self, value: f64) -> bool {
        match self {
            Self::ZeroExcludes => value == 0.0,
            Self::NonzeroExcludes => value != 0.0,
        }
    }
}

/// A boolean detector mask where a set bit means the pixel is excluded.
///
/// Bits are stored row-major. A mask is referenced by the analysis routines, never copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    shape: (usize, usize),
    bits: BitVec,
}

impl Mask {
    /// Create a mask of the given (rows, cols) shape with no pixels excluded
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            shape,
            bits: BitVec::repeat(false, shape.0 * shape.1),
        }
    }

    /// Create a mask from an array where `true` marks an excluded pixel
    pub fn from_excluded(excluded: ArrayView2<'_, bool>) -> Self {
        let shape = excluded.dim();
        let mut bits = BitVec::with_capacity(shape.0 * shape.1);
        for value in excluded.iter() {
            bits.push(*value);
        }
        Self { shape, bits }
    }

    /// Create a mask from stored numeric values using the given polarity
    pub fn from_values(values: ArrayView2<'_, f64>, polarity: MaskPolarity) -> Self {
        Self::from_excluded(values.map(|v| polarity.excludes(*v)).view())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Is the pixel at (row, col) excluded. Out of bounds pixels are reported as excluded.
    pub fn is_excluded(&self, row: usize, col: usize) -> bool {
        if row >= self.shape.0 || col >= self.shape.1 {
            return true;
        }
        self.bits[row * self.shape.1 + col]
    }

    pub fn set_excluded(&mut self, row: usize, col: usize, excluded: bool) {
        if row < self.shape.0 && col < self.shape.1 {
            self.bits.set(row * self.shape.1 + col, excluded);
        }
    }

    pub fn count_excluded(&self) -> usize {
        self.bits.count_ones()
    }

    /// Exclude every pixel that is excluded in `other` as well
    pub fn union(&mut self, other: &Mask) -> Result<(), MaskError> {
        if self.shape != other.shape {
            return Err(MaskError::ShapeMismatch(other.shape, self.shape));
        }
        for idx in other.bits.iter_ones() {
            self.bits.set(idx, true);
        }
        Ok(())
    }

    /// Exclude all pixels within `radius` of the (row, col) center
    pub fn exclude_circle(&mut self, center: (f64, f64), radius: f64) {
        let r2 = radius * radius;
        for row in 0..self.shape.0 {
            for col in 0..self.shape.1 {
                let dy = row as f64 - center.0;
                let dx = col as f64 - center.1;
                if dx * dx + dy * dy <= r2 {
                    self.set_excluded(row, col, true);
                }
            }
        }
    }

    /// Exclude the half-open rectangle [top_left, bottom_right), clamped to the mask
    pub fn exclude_rectangle(&mut self, top_left: (usize, usize), bottom_right: (usize, usize)) {
        let row_end = bottom_right.0.min(self.shape.0);
        let col_end = bottom_right.1.min(self.shape.1);
        for row in top_left.0..row_end {
            for col in top_left.1..col_end {
                self.set_excluded(row, col, true);
            }
        }
    }

    pub fn to_excluded_array(&self) -> Array2<bool> {
        Array2::from_shape_fn(self.shape, |(row, col)| self.is_excluded(row, col))
    }

    /// Stored representation: 1 = valid, 0 = masked
    pub fn to_valid_u8(&self) -> Array2<u8> {
        self.to_excluded_array().mapv(|excluded| u8::from(!excluded))
    }
}

/// The mask file formats understood by [load_mask] and [save_mask]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskFormat {
    Hdf5,
    Npy,
    Text,
}

impl MaskFormat {
    /// Determine the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, MaskError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "h5" | "hdf5" => Ok(Self::Hdf5),
            "npy" => Ok(Self::Npy),
            "txt" | "dat" => Ok(Self::Text),
            _ => Err(MaskError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Load a mask from a file. The format is chosen by the file extension.
pub fn load_mask(path: &Path, polarity: MaskPolarity) -> Result<Mask, MaskError> {
    if !path.exists() {
        return Err(MaskError::BadFilePath(path.to_path_buf()));
    }
    let values = match MaskFormat::from_path(path)? {
        MaskFormat::Hdf5 => load_hdf5_values(path)?,
        MaskFormat::Npy => load_npy_values(path)?,
        MaskFormat::Text => load_text_values(path)?,
    };
    let mask = Mask::from_values(values.view(), polarity);
    spdlog::debug!(
        "Loaded mask {} with shape {:?} ({} pixels excluded)",
        path.to_string_lossy(),
        mask.shape(),
        mask.count_excluded()
    );
    Ok(mask)
}

/// Save a mask to a file using the `1 = valid, 0 = masked` convention
pub fn save_mask(mask: &Mask, path: &Path) -> Result<(), MaskError> {
    match MaskFormat::from_path(path)? {
        MaskFormat::Hdf5 => save_hdf5(mask, path)?,
        MaskFormat::Npy => save_npy(mask, path)?,
        MaskFormat::Text => save_text(mask, path)?,
    }
    spdlog::debug!(
        "Saved mask with shape {:?} to {}",
        mask.shape(),
        path.to_string_lossy()
    );
    Ok(())
}

fn first_dataset(group: &hdf5::Group) -> Result<Option<hdf5::Dataset>, MaskError> {
    for name in group.member_names()? {
        if let Ok(dset) = group.dataset(&name) {
            return Ok(Some(dset));
        }
        if let Ok(sub) = group.group(&name) {
            if let Some(dset) = first_dataset(&sub)? {
                return Ok(Some(dset));
            }
        }
    }
    Ok(None)
}

fn load_hdf5_values(path: &Path) -> Result<Array2<f64>, MaskError> {
    let file = hdf5::File::open(path)?;
    let mut dataset = None;
    for name in HDF5_MASK_NAMES {
        if let Ok(dset) = file.dataset(name) {
            dataset = Some(dset);
            break;
        }
    }
    let dataset = match dataset {
        Some(d) => d,
        None => first_dataset(&file)?.ok_or(MaskError::NoDatasets)?,
    };
    let values = dataset.read_dyn::<f64>()?;
    let ndim = values.ndim();
    values
        .into_dimensionality::<ndarray::Ix2>()
        .map_err(|_| MaskError::BadDimensionality(ndim))
}

fn save_hdf5(mask: &Mask, path: &Path) -> Result<(), MaskError> {
    let file = hdf5::File::create(path)?;
    file.new_dataset_builder()
        .with_data(&mask.to_valid_u8())
        .create("mask")?;
    for (name, value) in [
        ("description", "SAXS/XPCS mask file"),
        ("format", "boolean mask (0=masked, 1=valid)"),
    ] {
        let value = VarLenUnicode::from_str(value)
            .map_err(|e| MaskError::StringError(e.to_string()))?;
        file.new_attr::<VarLenUnicode>()
            .create(name)?
            .write_scalar(&value)?;
    }
    Ok(())
}

fn load_text_values(path: &Path) -> Result<Array2<f64>, MaskError> {
    let reader = BufReader::new(File::open(path)?);
    let mut values: Vec<f64> = Vec::new();
    let mut n_cols: Option<usize> = None;
    let mut n_rows = 0;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()?;
        match n_cols {
            Some(n) if n != row.len() => {
                return Err(MaskError::RaggedRows(n_rows, row.len(), n));
            }
            Some(_) => (),
            None => n_cols = Some(row.len()),
        }
        values.extend(row);
        n_rows += 1;
    }
    let n_cols = n_cols.unwrap_or(0);
    Array2::from_shape_vec((n_rows, n_cols), values)
        .map_err(|_| MaskError::RaggedRows(n_rows, 0, n_cols))
}

fn save_text(mask: &Mask, path: &Path) -> Result<(), MaskError> {
    let mut file = File::create(path)?;
    for row in mask.to_valid_u8().rows() {
        let line = row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// Pull the value of `key` out of an NPY header dictionary
fn npy_header_value<'a>(header: &'a str, key: &str) -> Result<&'a str, MaskError> {
    let pattern = format!("'{key}':");
    let start = header
        .find(&pattern)
        .ok_or_else(|| MaskError::BadNpy(format!("header has no {key} entry")))?
        + pattern.len();
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find(',')
    }
    .ok_or_else(|| MaskError::BadNpy(format!("unterminated {key} entry")))?;
    Ok(rest[..end].trim())
}

fn load_npy_values(path: &Path) -> Result<Array2<f64>, MaskError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != NPY_MAGIC {
        return Err(MaskError::BadNpy(String::from("bad magic string")));
    }
    let major = reader.read_u8()?;
    let _minor = reader.read_u8()?;
    let (header_len, prefix_len) = match major {
        1 => (reader.read_u16::<LittleEndian>()? as usize, 10),
        2 | 3 => (reader.read_u32::<LittleEndian>()? as usize, 12),
        v => return Err(MaskError::BadNpy(format!("unsupported version {v}"))),
    };
    let remaining = file_len.saturating_sub((prefix_len + header_len) as u64);
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);

    let descr = npy_header_value(&header, "descr")?.trim_matches('\'');
    if !matches!(descr, "|u1" | "|b1" | "|i1" | "<u1" | "<i1") {
        return Err(MaskError::BadNpy(format!("unsupported dtype {descr}")));
    }
    if npy_header_value(&header, "fortran_order")? != "False" {
        return Err(MaskError::BadNpy(String::from("fortran order is unsupported")));
    }
    let shape = npy_header_value(&header, "shape")?
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>())
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|e| MaskError::BadNpy(format!("bad shape: {e}")))?;
    if shape.len() != 2 {
        return Err(MaskError::BadDimensionality(shape.len()));
    }

    // one byte per pixel, and it must all be in the file
    let n_pixels = shape[0]
        .checked_mul(shape[1])
        .filter(|n| *n as u64 <= remaining)
        .ok_or_else(|| {
            MaskError::BadNpy(format!(
                "shape ({}, {}) needs more than the {remaining} data bytes in the file",
                shape[0], shape[1]
            ))
        })?;
    let mut data = vec![0u8; n_pixels];
    reader.read_exact(&mut data)?;
    let values = data.into_iter().map(|v| v as f64).collect();
    Array2::from_shape_vec((shape[0], shape[1]), values)
        .map_err(|e| MaskError::BadNpy(e.to_string()))
}

fn save_npy(mask: &Mask, path: &Path) -> Result<(), MaskError> {
    let (rows, cols) = mask.shape();
    let mut header = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': ({rows}, {cols}), }}"
    );
    // magic + version + u16 length + header + newline must be aligned
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (NPY_ALIGNMENT - unpadded % NPY_ALIGNMENT) % NPY_ALIGNMENT;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut file = File::create(path)?;
    file.write_all(NPY_MAGIC)?;
    file.write_u8(1)?;
    file.write_u8(0)?;
    file.write_u16::<LittleEndian>(header.len() as u16)?;
    file.write_all(header.as_bytes())?;
    file.write_all(&mask.to_valid_u8().into_raw_vec())?;
    Ok(())
}
