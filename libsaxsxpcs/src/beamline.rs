use ndarray::{Array2, ArrayD, Ix2};
use serde::{Deserialize, Serialize};

use super::error::ReaderError;
use super::frames::FrameSeries;
use super::mask::{Mask, MaskPolarity};
use super::qmap::{wavelength_from_energy, PartialGeometry};
use super::reader::DatasetReader;

/// How a profile decides whether it recognizes a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    /// Any indicator path exists or any root attribute keyword matches
    #[default]
    Indicators,
    /// The file has the group layout of a NeXus file
    Nexus,
    /// Matches every file
    Any,
}

/// A root attribute whose value must contain a keyword (case insensitive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrKeyword {
    pub attribute: String,
    pub keyword: String,
}

impl AttrKeyword {
    fn new(attribute: &str, keyword: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            keyword: keyword.to_string(),
        }
    }
}

/// Dataset paths probed, in order, for each scalar piece of metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataPaths {
    pub beam_center_x: Vec<String>,
    pub beam_center_y: Vec<String>,
    pub detector_distance: Vec<String>,
    pub wavelength: Vec<String>,
    pub energy: Vec<String>,
    pub pixel_size_x: Vec<String>,
    pub pixel_size_y: Vec<String>,
    pub exposure_time: Vec<String>,
    pub frame_time: Vec<String>,
    pub sample_name: Vec<String>,
    pub instrument: Vec<String>,
}

/// Where a beamline keeps its data, and how to recognize its files.
///
/// Profiles are plain data so that users can describe new beamlines in the
/// configuration file without touching code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamlineProfile {
    pub key: String,
    pub name: String,
    pub facility: String,
    pub detection: Detection,
    pub indicator_paths: Vec<String>,
    pub attr_keywords: Vec<AttrKeyword>,
    pub frame_paths: Vec<String>,
    pub mask_paths: Vec<String>,
    pub q_map_paths: Vec<String>,
    pub timestamp_paths: Vec<String>,
    /// Results already computed at the beamline, kept alongside our own
    pub g2_paths: Vec<String>,
    pub tau_paths: Vec<String>,
    pub twotime_paths: Vec<String>,
    pub intensity_paths: Vec<String>,
    pub metadata: MetadataPaths,
    pub defaults: PartialGeometry,
}

fn paths(list: &[&str]) -> Vec<String> {
    list.iter().map(|p| p.to_string()).collect()
}

impl BeamlineProfile {
    /// DESY PETRA III P10 (Pilatus/Eiger detectors)
    pub fn desy_p10() -> Self {
        Self {
            key: String::from("p10"),
            name: String::from("DESY P10"),
            facility: String::from("DESY"),
            detection: Detection::Indicators,
            indicator_paths: paths(&[
                "/entry/data/pilatus_data",
                "/entry/instrument/detector/pilatus",
                "/data/data",
            ]),
            attr_keywords: vec![AttrKeyword::new("beamline", "P10")],
            frame_paths: paths(&[
                "/entry/data/data",
                "/entry/instrument/detector/data",
                "/entry/data/pilatus_data",
                "/data/data",
            ]),
            mask_paths: paths(&[
                "/entry/data/mask",
                "/entry/instrument/detector/mask",
                "/mask/data",
                "/mask",
            ]),
            q_map_paths: paths(&[
                "/entry/result/q_map",
                "/entry/data/q_map",
                "/q_map/data",
                "/q_map",
            ]),
            timestamp_paths: paths(&[
                "/entry/instrument/detector/timestamps",
                "/entry/data/timestamps",
                "/timestamps",
            ]),
            g2_paths: paths(&["/entry/result/g2", "/entry/data/g2", "/g2/data", "/g2"]),
            tau_paths: paths(&["/entry/result/tau", "/entry/data/tau", "/tau/data", "/tau"]),
            twotime_paths: paths(&[
                "/entry/result/twotime",
                "/entry/data/twotime",
                "/twotime/data",
                "/twotime",
            ]),
            intensity_paths: vec![],
            metadata: MetadataPaths {
                beam_center_x: paths(&[
                    "/entry/instrument/detector/beam_center_x",
                    "/entry/data/beam_center_x",
                    "/beam_center_x",
                ]),
                beam_center_y: paths(&[
                    "/entry/instrument/detector/beam_center_y",
                    "/entry/data/beam_center_y",
                    "/beam_center_y",
                ]),
                detector_distance: paths(&[
                    "/entry/instrument/detector/distance",
                    "/entry/data/detector_distance",
                    "/detector_distance",
                ]),
                wavelength: paths(&[
                    "/entry/instrument/source/wavelength",
                    "/entry/data/wavelength",
                    "/wavelength",
                ]),
                energy: paths(&[
                    "/entry/instrument/source/energy",
                    "/entry/data/energy",
                    "/energy",
                ]),
                pixel_size_x: paths(&[
                    "/entry/instrument/detector/x_pixel_size",
                    "/entry/data/pixel_size_x",
                    "/pixel_size_x",
                ]),
                pixel_size_y: paths(&[
                    "/entry/instrument/detector/y_pixel_size",
                    "/entry/data/pixel_size_y",
                    "/pixel_size_y",
                ]),
                exposure_time: paths(&[
                    "/entry/instrument/detector/count_time",
                    "/entry/data/exposure_time",
                    "/exposure_time",
                ]),
                frame_time: paths(&[
                    "/entry/instrument/detector/frame_time",
                    "/entry/data/frame_time",
                    "/frame_time",
                ]),
                sample_name: paths(&[
                    "/entry/sample/name",
                    "/entry/data/sample_name",
                    "/sample_name",
                ]),
                instrument: vec![],
            },
            defaults: PartialGeometry {
                detector_distance: Some(5.0),
                pixel_size_x: Some(75e-6),
                pixel_size_y: Some(75e-6),
                wavelength: Some(1.24),
                ..Default::default()
            },
        }
    }

    /// ESRF ID02 (Eiger detectors, TRUSAXS/XPCS)
    pub fn esrf_id02() -> Self {
        Self {
            key: String::from("id02"),
            name: String::from("ESRF ID02"),
            facility: String::from("ESRF"),
            detection: Detection::Indicators,
            indicator_paths: paths(&[
                "/entry/data/eiger_data",
                "/entry/instrument/detector/eiger",
                "/detector/data",
                "/correlation/g2",
            ]),
            attr_keywords: vec![
                AttrKeyword::new("beamline", "ID02"),
                AttrKeyword::new("facility", "ESRF"),
            ],
            frame_paths: paths(&[
                "/entry/data/data",
                "/entry/instrument/detector/data",
                "/entry/data/eiger_data",
                "/entry_0000/ESRF-ID02/eiger500k/data",
                "/entry/ESRF-ID02/eiger500k/data",
                "/data/data",
                "/detector/data",
            ]),
            g2_paths: paths(&[
                "/entry/result/g2",
                "/entry/data/g2",
                "/g2/data",
                "/g2",
                "/correlation/g2",
            ]),
            tau_paths: paths(&[
                "/entry/result/tau",
                "/entry/data/tau",
                "/tau/data",
                "/tau",
                "/correlation/tau",
            ]),
            twotime_paths: paths(&[
                "/entry/result/twotime",
                "/entry/data/twotime",
                "/twotime/data",
                "/twotime",
                "/correlation/twotime",
            ]),
            intensity_paths: paths(&[
                "/entry/result/intensity",
                "/entry/data/intensity",
                "/intensity/data",
                "/intensity",
            ]),
            metadata: esrf_metadata(),
            defaults: PartialGeometry {
                detector_distance: Some(3.0),
                pixel_size_x: Some(55e-6),
                pixel_size_y: Some(55e-6),
                wavelength: Some(1.0),
                ..Default::default()
            },
            ..Self::desy_p10()
        }
    }

    /// ESRF ID10 (coherent scattering)
    pub fn esrf_id10() -> Self {
        Self {
            key: String::from("id10"),
            name: String::from("ESRF ID10"),
            facility: String::from("ESRF"),
            detection: Detection::Indicators,
            indicator_paths: vec![],
            attr_keywords: vec![AttrKeyword::new("beamline", "ID10")],
            frame_paths: paths(&[
                "/entry/data/data",
                "/entry/instrument/detector/data",
                "/entry_0000/instrument/detector/data",
                "/data/data",
                "/detector/data",
            ]),
            metadata: esrf_metadata(),
            defaults: PartialGeometry {
                detector_distance: Some(2.0),
                pixel_size_x: Some(55e-6),
                pixel_size_y: Some(55e-6),
                wavelength: Some(1.24),
                ..Default::default()
            },
            ..Self::desy_p10()
        }
    }

    /// Any NeXus file, found by its `entry` group
    pub fn nexus() -> Self {
        Self {
            key: String::from("nexus"),
            name: String::from("NeXus"),
            facility: String::new(),
            detection: Detection::Nexus,
            indicator_paths: vec![],
            attr_keywords: vec![],
            frame_paths: paths(&[
                "entry/data/data",
                "entry/instrument/detector/data",
                "entry_0000/instrument/detector/data",
                "entry_0000/ESRF-ID02/eiger500k/data",
                "entry/ESRF-ID02/eiger500k/data",
                "data/data",
                "detector/data",
            ]),
            mask_paths: paths(&[
                "entry/analysis/mask",
                "entry_0000/analysis/mask",
                "analysis/mask",
                "mask",
            ]),
            q_map_paths: paths(&[
                "entry/analysis/q_map",
                "entry_0000/analysis/q_map",
                "analysis/q_map",
                "q_map",
            ]),
            timestamp_paths: paths(&[
                "entry/instrument/detector/timestamps",
                "entry/data/timestamps",
            ]),
            g2_paths: analysis_paths("g2"),
            tau_paths: analysis_paths("tau"),
            twotime_paths: analysis_paths("twotime"),
            intensity_paths: analysis_paths("intensity"),
            metadata: MetadataPaths {
                instrument: paths(&["entry/instrument/name"]),
                ..Self::desy_p10().metadata
            },
            defaults: PartialGeometry::default(),
        }
    }

    /// Plain HDF5, tried last
    pub fn hdf5() -> Self {
        Self {
            key: String::from("hdf5"),
            name: String::from("HDF5"),
            facility: String::new(),
            detection: Detection::Any,
            indicator_paths: vec![],
            attr_keywords: vec![],
            defaults: PartialGeometry::default(),
            ..Self::desy_p10()
        }
    }

    /// Every built-in profile, most specific first
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::desy_p10(),
            Self::esrf_id02(),
            Self::esrf_id10(),
            Self::nexus(),
            Self::hdf5(),
        ]
    }

    /// Does this profile recognize the file behind `reader`
    pub fn matches(&self, reader: &dyn DatasetReader, strict_nexus: bool) -> bool {
        match self.detection {
            Detection::Any => true,
            Detection::Nexus => is_nexus(reader, strict_nexus),
            Detection::Indicators => {
                if self.indicator_paths.iter().any(|p| reader.exists(p)) {
                    return true;
                }
                let attrs = reader.root_attr_strings();
                self.attr_keywords.iter().any(|kw| {
                    attrs.iter().any(|(name, value)| {
                        *name == kw.attribute
                            && value.to_uppercase().contains(&kw.keyword.to_uppercase())
                    })
                })
            }
        }
    }
}

/// Where NeXus files keep the results of an analysis
fn analysis_paths(name: &str) -> Vec<String> {
    vec![
        format!("entry/analysis/{name}"),
        format!("entry_0000/analysis/{name}"),
        format!("analysis/{name}"),
        name.to_string(),
    ]
}

fn esrf_metadata() -> MetadataPaths {
    let mut metadata = BeamlineProfile::desy_p10().metadata;
    metadata.beam_center_x.push(String::from("/detector/beam_center_x"));
    metadata.beam_center_y.push(String::from("/detector/beam_center_y"));
    metadata
        .detector_distance
        .push(String::from("/detector/distance"));
    metadata.wavelength.push(String::from("/source/wavelength"));
    metadata.energy.push(String::from("/source/energy"));
    metadata.pixel_size_x.push(String::from("/detector/x_pixel_size"));
    metadata.pixel_size_y.push(String::from("/detector/y_pixel_size"));
    metadata
        .exposure_time
        .push(String::from("/detector/count_time"));
    metadata.frame_time.push(String::from("/detector/frame_time"));
    metadata.sample_name.push(String::from("/sample/name"));
    metadata
}

const NEXUS_ENTRIES: [&str; 2] = ["entry", "entry_0000"];

/// NeXus files hold an entry group. In strict mode it must also be tagged NXentry.
fn is_nexus(reader: &dyn DatasetReader, strict: bool) -> bool {
    NEXUS_ENTRIES.iter().any(|entry| {
        if strict {
            reader.group_class(entry).as_deref() == Some("NXentry")
        } else {
            reader.has_group(entry)
        }
    })
}

/// Find the first profile that recognizes the file. Custom profiles are tried before the built-ins.
pub fn detect_profile(
    reader: &dyn DatasetReader,
    custom: &[BeamlineProfile],
    strict_nexus: bool,
) -> Result<BeamlineProfile, ReaderError> {
    custom
        .iter()
        .cloned()
        .chain(BeamlineProfile::builtins())
        .find(|profile| profile.matches(reader, strict_nexus))
        .ok_or_else(|| ReaderError::NoMatchingProfile(reader.source().to_path_buf()))
}

/// Look up a profile by key, custom profiles first
pub fn profile_by_key(key: &str, custom: &[BeamlineProfile]) -> Result<BeamlineProfile, ReaderError> {
    custom
        .iter()
        .cloned()
        .chain(BeamlineProfile::builtins())
        .find(|profile| profile.key.eq_ignore_ascii_case(key))
        .ok_or_else(|| ReaderError::UnknownProfile(key.to_string()))
}

/// Everything known about a scan besides its pixels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub beamline: String,
    pub facility: String,
    pub frames_path: String,
    pub sample_name: Option<String>,
    pub instrument: Option<String>,
    pub exposure_time: Option<f64>,
    pub frame_time: Option<f64>,
    pub energy: Option<f64>,
    pub geometry: PartialGeometry,
}

/// Correlation results stored in the data file by the beamline software
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredResults {
    pub g2: Option<ArrayD<f64>>,
    pub tau: Option<ArrayD<f64>>,
    pub twotime: Option<ArrayD<f64>>,
    pub intensity: Option<ArrayD<f64>>,
}

impl StoredResults {
    fn read(reader: &dyn DatasetReader, profile: &BeamlineProfile) -> Self {
        let read = |paths: &[String], what: &str| {
            let (path, data) = reader.read_first(paths)?;
            spdlog::info!("Found stored {what} at {path} with shape {:?}", data.shape());
            Some(data)
        };
        Self {
            g2: read(&profile.g2_paths, "g2"),
            tau: read(&profile.tau_paths, "tau"),
            twotime: read(&profile.twotime_paths, "twotime"),
            intensity: read(&profile.intensity_paths, "intensity"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.g2.is_none() && self.tau.is_none() && self.twotime.is_none() && self.intensity.is_none()
    }
}

/// A scan loaded from a data file
#[derive(Debug, Clone)]
pub struct Scan {
    pub frames: FrameSeries,
    pub mask: Option<Mask>,
    pub q_map: Option<Array2<f64>>,
    pub stored: StoredResults,
    pub metadata: ScanMetadata,
}

fn read_metadata(reader: &dyn DatasetReader, profile: &BeamlineProfile) -> ScanMetadata {
    let paths = &profile.metadata;
    let energy = reader.read_first_scalar(&paths.energy);
    let wavelength = reader
        .read_first_scalar(&paths.wavelength)
        .or_else(|| energy.filter(|e| *e > 0.0).map(wavelength_from_energy));
    ScanMetadata {
        beamline: profile.name.clone(),
        facility: profile.facility.clone(),
        frames_path: String::new(),
        sample_name: reader.read_first_string(&paths.sample_name),
        instrument: reader.read_first_string(&paths.instrument),
        exposure_time: reader.read_first_scalar(&paths.exposure_time),
        frame_time: reader.read_first_scalar(&paths.frame_time),
        energy,
        geometry: PartialGeometry {
            beam_center_x: reader.read_first_scalar(&paths.beam_center_x),
            beam_center_y: reader.read_first_scalar(&paths.beam_center_y),
            detector_distance: reader.read_first_scalar(&paths.detector_distance),
            pixel_size_x: reader.read_first_scalar(&paths.pixel_size_x),
            pixel_size_y: reader.read_first_scalar(&paths.pixel_size_y),
            wavelength,
        },
    }
}

/// Read the first 2D dataset of `paths` that matches the frame shape
fn read_image(
    reader: &dyn DatasetReader,
    paths: &[String],
    shape: (usize, usize),
    what: &str,
) -> Option<Array2<f64>> {
    let (path, data) = reader.read_first(paths)?;
    match data.into_dimensionality::<Ix2>() {
        Ok(image) if image.dim() == shape => Some(image),
        Ok(image) => {
            spdlog::warn!(
                "Ignoring {what} at {path}: shape {:?} does not match frame shape {:?}",
                image.dim(),
                shape
            );
            None
        }
        Err(_) => {
            spdlog::warn!("Ignoring {what} at {path}: data is not 2D");
            None
        }
    }
}

/// Load frames, detector mask, q map, stored results and metadata from a file using a
/// beamline profile.
///
/// Timestamps come from a timestamp dataset when one matches the frame count. Otherwise
/// frames are spaced by the frame time, the exposure time, or one second, in that order.
pub fn load_scan(reader: &dyn DatasetReader, profile: &BeamlineProfile) -> Result<Scan, ReaderError> {
    let mut metadata = read_metadata(reader, profile);
    let (frames_path, data) = reader
        .read_first(&profile.frame_paths)
        .ok_or_else(|| ReaderError::NoFrameData(profile.name.clone()))?;
    let interval = metadata
        .frame_time
        .or(metadata.exposure_time)
        .filter(|t| *t > 0.0)
        .unwrap_or(1.0);
    let mut frames = FrameSeries::from_dyn(data, interval)?;
    spdlog::info!(
        "Loaded {} frames of shape {:?} from {} using profile {}",
        frames.n_frames(),
        frames.frame_shape(),
        frames_path,
        profile.name
    );
    metadata.frames_path = frames_path;

    if let Some((path, stamps)) = reader.read_first(&profile.timestamp_paths) {
        let stamps: Vec<f64> = stamps.iter().copied().collect();
        if let Err(e) = frames.set_timestamps(stamps) {
            spdlog::warn!("Ignoring timestamps at {path}: {e}");
        }
    }

    let shape = frames.frame_shape();
    let mask = read_image(reader, &profile.mask_paths, shape, "mask")
        .map(|values| Mask::from_values(values.view(), MaskPolarity::NonzeroExcludes));
    if let Some(mask) = mask.as_ref() {
        spdlog::info!("Detector mask excludes {} pixels", mask.count_excluded());
    }
    let q_map = read_image(reader, &profile.q_map_paths, shape, "q map");

    Ok(Scan {
        frames,
        mask,
        q_map,
        stored: StoredResults::read(reader, profile),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryReader;
    use ndarray::{arr0, arr1, arr2, Array3};

    fn stack() -> ndarray::ArrayD<f64> {
        Array3::<f64>::from_elem((3, 2, 2), 1.0).into_dyn()
    }

    #[test]
    fn test_detect_by_indicator_and_attribute() {
        let p10 = MemoryReader::new("p10").with_dataset("/entry/data/pilatus_data", stack());
        assert_eq!(detect_profile(&p10, &[], false).unwrap().key, "p10");

        let id02 = MemoryReader::new("id02")
            .with_dataset("/entry/measurement/frames", stack())
            .with_root_attr("facility", "esrf");
        assert_eq!(detect_profile(&id02, &[], false).unwrap().key, "id02");

        let id10 = MemoryReader::new("id10").with_root_attr("beamline", "ESRF-ID10");
        assert_eq!(detect_profile(&id10, &[], false).unwrap().key, "id10");
    }

    #[test]
    fn test_nexus_strictness() {
        let untagged = MemoryReader::new("untagged")
            .with_dataset("entry/instrument/detector/data", stack());
        assert_eq!(detect_profile(&untagged, &[], false).unwrap().key, "nexus");
        assert_eq!(detect_profile(&untagged, &[], true).unwrap().key, "hdf5");

        let tagged = untagged.clone().with_group_class("entry", "NXentry");
        assert_eq!(detect_profile(&tagged, &[], true).unwrap().key, "nexus");
    }

    #[test]
    fn test_custom_profile_first() {
        let custom = BeamlineProfile {
            key: String::from("lab"),
            name: String::from("Lab source"),
            attr_keywords: vec![AttrKeyword::new("beamline", "P10")],
            frame_paths: paths(&["/scan/images"]),
            ..Default::default()
        };
        let reader = MemoryReader::new("lab").with_root_attr("beamline", "p10 copy");
        assert_eq!(
            detect_profile(&reader, std::slice::from_ref(&custom), false)
                .unwrap()
                .key,
            "lab"
        );
        assert_eq!(profile_by_key("LAB", &[custom]).unwrap().name, "Lab source");
        assert!(matches!(
            profile_by_key("id99", &[]),
            Err(ReaderError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_load_scan() {
        let reader = MemoryReader::new("scan")
            .with_dataset("/entry/data/data", stack())
            .with_dataset("/entry/data/mask", arr2(&[[0.0, 1.0], [0.0, 0.0]]).into_dyn())
            .with_dataset("/entry/data/q_map", arr1(&[1.0, 2.0]).into_dyn())
            .with_dataset("/entry/instrument/detector/count_time", arr0(0.1).into_dyn())
            .with_dataset("/entry/instrument/source/energy", arr0(12.398419843320026).into_dyn())
            .with_dataset("/entry/instrument/detector/distance", arr1(&[4.0]).into_dyn())
            .with_string("/entry/sample/name", "silica");
        let scan = load_scan(&reader, &BeamlineProfile::desy_p10()).unwrap();

        assert_eq!(scan.frames.n_frames(), 3);
        assert_eq!(scan.frames.timestamps(), &[0.0, 0.1, 0.2]);
        let mask = scan.mask.unwrap();
        assert!(mask.is_excluded(0, 1));
        assert_eq!(mask.count_excluded(), 1);
        // a 1D q map does not fit the detector
        assert!(scan.q_map.is_none());
        assert_eq!(scan.metadata.frames_path, "/entry/data/data");
        assert_eq!(scan.metadata.sample_name.as_deref(), Some("silica"));
        assert_eq!(scan.metadata.geometry.detector_distance, Some(4.0));
        assert!((scan.metadata.geometry.wavelength.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_timestamps_dataset() {
        let reader = MemoryReader::new("scan")
            .with_dataset("/data/data", stack())
            .with_dataset("/timestamps", arr1(&[0.0, 0.5, 2.0]).into_dyn());
        let scan = load_scan(&reader, &BeamlineProfile::hdf5()).unwrap();
        assert_eq!(scan.frames.timestamps(), &[0.0, 0.5, 2.0]);

        let mismatched = MemoryReader::new("scan")
            .with_dataset("/data/data", stack())
            .with_dataset("/timestamps", arr1(&[0.0, 0.5]).into_dyn());
        let scan = load_scan(&mismatched, &BeamlineProfile::hdf5()).unwrap();
        assert_eq!(scan.frames.timestamps(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_stored_results_p10() {
        let reader = MemoryReader::new("p10")
            .with_dataset("/entry/data/data", stack())
            .with_dataset("/entry/result/g2", Array2::<f64>::ones((2, 3)).into_dyn())
            .with_dataset("/tau", arr1(&[0.1, 0.2, 0.4]).into_dyn())
            .with_dataset("/entry/data/twotime", Array2::<f64>::ones((3, 3)).into_dyn())
            .with_dataset("/intensity", arr1(&[5.0]).into_dyn());
        let scan = load_scan(&reader, &BeamlineProfile::desy_p10()).unwrap();
        assert_eq!(scan.stored.g2.as_ref().map(|g2| g2.shape().to_vec()), Some(vec![2, 3]));
        assert_eq!(scan.stored.tau, Some(arr1(&[0.1, 0.2, 0.4]).into_dyn()));
        assert!(scan.stored.twotime.is_some());
        // P10 files keep no intensity
        assert!(scan.stored.intensity.is_none());
    }

    #[test]
    fn test_stored_results_id02() {
        let reader = MemoryReader::new("id02")
            .with_dataset("/detector/data", stack())
            .with_dataset("/correlation/g2", Array2::<f64>::ones((1, 4)).into_dyn())
            .with_dataset("/correlation/tau", arr1(&[1.0, 2.0, 3.0, 4.0]).into_dyn())
            .with_dataset("/correlation/twotime", Array2::<f64>::ones((3, 3)).into_dyn())
            .with_dataset("/entry/result/intensity", arr1(&[7.0, 8.0]).into_dyn());
        let profile = detect_profile(&reader, &[], false).unwrap();
        assert_eq!(profile.key, "id02");
        let scan = load_scan(&reader, &profile).unwrap();
        assert_eq!(scan.stored.g2.as_ref().map(|g2| g2.len()), Some(4));
        assert_eq!(
            scan.stored.tau.as_ref().and_then(|tau| tau.iter().last().copied()),
            Some(4.0)
        );
        assert!(scan.stored.twotime.is_some());
        assert_eq!(scan.stored.intensity, Some(arr1(&[7.0, 8.0]).into_dyn()));
    }

    #[test]
    fn test_stored_results_id10() {
        let reader = MemoryReader::new("id10")
            .with_root_attr("beamline", "ID10")
            .with_dataset("/entry_0000/instrument/detector/data", stack())
            .with_dataset("/g2/data", Array2::<f64>::ones((1, 2)).into_dyn());
        let profile = detect_profile(&reader, &[], false).unwrap();
        assert_eq!(profile.key, "id10");
        let scan = load_scan(&reader, &profile).unwrap();
        assert!(scan.stored.g2.is_some());
        assert!(scan.stored.tau.is_none());
    }

    #[test]
    fn test_stored_results_nexus() {
        let reader = MemoryReader::new("nexus")
            .with_dataset("entry/data/data", stack())
            .with_dataset("entry/analysis/g2", Array2::<f64>::ones((2, 2)).into_dyn())
            .with_dataset("entry_0000/analysis/tau", arr1(&[0.5, 1.0]).into_dyn())
            .with_dataset("analysis/intensity", arr1(&[3.0, 2.0]).into_dyn())
            .with_dataset("twotime", Array2::<f64>::ones((3, 3)).into_dyn());
        let profile = detect_profile(&reader, &[], false).unwrap();
        assert_eq!(profile.key, "nexus");
        let scan = load_scan(&reader, &profile).unwrap();
        assert!(scan.stored.g2.is_some());
        assert_eq!(scan.stored.tau, Some(arr1(&[0.5, 1.0]).into_dyn()));
        assert_eq!(scan.stored.intensity, Some(arr1(&[3.0, 2.0]).into_dyn()));
        assert!(scan.stored.twotime.is_some());
        assert!(!scan.stored.is_empty());
    }

    #[test]
    fn test_no_stored_results() {
        let reader = MemoryReader::new("plain").with_dataset("/data/data", stack());
        let scan = load_scan(&reader, &BeamlineProfile::hdf5()).unwrap();
        assert!(scan.stored.is_empty());
    }

    #[test]
    fn test_missing_frames() {
        let reader = MemoryReader::new("empty").with_string("/entry/sample/name", "x");
        assert!(matches!(
            load_scan(&reader, &BeamlineProfile::nexus()),
            Err(ReaderError::NoFrameData(_))
        ));
    }
}
