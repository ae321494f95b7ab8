use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::beamline::load_scan;
use super::config::Config;
use super::correlation::{compute_g2, compute_two_time};
use super::error::ProcessorError;
use super::hdf_writer::ResultWriter;
use super::mask::load_mask;
use super::qmap::QBinMap;
use super::reader::Hdf5Reader;
use super::saxs::{azimuthal_average, guinier_fit};
use super::worker_status::{BarColor, WorkerStatus};

/// Analyze a single data file and write its results.
///
/// Reads the scan with the configured (or detected) beamline profile, combines the
/// detector mask with the external mask, bins q, and computes g2, the SAXS profile and any
/// requested two-time maps. The output file is only created once all of them succeeded.
pub fn process_file(
    config: &Config,
    file_index: usize,
    input_path: &Path,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<(), ProcessorError> {
    let send = |progress: f32, color: BarColor| {
        tx.send(WorkerStatus::new(progress, file_index, *worker_id, color))
    };
    send(0.0, BarColor::MAGENTA)?;

    let output_path = config.get_output_file_name(input_path)?;
    let reader = Hdf5Reader::open(input_path)?;
    let profile = config.beamline_profile(&reader)?;
    spdlog::info!(
        "Reading {} with beamline profile {}",
        input_path.to_string_lossy(),
        profile.name
    );
    let scan = load_scan(&reader, &profile)?;
    drop(reader);
    spdlog::info!(
        "Scan data size: {}",
        human_bytes::human_bytes(scan.frames.size_bytes() as f64)
    );
    send(0.2, BarColor::MAGENTA)?;

    let shape = scan.frames.frame_shape();
    let mut mask = scan.mask;
    if let Some(mask_path) = config.mask_path.as_deref() {
        let external = load_mask(mask_path, config.mask_polarity)?;
        spdlog::info!(
            "Loaded mask {} excluding {} pixels",
            mask_path.to_string_lossy(),
            external.count_excluded()
        );
        match mask.as_mut() {
            Some(detector_mask) => detector_mask.union(&external)?,
            None => mask = Some(external),
        }
    }

    let bins = match scan.q_map {
        Some(q_map) => {
            spdlog::info!("Using q map stored in the data file");
            QBinMap::from_q_map(q_map.view(), mask.as_ref(), config.n_q_bins, config.q_range)?
        }
        None => {
            let geometry = config
                .geometry
                .or(scan.metadata.geometry)
                .or(profile.defaults)
                .resolve(shape)?;
            spdlog::info!("Computing q map from geometry {geometry:?}");
            let q_map = geometry.q_map(shape)?;
            QBinMap::from_q_map(q_map.view(), mask.as_ref(), config.n_q_bins, config.q_range)?
        }
    };

    let lags = config.lag_schedule(scan.frames.n_frames())?;
    spdlog::info!(
        "Computing g2 for {} q bins over {} lags (max lag {})",
        bins.num_bins(),
        lags.len(),
        lags.max_lag()
    );
    let result = compute_g2(&scan.frames, mask.as_ref(), &bins, &lags)?;
    if result.n_missing() > 0 {
        spdlog::warn!(
            "{} of {} g2 entries have no value",
            result.n_missing(),
            result.entries().len()
        );
    }
    send(0.6, BarColor::CYAN)?;

    let mut two_time_maps = Vec::with_capacity(config.two_time_bins.len());
    let n_two_time = config.two_time_bins.len();
    for (idx, bin) in config.two_time_bins.iter().enumerate() {
        two_time_maps.push(compute_two_time(&scan.frames, mask.as_ref(), &bins, *bin)?);
        send(0.6 + 0.2 * (idx + 1) as f32 / n_two_time as f32, BarColor::CYAN)?;
    }

    let mut saxs = None;
    if let Some(mean_image) = scan.frames.mean_image() {
        let profile = azimuthal_average(mean_image.view(), mask.as_ref(), &bins)?;
        let fit = match config.guinier_q_max {
            Some(q_max) => match guinier_fit(&profile, q_max) {
                Ok(fit) => {
                    spdlog::info!(
                        "Guinier fit: Rg = {:.3} Å, I(0) = {:.3e}",
                        fit.radius_of_gyration,
                        fit.i_zero
                    );
                    Some(fit)
                }
                Err(e) => {
                    spdlog::warn!("{e}");
                    None
                }
            },
            None => None,
        };
        saxs = Some((profile, fit));
    }
    send(0.8, BarColor::GREEN)?;

    // Everything is computed, so a failure past here is an IO problem
    let mut writer = ResultWriter::new(&output_path, input_path, &scan.metadata)?;
    writer.write_frames_info(&scan.frames)?;
    let interval = scan.frames.frame_interval().unwrap_or(1.0);
    writer.write_correlation(&result, &lags.delay_times(interval))?;
    if let Some((profile, fit)) = saxs.as_ref() {
        writer.write_profile(profile, fit.as_ref())?;
    }
    for map in two_time_maps.iter() {
        writer.write_two_time(map)?;
    }
    writer.write_stored_results(&scan.stored)?;
    writer.close()?;
    send(1.0, BarColor::GREEN)?;
    spdlog::info!("Results written to {}", output_path.to_string_lossy());
    Ok(())
}

/// The function to be called by a separate thread.
/// Processes every input file of the config in order on the calling thread.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    let files = config.collect_input_files()?;
    let subset = files.into_iter().enumerate().collect();
    process_subset(config, tx, worker_id, subset)
}

/// Process a subset of input files, given as (file index, path)
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<(usize, PathBuf)>,
) -> Result<(), ProcessorError> {
    for (file_index, path) in subset {
        spdlog::info!("Processing file {}...", path.to_string_lossy());
        process_file(&config, file_index, &path, &tx, &worker_id)?;
        spdlog::info!("Finished processing file {}.", path.to_string_lossy());
    }
    Ok(())
}

/// Divide the input files in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config) -> Result<Vec<Vec<(usize, PathBuf)>>, ProcessorError> {
    let n_subsets = config.n_threads.max(1) as usize;
    let mut subsets: Vec<Vec<(usize, PathBuf)>> = vec![Vec::new(); n_subsets];

    for (idx, path) in config.collect_input_files()?.into_iter().enumerate() {
        subsets[idx % n_subsets].push((idx, path))
    }

    subsets.retain(|subset| !subset.is_empty());
    Ok(subsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{save_mask, Mask};
    use hdf5::types::VarLenUnicode;
    use ndarray::{arr0, Array3};
    use std::sync::mpsc;

    fn write_scan(path: &Path) {
        let file = hdf5::File::create(path).unwrap();
        let entry = file.create_group("entry").unwrap();
        let data = entry.create_group("data").unwrap();
        let stack = Array3::from_shape_fn((6, 8, 8), |(t, r, c)| {
            1.0 + ((t + r * c) % 3) as f64
        });
        data.new_dataset_builder()
            .with_data(&stack)
            .create("data")
            .unwrap();
        data.new_dataset_builder()
            .with_data(&arr0(0.01f64))
            .create("exposure_time")
            .unwrap();
        file.new_attr::<VarLenUnicode>()
            .create("beamline")
            .unwrap()
            .write_scalar(&"P10".parse::<VarLenUnicode>().unwrap())
            .unwrap();
    }

    #[test]
    fn test_process_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan_0001.h5");
        write_scan(&input);
        let mask_path = dir.path().join("mask.npy");
        let mut mask = Mask::new((8, 8));
        mask.exclude_rectangle((0, 0), (2, 2));
        save_mask(&mask, &mask_path).unwrap();

        let config = Config {
            input_files: vec![input.clone()],
            output_path: dir.path().to_path_buf(),
            mask_path: Some(mask_path),
            n_q_bins: 4,
            multi_tau_points: 4,
            two_time_bins: vec![1],
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        process(config, tx, 0).unwrap();

        let statuses: Vec<WorkerStatus> = rx.iter().collect();
        assert_eq!(statuses.first().map(|s| s.progress), Some(0.0));
        assert_eq!(statuses.last().map(|s| s.progress), Some(1.0));

        let output = hdf5::File::open(dir.path().join("scan_0001_xpcs.h5")).unwrap();
        let g2 = output.dataset("xpcs/g2").unwrap().read_2d::<f64>().unwrap();
        // multi-tau over 6 frames gives lags 0 to 4
        assert_eq!(g2.dim(), (4, 5));
        let tau = output.dataset("xpcs/tau").unwrap().read_raw::<f64>().unwrap();
        assert!((tau[1] - 0.01).abs() < 1e-12);
        assert!(output.dataset("twotime/bin_1").is_ok());
        assert!(dir.path().join("scan_0001_xpcs.yml").exists());
    }

    #[test]
    fn test_bad_two_time_bin_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan_0002.h5");
        write_scan(&input);
        let config = Config {
            input_files: vec![input.clone()],
            output_path: dir.path().to_path_buf(),
            n_q_bins: 4,
            two_time_bins: vec![1, 99],
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel();
        let result = process_file(&config, 0, &input, &tx, &0);
        assert!(matches!(
            result,
            Err(ProcessorError::CorrelationError(
                crate::error::CorrelationError::BinOutOfRange {
                    bin: 99,
                    num_bins: 4
                }
            ))
        ));
        assert!(!dir.path().join("scan_0002_xpcs.h5").exists());
        assert!(!dir.path().join("scan_0002_xpcs.yml").exists());
    }

    #[test]
    fn test_create_subsets() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.h5", "b.h5", "c.h5"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let config = Config {
            input_files: vec![dir.path().to_path_buf()],
            n_threads: 2,
            ..Default::default()
        };
        let subsets = create_subsets(&config).unwrap();
        assert_eq!(subsets.len(), 2);
        assert_eq!(
            subsets[0],
            vec![(0, dir.path().join("a.h5")), (2, dir.path().join("c.h5"))]
        );
        assert_eq!(subsets[1], vec![(1, dir.path().join("b.h5"))]);

        let config = Config {
            n_threads: 8,
            ..config
        };
        assert_eq!(create_subsets(&config).unwrap().len(), 3);
    }
}
