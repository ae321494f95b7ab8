//! # saxsxpcs
//!
//! saxsxpcs reduces small-angle X-ray scattering (SAXS) and X-ray photon correlation
//! spectroscopy (XPCS) data, written in Rust. It reads detector frame stacks recorded at
//! synchrotron beamlines (DESY P10, ESRF ID02, ESRF ID10, or any NeXus/HDF5 file), assigns
//! detector pixels to bins of scattering vector q, and computes the normalized intensity
//! autocorrelation function g2(q, τ) along with the azimuthally averaged SAXS profile and
//! two-time correlation maps.
//!
//! ## Installation
//!
//! The only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building and running saxsxpcs, HDF5 must be installed. Typically this will
//! be installed using a package manager (homebrew, apt, etc), and the Rust libraries will
//! auto detect the location of the HDF install. If HDF5 lives somewhere custom, write the
//! following snippet into the file `.cargo/config.toml` in the saxsxpcs repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./saxsxpcs_cli` from the top
//! level saxsxpcs repository. See the `saxsxpcs_cli` documentation for usage.
//!
//! ## Analysis
//!
//! For every q bin `b` and lag `τ` the correlator evaluates
//!
//! ```text
//! g2(b, τ) = <I(t)·I(t+τ)> / (<I(t)> · <I(t+τ)>)
//! ```
//!
//! averaging jointly over the unmasked pixels of the bin and all frame pairs `(t, t+τ)`.
//! A (bin, lag) pair without usable data is reported as missing rather than as a number,
//! so a fully masked bin never shows up as a fake g2 value. Lags come either from an
//! explicit list or from a multi-tau schedule, dense at short delays and sparse at long
//! ones.
//!
//! q is computed from the beam geometry: beam center (pixels), sample-detector distance
//! and pixel sizes (metres), and wavelength (Å). Each value is taken from the
//! configuration if given, else from the data file, else from the beamline defaults. A q
//! map stored in the data file takes precedence over the geometry.
//!
//! ## Configuration
//!
//! The analysis is controlled by a YAML file. A template can be generated with the CLI.
//! Fields that are left out take their default values:
//!
//! ```yml
//! input_files: []
//! output_path: None
//! beamline: auto
//! custom_profiles: []
//! strict_nexus: false
//! mask_path: null
//! mask_polarity: ZeroExcludes
//! geometry:
//!   beam_center_x: null
//!   beam_center_y: null
//!   detector_distance: null
//!   pixel_size_x: null
//!   pixel_size_y: null
//!   wavelength: null
//! n_q_bins: 50
//! q_range: null
//! lags: null
//! multi_tau_points: 8
//! include_zero_lag: true
//! two_time_bins: []
//! guinier_q_max: null
//! n_threads: 1
//! ```
//!
//! - `input_files`: data files, or directories whose `.h5`, `.hdf5`, `.nxs`, `.nx` files
//! are all analyzed
//! - `beamline`: `auto` to detect the beamline from the file, or a profile key (`p10`,
//! `id02`, `id10`, `nexus`, `hdf5`, or the key of a custom profile)
//! - `strict_nexus`: only treat a file as NeXus if its `entry` group is tagged `NXentry`
//! - `mask_path`: an external mask (`.h5`, `.npy`, `.txt`) merged with the detector mask
//! - `mask_polarity`: `ZeroExcludes` for masks storing 1 = valid, `NonzeroExcludes` for
//! masks flagging bad pixels with nonzero values
//! - `lags`: explicit lags in frames. If null, a multi-tau schedule with
//! `multi_tau_points` points per level is used
//! - `n_threads`: the number of worker threads the input files are divided among. Must
//! be at least 1.
//!
//! ## Output
//!
//! Each input file produces an HDF5 result file named `<input stem>_xpcs.h5` in
//! `output_path` and a YAML summary next to it:
//!
//! ```text
//! scan_0001_xpcs.h5
//! xpcs - version, created, source, beamline, sample_name
//! |---- g2, g2_err, g2_missing(dset, [bin, lag])
//! |---- lags, tau, q, pixel_counts, timestamps(dset)
//! saxs - radius_of_gyration, i_zero
//! |---- q, intensity, intensity_err, pixel_counts, kratky, guinier, mean_image(dset)
//! twotime
//! |---- bin_#(dset)
//! stored
//! |---- g2, tau, twotime, intensity(dset)
//! ```
//!
//! The `stored` group only exists when the data file already carried results from the
//! beamline software. They are copied unchanged.
//!
//! Missing g2 entries are NaN in `g2`/`g2_err` and 1 in `g2_missing`.
pub mod beamline;
pub mod config;
pub mod correlation;
pub mod error;
pub mod frames;
pub mod hdf_writer;
pub mod lag_schedule;
pub mod mask;
pub mod process;
pub mod qmap;
pub mod reader;
pub mod saxs;
pub mod worker_status;
