//! # ScanKit Scan
//!
//! The scanning half of the core: coordinate frames, pattern
//! generators, CSV import/export, persisted scan state, and the
//! orchestrator that drives motion, capture, and illumination through a
//! point sequence.

pub mod coords;
pub mod csv_io;
pub mod orchestrator;
pub mod pattern;
pub mod state;

pub use coords::{CameraRelative, Cartesian, FrameTransformer};
pub use csv_io::{CsvFormat, CsvImport, CsvIssue, PointCsvCodec};
pub use orchestrator::{OrchestratorConfig, ScanOrchestrator};
pub use pattern::{
    generate_cylindrical, generate_grid, CaptureDefaults, CylindricalParams, GridParams,
    PatternParameters, ScanPattern,
};
pub use state::{ErrorRecord, ScanPhase, ScanState, ScanStatus, ScanTiming, STATE_FILE_NAME};
