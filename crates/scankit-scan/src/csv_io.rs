//! CSV import and export for externally authored scans.
//!
//! Three column layouts are accepted, auto-detected from the header row:
//!
//! - machine: `index,x,y,z,c`
//! - camera-relative: `index,radius,height,rotation,tilt`
//! - cartesian: same columns as machine, selected by a `# format:
//!   cartesian` comment line or an explicit hint
//!
//! Machine and camera-relative files may carry two optional columns,
//! `FocusMode` (`manual|af|ca|default`, case-insensitive) and
//! `FocusValues` (`;`-separated floats in 0..=15; more than one value
//! selects focus stacking). Validation collects every problem in the
//! file before failing rather than stopping at the first bad row.

use scankit_core::types::{FocusSpec, MachineLimits, Position4D, ScanPoint};
use scankit_core::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::coords::{CameraRelative, Cartesian, FrameTransformer};

/// Accepted column layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvFormat {
    /// `index,x,y,z,c` in machine coordinates
    Machine,
    /// `index,radius,height,rotation,tilt`
    CameraRelative,
    /// `index,x,y,z,c` with world-space labels
    Cartesian,
}

/// One problem found in a CSV file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvIssue {
    /// 1-based data row (0 = header / file level)
    pub row: usize,
    /// Column the issue concerns
    pub column: String,
    /// What is wrong
    pub message: String,
}

impl CsvIssue {
    fn new(row: usize, column: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            row,
            column: column.into(),
            message: message.into(),
        }
    }
}

/// Result of reading a scan CSV
#[derive(Debug, Clone)]
pub struct CsvImport {
    /// Successfully parsed points, in file order
    pub points: Vec<ScanPoint>,
    /// Detected (or hinted) format
    pub format: CsvFormat,
    /// Fatal problems; non-empty means the import failed
    pub errors: Vec<CsvIssue>,
    /// Advisory findings (values near limits, ignored columns)
    pub warnings: Vec<CsvIssue>,
}

impl CsvImport {
    /// Import succeeded: no errors and at least one point
    pub fn success(&self) -> bool {
        self.errors.is_empty() && !self.points.is_empty()
    }
}

/// Reads and writes scan-point CSV in all three formats
#[derive(Debug, Clone, Default)]
pub struct PointCsvCodec {
    limits: MachineLimits,
    transformer: FrameTransformer,
    /// Distance from a limit that triggers a warning
    warning_margin: f64,
}

impl PointCsvCodec {
    /// Codec validating against the given limits, identity calibration
    pub fn new(limits: MachineLimits) -> Self {
        Self::with_transformer(limits, FrameTransformer::default())
    }

    /// Codec with an explicit frame calibration
    pub fn with_transformer(limits: MachineLimits, transformer: FrameTransformer) -> Self {
        Self {
            limits,
            transformer,
            warning_margin: 1.0,
        }
    }

    /// Parse CSV content, collecting all errors and warnings.
    pub fn read(&self, content: &str, hint: Option<CsvFormat>) -> CsvImport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut points = Vec::new();

        // The comment preamble may carry a format hint; the csv reader
        // skips comments, so scan for it first.
        let comment_hint = content
            .lines()
            .take_while(|l| l.trim_start().starts_with('#'))
            .any(|l| l.to_ascii_lowercase().contains("format: cartesian"));

        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers = match reader.headers() {
            Ok(headers) => headers.clone(),
            Err(e) => {
                errors.push(CsvIssue::new(0, "header", format!("unreadable header: {e}")));
                return CsvImport {
                    points,
                    format: hint.unwrap_or(CsvFormat::Machine),
                    errors,
                    warnings,
                };
            }
        };

        let columns: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let find = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

        let format = if find("radius").is_some() && find("height").is_some() {
            CsvFormat::CameraRelative
        } else if comment_hint || hint == Some(CsvFormat::Cartesian) {
            CsvFormat::Cartesian
        } else {
            hint.unwrap_or(CsvFormat::Machine)
        };

        let position_columns: [&str; 4] = match format {
            CsvFormat::CameraRelative => ["radius", "height", "rotation", "tilt"],
            CsvFormat::Machine | CsvFormat::Cartesian => ["x", "y", "z", "c"],
        };

        let Some(index_col) = find("index") else {
            errors.push(CsvIssue::new(0, "header", "missing required column: index"));
            return CsvImport {
                points,
                format,
                errors,
                warnings,
            };
        };
        let mut coord_cols = [0usize; 4];
        for (slot, name) in coord_cols.iter_mut().zip(position_columns) {
            match find(name) {
                Some(i) => *slot = i,
                None => {
                    errors.push(CsvIssue::new(
                        0,
                        "header",
                        format!("missing required column: {name}"),
                    ));
                    return CsvImport {
                        points,
                        format,
                        errors,
                        warnings,
                    };
                }
            }
        }
        let focus_mode_col = find("FocusMode");
        let focus_values_col = find("FocusValues");

        let mut expected_index: i64 = 0;
        for (row_number, record) in reader.records().enumerate() {
            let row = row_number + 1;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    errors.push(CsvIssue::new(row, "row", format!("unreadable row: {e}")));
                    continue;
                }
            };

            let mut row_errors = Vec::new();

            let index = record
                .get(index_col)
                .and_then(|v| v.parse::<i64>().ok());
            match index {
                Some(index) if index == expected_index => {}
                Some(index) => row_errors.push(CsvIssue::new(
                    row,
                    "index",
                    format!("index {index} out of sequence (expected {expected_index})"),
                )),
                None => row_errors.push(CsvIssue::new(row, "index", "index is not an integer")),
            }

            let mut coords = [0.0f64; 4];
            for (slot, (&col, name)) in coords
                .iter_mut()
                .zip(coord_cols.iter().zip(position_columns))
            {
                match record.get(col).and_then(|v| v.parse::<f64>().ok()) {
                    Some(value) => *slot = value,
                    None => row_errors.push(CsvIssue::new(
                        row,
                        name,
                        format!("{name} is not a number"),
                    )),
                }
            }

            if !row_errors.is_empty() {
                errors.extend(row_errors);
                expected_index += 1;
                continue;
            }

            let machine = match format {
                CsvFormat::Machine => {
                    Position4D::new(coords[0], coords[1], coords[2], coords[3])
                }
                CsvFormat::CameraRelative => self.transformer.camera_to_machine(&CameraRelative {
                    radius: coords[0],
                    height: coords[1],
                    rotation: coords[2],
                    tilt: coords[3],
                }),
                CsvFormat::Cartesian => self.transformer.cartesian_to_machine(&Cartesian {
                    x: coords[0],
                    y: coords[1],
                    z: coords[2],
                    c: coords[3],
                }),
            };

            self.check_limits(row, &machine, &mut warnings, &mut row_errors);

            let focus_mode = focus_mode_col
                .and_then(|c| record.get(c))
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase();
            let focus_values_raw = focus_values_col
                .and_then(|c| record.get(c))
                .unwrap_or("")
                .trim()
                .to_string();

            let focus = self.parse_focus(
                row,
                &focus_mode,
                &focus_values_raw,
                &mut row_errors,
                &mut warnings,
            );

            if row_errors.is_empty() {
                let capture_count = focus
                    .as_ref()
                    .map(|f| f.stack_size() as u16)
                    .unwrap_or(1)
                    .max(1);
                points.push(ScanPoint {
                    position: machine,
                    focus,
                    dwell_ms: 0,
                    capture_count,
                    lighting: None,
                });
            } else {
                errors.extend(row_errors);
            }
            expected_index += 1;
        }

        if expected_index == 0 {
            errors.push(CsvIssue::new(0, "data", "file contains no data rows"));
        }

        tracing::info!(
            "CSV import: {} points, {} errors, {} warnings",
            points.len(),
            errors.len(),
            warnings.len()
        );

        CsvImport {
            points,
            format,
            errors,
            warnings,
        }
    }

    fn check_limits(
        &self,
        row: usize,
        machine: &Position4D,
        warnings: &mut Vec<CsvIssue>,
        row_errors: &mut Vec<CsvIssue>,
    ) {
        for (axis, config, value) in self.limits.axes_of(machine) {
            if !config.kind.contains(value) {
                let (min, max) = config.kind.limits();
                row_errors.push(CsvIssue::new(
                    row,
                    axis.to_string(),
                    format!("{axis}-axis value {value} outside limits [{min}, {max}]"),
                ));
            } else if !config.kind.is_continuous() {
                let (min, max) = config.kind.limits();
                if value - min < self.warning_margin || max - value < self.warning_margin {
                    warnings.push(CsvIssue::new(
                        row,
                        axis.to_string(),
                        format!(
                            "{axis}-axis value {value} within {} of a limit",
                            self.warning_margin
                        ),
                    ));
                }
            }
        }
    }

    fn parse_focus(
        &self,
        row: usize,
        mode: &str,
        values_raw: &str,
        row_errors: &mut Vec<CsvIssue>,
        warnings: &mut Vec<CsvIssue>,
    ) -> Option<FocusSpec> {
        let values: Vec<f32> = if values_raw.is_empty() {
            Vec::new()
        } else {
            let mut parsed = Vec::new();
            for part in values_raw.split(';') {
                match part.trim().parse::<f32>() {
                    Ok(v) if (0.0..=15.0).contains(&v) => parsed.push(v),
                    Ok(v) => {
                        row_errors.push(CsvIssue::new(
                            row,
                            "FocusValues",
                            format!("focus value {v} outside 0.0..=15.0"),
                        ));
                    }
                    Err(_) => {
                        row_errors.push(CsvIssue::new(
                            row,
                            "FocusValues",
                            format!("focus value '{}' is not a number", part.trim()),
                        ));
                    }
                }
            }
            parsed
        };

        match mode {
            // Blank means "no focus spec"; an explicit `default` is kept
            // distinct so write-then-read reproduces the point exactly.
            "" => {
                if !values.is_empty() {
                    warnings.push(CsvIssue::new(
                        row,
                        "FocusValues",
                        "focus values ignored without manual mode",
                    ));
                }
                None
            }
            "default" => {
                if !values.is_empty() {
                    warnings.push(CsvIssue::new(
                        row,
                        "FocusValues",
                        "focus values ignored in default mode",
                    ));
                }
                Some(FocusSpec::Default)
            }
            "af" => {
                if !values.is_empty() {
                    warnings.push(CsvIssue::new(
                        row,
                        "FocusValues",
                        "focus values ignored in af mode",
                    ));
                }
                Some(FocusSpec::Auto)
            }
            "ca" => {
                if !values.is_empty() {
                    warnings.push(CsvIssue::new(
                        row,
                        "FocusValues",
                        "focus values ignored in ca mode",
                    ));
                }
                Some(FocusSpec::Continuous)
            }
            "manual" => {
                if values.is_empty() {
                    row_errors.push(CsvIssue::new(
                        row,
                        "FocusValues",
                        "manual focus requires at least one value",
                    ));
                    None
                } else {
                    Some(FocusSpec::Manual(values))
                }
            }
            other => {
                row_errors.push(CsvIssue::new(
                    row,
                    "FocusMode",
                    format!("unknown focus mode '{other}'"),
                ));
                None
            }
        }
    }

    /// Serialize points in the given format: comment preamble, header
    /// row, one row per point, 3-decimal positions, `;`-joined focus
    /// values.
    pub fn write(&self, points: &[ScanPoint], format: CsvFormat) -> Result<String, ScanError> {
        let mut out = String::new();
        match format {
            CsvFormat::Machine => {
                out.push_str("# format: machine\n");
                out.push_str("#   x/y: carriage position (mm)\n");
                out.push_str("#   z: turntable rotation (degrees)\n");
                out.push_str("#   c: camera tilt (degrees)\n");
                out.push_str("index,x,y,z,c,FocusMode,FocusValues\n");
            }
            CsvFormat::CameraRelative => {
                out.push_str("# format: camera_relative\n");
                out.push_str("#   radius: distance from turntable center to camera (mm)\n");
                out.push_str("#   height: camera height above turntable surface (mm)\n");
                out.push_str("#   rotation: turntable rotation angle (degrees)\n");
                out.push_str("#   tilt: camera tilt angle (degrees, negative=down)\n");
                out.push_str("index,radius,height,rotation,tilt,FocusMode,FocusValues\n");
            }
            CsvFormat::Cartesian => {
                out.push_str("# format: cartesian\n");
                out.push_str("#   x/y: world position (mm)\n");
                out.push_str("#   z: rotation angle (degrees)\n");
                out.push_str("#   c: camera tilt (degrees)\n");
                out.push_str("index,x,y,z,c,FocusMode,FocusValues\n");
            }
        }

        for (index, point) in points.iter().enumerate() {
            let (a, b, c, d) = match format {
                CsvFormat::Machine => (
                    point.position.x,
                    point.position.y,
                    point.position.z,
                    point.position.c,
                ),
                CsvFormat::CameraRelative => {
                    let pose = self.transformer.machine_to_camera(&point.position);
                    (pose.radius, pose.height, pose.rotation, pose.tilt)
                }
                CsvFormat::Cartesian => {
                    let world = self.transformer.machine_to_cartesian(&point.position);
                    (world.x, world.y, world.z, world.c)
                }
            };
            let (mode, values) = match &point.focus {
                None => ("", String::new()),
                Some(FocusSpec::Default) => ("default", String::new()),
                Some(FocusSpec::Auto) => ("af", String::new()),
                Some(FocusSpec::Continuous) => ("ca", String::new()),
                Some(FocusSpec::Manual(values)) => (
                    "manual",
                    values
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(";"),
                ),
            };
            writeln!(
                out,
                "{index},{a:.3},{b:.3},{c:.3},{d:.3},{mode},{values}"
            )
            .expect("writing to a String cannot fail");
        }

        Ok(out)
    }
}
