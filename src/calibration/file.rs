//! Calibration file read/write: newline-delimited text, atomic write via
//! temp-file + rename, timestamped backup of any prior file (spec
//! sections 4.6 and 6).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::CalibrationError;
use crate::sample::CalibrationPoint;

/// One row under the `thermal-resistance:` or `heat-capacity:` sections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandParameter {
    pub temperature: f64,
    pub value: f64,
}

/// The full contents of a calibration file: RTD points plus per-band
/// thermal resistance and heat capacity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationFile {
    pub temperatures: Vec<CalibrationPoint>,
    pub thermal_resistance: Vec<BandParameter>,
    pub heat_capacity: Vec<BandParameter>,
}

impl CalibrationFile {
    pub fn serialize(&self) -> String {
        let mut out = String::new();

        out.push_str("temperatures:\n");
        let mut temps = self.temperatures.clone();
        temps.sort_by(|a, b| a.resistance.partial_cmp(&b.resistance).unwrap());
        for point in &temps {
            out.push_str(&format!(
                "- resistance: {}\n  temperature: {}\n",
                point.resistance, point.temperature
            ));
        }

        out.push_str("thermal-resistance:\n");
        let mut rtheta = self.thermal_resistance.clone();
        rtheta.sort_by(|a, b| a.temperature.partial_cmp(&b.temperature).unwrap());
        for row in &rtheta {
            out.push_str(&format!(
                "- temperature: {}\n  thermal-resistance: {}\n",
                row.temperature, row.value
            ));
        }

        out.push_str("heat-capacity:\n");
        let mut cth = self.heat_capacity.clone();
        cth.sort_by(|a, b| a.temperature.partial_cmp(&b.temperature).unwrap());
        for row in &cth {
            out.push_str(&format!(
                "- temperature: {}\n  heat-capacity: {}\n",
                row.temperature, row.value
            ));
        }

        out
    }

    pub fn parse(text: &str) -> Result<Self, CalibrationError> {
        let mut file = CalibrationFile::default();
        let mut section = None;
        let mut pending_temperature: Option<f64> = None;
        let mut pending_resistance: Option<f64> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(name) = trimmed.strip_suffix(':') {
                section = Some(name.to_string());
                pending_temperature = None;
                pending_resistance = None;
                continue;
            }
            let entry = trimmed.trim_start_matches('-').trim();
            let (key, value) = entry.split_once(':').ok_or_else(|| {
                CalibrationError::File(format!("malformed line: {line}"))
            })?;
            let key = key.trim();
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| CalibrationError::File(format!("bad numeric value in: {line}")))?;

            match section.as_deref() {
                Some("temperatures") => match key {
                    "resistance" => pending_resistance = Some(value),
                    "temperature" => pending_temperature = Some(value),
                    other => return Err(CalibrationError::File(format!("unexpected key {other}"))),
                },
                Some("thermal-resistance") => match key {
                    "temperature" => pending_temperature = Some(value),
                    "thermal-resistance" => {
                        let temperature = pending_temperature.ok_or_else(|| {
                            CalibrationError::File("thermal-resistance row missing temperature".to_string())
                        })?;
                        file.thermal_resistance.push(BandParameter {
                            temperature,
                            value,
                        });
                    }
                    other => return Err(CalibrationError::File(format!("unexpected key {other}"))),
                },
                Some("heat-capacity") => match key {
                    "temperature" => pending_temperature = Some(value),
                    "heat-capacity" => {
                        let temperature = pending_temperature.ok_or_else(|| {
                            CalibrationError::File("heat-capacity row missing temperature".to_string())
                        })?;
                        file.heat_capacity.push(BandParameter {
                            temperature,
                            value,
                        });
                    }
                    other => return Err(CalibrationError::File(format!("unexpected key {other}"))),
                },
                _ => return Err(CalibrationError::File(format!("line outside a section: {line}"))),
            }

            if let (Some(r), Some(t)) = (pending_resistance, pending_temperature) {
                if section.as_deref() == Some("temperatures") {
                    file.temperatures.push(CalibrationPoint::new(r, t));
                    pending_resistance = None;
                    pending_temperature = None;
                }
            }
        }

        Ok(file)
    }
}

/// Writes `file` to `path` atomically: serialize to a temp path, flush,
/// rename over the destination. Any existing file at `path` is first
/// copied aside to `path.<timestamp>`.
pub fn write_atomic(path: &Path, file: &CalibrationFile, timestamp: &str) -> Result<(), CalibrationError> {
    if path.exists() {
        let backup_path = backup_path(path, timestamp);
        fs::copy(path, &backup_path).map_err(|e| CalibrationError::File(e.to_string()))?;
    }

    let tmp_path = tmp_path(path);
    {
        let mut tmp = fs::File::create(&tmp_path).map_err(|e| CalibrationError::File(e.to_string()))?;
        tmp.write_all(file.serialize().as_bytes())
            .map_err(|e| CalibrationError::File(e.to_string()))?;
        tmp.flush().map_err(|e| CalibrationError::File(e.to_string()))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| CalibrationError::File(e.to_string()))?;
    Ok(())
}

pub fn read(path: &Path) -> Result<CalibrationFile, CalibrationError> {
    let text = fs::read_to_string(path).map_err(|e| CalibrationError::File(e.to_string()))?;
    CalibrationFile::parse(&text)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn backup_path(path: &Path, timestamp: &str) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".");
    backup.push(timestamp);
    PathBuf::from(backup)
}
