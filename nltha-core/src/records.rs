//! Ground-motion records and the plain-text manifests that list them

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NlthaError, NlthaResult};

/// A ground-motion record with one or two horizontal components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier (file stem of the first component)
    pub name: String,
    /// Time step of the acceleration series (s)
    pub dt: f64,
    /// Multiplier converting file units to the analysis acceleration units
    pub units_scale: f64,
    /// Acceleration series, one entry per component
    pub components: Vec<Vec<f64>>,
}

impl Record {
    /// Create a record, checking time step and component layout
    pub fn new(name: &str, dt: f64, components: Vec<Vec<f64>>) -> NlthaResult<Self> {
        if !(dt > 0.0) {
            return Err(NlthaError::RecordLoad {
                name: name.to_string(),
                reason: format!("time step must be positive, got {}", dt),
            });
        }
        if components.is_empty() || components.len() > 2 {
            return Err(NlthaError::RecordLoad {
                name: name.to_string(),
                reason: format!("expected 1 or 2 components, got {}", components.len()),
            });
        }
        if components.iter().any(|c| c.is_empty()) {
            return Err(NlthaError::RecordLoad {
                name: name.to_string(),
                reason: "acceleration series is empty".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            dt,
            units_scale: 1.0,
            components,
        })
    }

    /// Set the units scale factor
    pub fn with_units_scale(mut self, units_scale: f64) -> Self {
        self.units_scale = units_scale;
        self
    }

    /// Number of horizontal components
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Number of samples in the longest component
    pub fn num_steps(&self) -> usize {
        self.components.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Record duration (s)
    pub fn duration(&self) -> f64 {
        self.num_steps() as f64 * self.dt
    }

    /// Component `index` in analysis units, multiplied by `scale`
    pub fn scaled_component(&self, index: usize, scale: f64) -> Vec<f64> {
        let factor = self.units_scale * scale;
        self.components
            .get(index)
            .map(|c| c.iter().map(|a| a * factor).collect())
            .unwrap_or_default()
    }
}

/// Manifest file names inside a ground-motion directory
///
/// `component_files` are name lists (one per horizontal component), `dt_file`
/// lists the time step of each record. Entries correspond by line position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundMotionManifest {
    pub component_files: Vec<String>,
    pub dt_file: String,
    #[serde(default)]
    pub units_file: Option<String>,
}

impl GroundMotionManifest {
    /// Build from a `[names1, (names2,) dts]` list, the dt file coming last
    pub fn from_file_names(names: &[String]) -> NlthaResult<Self> {
        match names {
            [first, dts] => Ok(Self {
                component_files: vec![first.clone()],
                dt_file: dts.clone(),
                units_file: None,
            }),
            [first, second, dts] => Ok(Self {
                component_files: vec![first.clone(), second.clone()],
                dt_file: dts.clone(),
                units_file: None,
            }),
            _ => Err(NlthaError::config(
                "gm_file_names",
                format!(
                    "expected [names, dts] or [names1, names2, dts], got {} entries",
                    names.len()
                ),
            )),
        }
    }
}

/// Metadata for one record, read from the manifest without loading the series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub name: String,
    pub files: Vec<PathBuf>,
    pub dt: f64,
    pub units_scale: f64,
}

/// Reads manifests and acceleration files from a ground-motion directory
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
    manifest: GroundMotionManifest,
    units_scale: f64,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>, manifest: GroundMotionManifest) -> Self {
        Self {
            dir: dir.into(),
            manifest,
            units_scale: 1.0,
        }
    }

    /// Units scale applied when the manifest has no units file
    pub fn with_units_scale(mut self, units_scale: f64) -> Self {
        self.units_scale = units_scale;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read record metadata from the manifest files
    pub fn entries(&self) -> NlthaResult<Vec<RecordEntry>> {
        let mut name_lists = Vec::with_capacity(self.manifest.component_files.len());
        for file in &self.manifest.component_files {
            name_lists.push(read_list(&self.dir.join(file))?);
        }
        let dts = read_list(&self.dir.join(&self.manifest.dt_file))?;
        let units = match &self.manifest.units_file {
            Some(file) => Some(read_list(&self.dir.join(file))?),
            None => None,
        };

        let count = dts.len();
        for (file, names) in self.manifest.component_files.iter().zip(&name_lists) {
            if names.len() != count {
                return Err(NlthaError::config(
                    "gm_file_names",
                    format!(
                        "'{}' lists {} records but '{}' lists {} time steps",
                        file,
                        names.len(),
                        self.manifest.dt_file,
                        count
                    ),
                ));
            }
        }
        if let Some(units) = &units {
            if units.len() != count {
                return Err(NlthaError::config(
                    "units_file",
                    format!("expected {} scale entries, got {}", count, units.len()),
                ));
            }
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let files: Vec<PathBuf> = name_lists.iter().map(|names| self.dir.join(&names[i])).collect();
            let name = record_name(&name_lists[0][i]);
            let dt = parse_value(&dts[i], &name, "time step")?;
            let units_scale = match &units {
                Some(units) => parse_value(&units[i], &name, "units scale")?,
                None => self.units_scale,
            };
            entries.push(RecordEntry {
                name,
                files,
                dt,
                units_scale,
            });
        }

        Ok(entries)
    }

    /// Load the acceleration series of one record
    pub fn load(&self, entry: &RecordEntry) -> NlthaResult<Record> {
        let mut components = Vec::with_capacity(entry.files.len());
        for path in &entry.files {
            let content = fs::read_to_string(path).map_err(|e| NlthaError::RecordLoad {
                name: entry.name.clone(),
                reason: format!("{}: {}", path.display(), e),
            })?;
            components.push(parse_series(&content, &entry.name)?);
        }

        log::debug!(
            "Loaded record {} ({} component(s), dt = {})",
            entry.name,
            components.len(),
            entry.dt
        );

        Ok(Record::new(&entry.name, entry.dt, components)?.with_units_scale(entry.units_scale))
    }

    /// Load every record listed in the manifest, in manifest order
    pub fn load_all(&self) -> NlthaResult<Vec<Record>> {
        self.entries()?.iter().map(|entry| self.load(entry)).collect()
    }
}

fn read_list(path: &Path) -> NlthaResult<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| NlthaError::RecordLoad {
        name: path.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn record_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string())
}

fn parse_value(raw: &str, record: &str, what: &str) -> NlthaResult<f64> {
    raw.parse::<f64>().map_err(|_| NlthaError::RecordLoad {
        name: record.to_string(),
        reason: format!("invalid {} '{}'", what, raw),
    })
}

/// Parse an acceleration file: any number of values per line, separated by
/// whitespace or commas. Lines that do not start with a number are headers.
fn parse_series(content: &str, record: &str) -> NlthaResult<Vec<f64>> {
    let mut values = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let mut tokens = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .peekable();

        match tokens.peek() {
            Some(first) if first.parse::<f64>().is_ok() => {}
            _ => continue,
        }

        for token in tokens {
            let value = token.parse::<f64>().map_err(|_| NlthaError::RecordLoad {
                name: record.to_string(),
                reason: format!("line {}: invalid value '{}'", line_no + 1, token),
            })?;
            values.push(value);
        }
    }

    Ok(values)
}
