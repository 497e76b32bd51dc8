use log::info;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub mod error;
pub mod gcode;
pub mod geometry;
pub mod layers;
pub mod rewrite;
pub mod voting;

pub use error::{BricklayerError, Result};
pub use gcode::{Classifier, GcodeLine};
pub use layers::{LayerRecord, ObjectModel, Objects};
pub use voting::ShiftDecision;

// Distances in the g-code are mm. f64 so segment distances near the ring
// boundaries don't flip between rounds.
pub use f64 as Mm;

/// Tunables for one run. `Default` matches the CLI defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Nominal layer height; contours shift by half of it.
    pub layer_height: Mm,
    /// Accepted for compatibility; has no effect until extrusion compensation
    /// exists.
    pub extrusion_multiplier: Mm,
    /// Distance between neighbouring perimeter centerlines, used to turn a
    /// distance from the external wall into a ring number.
    pub perimeter_spacing: Mm,
    pub nozzle_diameter: Mm,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            layer_height: 0.2,
            extrusion_multiplier: 1.0,
            perimeter_spacing: 0.4,
            nozzle_diameter: 0.4,
        }
    }
}

impl Settings {
    /// `extrusion_multiplier` is not checked; any value is accepted.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("layer_height", self.layer_height),
            ("perimeter_spacing", self.perimeter_spacing),
            ("nozzle_diameter", self.nozzle_diameter),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value <= 0.0 {
                return Err(BricklayerError::InvalidSetting { name, value });
            }
        }
        Ok(())
    }
}

// Object conventions from other firmwares/slicers that we recognise but
// don't speak.
fn foreign_dialect<S: AsRef<str>>(lines: &[S]) -> Option<&'static str> {
    lines.iter().find_map(|line| {
        let line = line.as_ref().trim_start();
        if line.starts_with("EXCLUDE_OBJECT_START") || line.starts_with("EXCLUDE_OBJECT_DEFINE") {
            Some("Klipper EXCLUDE_OBJECT labels")
        } else if line.starts_with("M486 ") {
            Some("M486 object labels")
        } else {
            None
        }
    })
}

/// Rewrite a whole program held in memory. `lines` carry no line terminators
/// and neither does the result.
///
/// Nothing is produced on error.
pub fn process<S: AsRef<str>>(lines: &[S], settings: &Settings) -> Result<Vec<String>> {
    settings.validate()?;
    info!(
        "Z-shift: {:.3} mm, Layer height: {:.3} mm, perimeter spacing: {:.3} mm",
        settings.layer_height * 0.5,
        settings.layer_height,
        settings.perimeter_spacing
    );
    if settings.extrusion_multiplier != 1.0 {
        info!(
            "extrusion multiplier {} is accepted but not applied",
            settings.extrusion_multiplier
        );
    }

    let classified = Classifier::new().classify_all(lines);
    let has_boundaries = classified
        .iter()
        .any(|line| matches!(line, GcodeLine::Annotation(gcode::Annotation::PrintingObject(_))));
    if !has_boundaries {
        if let Some(dialect) = foreign_dialect(lines) {
            return Err(BricklayerError::UnsupportedDialect(format!(
                "{dialect} found; only ';printing object' comments are supported \
                 (enable 'Label objects' in the slicer)"
            )));
        }
    }

    let mut objects = layers::prescan(lines, &classified, settings)?;
    if objects.is_empty() {
        return Err(BricklayerError::UnsupportedDialect(
            "no ';printing object' comments found (enable 'Label objects' in the slicer)".into(),
        ));
    }

    Ok(rewrite::rewrite(lines, &classified, &mut objects, settings))
}

/// Line terminators are stripped, `\r\n` included, so a CRLF file is written
/// back with `\n` endings.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let io_err = |source| BricklayerError::Io { path: path.to_owned(), source };
    let file = fs::File::open(path).map_err(io_err)?;
    io::BufReader::with_capacity(64 * 1024, file)
        .lines()
        .collect::<io::Result<Vec<String>>>()
        .map_err(io_err)
}

/// Write `lines` to `path` via a temporary sibling, so `path` is either the
/// old content or the complete new content.
///
/// A symlinked `path` is followed and its target replaced, and an existing
/// file's permissions carry over.
pub fn write_lines_atomic(path: &Path, lines: &[String]) -> Result<()> {
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_owned());
    let mut tmp_name = target.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let write_tmp = || -> io::Result<()> {
        let file = fs::File::create(&tmp_path)?;
        let mut buf_writer = io::BufWriter::with_capacity(64 * 1024, file);
        for line in lines {
            writeln!(buf_writer, "{}", line)?;
        }
        buf_writer.flush()?;
        if let Ok(metadata) = fs::metadata(&target) {
            buf_writer.get_ref().set_permissions(metadata.permissions())?;
        }
        buf_writer.get_ref().sync_all()
    };
    if let Err(source) = write_tmp() {
        // best effort; the write error is the one worth reporting
        let _ = fs::remove_file(&tmp_path);
        return Err(BricklayerError::Io { path: tmp_path, source });
    }
    fs::rename(&tmp_path, &target)
        .map_err(|source| BricklayerError::Io { path: target, source })
}

/// Read `path`, transform it, and replace it in place. The file is untouched
/// unless the whole transform succeeded.
pub fn process_file(path: &Path, settings: &Settings) -> Result<()> {
    info!("Input file: {}", path.display());
    let before = Instant::now();
    let lines = read_lines(path)?;
    let output = process(&lines, settings)?;
    let added = output.len() - lines.len();
    write_lines_atomic(path, &output)?;
    info!(
        "G-code processing completed: {} lines in, {} height moves added, elapsed: {:.2?}",
        lines.len(),
        added,
        before.elapsed()
    );
    Ok(())
}
