use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions that abort the whole-file transform.
///
/// Per-line anomalies (an unparsable number in a `G1` field, say) are not
/// errors; they're logged and the field is left unset.
#[derive(Debug, Error)]
pub enum BricklayerError {
    /// A line needs an object context before any `;printing object` marker.
    #[error(
        "line {line_number}: no object is active yet \
         (missing ';printing object' marker before: {line:?})"
    )]
    UnknownObjectReference { line_number: usize, line: String },

    /// A layer closed without any perimeter length to average widths over.
    #[error(
        "object {object:?} layer {layer}: no perimeter length accumulated, \
         can't average perimeter width"
    )]
    DegenerateLayerAverage { object: String, layer: usize },

    /// The file marks objects some other way, or not at all.
    #[error("unsupported g-code dialect: {0}")]
    UnsupportedDialect(String),

    #[error("invalid setting {name}: {value} (must be finite and > 0)")]
    InvalidSetting { name: &'static str, value: f64 },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BricklayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_object_names_line() {
        let err = BricklayerError::UnknownObjectReference {
            line_number: 7,
            line: "G1 X1 Y2 E0.1".into(),
        };
        let msg = format!("{err}");
        assert!(msg.starts_with("line 7:"));
        assert!(msg.contains("G1 X1 Y2 E0.1"));
    }

    #[test]
    fn degenerate_average_names_object_and_layer() {
        let err = BricklayerError::DegenerateLayerAverage {
            object: "cube.stl id:0 copy 0".into(),
            layer: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("cube.stl id:0 copy 0"));
        assert!(msg.contains("layer 3"));
    }
}
