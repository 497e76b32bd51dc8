//! One-shot line classification shared by both passes.
//!
//! Every input line is parsed exactly once into a [`GcodeLine`]. The pre-scan
//! and the rewrite pass both walk the same classified slice, so they can't
//! disagree about what a line means.

use crate::Mm;
use log::warn;
use regex::Regex;

const EXTERNAL_PERIMETER_LABELS: &[&str] = &["External perimeter", "Outer wall"];
const INTERNAL_PERIMETER_LABELS: &[&str] = &["Perimeter", "Inner wall", "Internal perimeter"];
const OVERHANG_PERIMETER_LABELS: &[&str] = &["Overhang perimeter", "Overhang wall"];
const TOP_SOLID_LABELS: &[&str] = &["Top solid infill", "Top surface"];

/// What a `;TYPE:` annotation says the following moves are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    ExternalPerimeter,
    InternalPerimeter,
    OverhangPerimeter,
    TopSolidInfill,
    Other,
}

impl FeatureType {
    pub fn from_label(label: &str) -> FeatureType {
        let label = label.trim();
        if EXTERNAL_PERIMETER_LABELS.contains(&label) {
            FeatureType::ExternalPerimeter
        } else if INTERNAL_PERIMETER_LABELS.contains(&label) {
            FeatureType::InternalPerimeter
        } else if OVERHANG_PERIMETER_LABELS.contains(&label) {
            FeatureType::OverhangPerimeter
        } else if TOP_SOLID_LABELS.contains(&label) {
            FeatureType::TopSolidInfill
        } else {
            FeatureType::Other
        }
    }
}

/// A slicer comment the transform cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Type(FeatureType),
    Width(Mm),
    Z(Mm),
    Height(Mm),
    PrintingObject(String),
}

/// A `G1` move; any field may be absent.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Motion {
    pub x: Option<Mm>,
    pub y: Option<Mm>,
    pub z: Option<Mm>,
    pub e: Option<Mm>,
    pub f: Option<Mm>,
}

impl Motion {
    pub fn has_xy(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    /// Negative E is a retract, not an extrusion.
    pub fn is_extruding(&self) -> bool {
        self.e.is_some_and(|e| e >= 0.0)
    }

    /// Non-extruding move with X, Y and F: the travel that ends a contour.
    pub fn is_closing_travel(&self) -> bool {
        self.x.is_some() && self.y.is_some() && self.f.is_some() && !self.is_extruding()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GcodeLine {
    Annotation(Annotation),
    Motion(Motion),
    Other,
}

/// Compiled patterns for the one dialect we understand.
pub struct Classifier {
    // strip off the G1 and the comment
    g1_move: Regex,
    g1_field: Regex,
    feature_type: Regex,
    width: Regex,
    layer_z: Regex,
    layer_height: Regex,
    printing_object: Regex,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Classifier {
        // literal patterns, checked by the tests below
        Classifier {
            g1_move: Regex::new(r"^G1(?:\s+(?<xyzef>[^;]*))?(?<comment>;.*)?$").unwrap(),
            g1_field: Regex::new(r"(?<axis>[XYZEF])(?<value>[^\sXYZEF;]*)").unwrap(),
            feature_type: Regex::new(r"^;TYPE:(?<label>.*)$").unwrap(),
            width: Regex::new(r"^;WIDTH:(?<value>\S*)").unwrap(),
            layer_z: Regex::new(r"^;Z:(?<value>\S*)").unwrap(),
            layer_height: Regex::new(r"^;HEIGHT:(?<value>\S*)").unwrap(),
            printing_object: Regex::new(r"^;\s*printing object (?<name>.+)$").unwrap(),
        }
    }

    /// `line_number` is 1-based and only used for diagnostics.
    pub fn classify(&self, line: &str, line_number: usize) -> GcodeLine {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(g1_captures) = self.g1_move.captures(line) {
            let mut motion = Motion::default();
            let Some(xyzef) = g1_captures.name("xyzef") else {
                return GcodeLine::Motion(motion);
            };
            for field in self.g1_field.captures_iter(xyzef.as_str()) {
                let axis = &field["axis"];
                let text = &field["value"];
                let value = match text.parse::<Mm>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(
                            "line {}: malformed {} value {:?}, ignoring field",
                            line_number, axis, text
                        );
                        None
                    }
                };
                match axis {
                    "X" => motion.x = value,
                    "Y" => motion.y = value,
                    "Z" => motion.z = value,
                    "E" => motion.e = value,
                    _ => motion.f = value,
                }
            }
            return GcodeLine::Motion(motion);
        }

        if !line.starts_with(';') {
            return GcodeLine::Other;
        }

        if let Some(captures) = self.feature_type.captures(line) {
            let feature = FeatureType::from_label(&captures["label"]);
            return GcodeLine::Annotation(Annotation::Type(feature));
        }
        if let Some(captures) = self.printing_object.captures(line) {
            let name = captures["name"].trim().to_owned();
            return GcodeLine::Annotation(Annotation::PrintingObject(name));
        }

        let numeric: [(&Regex, fn(Mm) -> Annotation, &str); 3] = [
            (&self.width, Annotation::Width, "WIDTH"),
            (&self.layer_z, Annotation::Z, "Z"),
            (&self.layer_height, Annotation::Height, "HEIGHT"),
        ];
        for (re, make, name) in numeric {
            if let Some(captures) = re.captures(line) {
                let text = &captures["value"];
                return match text.parse::<Mm>() {
                    Ok(value) => GcodeLine::Annotation(make(value)),
                    Err(_) => {
                        warn!(
                            "line {}: malformed {} annotation {:?}, ignoring",
                            line_number, name, text
                        );
                        GcodeLine::Other
                    }
                };
            }
        }

        GcodeLine::Other
    }

    pub fn classify_all<S: AsRef<str>>(&self, lines: &[S]) -> Vec<GcodeLine> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| self.classify(line.as_ref(), i + 1))
            .collect()
    }
}

/// `G1 Z…` at three decimals, the form every inserted height move takes.
pub fn absolute_z_move(z: Mm) -> String {
    format!("G1 Z{:.3}", z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> GcodeLine {
        Classifier::new().classify(line, 1)
    }

    #[test]
    fn labels_map_to_feature_types() {
        assert_eq!(FeatureType::from_label("External perimeter"), FeatureType::ExternalPerimeter);
        assert_eq!(FeatureType::from_label("Outer wall"), FeatureType::ExternalPerimeter);
        assert_eq!(FeatureType::from_label("Perimeter"), FeatureType::InternalPerimeter);
        assert_eq!(FeatureType::from_label("Inner wall"), FeatureType::InternalPerimeter);
        assert_eq!(FeatureType::from_label("Internal perimeter"), FeatureType::InternalPerimeter);
        assert_eq!(FeatureType::from_label("Overhang perimeter"), FeatureType::OverhangPerimeter);
        assert_eq!(FeatureType::from_label("Top solid infill"), FeatureType::TopSolidInfill);
        assert_eq!(FeatureType::from_label("Solid infill"), FeatureType::Other);
        assert_eq!(FeatureType::from_label("Skirt/Brim"), FeatureType::Other);
    }

    #[test]
    fn type_annotation_with_crlf() {
        assert_eq!(
            classify(";TYPE:External perimeter\r\n"),
            GcodeLine::Annotation(Annotation::Type(FeatureType::ExternalPerimeter))
        );
    }

    #[test]
    fn numeric_annotations() {
        assert_eq!(classify(";WIDTH:0.449999"), GcodeLine::Annotation(Annotation::Width(0.449999)));
        assert_eq!(classify(";Z:2.2"), GcodeLine::Annotation(Annotation::Z(2.2)));
        assert_eq!(classify(";HEIGHT:0.2"), GcodeLine::Annotation(Annotation::Height(0.2)));
    }

    #[test]
    fn printing_object_with_and_without_space() {
        let expected =
            GcodeLine::Annotation(Annotation::PrintingObject("cube.stl id:0 copy 0".into()));
        assert_eq!(classify(";printing object cube.stl id:0 copy 0"), expected);
        assert_eq!(classify("; printing object cube.stl id:0 copy 0"), expected);
        assert_eq!(classify("; stop printing object cube.stl id:0 copy 0"), GcodeLine::Other);
    }

    #[test]
    fn g1_fields_and_comment() {
        let GcodeLine::Motion(m) = classify("G1 X10.5 Y-3.25 E.0421 ; perimeter") else {
            panic!("not a motion");
        };
        assert_eq!(m.x, Some(10.5));
        assert_eq!(m.y, Some(-3.25));
        assert_eq!(m.e, Some(0.0421));
        assert_eq!(m.f, None);
        assert!(m.has_xy());
        assert!(m.is_extruding());
        assert!(!m.is_closing_travel());
    }

    #[test]
    fn travel_and_retract() {
        let GcodeLine::Motion(travel) = classify("G1 X1 Y2 F9000") else { panic!() };
        assert!(travel.is_closing_travel());
        let GcodeLine::Motion(retracting) = classify("G1 X1 Y2 E-0.8 F9000") else { panic!() };
        assert!(!retracting.is_extruding());
        assert!(retracting.is_closing_travel());
        let GcodeLine::Motion(z_only) = classify("G1 Z0.6 F720") else { panic!() };
        assert!(!z_only.has_xy());
        assert_eq!(z_only.z, Some(0.6));
    }

    #[test]
    fn malformed_field_is_left_unset() {
        let GcodeLine::Motion(m) = classify("G1 X1.2.3 Y4 E0.1") else { panic!() };
        assert_eq!(m.x, None);
        assert_eq!(m.y, Some(4.0));
        assert_eq!(classify(";WIDTH:abc"), GcodeLine::Other);
    }

    #[test]
    fn other_commands() {
        assert_eq!(classify("G10"), GcodeLine::Other);
        assert_eq!(classify("G28"), GcodeLine::Other);
        assert_eq!(classify("M204 S1000"), GcodeLine::Other);
        assert_eq!(classify(";LAYER_CHANGE"), GcodeLine::Other);
        assert_eq!(classify(""), GcodeLine::Other);
    }

    #[test]
    fn bare_g1_is_empty_motion() {
        assert_eq!(classify("G1"), GcodeLine::Motion(Motion::default()));
    }

    #[test]
    fn z_move_format() {
        assert_eq!(absolute_z_move(1.9), "G1 Z1.900");
        assert_eq!(absolute_z_move(2.0), "G1 Z2.000");
    }
}
