//! Second pass: re-classify every line and emit the rewritten program.

use crate::gcode::{absolute_z_move, Annotation, FeatureType, GcodeLine};
use crate::geometry::{Point, Segment};
use crate::layers::{ObjectId, Objects};
use crate::voting::{self, ShiftDecision};
use crate::{Mm, Settings};
use log::{debug, info, warn};
use ordered_float::OrderedFloat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PerimeterState {
    External,
    Internal,
    Overhang,
    Other,
}

impl From<FeatureType> for PerimeterState {
    fn from(feature: FeatureType) -> Self {
        match feature {
            FeatureType::ExternalPerimeter => PerimeterState::External,
            FeatureType::InternalPerimeter => PerimeterState::Internal,
            FeatureType::OverhangPerimeter => PerimeterState::Overhang,
            FeatureType::TopSolidInfill | FeatureType::Other => PerimeterState::Other,
        }
    }
}

// One internal perimeter contour, held back until we know its ring.
struct ContourBuffer {
    // where the nozzle was just before the first buffered line
    start: Point,
    layer: usize,
    layer_z: Mm,
    // indices into the input
    lines: Vec<usize>,
}

/// Minimum distance from each X/Y move of a contour to the external perimeter,
/// one entry per move. Empty if the layer has no external perimeter.
pub fn vertex_distances<'a>(
    start: Point,
    lines: impl IntoIterator<Item = &'a GcodeLine>,
    external_perimeters: &[Segment],
) -> Vec<Mm> {
    let mut cursor = start;
    let mut distances = Vec::new();
    for line in lines {
        let GcodeLine::Motion(motion) = line else {
            continue;
        };
        if !motion.has_xy() {
            continue;
        }
        let to = Point::new(motion.x.unwrap_or(cursor.x), motion.y.unwrap_or(cursor.y));
        let query = Segment::new(cursor, to);
        let nearest = external_perimeters
            .iter()
            .map(|segment| OrderedFloat(segment.distance(&query)))
            .min();
        if let Some(OrderedFloat(distance)) = nearest {
            distances.push(distance);
        }
        cursor = to;
    }
    distances
}

struct Rewriter<'a, S> {
    raw: &'a [S],
    classified: &'a [GcodeLine],
    objects: &'a mut Objects,
    settings: &'a Settings,
    output: Vec<String>,
    state: PerimeterState,
    current: Option<ObjectId>,
    cursor: Point,
    contour: Option<ContourBuffer>,
}

impl<'a, S: AsRef<str>> Rewriter<'a, S> {
    fn emit_input(&mut self, index: usize) {
        self.output.push(self.raw[index].as_ref().to_owned());
    }

    // The active layer's Z, or None when this layer is left alone: before any
    // object, the first layer, top or overhang layers, or no ;Z: recorded.
    fn eligible_z(&self) -> Option<(usize, Mm)> {
        let object = self.objects.get(self.current?);
        let index = object.current_layer_index?;
        let layer = object.active_layer()?;
        if index == 0 || layer.is_excluded() {
            return None;
        }
        layer.absolute_z.map(|z| (index, z))
    }

    fn boundary(&mut self, index: usize, name: &str) {
        self.finish_contour();
        match self.objects.id(name) {
            Some(id) => {
                let layer = self.objects.advance_layer(id);
                self.current = Some(id);
                let record = self.objects.get(id).active_layer();
                match record.and_then(|r| r.absolute_z) {
                    Some(z) => info!("Layer {} detected at Z={:.3}", layer, z),
                    None => warn!(
                        "{:?} layer {} has no ;Z: annotation, leaving it unchanged",
                        name, layer
                    ),
                }
                if let Some(record) = record {
                    if record.has_top {
                        info!("layer {} has top solid infill, leaving it unchanged", layer);
                    } else if record.has_overhang {
                        info!("layer {} has overhang perimeters, leaving it unchanged", layer);
                    }
                }
            }
            None => warn!("line {}: object {:?} missing from pre-scan", index + 1, name),
        }
        self.emit_input(index);
    }

    fn finish_contour(&mut self) {
        let Some(contour) = self.contour.take() else {
            return;
        };
        let layer = self.current.and_then(|id| self.objects.get(id).active_layer());
        let external: &[Segment] = match layer {
            Some(layer) => &layer.external_perimeters,
            None => &[],
        };
        if external.is_empty() {
            warn!(
                "layer {} has no external perimeter to measure against, contour left in place",
                contour.layer
            );
        }
        let classified = self.classified;
        let distances = vertex_distances(
            contour.start,
            contour.lines.iter().map(|&i| &classified[i]),
            external,
        );
        debug!("contour at layer {} vertex distances {:?}", contour.layer, distances);

        match voting::decide(&distances, self.settings.perimeter_spacing) {
            ShiftDecision::Shift => {
                let shifted_z = contour.layer_z - 0.5 * self.settings.layer_height;
                info!("Contour at layer {} shifted to Z={:.3}", contour.layer, shifted_z);
                self.output.push(absolute_z_move(shifted_z));
                for &i in &contour.lines {
                    self.emit_input(i);
                }
                self.output.push(absolute_z_move(contour.layer_z));
            }
            ShiftDecision::Keep => {
                info!("Contour at layer {} kept at Z={:.3}", contour.layer, contour.layer_z);
                for &i in &contour.lines {
                    self.emit_input(i);
                }
            }
        }
    }

    fn line(&mut self, index: usize) {
        let classified = self.classified;
        let line = &classified[index];
        let before = self.cursor;
        if let GcodeLine::Motion(motion) = line {
            self.cursor = Point::new(motion.x.unwrap_or(before.x), motion.y.unwrap_or(before.y));
        }

        if let GcodeLine::Annotation(Annotation::PrintingObject(name)) = line {
            self.boundary(index, name);
            return;
        }

        let eligible = self.eligible_z();

        if let GcodeLine::Annotation(Annotation::Type(feature)) = line {
            self.finish_contour();
            self.state = PerimeterState::from(*feature);
            if let Some((layer, z)) = eligible {
                match self.state {
                    PerimeterState::External => {
                        info!("External perimeter detected at layer {}", layer);
                        self.output.push(absolute_z_move(z));
                    }
                    PerimeterState::Internal => {
                        info!("Internal perimeter contour started at layer {}", layer)
                    }
                    PerimeterState::Overhang | PerimeterState::Other => {}
                }
            }
            self.emit_input(index);
            return;
        }

        let Some((layer, layer_z)) = eligible else {
            self.emit_input(index);
            return;
        };
        if self.state != PerimeterState::Internal {
            self.emit_input(index);
            return;
        }

        match line {
            GcodeLine::Motion(motion) if motion.is_closing_travel() => {
                self.finish_contour();
                self.emit_input(index);
            }
            _ => match self.contour.as_mut() {
                Some(contour) => contour.lines.push(index),
                None => {
                    info!("Perimeter contour detected at layer {}", layer);
                    self.contour = Some(ContourBuffer {
                        start: before,
                        layer,
                        layer_z,
                        lines: vec![index],
                    });
                }
            },
        }
    }
}

/// Second pass. Every input line comes out once, in order; the only additions
/// are `G1 Z` moves.
pub fn rewrite<S: AsRef<str>>(
    raw: &[S],
    classified: &[GcodeLine],
    objects: &mut Objects,
    settings: &Settings,
) -> Vec<String> {
    let mut rewriter = Rewriter {
        raw,
        classified,
        objects,
        settings,
        output: Vec::with_capacity(raw.len() + raw.len() / 16),
        state: PerimeterState::Other,
        current: None,
        cursor: Point::default(),
        contour: None,
    };
    for index in 0..raw.len().min(classified.len()) {
        rewriter.line(index);
    }
    rewriter.finish_contour();
    rewriter.output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcode::Classifier;
    use approx::assert_relative_eq;

    fn classify(lines: &[&str]) -> Vec<GcodeLine> {
        Classifier::new().classify_all(lines)
    }

    fn square(half: Mm) -> Vec<Segment> {
        let corners = [
            Point::new(-half, -half),
            Point::new(half, -half),
            Point::new(half, half),
            Point::new(-half, half),
        ];
        (0..4).map(|i| Segment::new(corners[i], corners[(i + 1) % 4])).collect()
    }

    #[test]
    fn distances_follow_the_contour() {
        let wall = square(10.0);
        let lines =
            classify(&["G1 X9.6 Y-9.6 E0.5", ";WIDTH:0.45", "G1 X9.6 Y9.6 E0.5", "G1 F1800"]);
        let distances = vertex_distances(Point::new(-9.6, -9.6), &lines, &wall);
        assert_eq!(distances.len(), 2);
        assert_relative_eq!(distances[0], 0.4, epsilon = 1e-9);
        assert_relative_eq!(distances[1], 0.4, epsilon = 1e-9);
    }

    #[test]
    fn single_axis_moves_keep_the_other_coordinate() {
        let wall = square(10.0);
        let lines = classify(&["G1 X9.2 E0.5", "G1 Y9.2 E0.5"]);
        let distances = vertex_distances(Point::new(-9.2, -9.2), &lines, &wall);
        assert_eq!(distances.len(), 2);
        assert_relative_eq!(distances[0], 0.8, epsilon = 1e-9);
        assert_relative_eq!(distances[1], 0.8, epsilon = 1e-9);
    }

    #[test]
    fn no_wall_no_distances() {
        let lines = classify(&["G1 X1 Y1 E0.5"]);
        assert!(vertex_distances(Point::default(), &lines, &[]).is_empty());
    }
}
