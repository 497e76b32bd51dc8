//! Per-object layer model and the pre-scan that fills it.
//!
//! The rewrite pass needs to know things about a layer before it reaches the
//! layer's body (whether it has top solid infill further down, its Z, where
//! its external perimeter runs), so the whole file is scanned once up front.

use crate::error::{BricklayerError, Result};
use crate::gcode::{Annotation, FeatureType, GcodeLine, Motion};
use crate::geometry::{Point, Segment};
use crate::{Mm, Settings};
use log::{debug, info};
use std::collections::HashMap;

/// Initial perimeter width as a multiple of nozzle diameter, until a `;WIDTH:`
/// says otherwise.
const DEFAULT_WIDTH_FACTOR: Mm = 1.125;

/// Stable handle for an object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

/// Everything known about one layer of one object.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LayerRecord {
    /// From `;HEIGHT:`; informational only.
    pub height: Option<Mm>,
    /// From `;Z:`; the baseline the rewrite restores after a shifted contour.
    pub absolute_z: Option<Mm>,
    pub has_top: bool,
    pub has_overhang: bool,
    pub external_perimeters: Vec<Segment>,
    /// Width-weighted average over perimeter length, set when the next layer
    /// of the object starts. The object's last layer never gets one.
    pub average_perimeter_width: Option<Mm>,
}

impl LayerRecord {
    fn new(height: Option<Mm>, absolute_z: Option<Mm>) -> LayerRecord {
        LayerRecord { height, absolute_z, ..LayerRecord::default() }
    }

    /// Top surfaces have to stay flush, overhangs aren't handled.
    pub fn is_excluded(&self) -> bool {
        self.has_top || self.has_overhang
    }
}

#[derive(Debug, Clone)]
pub struct ObjectModel {
    pub name: String,
    pub perimeter_width: Mm,
    pub cursor: Point,
    // Running totals over every perimeter move so far, not reset per layer.
    perimeter_width_sum: Mm,
    perimeter_length: Mm,
    // Never empty; the last entry is the layer being built.
    layers: Vec<LayerRecord>,
    /// Advanced by the rewrite pass only; `None` until its first boundary.
    pub current_layer_index: Option<usize>,
}

impl ObjectModel {
    fn new(
        name: String,
        perimeter_width: Mm,
        cursor: Point,
        first_layer: LayerRecord,
    ) -> ObjectModel {
        ObjectModel {
            name,
            perimeter_width,
            cursor,
            perimeter_width_sum: 0.0,
            perimeter_length: 0.0,
            layers: vec![first_layer],
            current_layer_index: None,
        }
    }

    pub fn layers(&self) -> &[LayerRecord] {
        &self.layers
    }

    fn open_layer(&mut self) -> &mut LayerRecord {
        let last = self.layers.len() - 1;
        &mut self.layers[last]
    }

    fn update_coordinates(&mut self, to: Point) {
        self.cursor = to;
    }

    fn new_layer(&mut self, cursor: Point, next: LayerRecord) -> Result<()> {
        let closing = self.layers.len() - 1;
        if self.perimeter_length == 0.0 {
            return Err(BricklayerError::DegenerateLayerAverage {
                object: self.name.clone(),
                layer: closing,
            });
        }
        let average = self.perimeter_width_sum / self.perimeter_length;
        self.open_layer().average_perimeter_width = Some(average);
        debug!("{}: layer {} closed, average perimeter width {:.4}", self.name, closing, average);
        self.layers.push(next);
        self.update_coordinates(cursor);
        Ok(())
    }

    fn add_external_perimeter_line(&mut self, to: Point) {
        let segment = Segment::new(self.cursor, to);
        self.open_layer().external_perimeters.push(segment);
    }

    fn add_perimeter_line(&mut self, to: Point) {
        let length = (to - self.cursor).norm();
        self.perimeter_width_sum += self.perimeter_width * length;
        self.perimeter_length += length;
    }

    /// The layer the rewrite pass is currently in.
    pub fn active_layer(&self) -> Option<&LayerRecord> {
        self.current_layer_index.and_then(|index| self.layers.get(index))
    }

    fn advance_layer(&mut self) -> usize {
        let next = self.current_layer_index.map_or(0, |index| index + 1);
        self.current_layer_index = Some(next);
        next
    }
}

/// Arena owning every object seen in one file.
#[derive(Debug, Default)]
pub struct Objects {
    ids: HashMap<String, ObjectId>,
    models: Vec<ObjectModel>,
}

impl Objects {
    pub fn new() -> Objects {
        Objects::default()
    }

    pub fn id(&self, name: &str) -> Option<ObjectId> {
        self.ids.get(name).copied()
    }

    pub fn get(&self, id: ObjectId) -> &ObjectModel {
        &self.models[id.0]
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut ObjectModel {
        &mut self.models[id.0]
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectModel> {
        self.models.iter()
    }

    fn insert(&mut self, model: ObjectModel) -> ObjectId {
        let id = ObjectId(self.models.len());
        self.ids.insert(model.name.clone(), id);
        self.models.push(model);
        id
    }

    /// Rewrite-pass side of a boundary marker: step the object to its next
    /// recorded layer. Returns the new layer index.
    pub fn advance_layer(&mut self, id: ObjectId) -> usize {
        self.get_mut(id).advance_layer()
    }
}

struct PreScan<'a> {
    settings: &'a Settings,
    objects: Objects,
    current: Option<ObjectId>,
    cursor: Point,
    feature: FeatureType,
    // ;Z: and ;HEIGHT: describe the upcoming layer, so they wait for the
    // next boundary marker.
    pending_z: Option<Mm>,
    pending_height: Option<Mm>,
}

impl<'a> PreScan<'a> {
    fn current_object_mut(&mut self, line_number: usize, raw: &str) -> Result<&mut ObjectModel> {
        match self.current {
            Some(id) => Ok(self.objects.get_mut(id)),
            None => Err(BricklayerError::UnknownObjectReference {
                line_number,
                line: raw.to_owned(),
            }),
        }
    }

    fn boundary(&mut self, name: &str) -> Result<()> {
        let next = LayerRecord::new(self.pending_height, self.pending_z);
        let id = match self.objects.id(name) {
            Some(id) => {
                self.objects.get_mut(id).new_layer(self.cursor, next)?;
                id
            }
            None => {
                let width = self.settings.nozzle_diameter * DEFAULT_WIDTH_FACTOR;
                info!("new object {:?}", name);
                self.objects.insert(ObjectModel::new(name.to_owned(), width, self.cursor, next))
            }
        };
        self.current = Some(id);
        Ok(())
    }

    fn motion(&mut self, line_number: usize, raw: &str, motion: &Motion) -> Result<()> {
        if !motion.has_xy() {
            return Ok(());
        }
        let to = Point::new(motion.x.unwrap_or(self.cursor.x), motion.y.unwrap_or(self.cursor.y));
        let feature = self.feature;
        let object = self.current_object_mut(line_number, raw)?;
        if motion.is_extruding() {
            match feature {
                FeatureType::ExternalPerimeter => {
                    object.add_external_perimeter_line(to);
                    object.add_perimeter_line(to);
                }
                FeatureType::InternalPerimeter => object.add_perimeter_line(to),
                _ => {}
            }
        }
        object.update_coordinates(to);
        self.cursor = to;
        Ok(())
    }

    fn line(&mut self, line_number: usize, raw: &str, line: &GcodeLine) -> Result<()> {
        match line {
            GcodeLine::Annotation(Annotation::PrintingObject(name)) => self.boundary(name)?,
            GcodeLine::Annotation(Annotation::Width(width)) => {
                self.current_object_mut(line_number, raw)?.perimeter_width = *width;
            }
            GcodeLine::Annotation(Annotation::Z(z)) => self.pending_z = Some(*z),
            GcodeLine::Annotation(Annotation::Height(height)) => {
                self.pending_height = Some(*height)
            }
            GcodeLine::Annotation(Annotation::Type(feature)) => {
                self.feature = *feature;
                match feature {
                    FeatureType::TopSolidInfill => {
                        self.current_object_mut(line_number, raw)?.open_layer().has_top = true;
                    }
                    FeatureType::OverhangPerimeter => {
                        self.current_object_mut(line_number, raw)?.open_layer().has_overhang = true;
                    }
                    _ => {}
                }
            }
            GcodeLine::Motion(motion) => self.motion(line_number, raw, motion)?,
            GcodeLine::Other => {}
        }
        Ok(())
    }
}

/// First pass: build the per-object layer model. Produces no output.
///
/// `raw` and `classified` are the same lines, before and after
/// classification.
pub fn prescan<S: AsRef<str>>(
    raw: &[S],
    classified: &[GcodeLine],
    settings: &Settings,
) -> Result<Objects> {
    let mut scan = PreScan {
        settings,
        objects: Objects::new(),
        current: None,
        cursor: Point::default(),
        feature: FeatureType::Other,
        pending_z: None,
        pending_height: None,
    };
    for (index, (raw, line)) in raw.iter().zip(classified).enumerate() {
        scan.line(index + 1, raw.as_ref(), line)?;
    }
    for object in scan.objects.iter() {
        info!("object {:?}: {} layers", object.name, object.layers.len());
    }
    Ok(scan.objects)
}
