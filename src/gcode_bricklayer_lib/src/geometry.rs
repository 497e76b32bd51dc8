use crate::Mm;
use std::ops;

// Below this |cross| the two segment directions count as parallel.
const PARALLEL_EPSILON : Mm = 1e-5;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: Mm,
    pub y: Mm,
}

impl Point {
    pub fn new(x: Mm, y: Mm) -> Point {
        Point { x, y }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vec2 {
    pub x: Mm,
    pub y: Mm,
}

impl Vec2 {
    pub fn norm(&self) -> Mm {
        self.dot(*self).sqrt()
    }
    pub fn dot(&self, rhs: Vec2) -> Mm {
        self.x * rhs.x + self.y * rhs.y
    }
    // z component of the 3D cross product
    pub fn cross(&self, rhs: Vec2) -> Mm {
        self.x * rhs.y - self.y * rhs.x
    }
}

impl ops::Sub<Point> for Point {
    type Output = Vec2;

    fn sub(self, rhs: Point) -> Vec2 {
        Vec2 { x: self.x - rhs.x, y: self.y - rhs.y, }
    }
}

/// One straight extruding move, `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    pub fn new(start: Point, end: Point) -> Segment {
        Segment { start, end }
    }

    pub fn direction(&self) -> Vec2 {
        self.end - self.start
    }

    pub fn length(&self) -> Mm {
        self.direction().norm()
    }

    // Where loc lands on the infinite line through self, 0 at start and 1 at end.
    fn projection_parameter(&self, loc: Point) -> Mm {
        let d = self.direction();
        d.dot(loc - self.start) / d.dot(d)
    }

    fn line_distance(&self, loc: Point) -> Mm {
        let d = self.direction();
        d.cross(loc - self.start).abs() / d.norm()
    }

    fn projects_inside(&self, a: Point, b: Point) -> bool {
        let unit = 0.0..=1.0;
        unit.contains(&self.projection_parameter(a)) && unit.contains(&self.projection_parameter(b))
    }

    /// Minimum distance between `self` (the reference) and `query`.
    ///
    /// Perimeters from a slicer don't cross each other, so there's no
    /// intersection case. The checks run in a fixed order and the first one
    /// that applies wins:
    ///
    /// 1. both query endpoints project onto `self`: nearer perpendicular distance
    ///    to `self`'s line
    /// 2. both `self` endpoints project onto `query`: same, against `query`'s line
    /// 3. nearly parallel: perpendicular distance from `query.start` to `self`'s line
    /// 4. nearest pair of endpoints
    ///
    /// On parallel or degenerate input this isn't always the true closest
    /// approach. Ring estimation depends on this exact order.
    pub fn distance(&self, query: &Segment) -> Mm {
        let reference_has_line = self.length() > 0.0;

        if reference_has_line && self.projects_inside(query.start, query.end) {
            return self.line_distance(query.start).min(self.line_distance(query.end));
        }

        if query.length() > 0.0 && query.projects_inside(self.start, self.end) {
            return query.line_distance(self.start).min(query.line_distance(self.end));
        }

        let parallel = self.direction().cross(query.direction()).abs() < PARALLEL_EPSILON;
        if reference_has_line && parallel {
            return self.line_distance(query.start);
        }

        [
            (query.start - self.start).norm(),
            (query.end - self.start).norm(),
            (query.start - self.end).norm(),
            (query.end - self.end).norm(),
        ]
        .into_iter()
        .fold(Mm::INFINITY, Mm::min)
    }
}
