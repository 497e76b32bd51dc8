//! Which ring is this contour, and does it get shifted?
//!
//! The g-code doesn't say which inner perimeter a contour is, so each vertex
//! votes with its distance to the layer's external perimeter, in units of
//! perimeter spacing.

use crate::Mm;
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDecision {
    /// Odd ring: print half a layer lower.
    Shift,
    Keep,
}

/// Distance from the external wall, in perimeter spacings, with ring 1 as the
/// floor. Rounds half to even.
pub fn ring_index(distance: Mm, perimeter_spacing: Mm) -> u64 {
    // `as` saturates; inputs here are finite and non-negative
    ((distance / perimeter_spacing).round_ties_even() as u64).max(1)
}

/// Most frequent ring, ties going to whichever was seen first. `None` with no
/// votes.
pub fn select_ring(indices: impl IntoIterator<Item = u64>) -> Option<u64> {
    // insertion-ordered on purpose; a hash map would make ties nondeterministic
    let mut counts: Vec<(u64, usize)> = Vec::new();
    for index in indices {
        match counts.iter_mut().find(|(seen, _)| *seen == index) {
            Some((_, count)) => *count += 1,
            None => counts.push((index, 1)),
        }
    }
    // stable, so equal counts keep first-seen order
    counts.sort_by_key(|&(_, count)| Reverse(count));
    counts.first().map(|&(index, _)| index)
}

pub fn decide(distances: &[Mm], perimeter_spacing: Mm) -> ShiftDecision {
    let ring = select_ring(
        distances
            .iter()
            .filter(|d| d.is_finite())
            .map(|&d| ring_index(d, perimeter_spacing)),
    );
    match ring {
        Some(ring) if ring % 2 == 1 => ShiftDecision::Shift,
        _ => ShiftDecision::Keep,
    }
}
