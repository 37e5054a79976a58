//! Move inference from two consecutive board states.

use std::collections::BTreeSet;
use tracing::debug;

use crate::models::{BoardState, MoveResult, PieceColor, Square};

/// Squares a colour lost and gained between two states
struct ColorDelta {
    lost: BTreeSet<Square>,
    gained: BTreeSet<Square>,
}

impl ColorDelta {
    fn between(older: &BTreeSet<Square>, newer: &BTreeSet<Square>) -> Self {
        Self {
            lost: older.difference(newer).copied().collect(),
            gained: newer.difference(older).copied().collect(),
        }
    }

    fn is_unchanged(&self) -> bool {
        self.lost.is_empty() && self.gained.is_empty()
    }

    fn single_lost(&self) -> Option<Square> {
        single(&self.lost)
    }

    fn single_gained(&self) -> Option<Square> {
        single(&self.gained)
    }
}

fn single(set: &BTreeSet<Square>) -> Option<Square> {
    if set.len() == 1 { set.iter().next().copied() } else { None }
}

/// Infer what happened between `older` and `newer`.
///
/// Recognises one move or one capture. Anything else, including no change
/// and simultaneous changes of both colours, is `NoneDetected`; ambiguous
/// deltas are never guessed at.
pub fn diff_states(older: &BoardState, newer: &BoardState) -> MoveResult {
    let light = ColorDelta::between(older.light(), newer.light());
    let dark = ColorDelta::between(older.dark(), newer.dark());

    let result = capture(PieceColor::Light, &light, &dark)
        .or_else(|| capture(PieceColor::Dark, &dark, &light))
        .or_else(|| quiet_move(PieceColor::Light, &light, &dark))
        .or_else(|| quiet_move(PieceColor::Dark, &dark, &light))
        .unwrap_or(MoveResult::NoneDetected);

    if result == MoveResult::NoneDetected && !(light.is_unchanged() && dark.is_unchanged()) {
        debug!(
            light_lost = light.lost.len(),
            light_gained = light.gained.len(),
            dark_lost = dark.lost.len(),
            dark_gained = dark.gained.len(),
            "no clear move"
        );
    }
    result
}

/// `mover` lost one square, `victim` lost one square, `victim` gained
/// nothing, and `mover` gained either nothing or exactly the victim's square.
fn capture(color: PieceColor, mover: &ColorDelta, victim: &ColorDelta) -> Option<MoveResult> {
    let from = mover.single_lost()?;
    let at = victim.single_lost()?;
    if !victim.gained.is_empty() || from == at {
        return None;
    }
    let landed_on_target = match mover.gained.len() {
        0 => true,
        1 => mover.gained.contains(&at),
        _ => false,
    };
    landed_on_target.then_some(MoveResult::Captured { color, from, at })
}

/// One square lost and one gained by `mover`, the other colour untouched
fn quiet_move(color: PieceColor, mover: &ColorDelta, other: &ColorDelta) -> Option<MoveResult> {
    if !other.is_unchanged() {
        return None;
    }
    let from = mover.single_lost()?;
    let to = mover.single_gained()?;
    (from != to).then_some(MoveResult::Moved { color, from, to })
}
