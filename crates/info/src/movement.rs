//! Per-tick movement classification

use tilesync_core::CoordGrid;
use tilesync_protocol::Step;

/// How an avatar got from the coordinate an observer knows to its current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Stationary,
    /// One tile, single-cell opcode
    Walk(u32),
    /// Two tiles, dual-cell opcode
    Run(u32),
    /// Anything else, sent as an absolute coordinate
    Teleport(CoordGrid),
}

impl Movement {
    /// Classify the move from `from` to `to`
    ///
    /// `jump` forces the absolute form even for a move a compass opcode
    /// could express.
    pub fn between(from: CoordGrid, to: CoordGrid, jump: bool) -> Self {
        if jump {
            return Movement::Teleport(to);
        }
        if from == to {
            return Movement::Stationary;
        }
        if !from.is_valid() || from.level() != to.level() {
            return Movement::Teleport(to);
        }
        let (dx, dz) = from.delta_to(to);
        match Step::resolve(dx, dz) {
            Some(Step::Walk(opcode)) => Movement::Walk(opcode),
            Some(Step::Run(opcode)) => Movement::Run(opcode),
            None => Movement::Teleport(to),
        }
    }

    #[inline]
    pub fn is_stationary(&self) -> bool {
        matches!(self, Movement::Stationary)
    }
}
