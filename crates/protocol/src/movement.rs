//! # Movement opcode tables
//!
//! Per-tick movement of up to two tiles is sent as a compass opcode instead of
//! a coordinate. Both tables are built at compile time: pre-filled with the
//! sentinel `-1`, then populated with the known mappings.
//!
//! ## Single cell (walk)
//! Index `(dx + 1) | (dz + 1) << 2`, 16 slots, 8 opcodes:
//!
//! ```text
//!  dz=+1   5 6 7
//!  dz= 0   3 . 4
//!  dz=-1   0 1 2
//!        dx=-1 0 +1
//! ```
//!
//! ## Dual cell (run)
//! Index `(dx + 2) | (dz + 2) << 3`, 64 slots, 16 opcodes covering the outer
//! ring of the 5x5 square. Inner-ring deltas are sentinel here; they belong to
//! the single-cell table.

/// Table sentinel for "no opcode"
pub const NO_OPCODE: i8 = -1;

const SINGLE_CELL_DELTAS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const DUAL_CELL_DELTAS: [(i32, i32); 16] = [
    (-2, -2),
    (-1, -2),
    (0, -2),
    (1, -2),
    (2, -2),
    (-2, -1),
    (2, -1),
    (-2, 0),
    (2, 0),
    (-2, 1),
    (2, 1),
    (-2, 2),
    (-1, 2),
    (0, 2),
    (1, 2),
    (2, 2),
];

#[inline]
const fn single_index(dx: i32, dz: i32) -> usize {
    ((dx + 1) | ((dz + 1) << 2)) as usize
}

#[inline]
const fn dual_index(dx: i32, dz: i32) -> usize {
    ((dx + 2) | ((dz + 2) << 3)) as usize
}

const fn build_single_cell_table() -> [i8; 16] {
    let mut table = [NO_OPCODE; 16];
    let mut opcode = 0;
    while opcode < SINGLE_CELL_DELTAS.len() {
        let (dx, dz) = SINGLE_CELL_DELTAS[opcode];
        table[single_index(dx, dz)] = opcode as i8;
        opcode += 1;
    }
    table
}

const fn build_dual_cell_table() -> [i8; 64] {
    let mut table = [NO_OPCODE; 64];
    let mut opcode = 0;
    while opcode < DUAL_CELL_DELTAS.len() {
        let (dx, dz) = DUAL_CELL_DELTAS[opcode];
        table[dual_index(dx, dz)] = opcode as i8;
        opcode += 1;
    }
    table
}

/// Single-cell delta to opcode table
pub static SINGLE_CELL_TABLE: [i8; 16] = build_single_cell_table();

/// Dual-cell delta to opcode table
pub static DUAL_CELL_TABLE: [i8; 64] = build_dual_cell_table();

/// Raw table lookup for a single-cell delta, `-1` when unresolvable
#[inline]
pub fn single_cell_raw(dx: i32, dz: i32) -> i8 {
    if !(-1..=1).contains(&dx) || !(-1..=1).contains(&dz) {
        return NO_OPCODE;
    }
    SINGLE_CELL_TABLE[single_index(dx, dz)]
}

/// Raw table lookup for a dual-cell delta, `-1` when unresolvable
#[inline]
pub fn dual_cell_raw(dx: i32, dz: i32) -> i8 {
    if !(-2..=2).contains(&dx) || !(-2..=2).contains(&dz) {
        return NO_OPCODE;
    }
    DUAL_CELL_TABLE[dual_index(dx, dz)]
}

/// 3-bit walk opcode for a one-tile delta
#[inline]
pub fn single_cell_opcode(dx: i32, dz: i32) -> Option<u32> {
    match single_cell_raw(dx, dz) {
        NO_OPCODE => None,
        opcode => Some(opcode as u32),
    }
}

/// 4-bit run opcode for a two-tile delta
#[inline]
pub fn dual_cell_opcode(dx: i32, dz: i32) -> Option<u32> {
    match dual_cell_raw(dx, dz) {
        NO_OPCODE => None,
        opcode => Some(opcode as u32),
    }
}

/// Delta for a walk opcode, used by decoders
#[inline]
pub fn single_cell_delta(opcode: u32) -> Option<(i32, i32)> {
    SINGLE_CELL_DELTAS.get(opcode as usize).copied()
}

/// Delta for a run opcode, used by decoders
#[inline]
pub fn dual_cell_delta(opcode: u32) -> Option<(i32, i32)> {
    DUAL_CELL_DELTAS.get(opcode as usize).copied()
}

/// Cheapest compass encoding of a per-tick delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Walk(u32),
    Run(u32),
}

impl Step {
    /// Resolve a delta through the single-cell table, then the dual-cell table
    pub fn resolve(dx: i32, dz: i32) -> Option<Step> {
        single_cell_opcode(dx, dz)
            .map(Step::Walk)
            .or_else(|| dual_cell_opcode(dx, dz).map(Step::Run))
    }
}
