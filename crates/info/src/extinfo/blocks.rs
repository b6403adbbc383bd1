//! Extended info block values
//!
//! Plain data carried by the blocks. Encoding lives in the platform modules;
//! these types only know their defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Equipment slots shown on a player model
pub const EQUIPMENT_SLOTS: usize = 12;

/// Body colour channels
pub const COLOUR_SLOTS: usize = 5;

/// Base animations (ready, turn, walk, walk back, walk left, walk right, run)
pub const BASE_ANIM_SLOTS: usize = 7;

/// Most hit marks or head bars one block can carry
pub const MAX_HIT_ENTRIES: usize = 255;

/// Player model and identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    pub gender: u8,
    pub skull_icon: i8,
    pub overhead_icon: i8,
    /// Shown as this NPC type instead of a player model
    pub transform: Option<u16>,
    pub equipment: [u16; EQUIPMENT_SLOTS],
    pub colours: [u8; COLOUR_SLOTS],
    pub base_anims: [u16; BASE_ANIM_SLOTS],
    pub name: String,
    pub combat_level: u8,
    pub skill_level: u16,
    pub hidden: bool,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            gender: 0,
            skull_icon: -1,
            overhead_icon: -1,
            transform: None,
            equipment: [0; EQUIPMENT_SLOTS],
            colours: [0; COLOUR_SLOTS],
            base_anims: [0xFFFF; BASE_ANIM_SLOTS],
            name: String::new(),
            combat_level: 0,
            skill_level: 0,
            hidden: false,
        }
    }
}

/// Animation to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: u16,
    pub delay: u8,
}

impl Sequence {
    pub const NONE: u16 = 0xFFFF;
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            id: Self::NONE,
            delay: 0,
        }
    }
}

/// Entity the avatar keeps turning towards
///
/// Encoded as a 24-bit value: NPC indices as-is, player indices offset by
/// [`PLAYER_OFFSET`](Self::PLAYER_OFFSET), [`NONE`](Self::NONE) to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacePathingEntity(pub u32);

impl FacePathingEntity {
    pub const NONE: u32 = 0xFF_FFFF;
    pub const PLAYER_OFFSET: u32 = 0x1_0000;

    pub fn npc(index: u16) -> Self {
        Self(index as u32)
    }

    pub fn player(index: u16) -> Self {
        Self(index as u32 + Self::PLAYER_OFFSET)
    }
}

impl Default for FacePathingEntity {
    fn default() -> Self {
        Self(Self::NONE)
    }
}

/// Direction to face, in 1/2048 turns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceAngle(pub u16);

/// Overhead text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Say(pub String);

/// Public chat message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub colour: u8,
    pub effects: u8,
    pub mod_icon: u8,
    pub auto_typed: bool,
    pub text: String,
}

/// One hit splat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitMark {
    /// Player that dealt the hit, who sees `self_type`
    pub source: Option<usize>,
    pub self_type: u16,
    pub other_type: u16,
    pub value: u16,
    pub delay: u16,
}

/// One health bar update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadBar {
    pub id: u16,
    pub start_fill: u8,
    pub end_fill: u8,
    pub start_time: u16,
    pub end_time: u16,
}

/// Hit splats and head bars raised this tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hits {
    pub marks: Vec<HitMark>,
    pub bars: Vec<HeadBar>,
}

impl Hits {
    /// Type of `mark` as seen by `observer` watching `owner`
    pub fn mark_type(mark: &HitMark, observer: usize, owner: usize) -> u16 {
        if observer == owner || mark.source == Some(observer) {
            mark.self_type
        } else {
            mark.other_type
        }
    }
}

/// Graphic attached to the avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotAnim {
    pub slot: u8,
    pub id: u16,
    pub height: u16,
    pub delay: u16,
}

/// Spot animations by slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotAnims(pub Vec<SpotAnim>);

impl SpotAnims {
    /// Set or replace the animation in `anim.slot`
    pub fn put(&mut self, anim: SpotAnim) {
        match self.0.iter_mut().find(|a| a.slot == anim.slot) {
            Some(existing) => *existing = anim,
            None => self.0.push(anim),
        }
    }
}

/// Forced movement between two offsets relative to the current tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactMove {
    pub delta_x1: i8,
    pub delta_z1: i8,
    pub delta_x2: i8,
    pub delta_z2: i8,
    pub delay1: u16,
    pub delay2: u16,
    pub direction: u16,
}

/// Persistent movement speed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveSpeed(pub i8);

/// Movement speed for this tick only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryMoveSpeed(pub i8);

/// Colour overlay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tint {
    pub start: u16,
    pub end: u16,
    pub hue: u8,
    pub saturation: u8,
    pub luminance: u8,
    pub opacity: u8,
}

/// Tint for everyone plus per-observer overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tinting {
    pub global: Option<Tint>,
    pub observers: HashMap<usize, Tint>,
}

impl Tinting {
    /// The tint `observer` should see, if any
    pub fn for_observer(&self, observer: usize) -> Option<&Tint> {
        self.observers.get(&observer).or(self.global.as_ref())
    }
}

/// Tile an NPC turns to face
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceCoord {
    pub x: u16,
    pub z: u16,
    pub instant: bool,
}

/// NPC shown as another NPC type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation(pub u16);

impl Transformation {
    pub const NONE: u16 = 0xFFFF;
}

impl Default for Transformation {
    fn default() -> Self {
        Self(Self::NONE)
    }
}

/// NPC combat level override; `-1` shows the type's own level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatLevelChange(pub i32);

impl Default for CombatLevelChange {
    fn default() -> Self {
        Self(-1)
    }
}

/// NPC name override; empty shows the type's own name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChange(pub String);
