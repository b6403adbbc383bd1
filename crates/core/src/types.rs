//! Core type definitions

use serde::{Deserialize, Serialize};

/// Client platform an observer connected with
///
/// Each platform has its own extended-info flag layout, block order and field
/// transforms. The set is closed, so per-platform data lives in a
/// [`PlatformMap`] rather than a keyed map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Desktop = 0,
    Mobile = 1,
}

impl Platform {
    pub const COUNT: usize = 2;
    pub const ALL: [Platform; Self::COUNT] = [Platform::Desktop, Platform::Mobile];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Desktop),
            1 => Some(Self::Mobile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "desktop" => Some(Self::Desktop),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }
}

/// Fixed-size table with one optional entry per [`Platform`]
#[derive(Debug, Clone)]
pub struct PlatformMap<T> {
    values: [Option<T>; Platform::COUNT],
}

impl<T> PlatformMap<T> {
    pub fn new() -> Self {
        Self {
            values: [const { None }; Platform::COUNT],
        }
    }

    pub fn with(mut self, platform: Platform, value: T) -> Self {
        self.insert(platform, value);
        self
    }

    pub fn insert(&mut self, platform: Platform, value: T) -> Option<T> {
        self.values[platform.index()].replace(value)
    }

    #[inline]
    pub fn get(&self, platform: Platform) -> Option<&T> {
        self.values[platform.index()].as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, platform: Platform) -> Option<&mut T> {
        self.values[platform.index()].as_mut()
    }

    #[inline]
    pub fn contains(&self, platform: Platform) -> bool {
        self.values[platform.index()].is_some()
    }

    pub fn take(&mut self, platform: Platform) -> Option<T> {
        self.values[platform.index()].take()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Platform, &T)> {
        Platform::ALL
            .into_iter()
            .filter_map(move |p| self.values[p.index()].as_ref().map(|v| (p, v)))
    }
}

impl<T> Default for PlatformMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Priority used when the per-tick add limit is reached
///
/// `Normal` avatars are added before `Low` ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AvatarPriority {
    Normal = 0,
    Low = 1,
}

/// Kind of trackable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvatarKind {
    Player,
    Npc,
    WorldEntity,
}

impl AvatarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Npc => "npc",
            Self::WorldEntity => "world entity",
        }
    }

    pub const fn default_priority(self) -> AvatarPriority {
        match self {
            Self::Player => AvatarPriority::Low,
            Self::Npc | Self::WorldEntity => AvatarPriority::Normal,
        }
    }
}
