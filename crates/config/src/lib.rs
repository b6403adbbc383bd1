//! tilesync configuration
//!
//! Loads the info engine configuration from a `key = value` text file.
//! One [`InfoConfig`] is built at startup and passed to every constructor
//! that needs a limit; nothing reads process-wide state.
//!
//! # Format
//!
//! ```text
//! # comments start with '#'
//! player_capacity = 2048
//! npc_view_distance = 15
//! platforms = desktop, mobile
//! ```
//!
//! Unknown keys are ignored with a debug log. Values that do not parse, or
//! that fail [`InfoConfig::validate`], are rejected with `SyncError::Config`.

use std::fs;
use std::path::Path;
use tilesync_core::{Platform, Result, SyncError};

/// Largest player capacity the 11-bit skip runs and init block can address
pub const MAX_PLAYER_CAPACITY: usize = 2048;

/// Largest NPC capacity; index 0xFFFF terminates the add list
pub const MAX_NPC_CAPACITY: usize = 65535;

/// Largest world entity capacity addressable by a 2-byte index
pub const MAX_WORLD_ENTITY_CAPACITY: usize = 65535;

/// Largest payload of a var-short frame
pub const MAX_PACKET_CEILING: usize = 40_000;

/// Smallest packet ceiling that still leaves room past the removal reserve
pub const MIN_PACKET_CEILING: usize = 2_048;

/// Info engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct InfoConfig {
    // ========== Players ==========
    /// Player slots (from "player_capacity", default: 2048)
    pub player_capacity: usize,
    /// Players added to one observer per tick (from "player_add_limit")
    pub player_add_limit: usize,
    /// Players tracked in high resolution per observer (from "player_max_high_res")
    pub player_max_high_res: usize,
    /// Tiles within which players are tracked (from "player_view_distance")
    pub player_view_distance: u32,

    // ========== NPCs ==========
    /// NPC slots (from "npc_capacity", default: 65535)
    pub npc_capacity: usize,
    /// NPCs added to one observer per tick (from "npc_add_limit")
    pub npc_add_limit: usize,
    /// NPCs tracked per observer (from "npc_max_high_res")
    pub npc_max_high_res: usize,
    /// Default NPC view distance (from "npc_view_distance")
    pub npc_view_distance: u32,

    // ========== World entities ==========
    /// World entity slots (from "world_entity_capacity")
    pub world_entity_capacity: usize,
    /// World entities added to one observer per tick (from "world_entity_add_limit")
    pub world_entity_add_limit: usize,
    /// World entities tracked per observer (from "world_entity_max_high_res")
    pub world_entity_max_high_res: usize,
    /// World entity view distance (from "world_entity_view_distance")
    pub world_entity_view_distance: u32,

    // ========== Packets and buffers ==========
    /// Build area width in zones (from "build_area_zones", default: 13)
    pub build_area_zones: u16,
    /// Payload ceiling for info packets (from "max_packet_size")
    pub max_packet_size: usize,
    /// Cleared buffers kept for reuse (from "recycler_pool_size")
    pub recycler_pool_size: usize,
    /// Ticks a shared buffer may stay in flight (from "recycler_leak_threshold")
    pub recycler_leak_threshold: u32,
    /// Released avatars kept per pool for reuse (from "reclaim_capacity")
    pub reclaim_capacity: usize,

    // ========== Runtime ==========
    /// Observer encoding threads, 0 = one per core (from "worker_threads")
    pub worker_threads: usize,
    /// Client platforms to precompute for (from "platforms")
    pub platforms: Vec<Platform>,
    /// Tick length in milliseconds (from "tick_millis", default: 600)
    pub tick_millis: u64,
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            player_capacity: 2048,
            player_add_limit: 40,
            player_max_high_res: 255,
            player_view_distance: 15,

            npc_capacity: 65535,
            npc_add_limit: 25,
            npc_max_high_res: 250,
            npc_view_distance: 15,

            world_entity_capacity: 2048,
            world_entity_add_limit: 10,
            world_entity_max_high_res: 25,
            world_entity_view_distance: 32,

            build_area_zones: 13,
            max_packet_size: MAX_PACKET_CEILING,
            recycler_pool_size: 1024,
            recycler_leak_threshold: 16,
            reclaim_capacity: 64,

            worker_threads: 0,
            platforms: Platform::ALL.to_vec(),
            tick_millis: 600,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SyncError::Config(format!("{}: '{}' is not a valid number", key, value)))
}

impl InfoConfig {
    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse `key = value` content on top of the defaults, then validate
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(eq_pos) = line.find('=') else {
                return Err(SyncError::Config(format!(
                    "line {}: expected 'key = value', got '{}'",
                    line_no + 1,
                    line
                )));
            };
            let key = line[..eq_pos].trim();
            let value = line[eq_pos + 1..].trim();
            config.parse_option(key, value)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "player_capacity" => self.player_capacity = parse_number(key, value)?,
            "player_add_limit" => self.player_add_limit = parse_number(key, value)?,
            "player_max_high_res" => self.player_max_high_res = parse_number(key, value)?,
            "player_view_distance" => self.player_view_distance = parse_number(key, value)?,

            "npc_capacity" => self.npc_capacity = parse_number(key, value)?,
            "npc_add_limit" => self.npc_add_limit = parse_number(key, value)?,
            "npc_max_high_res" => self.npc_max_high_res = parse_number(key, value)?,
            "npc_view_distance" => self.npc_view_distance = parse_number(key, value)?,

            "world_entity_capacity" => self.world_entity_capacity = parse_number(key, value)?,
            "world_entity_add_limit" => self.world_entity_add_limit = parse_number(key, value)?,
            "world_entity_max_high_res" => {
                self.world_entity_max_high_res = parse_number(key, value)?
            }
            "world_entity_view_distance" => {
                self.world_entity_view_distance = parse_number(key, value)?
            }

            "build_area_zones" => self.build_area_zones = parse_number(key, value)?,
            "max_packet_size" => self.max_packet_size = parse_number(key, value)?,
            "recycler_pool_size" => self.recycler_pool_size = parse_number(key, value)?,
            "recycler_leak_threshold" => self.recycler_leak_threshold = parse_number(key, value)?,
            "reclaim_capacity" => self.reclaim_capacity = parse_number(key, value)?,

            "worker_threads" => self.worker_threads = parse_number(key, value)?,
            "tick_millis" => self.tick_millis = parse_number(key, value)?,
            "platforms" => {
                let mut platforms = Vec::with_capacity(Platform::COUNT);
                for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let platform = Platform::parse(name).ok_or_else(|| {
                        SyncError::Config(format!("platforms: unknown platform '{}'", name))
                    })?;
                    if !platforms.contains(&platform) {
                        platforms.push(platform);
                    }
                }
                self.platforms = platforms;
            }
            _ => {
                tracing::debug!("Ignoring unknown config key '{}'", key);
            }
        }
        Ok(())
    }

    /// Check every value against the limits the wire formats impose
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, message: impl FnOnce() -> String) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(SyncError::Config(message()))
            }
        }

        check((1..=MAX_PLAYER_CAPACITY).contains(&self.player_capacity), || {
            format!("player_capacity must be in [1, {}]", MAX_PLAYER_CAPACITY)
        })?;
        check((1..=MAX_NPC_CAPACITY).contains(&self.npc_capacity), || {
            format!("npc_capacity must be in [1, {}]", MAX_NPC_CAPACITY)
        })?;
        check((1..=MAX_WORLD_ENTITY_CAPACITY).contains(&self.world_entity_capacity), || {
            format!("world_entity_capacity must be in [1, {}]", MAX_WORLD_ENTITY_CAPACITY)
        })?;

        check((1..=255).contains(&self.player_max_high_res), || {
            "player_max_high_res must be in [1, 255]".into()
        })?;
        check((1..=255).contains(&self.npc_max_high_res), || {
            "npc_max_high_res must be in [1, 255]".into()
        })?;
        check((1..=255).contains(&self.world_entity_max_high_res), || {
            "world_entity_max_high_res must be in [1, 255]".into()
        })?;

        check(self.player_add_limit >= 1, || "player_add_limit must be at least 1".into())?;
        check(self.npc_add_limit >= 1, || "npc_add_limit must be at least 1".into())?;
        check(self.world_entity_add_limit >= 1, || {
            "world_entity_add_limit must be at least 1".into()
        })?;

        check((1..=127).contains(&self.player_view_distance), || {
            "player_view_distance must be in [1, 127]".into()
        })?;
        check((1..=127).contains(&self.npc_view_distance), || {
            "npc_view_distance must be in [1, 127]".into()
        })?;
        check((1..=127).contains(&self.world_entity_view_distance), || {
            "world_entity_view_distance must be in [1, 127]".into()
        })?;

        check((1..=64).contains(&self.build_area_zones), || {
            "build_area_zones must be in [1, 64]".into()
        })?;
        check(
            (MIN_PACKET_CEILING..=MAX_PACKET_CEILING).contains(&self.max_packet_size),
            || format!("max_packet_size must be in [{}, {}]", MIN_PACKET_CEILING, MAX_PACKET_CEILING),
        )?;
        check(self.recycler_leak_threshold >= 1, || {
            "recycler_leak_threshold must be at least 1".into()
        })?;
        check(self.worker_threads <= 256, || "worker_threads must be at most 256".into())?;
        check(!self.platforms.is_empty(), || "platforms must name at least one platform".into())?;
        check(self.tick_millis >= 1, || "tick_millis must be at least 1".into())?;
        Ok(())
    }

    /// Whether observers on `platform` are expected
    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    /// Display configuration summary
    pub fn display(&self) {
        let platforms: Vec<&str> = self.platforms.iter().map(|p| p.as_str()).collect();
        tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        tracing::info!("📋 Info Engine Configuration:");
        tracing::info!("");
        tracing::info!("  [players]");
        tracing::info!("    Capacity: {}", self.player_capacity);
        tracing::info!(
            "    Add limit: {}, high-res cap: {}, view distance: {}",
            self.player_add_limit,
            self.player_max_high_res,
            self.player_view_distance
        );
        tracing::info!("");
        tracing::info!("  [npcs]");
        tracing::info!("    Capacity: {}", self.npc_capacity);
        tracing::info!(
            "    Add limit: {}, high-res cap: {}, view distance: {}",
            self.npc_add_limit,
            self.npc_max_high_res,
            self.npc_view_distance
        );
        tracing::info!("");
        tracing::info!("  [world entities]");
        tracing::info!("    Capacity: {}", self.world_entity_capacity);
        tracing::info!(
            "    Add limit: {}, high-res cap: {}, view distance: {}",
            self.world_entity_add_limit,
            self.world_entity_max_high_res,
            self.world_entity_view_distance
        );
        tracing::info!("");
        tracing::info!("  [packets]");
        tracing::info!("    Build area: {}x{} zones", self.build_area_zones, self.build_area_zones);
        tracing::info!("    Max packet size: {} bytes", self.max_packet_size);
        tracing::info!(
            "    Recycler: pool {}, leak threshold {} ticks",
            self.recycler_pool_size,
            self.recycler_leak_threshold
        );
        tracing::info!("    Reclaim queue: {} per pool", self.reclaim_capacity);
        tracing::info!("");
        tracing::info!("  [runtime]");
        if self.worker_threads == 0 {
            tracing::info!("    Worker threads: one per core");
        } else {
            tracing::info!("    Worker threads: {}", self.worker_threads);
        }
        tracing::info!("    Platforms: {}", platforms.join(", "));
        tracing::info!("    Tick: {} ms", self.tick_millis);
        tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}
