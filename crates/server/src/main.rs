//! tilesync - info engine simulation server
//!
//! Drives the info engine on a fixed tick with simulated players, NPCs and
//! world entities wandering around one area, and drains every packet as an
//! outbound pipeline would.
//!
//! Usage: `tilesync [config file]` (default `tilesync.conf`; defaults are
//! used when the file is missing). Log filtering follows `RUST_LOG`.

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tilesync_config::InfoConfig;
use tilesync_core::{CoordGrid, Platform, SyncError};
use tilesync_info::worldentity::WorldEntityArgs;
use tilesync_info::InfoEngine;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "tilesync.conf";
const SIM_PLAYERS: usize = 200;
const SIM_NPCS: usize = 500;
const SIM_WORLD_ENTITIES: usize = 4;
const CENTER_X: u16 = 3200;
const CENTER_Z: u16 = 3200;
const SPREAD: u16 = 64;
const REPORT_EVERY: u64 = 100;

fn load_config() -> anyhow::Result<InfoConfig> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    match InfoConfig::load_from_file(&path) {
        Ok(config) => {
            info!("Configuration loaded from {}", path);
            Ok(config)
        }
        Err(SyncError::Io(e)) => {
            warn!("Failed to read {}: {}", path, e);
            warn!("   Using default configuration");
            Ok(InfoConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("invalid configuration in {}", path)),
    }
}

fn random_coord(rng: &mut StdRng) -> CoordGrid {
    CoordGrid::new(
        0,
        CENTER_X + rng.gen_range(0..SPREAD),
        CENTER_Z + rng.gen_range(0..SPREAD),
    )
}

struct Simulation {
    engine: InfoEngine,
    rng: StdRng,
    players: usize,
    npcs: usize,
    world_entities: usize,
}

impl Simulation {
    fn populate(config: &InfoConfig) -> anyhow::Result<Self> {
        let engine = InfoEngine::new(config).context("creating info engine")?;
        let mut sim = Self {
            engine,
            rng: StdRng::from_entropy(),
            players: SIM_PLAYERS.min(config.player_capacity),
            npcs: SIM_NPCS.min(config.npc_capacity),
            world_entities: SIM_WORLD_ENTITIES.min(config.world_entity_capacity),
        };

        for i in 0..sim.players {
            let platform = config.platforms[i % config.platforms.len()];
            let coord = random_coord(&mut sim.rng);
            sim.engine.alloc_player(i, coord, platform)?;
        }
        for i in 0..sim.npcs {
            let coord = random_coord(&mut sim.rng);
            let id = sim.rng.gen_range(0..1000);
            let direction = sim.rng.gen_range(0..8);
            sim.engine.spawn_npc(i, id, coord, direction)?;
        }
        for i in 0..sim.world_entities {
            let args = WorldEntityArgs {
                coord: random_coord(&mut sim.rng),
                size_x: 2,
                size_z: 4,
                angle: sim.rng.gen_range(0..2048),
            };
            sim.engine.spawn_world_entity(i, args)?;
        }
        info!(
            "Simulating {} players ({}), {} npcs, {} world entities",
            sim.players,
            config
                .platforms
                .iter()
                .map(Platform::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            sim.npcs,
            sim.world_entities
        );
        Ok(sim)
    }

    /// Random walks, occasional chatter and a rare teleport
    fn wander(&mut self) {
        for i in 0..self.players {
            let Some(coord) = self.engine.players().avatar(i).map(|a| a.coord()) else {
                continue;
            };
            let (dx, dz): (i32, i32) = (self.rng.gen_range(-2..=2), self.rng.gen_range(-2..=2));
            let players = self.engine.players_mut();
            if self.rng.gen_bool(0.002) {
                let _ = players.teleport(i, random_coord(&mut self.rng));
            } else if let Ok(next) = coord.translate(dx, dz, 0) {
                let _ = players.move_to(i, next);
            }
            if self.rng.gen_bool(0.01) {
                if let Some(avatar) = players.avatar_mut(i) {
                    avatar.ext_mut().set_say("Selling lobsters");
                }
            }
        }

        for i in 0..self.npcs {
            let Some(coord) = self.engine.npcs().avatar(i).map(|a| a.coord()) else {
                continue;
            };
            if !self.rng.gen_bool(0.3) {
                continue;
            }
            let (dx, dz): (i32, i32) = (self.rng.gen_range(-1..=1), self.rng.gen_range(-1..=1));
            if let Ok(next) = coord.translate(dx, dz, 0) {
                let _ = self.engine.npcs_mut().move_to(i, next);
            }
        }

        for i in 0..self.world_entities {
            let Some((coord, angle)) = self
                .engine
                .world_entities()
                .avatar(i)
                .map(|a| (a.coord(), a.angle()))
            else {
                continue;
            };
            if let Ok(next) = coord.translate(1, 0, 0) {
                let entities = self.engine.world_entities_mut();
                let _ = entities.move_to(i, next);
                if let Some(avatar) = entities.avatar_mut(i) {
                    avatar.set_angle(angle.wrapping_add(16));
                }
            }
        }
    }

    /// Hand every packet to the (absent) pipeline
    fn drain(&mut self) -> usize {
        let mut bytes = 0;
        for i in 0..self.players {
            bytes += self.engine.take_player_packet(i).map_or(0, |p| p.len());
            bytes += self.engine.take_npc_packet(i).map_or(0, |p| p.len());
            bytes += self.engine.take_world_entity_packet(i).map_or(0, |p| p.len());
        }
        bytes
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("tilesync starting up...");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let config = load_config()?;
    config.display();
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut sim = Simulation::populate(&config)?;
    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_millis));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sim.wander();
                let report = sim.engine.tick();
                let bytes = sim.drain();
                if report.tick % REPORT_EVERY == 0 {
                    info!(
                        "Tick {}: {} bytes out, {} deferred, {} aborted, {} buffers reclaimed",
                        report.tick,
                        bytes,
                        report.players.deferred + report.npcs.deferred + report.world_entities.deferred,
                        report.players.aborted + report.npcs.aborted + report.world_entities.aborted,
                        report.recycle.reclaimed
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down after {} ticks", sim.engine.current_tick());
                return Ok(());
            }
        }
    }
}
