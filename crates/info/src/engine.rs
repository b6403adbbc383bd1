//! # Info engine
//!
//! Owns the player, NPC and world entity protocols, the shared buffer
//! recycler and the worker pool, and drives one tick at a time.
//!
//! ## Tick
//!
//! ```text
//! sync observers -> prepare (x3) -> compute (x3, parallel) -> post_update (x3) -> recycle
//! ```
//!
//! Avatar mutations (`move_to`, extended info setters, spawns) happen between
//! ticks through `&mut self`, so none can overlap the parallel phase.

use crate::extinfo::{desktop, mobile, NpcEncoders, PlayerEncoders};
use crate::npc::NpcInfoProtocol;
use crate::player::PlayerInfoProtocol;
use crate::worldentity::{WorldEntityArgs, WorldEntityInfoProtocol};
use bytes::BytesMut;
use std::sync::Arc;
use tilesync_config::InfoConfig;
use tilesync_core::{CoordGrid, Platform, PlatformMap, Result, SyncError};
use tilesync_protocol::{BufferRecycler, InfoPacket, RecycleStats};

/// Per-protocol totals for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    /// Observers that ran the compute phase
    pub observers: usize,
    /// Packets produced
    pub packets: usize,
    /// Payload bytes produced
    pub bytes: usize,
    /// Avatar updates or adds held back by the packet ceiling
    pub deferred: usize,
    /// Extended info groups queued for a later packet
    pub carried: usize,
    /// Observers whose packet was dropped
    pub aborted: usize,
}

/// Summary of one [`InfoEngine::tick`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    pub tick: u64,
    pub players: ProtocolStats,
    pub npcs: ProtocolStats,
    pub world_entities: ProtocolStats,
    pub recycle: RecycleStats,
}

/// Encoder sets for one platform
pub fn encoders_for(platform: Platform) -> (PlayerEncoders, NpcEncoders) {
    match platform {
        Platform::Desktop => (desktop::player_encoders(), desktop::npc_encoders()),
        Platform::Mobile => (mobile::player_encoders(), mobile::npc_encoders()),
    }
}

pub struct InfoEngine {
    players: PlayerInfoProtocol,
    npcs: NpcInfoProtocol,
    world_entities: WorldEntityInfoProtocol,
    recycler: Arc<BufferRecycler>,
    workers: rayon::ThreadPool,
    tick: u64,
}

impl InfoEngine {
    /// Build an engine for `config`
    ///
    /// # Errors
    /// - `Config` if the configuration is invalid or the worker pool cannot start
    /// - `ExtendedInfo` if a platform layout is inconsistent
    pub fn new(config: &InfoConfig) -> Result<Self> {
        config.validate()?;
        let recycler = Arc::new(BufferRecycler::new(
            config.recycler_pool_size,
            config.recycler_leak_threshold,
        ));

        let mut player_encoders = PlatformMap::new();
        let mut npc_encoders = PlatformMap::new();
        for &platform in &config.platforms {
            let (player, npc) = encoders_for(platform);
            player_encoders.insert(platform, player);
            npc_encoders.insert(platform, npc);
        }

        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("info-worker-{}", i));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let workers = builder
            .build()
            .map_err(|e| SyncError::Config(format!("worker pool: {}", e)))?;

        tracing::info!(
            "Info engine ready: {} player, {} npc, {} world entity slots on {} workers",
            config.player_capacity,
            config.npc_capacity,
            config.world_entity_capacity,
            workers.current_num_threads()
        );

        Ok(Self {
            players: PlayerInfoProtocol::new(config, player_encoders, Arc::clone(&recycler))?,
            npcs: NpcInfoProtocol::new(config, npc_encoders, Arc::clone(&recycler))?,
            world_entities: WorldEntityInfoProtocol::new(config, Arc::clone(&recycler)),
            recycler,
            workers,
            tick: 0,
        })
    }

    /// Ticks completed so far
    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub fn recycler(&self) -> &Arc<BufferRecycler> {
        &self.recycler
    }

    #[inline]
    pub fn players(&self) -> &PlayerInfoProtocol {
        &self.players
    }

    #[inline]
    pub fn players_mut(&mut self) -> &mut PlayerInfoProtocol {
        &mut self.players
    }

    #[inline]
    pub fn npcs(&self) -> &NpcInfoProtocol {
        &self.npcs
    }

    #[inline]
    pub fn npcs_mut(&mut self) -> &mut NpcInfoProtocol {
        &mut self.npcs
    }

    #[inline]
    pub fn world_entities(&self) -> &WorldEntityInfoProtocol {
        &self.world_entities
    }

    #[inline]
    pub fn world_entities_mut(&mut self) -> &mut WorldEntityInfoProtocol {
        &mut self.world_entities
    }

    /// Log a player in and register it as an observer of every protocol
    ///
    /// # Returns
    /// The player info init block for the login packet
    pub fn alloc_player(&mut self, index: usize, coord: CoordGrid, platform: Platform) -> Result<BytesMut> {
        let init = self.players.alloc(index, coord, platform)?;
        let observed = self
            .npcs
            .add_observer(index, coord, platform)
            .and_then(|()| self.world_entities.add_observer(index, coord, platform));
        if let Err(e) = observed {
            self.npcs.remove_observer(index);
            self.players.release(index);
            return Err(e);
        }
        Ok(init)
    }

    pub fn release_player(&mut self, index: usize) -> bool {
        self.npcs.remove_observer(index);
        self.world_entities.remove_observer(index);
        self.players.release(index)
    }

    pub fn spawn_npc(&mut self, index: usize, id: u16, coord: CoordGrid, direction: u8) -> Result<()> {
        self.npcs.spawn(index, id, coord, direction)
    }

    pub fn despawn_npc(&mut self, index: usize) -> bool {
        self.npcs.despawn(index)
    }

    pub fn spawn_world_entity(&mut self, index: usize, args: WorldEntityArgs) -> Result<()> {
        self.world_entities.spawn(index, args)
    }

    pub fn despawn_world_entity(&mut self, index: usize) -> bool {
        self.world_entities.despawn(index)
    }

    /// Run one tick and leave a packet per observer per protocol
    pub fn tick(&mut self) -> TickReport {
        for (index, avatar) in self.players.avatars().iter() {
            self.npcs.sync_observer(index, avatar.coord());
            self.world_entities.sync_observer(index, avatar.coord());
        }

        self.players.prepare();
        self.npcs.prepare();

        self.players.compute(&self.workers);
        self.npcs.compute(&self.workers);
        self.world_entities.compute(&self.workers);

        let players = self.players.stats();
        let npcs = self.npcs.stats();
        let world_entities = self.world_entities.stats();

        self.players.post_update();
        self.npcs.post_update();
        self.world_entities.post_update();
        let report = TickReport {
            tick: self.tick,
            players,
            npcs,
            world_entities,
            recycle: self.recycler.cycle(),
        };

        tracing::trace!(
            "Tick {}: players {:?}, npcs {:?}, world entities {:?}, recycle {:?}",
            report.tick,
            report.players,
            report.npcs,
            report.world_entities,
            report.recycle
        );
        self.tick += 1;
        report
    }

    pub fn take_player_packet(&mut self, index: usize) -> Option<InfoPacket> {
        self.players.take_packet(index)
    }

    pub fn take_npc_packet(&mut self, index: usize) -> Option<InfoPacket> {
        self.npcs.take_packet(index)
    }

    pub fn take_world_entity_packet(&mut self, index: usize) -> Option<InfoPacket> {
        self.world_entities.take_packet(index)
    }
}
