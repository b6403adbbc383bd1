//! Per-observer player info state and packet encoding
//!
//! # Packet layout
//!
//! ```text
//! high-res section   one unit per slot the observer tracked at tick start
//! low-res section    one unit per other slot
//! (pad to byte)
//! extended info      one block group per record with the ext bit set
//! ```
//!
//! Both bit sections compress runs of untouched slots:
//!
//! ```text
//! skip   0 cc [n-1]     cc = 0: 1 slot, 1: 5 bits, 2: 8 bits, 3: 11 bits
//! ```
//!
//! High-res records are `1 e tt` followed by the type payload:
//!
//! | tt | e = 0 | e = 1 |
//! |----|-------|-------|
//! | 0  | removal: `s` + low-res update if `s` | extended info only |
//! | 1  | walk: 3-bit opcode | same, plus extended info |
//! | 2  | run: 4-bit opcode | same, plus extended info |
//! | 3  | absolute: 2-bit level, 14-bit x, 14-bit z | same, plus extended info |
//!
//! Low-res records are `1 tt`: `0` adds the slot to high resolution
//! (`s` + optional low-res update, 13-bit x, 13-bit z, `e`); `1`-`3` update
//! the slot's low-res position (level delta, + region step, + full region
//! delta).

use super::avatar::PlayerAvatar;
use crate::carry::ExtCarry;
use crate::engine::ProtocolStats;
use crate::extinfo::{PlayerBlock, PlayerEncoders};
use crate::movement::Movement;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tilesync_core::{AvatarPriority, CoordGrid, LowResPosition, Platform, PlatformMap, Result, SyncError};
use tilesync_protocol::{
    single_cell_opcode, BitScratch, BitWriter, BufferRecycler, InfoPacket, ServerProt,
};
use tilesync_world::{AvatarPool, BitSet, BuildArea, DoubleBufferedBits, LowResPositionRepository, ObserverExtFlags};

/// Bytes below the ceiling kept free for removal records
pub const PLAYER_REMOVAL_RESERVE: usize = 1024;

/// Largest run a single skip token can express
const MAX_SKIP_RUN: u32 = 2048;

/// Tunables shared by every player observer
#[derive(Debug, Clone)]
pub struct PlayerLimits {
    pub add_limit: usize,
    pub max_high_res: usize,
    pub view_distance: u32,
    pub build_area_zones: u16,
    pub max_packet_size: usize,
}

/// Read-only state every observer encodes against
pub(crate) struct PlayerFrame<'a> {
    pub avatars: &'a AvatarPool<PlayerAvatar>,
    pub lowres: &'a LowResPositionRepository,
    pub encoders: &'a PlatformMap<PlayerEncoders>,
    pub limits: &'a PlayerLimits,
    pub recycler: &'a BufferRecycler,
    /// Slots released this tick
    pub released: &'a BitSet,
}

/// Append the high-resolution record type and payload for `movement`
///
/// Stationary appends nothing; the caller writes the type itself.
pub(crate) fn write_movement(scratch: &mut BitScratch, movement: Movement) -> Result<()> {
    match movement {
        Movement::Stationary => Ok(()),
        Movement::Walk(opcode) => {
            scratch.push(2, 1)?;
            scratch.push(3, opcode)
        }
        Movement::Run(opcode) => {
            scratch.push(2, 2)?;
            scratch.push(4, opcode)
        }
        Movement::Teleport(coord) => {
            scratch.push(2, 3)?;
            scratch.push(2, coord.level() as u32)?;
            scratch.push(14, coord.x() as u32)?;
            scratch.push(14, coord.z() as u32)
        }
    }
}

/// Append a low-res update type and payload moving `from` to `to`
pub(crate) fn write_low_res_update(
    scratch: &mut BitScratch,
    from: LowResPosition,
    to: LowResPosition,
) -> Result<()> {
    let level = (to.level() as i32 - from.level() as i32) & 0x3;
    let dx = to.region_x() as i32 - from.region_x() as i32;
    let dz = to.region_z() as i32 - from.region_z() as i32;
    if dx == 0 && dz == 0 {
        scratch.push(2, 1)?;
        return scratch.push(2, level as u32);
    }
    if let Some(direction) = single_cell_opcode(dx, dz) {
        scratch.push(2, 2)?;
        scratch.push(2, level as u32)?;
        return scratch.push(3, direction);
    }
    scratch.push(2, 3)?;
    scratch.push(2, level as u32)?;
    scratch.push(8, (dx & 0xFF) as u32)?;
    scratch.push(8, (dz & 0xFF) as u32)
}

/// Bits a skip of `count` slots costs
fn skip_cost(mut count: u32) -> usize {
    let mut bits = 0;
    while count > 0 {
        let run = count.min(MAX_SKIP_RUN);
        bits += 3 + match run {
            1 => 0,
            2..=32 => 5,
            33..=256 => 8,
            _ => 11,
        };
        count -= run;
    }
    bits
}

/// Write and reset a pending skip run
pub(crate) fn flush_skip(writer: &mut BitWriter<'_>, count: &mut u32) -> Result<()> {
    while *count > 0 {
        let run = (*count).min(MAX_SKIP_RUN);
        writer.p_bits(1, 0)?;
        match run {
            1 => writer.p_bits(2, 0)?,
            2..=32 => {
                writer.p_bits(2, 1)?;
                writer.p_bits(5, run - 1)?;
            }
            33..=256 => {
                writer.p_bits(2, 2)?;
                writer.p_bits(8, run - 1)?;
            }
            _ => {
                writer.p_bits(2, 3)?;
                writer.p_bits(11, run - 1)?;
            }
        }
        *count -= run;
    }
    Ok(())
}

/// State changes held back until the packet is known to be sent
#[derive(Debug, Default)]
struct Journal {
    known: Vec<(usize, CoordGrid)>,
    lowres: Vec<(usize, LowResPosition)>,
    owed: Vec<(usize, u32)>,
    sent: Vec<usize>,
}

impl Journal {
    fn clear(&mut self) {
        self.known.clear();
        self.lowres.clear();
        self.owed.clear();
        self.sent.clear();
    }
}

/// What one observer knows about every player slot
pub struct PlayerInfo {
    index: usize,
    platform: Platform,
    build_area: BuildArea,
    view_distance: u32,
    high_res: DoubleBufferedBits,
    known: Vec<CoordGrid>,
    known_lowres: Vec<LowResPosition>,
    owed: ObserverExtFlags,
    carry: ExtCarry,
    stale: BitSet,
    ext: BytesMut,
    journal: Journal,
    order: Vec<usize>,
    candidates: Vec<(AvatarPriority, u32, usize)>,
    selected: BitSet,
    tainted: Vec<usize>,
    packet: Option<InfoPacket>,
    last_bytes: usize,
    deferred: usize,
    aborted: bool,
}

impl PlayerInfo {
    pub(crate) fn new(index: usize, coord: CoordGrid, platform: Platform, capacity: usize, limits: &PlayerLimits) -> Self {
        let mut high_res = DoubleBufferedBits::new(capacity);
        high_res.set(index);
        high_res.roll();
        let mut known = vec![CoordGrid::INVALID; capacity];
        known[index] = coord;
        Self {
            index,
            platform,
            build_area: BuildArea::centered(coord, limits.build_area_zones),
            view_distance: limits.view_distance,
            high_res,
            known,
            known_lowres: vec![LowResPosition::default(); capacity],
            owed: ObserverExtFlags::new(capacity),
            carry: ExtCarry::default(),
            stale: BitSet::new(capacity),
            ext: BytesMut::with_capacity(1024),
            journal: Journal::default(),
            order: Vec::new(),
            candidates: Vec::new(),
            selected: BitSet::new(capacity),
            tainted: Vec::new(),
            packet: None,
            last_bytes: 0,
            deferred: 0,
            aborted: false,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[inline]
    pub fn build_area(&self) -> &BuildArea {
        &self.build_area
    }

    #[inline]
    pub fn view_distance(&self) -> u32 {
        self.view_distance
    }

    pub fn set_view_distance(&mut self, distance: u32) {
        self.view_distance = distance;
    }

    /// Whether slot `index` is tracked in high resolution
    #[inline]
    pub fn is_high_res(&self, index: usize) -> bool {
        self.high_res.is_set(index)
    }

    /// Number of other players tracked in high resolution
    pub fn high_res_count(&self) -> usize {
        self.high_res.current().count().saturating_sub(1)
    }

    /// Coordinate this observer last received for slot `index`
    #[inline]
    pub fn known_coord(&self, index: usize) -> Option<CoordGrid> {
        self.known.get(index).copied().filter(|c| c.is_valid())
    }

    pub fn take_packet(&mut self) -> Option<InfoPacket> {
        self.packet.take()
    }

    pub(crate) fn tainted(&self) -> &[usize] {
        &self.tainted
    }

    pub(crate) fn stats(&self, stats: &mut ProtocolStats) {
        stats.observers += 1;
        stats.packets += self.packet.is_some() as usize;
        stats.bytes += self.last_bytes;
        stats.deferred += self.deferred;
        stats.carried += self.carry.len();
        stats.aborted += self.aborted as usize;
    }

    /// Write the login block: own coordinate, then every other slot's
    /// low-res position
    pub(crate) fn write_init(&mut self, out: &mut BytesMut, coord: CoordGrid, lowres: &LowResPositionRepository) -> Result<()> {
        let capacity = self.known_lowres.len();
        let limit = (30 + 18 * capacity.saturating_sub(1) + 7) / 8;
        let mut writer = BitWriter::new(out, limit);
        writer.p_bits(30, coord.packed())?;
        for i in 0..capacity {
            if i == self.index {
                continue;
            }
            let position = lowres.get(i);
            writer.p_bits(18, position.packed())?;
            self.known_lowres[i] = position;
        }
        writer.finish();
        Ok(())
    }

    /// Follow the observer's own coordinate with the build area
    pub(crate) fn sync(&mut self, coord: CoordGrid) {
        if self.build_area.follow(coord) {
            tracing::debug!("Rebuilt build area of player {} around {}", self.index, coord);
        }
    }

    #[inline]
    fn in_view(&self, origin: CoordGrid, coord: CoordGrid) -> bool {
        origin.in_distance(coord, self.view_distance) && self.build_area.contains(coord)
    }

    fn fits(&self, writer: &BitWriter<'_>, skip: u32, bits: usize, limit: usize) -> bool {
        let total = writer.bit_position() + skip_cost(skip) + bits;
        (total + 7) / 8 + self.ext.len() <= limit
    }

    /// Build this tick's packet
    ///
    /// Nothing in the observer's state changes unless the packet is complete;
    /// a failed packet is dropped and retried from the same state next tick.
    pub(crate) fn compute(&mut self, frame: &PlayerFrame<'_>) {
        self.packet = None;
        self.tainted.clear();
        self.last_bytes = 0;
        self.deferred = 0;
        self.aborted = false;

        let Some(me) = frame.avatars.get(self.index) else {
            return;
        };
        let Some(encoders) = frame.encoders.get(self.platform) else {
            tracing::warn!("No player encoders for {}; observer {} skipped", self.platform.as_str(), self.index);
            return;
        };

        let mut payload = frame.recycler.alloc(256);
        let mut add_cutoff = usize::MAX;
        let result = loop {
            self.journal.clear();
            self.carry.rollback();
            self.ext.clear();
            self.tainted.clear();
            self.deferred = 0;
            payload.clear();
            match self.encode(&mut payload, me.coord(), encoders, frame, add_cutoff) {
                Ok(Some(cutoff)) => {
                    tracing::trace!("Player info for observer {} re-encoded with {} adds", self.index, cutoff);
                    self.high_res.revert();
                    add_cutoff = cutoff;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let result = result.and_then(|()| {
            payload.put_slice(&self.ext);
            if payload.len() > frame.limits.max_packet_size {
                return Err(SyncError::PacketTooLarge {
                    size: payload.len(),
                    limit: frame.limits.max_packet_size,
                });
            }
            ServerProt::PlayerInfo.frame().check(payload.len())
        });

        match result {
            Ok(()) => {
                self.commit();
                self.last_bytes = payload.len();
                let payload = Arc::new(payload);
                frame.recycler.retire(Arc::clone(&payload));
                self.packet = Some(InfoPacket::new(ServerProt::PlayerInfo, payload));
            }
            Err(e) => {
                tracing::warn!("Player info for observer {} aborted: {}", self.index, e);
                self.high_res.revert();
                self.journal.clear();
                self.carry.rollback();
                for i in self.high_res.previous().iter() {
                    if frame.released.get(i) {
                        self.stale.set(i);
                    }
                }
                self.aborted = true;
            }
        }
    }

    fn commit(&mut self) {
        for (i, coord) in self.journal.known.drain(..) {
            self.known[i] = coord;
        }
        for (i, position) in self.journal.lowres.drain(..) {
            self.known_lowres[i] = position;
        }
        for i in self.journal.sent.drain(..) {
            self.owed.take(i);
        }
        for (i, bits) in self.journal.owed.drain(..) {
            self.owed.owe(i, bits);
        }
        self.carry.commit();
        self.stale.clear();
    }

    /// Encode both bit sections into `payload`
    ///
    /// # Returns
    /// `Some(cutoff)` when a lower-ranked add took the room a higher-ranked
    /// one needed; the caller encodes again selecting only `cutoff` adds.
    fn encode(
        &mut self,
        payload: &mut BytesMut,
        origin: CoordGrid,
        encoders: &PlayerEncoders,
        frame: &PlayerFrame<'_>,
        add_cutoff: usize,
    ) -> Result<Option<usize>> {
        let hard = frame.limits.max_packet_size;
        let soft = hard.saturating_sub(PLAYER_REMOVAL_RESERVE);
        let mut writer = BitWriter::new(payload, hard);
        let mut overflow = false;

        let mut order = std::mem::take(&mut self.order);
        order.clear();
        order.extend(self.high_res.previous().iter());
        let result = self.encode_high_res(&mut writer, &order, origin, encoders, frame, soft, &mut overflow);
        self.order = order;
        result?;

        let room = frame
            .limits
            .max_high_res
            .saturating_sub(self.high_res_count())
            .min(frame.limits.add_limit);
        self.selected.clear();
        self.candidates.clear();
        let mut chosen = 0;
        if !overflow && room > 0 {
            chosen = self.select_adds(origin, frame.avatars, room, add_cutoff);
        }
        let retry = self.encode_low_res(&mut writer, encoders, frame, soft, chosen, &mut overflow)?;
        if retry.is_none() {
            writer.finish();
        }
        Ok(retry)
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_high_res(
        &mut self,
        writer: &mut BitWriter<'_>,
        order: &[usize],
        origin: CoordGrid,
        encoders: &PlayerEncoders,
        frame: &PlayerFrame<'_>,
        soft: usize,
        overflow: &mut bool,
    ) -> Result<()> {
        let mut skip = 0u32;
        for &i in order {
            let avatar = frame
                .avatars
                .get(i)
                .filter(|a| i == self.index || self.in_view(origin, a.coord()));

            let avatar = avatar.filter(|_| !self.stale.get(i));
            let Some(avatar) = avatar else {
                flush_skip(writer, &mut skip)?;
                writer.p_bits(1, 1)?;
                writer.p_bool(false)?;
                writer.p_bits(2, 0)?;
                let now = frame.lowres.get(i);
                let known = self.known_lowres[i];
                writer.p_bool(known != now)?;
                if known != now {
                    let mut update = BitScratch::new();
                    write_low_res_update(&mut update, known, now)?;
                    writer.put_scratch(&update)?;
                    self.journal.lowres.push((i, now));
                }
                self.high_res.unset(i);
                self.journal.sent.push(i);
                self.carry.discard(i);
                continue;
            };

            let flags = avatar.ext().flags_for(self.index) | self.owed.get(i);
            if *overflow {
                self.defer(avatar, i, flags, encoders);
                skip += 1;
                continue;
            }

            let mut fresh = BitScratch::new();
            let record = if self.known[i] == avatar.last_coord() {
                avatar.record()
            } else {
                write_movement(
                    &mut fresh,
                    Movement::between(self.known[i], avatar.coord(), avatar.is_jumping()),
                )?;
                &fresh
            };
            let carried = self.carry.front(i).is_some();
            if record.is_empty() && flags == 0 && !carried {
                skip += 1;
                continue;
            }

            let mark = self.ext.len();
            if let Some(group) = self.carry.front(i) {
                self.ext.put_slice(group);
            }
            let mut requeue = None;
            if flags != 0 {
                let split = self.ext.len();
                self.stage_ext(avatar, i, flags, encoders);
                if carried {
                    requeue = Some(self.ext.split_off(split));
                }
            }
            let bits = 2 + if record.is_empty() { 2 } else { record.len() as usize };
            if !self.fits(writer, skip, bits, soft) {
                self.ext.truncate(mark);
                *overflow = true;
                self.defer(avatar, i, flags, encoders);
                skip += 1;
                continue;
            }

            flush_skip(writer, &mut skip)?;
            writer.p_bits(1, 1)?;
            writer.p_bool(flags != 0 || carried)?;
            if record.is_empty() {
                writer.p_bits(2, 0)?;
            } else {
                writer.put_scratch(record)?;
            }
            self.journal.known.push((i, avatar.coord()));
            if carried {
                self.carry.mark_sent(i);
            }
            if let Some(group) = requeue {
                self.carry.queue(i, group);
            }
            if flags != 0 {
                self.journal.sent.push(i);
            }
        }
        flush_skip(writer, &mut skip)
    }

    /// Rank add candidates and select the first `room.min(cutoff)`
    ///
    /// # Returns
    /// How many were selected; they lead `candidates` in rank order
    fn select_adds(
        &mut self,
        origin: CoordGrid,
        avatars: &AvatarPool<PlayerAvatar>,
        room: usize,
        cutoff: usize,
    ) -> usize {
        if let Some(rect) = self.build_area.clip(origin, self.view_distance) {
            for i in avatars.zones().indices_in(rect) {
                if i == self.index || self.high_res.was_set(i) {
                    continue;
                }
                let Some(avatar) = avatars.get(i) else {
                    continue;
                };
                if !self.in_view(origin, avatar.coord()) {
                    continue;
                }
                let distance = origin.chebyshev(avatar.coord());
                self.candidates.push((avatar.priority(), distance, i));
            }
        }
        self.candidates.sort_unstable();
        let chosen = self.candidates.len().min(room).min(cutoff);
        self.deferred += self.candidates.len().min(room) - chosen;
        for &(_, _, i) in &self.candidates[..chosen] {
            self.selected.set(i);
        }
        chosen
    }

    /// Rank of selected slot `i`; 0 is sent first
    fn rank_of(&self, i: usize, chosen: usize) -> usize {
        self.candidates[..chosen]
            .iter()
            .position(|&(_, _, slot)| slot == i)
            .unwrap_or(chosen)
    }

    fn encode_low_res(
        &mut self,
        writer: &mut BitWriter<'_>,
        encoders: &PlayerEncoders,
        frame: &PlayerFrame<'_>,
        soft: usize,
        chosen: usize,
        overflow: &mut bool,
    ) -> Result<Option<usize>> {
        let mut skip = 0u32;
        let mut written = 0usize;
        let mut worst_rank = None;
        for i in 0..self.known.len() {
            if i == self.index || self.high_res.was_set(i) {
                continue;
            }
            if self.selected.get(i) {
                if let Some(avatar) = frame.avatars.get(i) {
                    if !*overflow && self.write_add(writer, &mut skip, i, avatar, encoders, soft)? {
                        let rank = self.rank_of(i, chosen);
                        worst_rank = worst_rank.max(Some(rank));
                        written += 1;
                        continue;
                    }
                    if worst_rank.is_some_and(|worst| worst > self.rank_of(i, chosen)) {
                        return Ok(Some(written));
                    }
                    *overflow = true;
                    self.deferred += 1;
                }
            }

            let now = frame.lowres.get(i);
            let known = self.known_lowres[i];
            if known != now && !*overflow {
                let mut update = BitScratch::new();
                write_low_res_update(&mut update, known, now)?;
                if self.fits(writer, skip, 1 + update.len() as usize, soft) {
                    flush_skip(writer, &mut skip)?;
                    writer.p_bits(1, 1)?;
                    writer.put_scratch(&update)?;
                    self.journal.lowres.push((i, now));
                    continue;
                }
                *overflow = true;
            }
            skip += 1;
        }
        flush_skip(writer, &mut skip)?;
        Ok(None)
    }

    /// Returns `false` when the add does not fit and nothing was written
    fn write_add(
        &mut self,
        writer: &mut BitWriter<'_>,
        skip: &mut u32,
        i: usize,
        avatar: &PlayerAvatar,
        encoders: &PlayerEncoders,
        soft: usize,
    ) -> Result<bool> {
        let coord = avatar.coord();
        let now = coord.low_res();
        let mut sync = BitScratch::new();
        if self.known_lowres[i] != now {
            write_low_res_update(&mut sync, self.known_lowres[i], now)?;
        }
        let flags = avatar.ext().flags_for(self.index) | avatar.ext().persistent_flags();

        let mark = self.ext.len();
        if flags != 0 {
            self.stage_ext(avatar, i, flags, encoders);
        }
        let bits = 4 + sync.len() as usize + 27;
        if !self.fits(writer, *skip, bits, soft) {
            self.ext.truncate(mark);
            return Ok(false);
        }

        flush_skip(writer, skip)?;
        writer.p_bits(1, 1)?;
        writer.p_bits(2, 0)?;
        writer.p_bool(!sync.is_empty())?;
        writer.put_scratch(&sync)?;
        writer.p_bits(13, coord.x() as u32 & 0x1FFF)?;
        writer.p_bits(13, coord.z() as u32 & 0x1FFF)?;
        writer.p_bool(flags != 0)?;

        self.high_res.set(i);
        self.journal.known.push((i, coord));
        if !sync.is_empty() {
            self.journal.lowres.push((i, now));
        }
        if flags != 0 {
            self.journal.sent.push(i);
        }
        Ok(true)
    }

    /// Append `owner`'s extended info to the staging buffer
    ///
    /// A failed write is rolled back to a zero flag word and the owner is
    /// reported as tainted.
    fn stage_ext(&mut self, avatar: &PlayerAvatar, owner: usize, flags: u32, encoders: &PlayerEncoders) {
        let mark = self.ext.len();
        if let Err(e) = avatar.ext().write(&mut self.ext, encoders, self.index, owner, flags) {
            tracing::warn!(
                "Extended info of player {} failed for observer {}: {}",
                owner,
                self.index,
                e
            );
            self.ext.truncate(mark);
            self.ext.put_u8(0);
            self.tainted.push(owner);
        }
    }

    /// Hold back a tracked avatar's record until a later packet
    ///
    /// Persistent blocks stay owed. Anything transient is staged now and
    /// carried, since the avatar drops it at the end of the tick.
    fn defer(&mut self, avatar: &PlayerAvatar, i: usize, flags: u32, encoders: &PlayerEncoders) {
        self.deferred += 1;
        if flags & !PlayerBlock::PERSISTENT == 0 {
            if flags != 0 {
                self.journal.owed.push((i, flags));
            }
            return;
        }
        let mark = self.ext.len();
        self.stage_ext(avatar, i, flags, encoders);
        let group = self.ext.split_off(mark);
        self.carry.queue(i, group);
        self.journal.sent.push(i);
    }

    pub(crate) fn post_update(&mut self) {
        self.high_res.roll();
    }
}
