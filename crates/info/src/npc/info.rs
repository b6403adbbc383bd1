//! Per-observer NPC info
//!
//! # Packet layout
//!
//! ```text
//! 8 bits                 number of NPCs tracked at tick start
//! per tracked NPC        0 (idle) | 1 tt ...
//!                          tt = 0: extended info only
//!                          tt = 1: walk, 3-bit opcode, ext bit
//!                          tt = 2: run, 4-bit opcode, ext bit
//!                          tt = 3: removal
//! per added NPC          16-bit index, dx, dz (5 bits small / 8 bits large,
//!                        signed, relative to the observer), ext bit,
//!                        jump bit, 14-bit type id, 3-bit direction
//! 16 bits                0xFFFF
//! (pad to byte)
//! extended info          in record order
//! ```
//!
//! A tracked NPC that moved in a way no opcode expresses is removed and added
//! again in the same packet.

use super::avatar::NpcAvatar;
use crate::carry::ExtCarry;
use crate::engine::ProtocolStats;
use crate::extinfo::{NpcBlock, NpcEncoders};
use crate::movement::Movement;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tilesync_core::{AvatarPriority, CoordGrid, Platform, PlatformMap, Result, SyncError};
use tilesync_protocol::{BitWriter, BufferRecycler, InfoPacket, ServerProt};
use tilesync_world::{AvatarPool, BitSet, BuildArea};

/// Bytes below the ceiling kept free for removal records
pub const NPC_REMOVAL_RESERVE: usize = 512;

/// Largest view distance the small packet's 5-bit deltas can reach
pub const SMALL_VIEW_DISTANCE: u32 = 15;

/// Terminates the add list
const END_OF_ADDS: u32 = 0xFFFF;

#[derive(Debug, Clone)]
pub struct NpcLimits {
    pub add_limit: usize,
    pub max_high_res: usize,
    pub view_distance: u32,
    pub build_area_zones: u16,
    pub max_packet_size: usize,
}

pub(crate) struct NpcFrame<'a> {
    pub avatars: &'a AvatarPool<NpcAvatar>,
    pub encoders: &'a PlatformMap<NpcEncoders>,
    pub limits: &'a NpcLimits,
    pub recycler: &'a BufferRecycler,
    /// NPC slots despawned this tick
    pub released: &'a BitSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NpcEntry {
    index: usize,
    known: CoordGrid,
    owed: u32,
}

/// NPCs one player observer is tracking
pub struct NpcInfo {
    observer: usize,
    platform: Platform,
    coord: CoordGrid,
    build_area: BuildArea,
    view_distance: u32,
    high_res: Vec<NpcEntry>,
    next: Vec<NpcEntry>,
    tracked: BitSet,
    stale: BitSet,
    carry: ExtCarry,
    ext: BytesMut,
    candidates: Vec<(AvatarPriority, u32, usize)>,
    tainted: Vec<usize>,
    packet: Option<InfoPacket>,
    last_bytes: usize,
    deferred: usize,
    aborted: bool,
}

impl NpcInfo {
    pub(crate) fn new(observer: usize, coord: CoordGrid, platform: Platform, capacity: usize, limits: &NpcLimits) -> Self {
        Self {
            observer,
            platform,
            coord,
            build_area: BuildArea::centered(coord, limits.build_area_zones),
            view_distance: limits.view_distance,
            high_res: Vec::new(),
            next: Vec::new(),
            tracked: BitSet::new(capacity),
            stale: BitSet::new(capacity),
            carry: ExtCarry::default(),
            ext: BytesMut::with_capacity(512),
            candidates: Vec::new(),
            tainted: Vec::new(),
            packet: None,
            last_bytes: 0,
            deferred: 0,
            aborted: false,
        }
    }

    #[inline]
    pub fn observer(&self) -> usize {
        self.observer
    }

    #[inline]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[inline]
    pub fn coord(&self) -> CoordGrid {
        self.coord
    }

    #[inline]
    pub fn view_distance(&self) -> u32 {
        self.view_distance
    }

    /// Change the view distance; above 15 the large packet is used
    pub fn set_view_distance(&mut self, distance: u32) {
        self.view_distance = distance;
    }

    /// Tracked NPC indices in packet order
    pub fn tracked(&self) -> impl Iterator<Item = usize> + '_ {
        self.high_res.iter().map(|e| e.index)
    }

    #[inline]
    pub fn is_tracking(&self, index: usize) -> bool {
        self.tracked.get(index)
    }

    /// Coordinate this observer last received for NPC `index`
    pub fn known_coord(&self, index: usize) -> Option<CoordGrid> {
        self.high_res.iter().find(|e| e.index == index).map(|e| e.known)
    }

    #[inline]
    pub fn high_res_count(&self) -> usize {
        self.high_res.len()
    }

    /// Packet this observer's client decodes with
    pub fn prot(&self) -> ServerProt {
        if self.view_distance <= SMALL_VIEW_DISTANCE {
            ServerProt::NpcInfoSmall
        } else {
            ServerProt::NpcInfoLarge
        }
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

    /// Follow the observing player's coordinate
    pub(crate) fn sync(&mut self, coord: CoordGrid) {
        self.coord = coord;
        self.build_area.follow(coord);
    }

    #[inline]
    fn in_view(&self, coord: CoordGrid) -> bool {
        self.coord.in_distance(coord, self.view_distance) && self.build_area.contains(coord)
    }

    fn fits(&self, writer: &BitWriter<'_>, bits: usize, limit: usize) -> bool {
        (writer.bit_position() + bits + 7) / 8 + self.ext.len() <= limit
    }

    pub(crate) fn compute(&mut self, frame: &NpcFrame<'_>) {
        self.packet = None;
        self.tainted.clear();
        self.last_bytes = 0;
        self.deferred = 0;
        self.aborted = false;

        if !self.coord.is_valid() {
            return;
        }
        let Some(encoders) = frame.encoders.get(self.platform) else {
            tracing::warn!("No NPC encoders for {}; observer {} skipped", self.platform.as_str(), self.observer);
            return;
        };

        self.ext.clear();
        self.next.clear();
        self.carry.rollback();
        let prot = self.prot();
        let mut payload = frame.recycler.alloc(128);
        let result = self.encode(&mut payload, encoders, frame).and_then(|()| {
            payload.put_slice(&self.ext);
            if payload.len() > frame.limits.max_packet_size {
                return Err(SyncError::PacketTooLarge {
                    size: payload.len(),
                    limit: frame.limits.max_packet_size,
                });
            }
            prot.frame().check(payload.len())
        });

        match result {
            Ok(()) => {
                std::mem::swap(&mut self.high_res, &mut self.next);
                self.carry.commit();
                self.stale.clear();
                self.last_bytes = payload.len();
                let payload = Arc::new(payload);
                frame.recycler.retire(Arc::clone(&payload));
                self.packet = Some(InfoPacket::new(prot, payload));
            }
            Err(e) => {
                tracing::warn!("NPC info for observer {} aborted: {}", self.observer, e);
                self.carry.rollback();
                self.tracked.clear();
                for entry in &self.high_res {
                    self.tracked.set(entry.index);
                    if frame.released.get(entry.index) {
                        self.stale.set(entry.index);
                    }
                }
                self.aborted = true;
            }
        }
    }

    fn encode(&mut self, payload: &mut BytesMut, encoders: &NpcEncoders, frame: &NpcFrame<'_>) -> Result<()> {
        let hard = frame.limits.max_packet_size;
        let soft = hard.saturating_sub(NPC_REMOVAL_RESERVE);
        let mut writer = BitWriter::new(payload, hard);
        let mut overflow = false;

        writer.p_bits(8, self.high_res.len() as u32)?;
        let list = std::mem::take(&mut self.high_res);
        let result = self.encode_tracked(&mut writer, &list, encoders, frame, soft, &mut overflow);
        self.high_res = list;
        result?;

        if !overflow {
            self.encode_adds(&mut writer, encoders, frame, soft)?;
        }
        writer.p_bits(16, END_OF_ADDS)?;
        writer.finish();
        Ok(())
    }

    fn encode_tracked(
        &mut self,
        writer: &mut BitWriter<'_>,
        list: &[NpcEntry],
        encoders: &NpcEncoders,
        frame: &NpcFrame<'_>,
        soft: usize,
        overflow: &mut bool,
    ) -> Result<()> {
        for entry in list {
            let avatar = frame
                .avatars
                .get(entry.index)
                .filter(|a| !self.stale.get(entry.index) && self.in_view(a.coord()));
            let movement = avatar.map(|a| {
                if entry.known == a.last_coord() {
                    a.movement()
                } else {
                    Movement::between(entry.known, a.coord(), a.is_jumping())
                }
            });
            let (avatar, movement) = match (avatar, movement) {
                (Some(a), Some(m)) if !matches!(m, Movement::Teleport(_)) => (a, m),
                _ => {
                    writer.p_bits(1, 1)?;
                    writer.p_bits(2, 3)?;
                    self.tracked.unset(entry.index);
                    self.carry.discard(entry.index);
                    continue;
                }
            };

            let flags = avatar.ext().flags_for(self.observer) | entry.owed;
            if *overflow {
                writer.p_bits(1, 0)?;
                self.defer(avatar, entry, flags, encoders);
                continue;
            }
            let carried = self.carry.front(entry.index).is_some();
            if movement.is_stationary() && flags == 0 && !carried {
                writer.p_bits(1, 0)?;
                self.next.push(*entry);
                continue;
            }

            let mark = self.ext.len();
            if let Some(group) = self.carry.front(entry.index) {
                self.ext.put_slice(group);
            }
            let mut requeue = None;
            if flags != 0 {
                let split = self.ext.len();
                self.stage_ext(avatar, entry.index, flags, encoders);
                if carried {
                    requeue = Some(self.ext.split_off(split));
                }
            }
            let has_ext = flags != 0 || carried;
            let bits = 3 + match movement {
                Movement::Walk(_) => 4,
                Movement::Run(_) => 5,
                _ => 0,
            };
            if !self.fits(writer, bits, soft) {
                self.ext.truncate(mark);
                *overflow = true;
                writer.p_bits(1, 0)?;
                self.defer(avatar, entry, flags, encoders);
                continue;
            }

            writer.p_bits(1, 1)?;
            match movement {
                Movement::Walk(opcode) => {
                    writer.p_bits(2, 1)?;
                    writer.p_bits(3, opcode)?;
                    writer.p_bool(has_ext)?;
                }
                Movement::Run(opcode) => {
                    writer.p_bits(2, 2)?;
                    writer.p_bits(4, opcode)?;
                    writer.p_bool(has_ext)?;
                }
                _ => writer.p_bits(2, 0)?,
            }
            if carried {
                self.carry.mark_sent(entry.index);
            }
            if let Some(group) = requeue {
                self.carry.queue(entry.index, group);
            }
            self.next.push(NpcEntry {
                index: entry.index,
                known: avatar.coord(),
                owed: if flags != 0 { 0 } else { entry.owed },
            });
        }
        Ok(())
    }

    fn encode_adds(
        &mut self,
        writer: &mut BitWriter<'_>,
        encoders: &NpcEncoders,
        frame: &NpcFrame<'_>,
        soft: usize,
    ) -> Result<()> {
        let room = frame
            .limits
            .max_high_res
            .saturating_sub(self.next.len())
            .min(frame.limits.add_limit);
        if room == 0 {
            return Ok(());
        }

        self.candidates.clear();
        if let Some(rect) = self.build_area.clip(self.coord, self.view_distance) {
            for i in frame.avatars.zones().indices_in(rect) {
                if self.tracked.get(i) {
                    continue;
                }
                let Some(avatar) = frame.avatars.get(i) else {
                    continue;
                };
                if self.in_view(avatar.coord()) {
                    self.candidates.push((avatar.priority(), self.coord.chebyshev(avatar.coord()), i));
                }
            }
        }
        self.candidates.sort_unstable();

        let (delta_bits, min, max) = match self.prot() {
            ServerProt::NpcInfoSmall => (5, -16, 15),
            _ => (8, -128, 127),
        };
        let candidates = std::mem::take(&mut self.candidates);
        let mut added = 0;
        let mut result = Ok(());
        for &(_, _, i) in &candidates {
            if added == room {
                break;
            }
            let Some(avatar) = frame.avatars.get(i) else {
                continue;
            };
            let (dx, dz) = self.coord.delta_to(avatar.coord());
            if !(min..=max).contains(&dx) || !(min..=max).contains(&dz) {
                continue;
            }
            let flags = avatar.ext().flags_for(self.observer) | avatar.ext().persistent_flags();
            let mark = self.ext.len();
            if flags != 0 {
                self.stage_ext(avatar, i, flags, encoders);
            }
            if !self.fits(writer, 16 + 2 * delta_bits as usize + 18 + 16, soft) {
                self.ext.truncate(mark);
                self.deferred += candidates.len().min(room) - added;
                break;
            }
            result = Self::write_add(writer, avatar, i, dx, dz, delta_bits, flags != 0);
            if result.is_err() {
                break;
            }
            self.tracked.set(i);
            self.next.push(NpcEntry {
                index: i,
                known: avatar.coord(),
                owed: 0,
            });
            added += 1;
        }
        self.candidates = candidates;
        result
    }

    fn write_add(
        writer: &mut BitWriter<'_>,
        avatar: &NpcAvatar,
        index: usize,
        dx: i32,
        dz: i32,
        delta_bits: u32,
        has_ext: bool,
    ) -> Result<()> {
        writer.p_bits(16, index as u32)?;
        writer.p_bits(delta_bits, dx as u32)?;
        writer.p_bits(delta_bits, dz as u32)?;
        writer.p_bool(has_ext)?;
        writer.p_bool(avatar.is_jumping())?;
        writer.p_bits(14, avatar.id() as u32)?;
        writer.p_bits(3, avatar.direction() as u32)
    }

    fn stage_ext(&mut self, avatar: &NpcAvatar, owner: usize, flags: u32, encoders: &NpcEncoders) {
        let mark = self.ext.len();
        if let Err(e) = avatar.ext().write(&mut self.ext, encoders, self.observer, owner, flags) {
            tracing::warn!(
                "Extended info of NPC {} failed for observer {}: {}",
                owner,
                self.observer,
                e
            );
            self.ext.truncate(mark);
            self.ext.put_u8(0);
            self.tainted.push(owner);
        }
    }

    /// Keep a tracked NPC idle this packet; transient blocks are carried
    fn defer(&mut self, avatar: &NpcAvatar, entry: &NpcEntry, flags: u32, encoders: &NpcEncoders) {
        let mut owed = entry.owed | (flags & NpcBlock::PERSISTENT);
        if flags & !NpcBlock::PERSISTENT != 0 {
            let mark = self.ext.len();
            self.stage_ext(avatar, entry.index, flags, encoders);
            let group = self.ext.split_off(mark);
            self.carry.queue(entry.index, group);
            owed = 0;
        }
        self.next.push(NpcEntry { owed, ..*entry });
        self.deferred += 1;
    }
}
