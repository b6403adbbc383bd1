//! Per-observer world entity info
//!
//! # Packet layout
//!
//! World entity packets are byte oriented:
//!
//! ```text
//! u8                     number of entities tracked at tick start
//! per tracked entity     u8 mask, then the fields its bits select:
//!                          0           removed
//!                          PRESENT     always set for a retained entity
//!                          MOVED       i8 dx, i8 dz
//!                          TURNED      u16 angle
//!                          TELEPORTED  u32 packed coordinate
//! u8                     number of added entities
//! per added entity       u16 index, u8 size x, u8 size z, u32 packed
//!                        coordinate, u16 angle
//! ```

use super::avatar::WorldEntityAvatar;
use crate::engine::ProtocolStats;
use bytes::BytesMut;
use std::sync::Arc;
use tilesync_core::{AvatarPriority, CoordGrid, Platform, Result, SyncError};
use tilesync_protocol::{write_p1, write_p2, write_p4, BufferRecycler, InfoPacket, ServerProt};
use tilesync_world::{AvatarPool, BitSet, BuildArea};

/// Bytes below the ceiling kept free for removal records
pub const WORLD_ENTITY_REMOVAL_RESERVE: usize = 256;

pub const MASK_PRESENT: u8 = 0x1;
pub const MASK_MOVED: u8 = 0x2;
pub const MASK_TURNED: u8 = 0x4;
pub const MASK_TELEPORTED: u8 = 0x8;

/// Bytes of one add record
const ADD_RECORD_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct WorldEntityLimits {
    pub add_limit: usize,
    pub max_high_res: usize,
    pub view_distance: u32,
    pub build_area_zones: u16,
    pub max_packet_size: usize,
}

pub(crate) struct WorldEntityFrame<'a> {
    pub avatars: &'a AvatarPool<WorldEntityAvatar>,
    pub limits: &'a WorldEntityLimits,
    pub recycler: &'a BufferRecycler,
    pub released: &'a BitSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    index: usize,
    known: CoordGrid,
    angle: u16,
}

/// Change of one tracked entity since this observer last heard of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Moved(i8, i8),
    Teleported(CoordGrid),
}

impl Change {
    fn between(from: CoordGrid, to: CoordGrid, jump: bool) -> Option<Self> {
        if !jump && from == to {
            return None;
        }
        if jump || !from.is_valid() || from.level() != to.level() {
            return Some(Change::Teleported(to));
        }
        let (dx, dz) = from.delta_to(to);
        match (i8::try_from(dx), i8::try_from(dz)) {
            (Ok(dx), Ok(dz)) => Some(Change::Moved(dx, dz)),
            _ => Some(Change::Teleported(to)),
        }
    }
}

/// World entities one player observer is tracking
pub struct WorldEntityInfo {
    observer: usize,
    platform: Platform,
    coord: CoordGrid,
    build_area: BuildArea,
    view_distance: u32,
    high_res: Vec<Entry>,
    next: Vec<Entry>,
    tracked: BitSet,
    stale: BitSet,
    candidates: Vec<(AvatarPriority, u32, usize)>,
    packet: Option<InfoPacket>,
    last_bytes: usize,
    deferred: usize,
    aborted: bool,
}

impl WorldEntityInfo {
    pub(crate) fn new(
        observer: usize,
        coord: CoordGrid,
        platform: Platform,
        capacity: usize,
        limits: &WorldEntityLimits,
    ) -> Self {
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
            candidates: Vec::new(),
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

    pub fn tracked(&self) -> impl Iterator<Item = usize> + '_ {
        self.high_res.iter().map(|e| e.index)
    }

    #[inline]
    pub fn is_tracking(&self, index: usize) -> bool {
        self.tracked.get(index)
    }

    /// Coordinate this observer last received for entity `index`
    pub fn known_coord(&self, index: usize) -> Option<CoordGrid> {
        self.high_res.iter().find(|e| e.index == index).map(|e| e.known)
    }

    pub fn take_packet(&mut self) -> Option<InfoPacket> {
        self.packet.take()
    }

    pub(crate) fn stats(&self, stats: &mut ProtocolStats) {
        stats.observers += 1;
        stats.packets += self.packet.is_some() as usize;
        stats.bytes += self.last_bytes;
        stats.deferred += self.deferred;
        stats.aborted += self.aborted as usize;
    }

    pub(crate) fn sync(&mut self, coord: CoordGrid) {
        self.coord = coord;
        self.build_area.follow(coord);
    }

    #[inline]
    fn in_view(&self, coord: CoordGrid) -> bool {
        self.coord.in_distance(coord, self.view_distance) && self.build_area.contains(coord)
    }

    pub(crate) fn compute(&mut self, frame: &WorldEntityFrame<'_>) {
        self.packet = None;
        self.last_bytes = 0;
        self.deferred = 0;
        self.aborted = false;
        if !self.coord.is_valid() {
            return;
        }

        self.next.clear();
        let mut payload = frame.recycler.alloc(64);
        let result = self.encode(&mut payload, frame).and_then(|()| {
            if payload.len() > frame.limits.max_packet_size {
                return Err(SyncError::PacketTooLarge {
                    size: payload.len(),
                    limit: frame.limits.max_packet_size,
                });
            }
            ServerProt::WorldEntityInfo.frame().check(payload.len())
        });

        match result {
            Ok(()) => {
                std::mem::swap(&mut self.high_res, &mut self.next);
                self.stale.clear();
                self.last_bytes = payload.len();
                let payload = Arc::new(payload);
                frame.recycler.retire(Arc::clone(&payload));
                self.packet = Some(InfoPacket::new(ServerProt::WorldEntityInfo, payload));
            }
            Err(e) => {
                tracing::warn!("World entity info for observer {} aborted: {}", self.observer, e);
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

    fn encode(&mut self, out: &mut BytesMut, frame: &WorldEntityFrame<'_>) -> Result<()> {
        let soft = frame
            .limits
            .max_packet_size
            .saturating_sub(WORLD_ENTITY_REMOVAL_RESERVE);
        let mut overflow = false;

        write_p1(out, self.high_res.len() as i32);
        let list = std::mem::take(&mut self.high_res);
        for entry in &list {
            let avatar = frame
                .avatars
                .get(entry.index)
                .filter(|a| !self.stale.get(entry.index) && self.in_view(a.coord()));
            let Some(avatar) = avatar else {
                write_p1(out, 0);
                self.tracked.unset(entry.index);
                continue;
            };

            let change = Change::between(entry.known, avatar.coord(), avatar.is_jumping());
            let turned = avatar.angle() != entry.angle;
            let cost = 1
                + match change {
                    Some(Change::Moved(..)) => 2,
                    Some(Change::Teleported(_)) => 4,
                    None => 0,
                }
                + if turned { 2 } else { 0 };
            if overflow || (cost > 1 && out.len() + cost > soft) {
                overflow = true;
                write_p1(out, MASK_PRESENT as i32);
                self.next.push(*entry);
                if change.is_some() || turned {
                    self.deferred += 1;
                }
                continue;
            }

            let mut mask = MASK_PRESENT;
            match change {
                Some(Change::Moved(..)) => mask |= MASK_MOVED,
                Some(Change::Teleported(_)) => mask |= MASK_TELEPORTED,
                None => {}
            }
            if turned {
                mask |= MASK_TURNED;
            }
            write_p1(out, mask as i32);
            match change {
                Some(Change::Moved(dx, dz)) => {
                    write_p1(out, dx as i32);
                    write_p1(out, dz as i32);
                }
                Some(Change::Teleported(coord)) => write_p4(out, coord.packed() as i32),
                None => {}
            }
            if turned {
                write_p2(out, avatar.angle() as i32);
            }
            self.next.push(Entry {
                index: entry.index,
                known: avatar.coord(),
                angle: avatar.angle(),
            });
        }
        self.high_res = list;

        let count_at = out.len();
        write_p1(out, 0);
        if overflow {
            return Ok(());
        }
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

        let mut added = 0usize;
        for &(_, _, i) in self.candidates.iter().take(room) {
            let Some(avatar) = frame.avatars.get(i) else {
                continue;
            };
            if out.len() + ADD_RECORD_LEN > soft {
                self.deferred += self.candidates.len().min(room) - added;
                break;
            }
            let (size_x, size_z) = avatar.size();
            write_p2(out, i as i32);
            write_p1(out, size_x as i32);
            write_p1(out, size_z as i32);
            write_p4(out, avatar.coord().packed() as i32);
            write_p2(out, avatar.angle() as i32);
            self.tracked.set(i);
            self.next.push(Entry {
                index: i,
                known: avatar.coord(),
                angle: avatar.angle(),
            });
            added += 1;
        }
        out[count_at] = added as u8;
        Ok(())
    }
}
