//! Client-side decoders for info packets
//!
//! Each decoder mirrors what a client keeps between packets so tests can
//! compare the state a client would reconstruct with the server's.

use crate::extinfo::{desktop, NpcBlock, PlayerBlock};
use bytes::Buf;
use tilesync_core::{CoordGrid, LowResPosition, Result, SyncError};
use tilesync_protocol::{
    dual_cell_delta, read_g1, read_g1s, read_g2, read_g3, read_g4, read_gjstr, read_smart,
    single_cell_delta, BitReader, InfoPacket, ServerProt,
};

fn malformed(what: impl Into<String>) -> SyncError {
    SyncError::InvalidArgument(what.into())
}

/// What a packet said about one tracked slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    Added(usize),
    Removed(usize),
    Walk(usize, u32),
    Run(usize, u32),
    Teleport(usize),
    /// Extended info without movement
    Updated(usize),
}

impl Seen {
    pub fn index(&self) -> usize {
        match *self {
            Seen::Added(i) | Seen::Removed(i) | Seen::Teleport(i) | Seen::Updated(i) => i,
            Seen::Walk(i, _) | Seen::Run(i, _) => i,
        }
    }
}

/// Decoded desktop player extended info
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerExt {
    pub blocks: Vec<PlayerBlock>,
    pub appearance_name: Option<String>,
    pub say: Option<String>,
    pub sequence: Option<(u16, u8)>,
    pub hit_values: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct DecodedPlayers {
    pub seen: Vec<Seen>,
    pub ext: Vec<(usize, PlayerExt)>,
}

impl DecodedPlayers {
    pub fn about(&self, index: usize) -> Vec<Seen> {
        self.seen.iter().copied().filter(|s| s.index() == index).collect()
    }

    pub fn ext_of(&self, index: usize) -> Option<&PlayerExt> {
        self.ext.iter().find(|(i, _)| *i == index).map(|(_, ext)| ext)
    }
}

fn read_skip(reader: &mut BitReader<'_>) -> Result<u32> {
    Ok(match reader.g_bits(2)? {
        0 => 0,
        1 => reader.g_bits(5)?,
        2 => reader.g_bits(8)?,
        _ => reader.g_bits(11)?,
    })
}

fn skip_bytes<B: Buf>(buf: &mut B, count: usize) -> Result<()> {
    if buf.remaining() < count {
        return Err(SyncError::BufferBounds {
            requested: count,
            available: buf.remaining(),
        });
    }
    buf.advance(count);
    Ok(())
}

fn read_hits<B: Buf>(buf: &mut B) -> Result<Vec<u32>> {
    let marks = read_g1(buf)?;
    let mut values = Vec::with_capacity(marks as usize);
    for _ in 0..marks {
        read_smart(buf)?;
        values.push(read_smart(buf)?);
        read_smart(buf)?;
    }
    for _ in 0..read_g1(buf)? {
        read_smart(buf)?;
        read_smart(buf)?;
        read_smart(buf)?;
        skip_bytes(buf, 2)?;
    }
    Ok(values)
}

fn skip_spot_anims<B: Buf>(buf: &mut B) -> Result<()> {
    let count = read_g1(buf)? as usize;
    skip_bytes(buf, count * 7)
}

/// Name field of a desktop appearance body
fn read_appearance_name<B: Buf>(buf: &mut B) -> Result<String> {
    let len = read_g1(buf)? as usize;
    if buf.remaining() < len {
        return Err(malformed("appearance overruns packet"));
    }
    let mut body = buf.copy_to_bytes(len);
    skip_bytes(&mut body, 3)?;
    if read_g2(&mut body)? == 0xFFFF {
        read_g2(&mut body)?;
    } else {
        skip_bytes(&mut body, 22)?;
    }
    skip_bytes(&mut body, 5 + 14)?;
    read_gjstr(&mut body)
}

fn read_player_ext<B: Buf>(buf: &mut B) -> Result<PlayerExt> {
    let layout = &desktop::PLAYER_LAYOUT;
    let wire = layout.read_flag_word(buf)?;
    let mut ext = PlayerExt::default();
    for block in layout.blocks_in(wire) {
        ext.blocks.push(block);
        match block {
            PlayerBlock::Appearance => ext.appearance_name = Some(read_appearance_name(buf)?),
            PlayerBlock::Sequence => ext.sequence = Some((read_g2(buf)?, read_g1(buf)?)),
            PlayerBlock::FacePathingEntity => {
                read_g3(buf)?;
            }
            PlayerBlock::FaceAngle => skip_bytes(buf, 2)?,
            PlayerBlock::Say => ext.say = Some(read_gjstr(buf)?),
            PlayerBlock::Chat => {
                skip_bytes(buf, 4)?;
                let len = read_g1(buf)? as usize;
                skip_bytes(buf, len)?;
            }
            PlayerBlock::Hits => ext.hit_values = read_hits(buf)?,
            PlayerBlock::SpotAnims => skip_spot_anims(buf)?,
            PlayerBlock::ExactMove => skip_bytes(buf, 10)?,
            PlayerBlock::MoveSpeed | PlayerBlock::TemporaryMoveSpeed => skip_bytes(buf, 1)?,
            PlayerBlock::Tinting => skip_bytes(buf, 8)?,
        }
    }
    Ok(ext)
}

/// Player info as a client tracks it
pub struct PlayerInfoDecoder {
    index: usize,
    high_res: Vec<bool>,
    coords: Vec<CoordGrid>,
    lowres: Vec<LowResPosition>,
}

impl PlayerInfoDecoder {
    /// Start from the init block the login packet carried
    pub fn from_init(index: usize, capacity: usize, init: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(init);
        let own = CoordGrid::from_packed(reader.g_bits(30)?);
        let mut lowres = vec![LowResPosition::default(); capacity];
        for (i, position) in lowres.iter_mut().enumerate() {
            if i != index {
                *position = LowResPosition::from_packed(reader.g_bits(18)?);
            }
        }
        lowres[index] = own.low_res();
        let mut high_res = vec![false; capacity];
        high_res[index] = true;
        let mut coords = vec![CoordGrid::INVALID; capacity];
        coords[index] = own;
        Ok(Self {
            index,
            high_res,
            coords,
            lowres,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn coord(&self, index: usize) -> Option<CoordGrid> {
        self.high_res[index].then(|| self.coords[index])
    }

    pub fn lowres(&self, index: usize) -> LowResPosition {
        self.lowres[index]
    }

    /// Other players tracked in high resolution
    pub fn high_res_count(&self) -> usize {
        self.high_res.iter().filter(|&&h| h).count() - 1
    }

    fn read_low_res_update(&mut self, reader: &mut BitReader<'_>, i: usize, kind: u32) -> Result<()> {
        let old = self.lowres[i];
        let level = (old.level() + reader.g_bits(2)? as u8) & 0x3;
        let (rx, rz) = match kind {
            1 => (old.region_x(), old.region_z()),
            2 => {
                let (dx, dz) = single_cell_delta(reader.g_bits(3)?).ok_or_else(|| malformed("region step"))?;
                (old.region_x().wrapping_add(dx as u8), old.region_z().wrapping_add(dz as u8))
            }
            3 => {
                let dx = reader.g_bits(8)? as u8;
                let dz = reader.g_bits(8)? as u8;
                (old.region_x().wrapping_add(dx), old.region_z().wrapping_add(dz))
            }
            _ => return Err(malformed("low-res update type 0")),
        };
        self.lowres[i] = LowResPosition::new(level, rx, rz);
        Ok(())
    }

    pub fn decode(&mut self, payload: &[u8]) -> Result<DecodedPlayers> {
        let mut reader = BitReader::new(payload);
        let mut out = DecodedPlayers::default();
        let mut queue = Vec::new();
        let start = self.high_res.clone();

        let mut skip = 0;
        for i in (0..start.len()).filter(|&i| start[i]) {
            if skip > 0 {
                skip -= 1;
                continue;
            }
            if !reader.g_bool()? {
                skip = read_skip(&mut reader)?;
                continue;
            }
            let ext = reader.g_bool()?;
            match reader.g_bits(2)? {
                0 if !ext => {
                    if reader.g_bool()? {
                        let kind = reader.g_bits(2)?;
                        self.read_low_res_update(&mut reader, i, kind)?;
                    }
                    self.high_res[i] = false;
                    self.coords[i] = CoordGrid::INVALID;
                    out.seen.push(Seen::Removed(i));
                }
                0 => out.seen.push(Seen::Updated(i)),
                1 => {
                    let opcode = reader.g_bits(3)?;
                    let (dx, dz) = single_cell_delta(opcode).ok_or_else(|| malformed("walk opcode"))?;
                    self.coords[i] = self.coords[i].translate(dx, dz, 0)?;
                    out.seen.push(Seen::Walk(i, opcode));
                }
                2 => {
                    let opcode = reader.g_bits(4)?;
                    let (dx, dz) = dual_cell_delta(opcode).ok_or_else(|| malformed("run opcode"))?;
                    self.coords[i] = self.coords[i].translate(dx, dz, 0)?;
                    out.seen.push(Seen::Run(i, opcode));
                }
                _ => {
                    let level = reader.g_bits(2)? as u8;
                    let x = reader.g_bits(14)? as u16;
                    let z = reader.g_bits(14)? as u16;
                    self.coords[i] = CoordGrid::new(level, x, z);
                    out.seen.push(Seen::Teleport(i));
                }
            }
            if ext {
                queue.push(i);
            }
        }
        if skip > 0 {
            return Err(malformed("high-res skip overruns tracked slots"));
        }

        for i in (0..start.len()).filter(|&i| !start[i]) {
            if skip > 0 {
                skip -= 1;
                continue;
            }
            if !reader.g_bool()? {
                skip = read_skip(&mut reader)?;
                continue;
            }
            match reader.g_bits(2)? {
                0 => {
                    if reader.g_bool()? {
                        let kind = reader.g_bits(2)?;
                        self.read_low_res_update(&mut reader, i, kind)?;
                    }
                    let x = reader.g_bits(13)? as u16;
                    let z = reader.g_bits(13)? as u16;
                    let region = self.lowres[i];
                    self.coords[i] = CoordGrid::new(
                        region.level(),
                        ((region.region_x() as u16) << 13) | x,
                        ((region.region_z() as u16) << 13) | z,
                    );
                    self.high_res[i] = true;
                    out.seen.push(Seen::Added(i));
                    if reader.g_bool()? {
                        queue.push(i);
                    }
                }
                kind => self.read_low_res_update(&mut reader, i, kind)?,
            }
        }

        let mut buf = &payload[reader.byte_position()..];
        for i in queue {
            out.ext.push((i, read_player_ext(&mut buf)?));
        }
        if buf.has_remaining() {
            return Err(malformed(format!("{} trailing bytes", buf.remaining())));
        }
        Ok(out)
    }
}

/// Decoded desktop NPC extended info
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NpcExt {
    pub blocks: Vec<NpcBlock>,
    pub transformation: Option<u16>,
    pub say: Option<String>,
    pub name: Option<String>,
}

fn read_npc_ext<B: Buf>(buf: &mut B) -> Result<NpcExt> {
    let layout = &desktop::NPC_LAYOUT;
    let wire = layout.read_flag_word(buf)?;
    let mut ext = NpcExt::default();
    for block in layout.blocks_in(wire) {
        ext.blocks.push(block);
        match block {
            NpcBlock::Transformation => ext.transformation = Some(read_g2(buf)?),
            NpcBlock::Sequence => skip_bytes(buf, 3)?,
            NpcBlock::FacePathingEntity => skip_bytes(buf, 3)?,
            NpcBlock::Hits => {
                read_hits(buf)?;
            }
            NpcBlock::Say => ext.say = Some(read_gjstr(buf)?),
            NpcBlock::FaceCoord => skip_bytes(buf, 5)?,
            NpcBlock::SpotAnims => skip_spot_anims(buf)?,
            NpcBlock::ExactMove => skip_bytes(buf, 10)?,
            NpcBlock::Tinting => skip_bytes(buf, 8)?,
            NpcBlock::CombatLevelChange => {
                read_g4(buf)?;
            }
            NpcBlock::NameChange => ext.name = Some(read_gjstr(buf)?),
        }
    }
    Ok(ext)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpcAdd {
    pub index: usize,
    pub id: u16,
    pub direction: u8,
    pub jump: bool,
}

#[derive(Debug, Default)]
pub struct DecodedNpcs {
    pub seen: Vec<Seen>,
    pub adds: Vec<NpcAdd>,
    pub ext: Vec<(usize, NpcExt)>,
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    ((value << (32 - bits)) as i32) >> (32 - bits)
}

/// NPC info as a client tracks it
#[derive(Default)]
pub struct NpcInfoDecoder {
    tracked: Vec<(usize, CoordGrid)>,
}

impl NpcInfoDecoder {
    pub fn coord(&self, index: usize) -> Option<CoordGrid> {
        self.tracked.iter().find(|(i, _)| *i == index).map(|(_, c)| *c)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Decode one packet; `observer` is the player's coordinate this tick
    pub fn decode(&mut self, packet: &InfoPacket, observer: CoordGrid) -> Result<DecodedNpcs> {
        let delta_bits = match packet.prot {
            ServerProt::NpcInfoSmall => 5,
            ServerProt::NpcInfoLarge => 8,
            other => return Err(malformed(format!("not an npc packet: {:?}", other))),
        };
        let payload = &packet.payload[..];
        let mut reader = BitReader::new(payload);
        let mut out = DecodedNpcs::default();
        let mut queue = Vec::new();

        if reader.g_bits(8)? as usize != self.tracked.len() {
            return Err(malformed("tracked count mismatch"));
        }
        let mut next = Vec::with_capacity(self.tracked.len());
        for &(i, coord) in &self.tracked {
            if !reader.g_bool()? {
                next.push((i, coord));
                continue;
            }
            match reader.g_bits(2)? {
                0 => {
                    queue.push(i);
                    out.seen.push(Seen::Updated(i));
                    next.push((i, coord));
                }
                1 => {
                    let opcode = reader.g_bits(3)?;
                    let (dx, dz) = single_cell_delta(opcode).ok_or_else(|| malformed("walk opcode"))?;
                    next.push((i, coord.translate(dx, dz, 0)?));
                    out.seen.push(Seen::Walk(i, opcode));
                    if reader.g_bool()? {
                        queue.push(i);
                    }
                }
                2 => {
                    let opcode = reader.g_bits(4)?;
                    let (dx, dz) = dual_cell_delta(opcode).ok_or_else(|| malformed("run opcode"))?;
                    next.push((i, coord.translate(dx, dz, 0)?));
                    out.seen.push(Seen::Run(i, opcode));
                    if reader.g_bool()? {
                        queue.push(i);
                    }
                }
                _ => out.seen.push(Seen::Removed(i)),
            }
        }

        loop {
            let index = reader.g_bits(16)?;
            if index == 0xFFFF {
                break;
            }
            let index = index as usize;
            let dx = sign_extend(reader.g_bits(delta_bits)?, delta_bits);
            let dz = sign_extend(reader.g_bits(delta_bits)?, delta_bits);
            let ext = reader.g_bool()?;
            let jump = reader.g_bool()?;
            let id = reader.g_bits(14)? as u16;
            let direction = reader.g_bits(3)? as u8;
            next.push((index, observer.translate(dx, dz, 0)?));
            out.seen.push(Seen::Added(index));
            out.adds.push(NpcAdd {
                index,
                id,
                direction,
                jump,
            });
            if ext {
                queue.push(index);
            }
        }
        self.tracked = next;

        let mut buf = &payload[reader.byte_position()..];
        for i in queue {
            out.ext.push((i, read_npc_ext(&mut buf)?));
        }
        if buf.has_remaining() {
            return Err(malformed(format!("{} trailing bytes", buf.remaining())));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedEntity {
    pub index: usize,
    pub coord: CoordGrid,
    pub angle: u16,
    pub size: (u8, u8),
}

/// World entity info as a client tracks it
#[derive(Default)]
pub struct WorldEntityInfoDecoder {
    tracked: Vec<TrackedEntity>,
}

impl WorldEntityInfoDecoder {
    pub fn entity(&self, index: usize) -> Option<TrackedEntity> {
        self.tracked.iter().copied().find(|e| e.index == index)
    }

    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<Seen>> {
        use crate::worldentity::{MASK_MOVED, MASK_TELEPORTED, MASK_TURNED};

        let mut buf = payload;
        let mut seen = Vec::new();
        if read_g1(&mut buf)? as usize != self.tracked.len() {
            return Err(malformed("tracked count mismatch"));
        }
        let mut next = Vec::with_capacity(self.tracked.len());
        for &entity in &self.tracked {
            let mask = read_g1(&mut buf)?;
            if mask == 0 {
                seen.push(Seen::Removed(entity.index));
                continue;
            }
            let mut entity = entity;
            if mask & MASK_MOVED != 0 {
                let dx = read_g1s(&mut buf)? as i32;
                let dz = read_g1s(&mut buf)? as i32;
                entity.coord = entity.coord.translate(dx, dz, 0)?;
                seen.push(Seen::Walk(entity.index, 0));
            }
            if mask & MASK_TELEPORTED != 0 {
                entity.coord = CoordGrid::from_packed(read_g4(&mut buf)? as u32);
                seen.push(Seen::Teleport(entity.index));
            }
            if mask & MASK_TURNED != 0 {
                entity.angle = read_g2(&mut buf)?;
                seen.push(Seen::Updated(entity.index));
            }
            next.push(entity);
        }
        for _ in 0..read_g1(&mut buf)? {
            let index = read_g2(&mut buf)? as usize;
            let size = (read_g1(&mut buf)?, read_g1(&mut buf)?);
            let coord = CoordGrid::from_packed(read_g4(&mut buf)? as u32);
            let angle = read_g2(&mut buf)?;
            next.push(TrackedEntity {
                index,
                coord,
                angle,
                size,
            });
            seen.push(Seen::Added(index));
        }
        if buf.has_remaining() {
            return Err(malformed(format!("{} trailing bytes", buf.remaining())));
        }
        self.tracked = next;
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InfoEngine;
    use crate::extinfo::{Appearance, HitMark};
    use crate::worldentity::WorldEntityArgs;
    use tilesync_config::InfoConfig;
    use tilesync_core::{AvatarPriority, Platform};

    const CAPACITY: usize = 32;

    fn config() -> InfoConfig {
        InfoConfig {
            player_capacity: CAPACITY,
            npc_capacity: 64,
            world_entity_capacity: 8,
            worker_threads: 2,
            ..InfoConfig::default()
        }
    }

    fn start() -> CoordGrid {
        CoordGrid::new(0, 3200, 3200)
    }

    fn login(engine: &mut InfoEngine, index: usize, coord: CoordGrid, platform: Platform) -> PlayerInfoDecoder {
        let init = engine.alloc_player(index, coord, platform).unwrap();
        PlayerInfoDecoder::from_init(index, CAPACITY, &init).unwrap()
    }

    fn receive(engine: &mut InfoEngine, client: &mut PlayerInfoDecoder, index: usize) -> DecodedPlayers {
        let packet = engine.take_player_packet(index).expect("player packet");
        assert_eq!(packet.prot, ServerProt::PlayerInfo);
        client.decode(&packet.payload).unwrap()
    }

    fn named(name: &str) -> Appearance {
        Appearance {
            name: name.to_string(),
            ..Appearance::default()
        }
    }

    #[test]
    fn test_stepwise_movement_uses_compass_opcodes() {
        let mut engine = InfoEngine::new(&config()).unwrap();
        let mut desktop = login(&mut engine, 0, start(), Platform::Desktop);
        let mut mobile = login(&mut engine, 2, start(), Platform::Mobile);
        engine.alloc_player(1, start(), Platform::Desktop).unwrap();

        engine.tick();
        for (client, index) in [(&mut desktop, 0), (&mut mobile, 2)] {
            let update = receive(&mut engine, client, index);
            assert_eq!(update.about(1), vec![Seen::Added(1)]);
            assert_eq!(client.coord(1), Some(start()));
        }

        for (dx, dz) in [(1i32, 0i32), (2, 0), (1, 1), (1, -1), (0, 2), (-2, -2)] {
            let next = engine.players().avatar(1).unwrap().coord().translate(dx, dz, 0).unwrap();
            engine.players_mut().move_to(1, next).unwrap();
            engine.tick();

            for (client, index) in [(&mut desktop, 0), (&mut mobile, 2)] {
                let update = receive(&mut engine, client, index);
                let seen = update.about(1);
                assert_eq!(seen.len(), 1, "one record per tick for slot 1");
                match seen[0] {
                    Seen::Walk(..) => assert_eq!(i32::max(dx.abs(), dz.abs()), 1),
                    Seen::Run(..) => assert_eq!(i32::max(dx.abs(), dz.abs()), 2),
                    other => panic!("expected a compass opcode, got {:?}", other),
                }
                assert_eq!(client.coord(1), Some(next));
            }
        }
        assert_eq!(desktop.coord(1), Some(CoordGrid::new(0, 3203, 3200)));
    }

    #[test]
    fn test_player_leaves_view_and_returns() {
        let mut engine = InfoEngine::new(&config()).unwrap();
        let mut client = login(&mut engine, 0, start(), Platform::Desktop);
        engine.alloc_player(1, start(), Platform::Desktop).unwrap();
        engine.tick();
        receive(&mut engine, &mut client, 0);

        let far = CoordGrid::new(1, 9000, 3200);
        engine.players_mut().teleport(1, far).unwrap();
        engine.tick();
        let update = receive(&mut engine, &mut client, 0);
        assert_eq!(update.about(1), vec![Seen::Removed(1)]);
        assert_eq!(client.coord(1), None);
        assert_eq!(client.lowres(1), far.low_res());

        let back = start().translate(3, -4, 0).unwrap();
        engine.players_mut().teleport(1, back).unwrap();
        engine.tick();
        let update = receive(&mut engine, &mut client, 0);
        assert_eq!(update.about(1), vec![Seen::Added(1)]);
        assert_eq!(client.coord(1), Some(back));

        assert!(engine.release_player(1));
        assert!(matches!(
            engine.alloc_player(1, start(), Platform::Desktop),
            Err(SyncError::SlotOccupied(1))
        ));
        engine.tick();
        let update = receive(&mut engine, &mut client, 0);
        assert_eq!(update.about(1), vec![Seen::Removed(1)]);
        engine.alloc_player(1, start(), Platform::Desktop).unwrap();
    }

    #[test]
    fn test_extended_info_delivery_and_first_sight() {
        let mut engine = InfoEngine::new(&config()).unwrap();
        let mut first = login(&mut engine, 0, start(), Platform::Desktop);
        engine.alloc_player(1, start(), Platform::Desktop).unwrap();
        engine.players_mut().avatar_mut(1).unwrap().ext_mut().set_appearance(named("bob"));

        engine.tick();
        let update = receive(&mut engine, &mut first, 0);
        assert_eq!(update.about(1), vec![Seen::Added(1)]);
        let ext = update.ext_of(1).unwrap();
        assert_eq!(ext.blocks, vec![PlayerBlock::Appearance]);
        assert_eq!(ext.appearance_name.as_deref(), Some("bob"));

        let ext = engine.players_mut().avatar_mut(1).unwrap().ext_mut();
        ext.set_say("hello");
        ext.set_sequence(0x1234, 5);
        engine.tick();
        let update = receive(&mut engine, &mut first, 0);
        assert_eq!(update.about(1), vec![Seen::Updated(1)]);
        let ext = update.ext_of(1).unwrap();
        assert_eq!(ext.blocks, vec![PlayerBlock::Say, PlayerBlock::Sequence]);
        assert_eq!(ext.say.as_deref(), Some("hello"));
        assert_eq!(ext.sequence, Some((0x1234, 5)));

        engine.tick();
        let update = receive(&mut engine, &mut first, 0);
        assert!(update.about(1).is_empty());
        assert!(update.ext.is_empty());

        let mut late = login(&mut engine, 2, start(), Platform::Desktop);
        engine.tick();
        let update = receive(&mut engine, &mut late, 2);
        assert_eq!(update.about(1), vec![Seen::Added(1)]);
        assert_eq!(update.ext_of(1).unwrap().appearance_name.as_deref(), Some("bob"));
        let update = receive(&mut engine, &mut first, 0);
        assert_eq!(update.about(2), vec![Seen::Added(2)]);
        assert!(update.ext_of(2).is_none());
    }

    #[test]
    fn test_failed_extended_info_taints_owner() {
        let mut engine = InfoEngine::new(&config()).unwrap();
        let mut client = login(&mut engine, 0, start(), Platform::Desktop);
        engine.alloc_player(1, start(), Platform::Desktop).unwrap();
        engine.tick();
        receive(&mut engine, &mut client, 0);

        engine.players_mut().avatar_mut(1).unwrap().ext_mut().add_hit(HitMark {
            source: None,
            self_type: 1,
            other_type: 2,
            value: 0x8000,
            delay: 0,
        });
        let report = engine.tick();
        assert_eq!(report.players.aborted, 0);
        let update = receive(&mut engine, &mut client, 0);
        assert_eq!(update.about(1), vec![Seen::Updated(1)]);
        assert!(update.ext_of(1).unwrap().blocks.is_empty());
        assert!(engine.players().avatars().is_tainted(1));

        assert!(engine.release_player(1));
        assert_eq!(engine.players().avatars().reclaimable(), 0);
    }

    #[test]
    fn test_packet_ceiling_defers_adds() {
        let config = InfoConfig {
            max_packet_size: 2048,
            ..config()
        };
        let mut engine = InfoEngine::new(&config).unwrap();
        let mut client = login(&mut engine, 0, start(), Platform::Desktop);
        for i in 1..=30 {
            engine.alloc_player(i, start(), Platform::Desktop).unwrap();
            let name = format!("player_{:02}", i);
            engine.players_mut().avatar_mut(i).unwrap().ext_mut().set_appearance(named(&name));
        }

        let report = engine.tick();
        assert!(report.players.deferred > 0);
        assert_eq!(report.players.aborted, 0);
        let update = receive(&mut engine, &mut client, 0);
        let first_wave = client.high_res_count();
        assert!(first_wave > 0 && first_wave < 30, "added {}", first_wave);
        assert!(update.ext.iter().all(|(_, ext)| ext.appearance_name.is_some()));

        for _ in 0..4 {
            engine.tick();
            receive(&mut engine, &mut client, 0);
        }
        assert_eq!(client.high_res_count(), 30);
        for i in 1..=30 {
            assert_eq!(client.coord(i), Some(start()));
        }
    }

    #[test]
    fn test_npc_walk_run_and_teleport() {
        let mut engine = InfoEngine::new(&config()).unwrap();
        login(&mut engine, 0, start(), Platform::Desktop);
        let mut client = NpcInfoDecoder::default();
        let spawn = start().translate(3, 4, 0).unwrap();
        engine.spawn_npc(5, 100, spawn, 2).unwrap();

        engine.tick();
        let packet = engine.take_npc_packet(0).unwrap();
        assert_eq!(packet.prot, ServerProt::NpcInfoSmall);
        let update = client.decode(&packet, start()).unwrap();
        assert_eq!(
            update.adds,
            vec![NpcAdd {
                index: 5,
                id: 100,
                direction: 2,
                jump: false
            }]
        );
        assert_eq!(client.coord(5), Some(spawn));

        let walked = spawn.translate(-1, 0, 0).unwrap();
        engine.npcs_mut().move_to(5, walked).unwrap();
        engine.npcs_mut().avatar_mut(5).unwrap().ext_mut().set_say("grr");
        engine.tick();
        let update = client.decode(&engine.take_npc_packet(0).unwrap(), start()).unwrap();
        assert!(matches!(update.seen[..], [Seen::Walk(5, _)]));
        assert_eq!(update.ext[0].1.say.as_deref(), Some("grr"));
        assert_eq!(client.coord(5), Some(walked));

        let ran = walked.translate(2, -2, 0).unwrap();
        engine.npcs_mut().move_to(5, ran).unwrap();
        engine.tick();
        let update = client.decode(&engine.take_npc_packet(0).unwrap(), start()).unwrap();
        assert!(matches!(update.seen[..], [Seen::Run(5, _)]));
        assert_eq!(client.coord(5), Some(ran));

        let jumped = start().translate(-6, 1, 0).unwrap();
        engine.npcs_mut().teleport(5, jumped).unwrap();
        engine.npcs_mut().avatar_mut(5).unwrap().ext_mut().set_transformation(200);
        engine.tick();
        let update = client.decode(&engine.take_npc_packet(0).unwrap(), start()).unwrap();
        assert_eq!(update.seen, vec![Seen::Removed(5), Seen::Added(5)]);
        assert!(update.adds[0].jump);
        assert_eq!(update.ext[0].1.transformation, Some(200));
        assert_eq!(client.coord(5), Some(jumped));

        assert!(engine.despawn_npc(5));
        engine.tick();
        let update = client.decode(&engine.take_npc_packet(0).unwrap(), start()).unwrap();
        assert_eq!(update.seen, vec![Seen::Removed(5)]);
        assert_eq!(client.len(), 0);
    }

    #[test]
    fn test_npc_large_packet_reaches_further() {
        let mut engine = InfoEngine::new(&config()).unwrap();
        login(&mut engine, 0, start(), Platform::Desktop);
        engine.npcs_mut().set_view_distance(0, 40);
        let far = start().translate(-30, 25, 0).unwrap();
        engine.spawn_npc(9, 7, far, 0).unwrap();
        engine.tick();

        let packet = engine.take_npc_packet(0).unwrap();
        assert_eq!(packet.prot, ServerProt::NpcInfoLarge);
        let mut client = NpcInfoDecoder::default();
        client.decode(&packet, start()).unwrap();
        assert_eq!(client.coord(9), Some(far));
    }

    #[test]
    fn test_world_entity_moves_and_turns() {
        let mut engine = InfoEngine::new(&config()).unwrap();
        login(&mut engine, 0, start(), Platform::Desktop);
        let mut client = WorldEntityInfoDecoder::default();
        let spawn = start().translate(5, 5, 0).unwrap();
        engine
            .spawn_world_entity(
                1,
                WorldEntityArgs {
                    coord: spawn,
                    size_x: 2,
                    size_z: 3,
                    angle: 100,
                },
            )
            .unwrap();

        engine.tick();
        let seen = client.decode(&engine.take_world_entity_packet(0).unwrap().payload).unwrap();
        assert_eq!(seen, vec![Seen::Added(1)]);
        let entity = client.entity(1).unwrap();
        assert_eq!((entity.coord, entity.angle, entity.size), (spawn, 100, (2, 3)));

        let moved = spawn.translate(10, -5, 0).unwrap();
        engine.world_entities_mut().move_to(1, moved).unwrap();
        engine.world_entities_mut().avatar_mut(1).unwrap().set_angle(300);
        engine.tick();
        client.decode(&engine.take_world_entity_packet(0).unwrap().payload).unwrap();
        let entity = client.entity(1).unwrap();
        assert_eq!((entity.coord, entity.angle), (moved, 300));

        let jumped = moved.translate(1, 0, 0).unwrap();
        engine.world_entities_mut().teleport(1, jumped).unwrap();
        engine.tick();
        let seen = client.decode(&engine.take_world_entity_packet(0).unwrap().payload).unwrap();
        assert_eq!(seen, vec![Seen::Teleport(1)]);
        assert_eq!(client.entity(1).unwrap().coord, jumped);

        engine.tick();
        let seen = client.decode(&engine.take_world_entity_packet(0).unwrap().payload).unwrap();
        assert!(seen.is_empty());

        engine.world_entities_mut().move_to(1, start().translate(200, 0, 0).unwrap()).unwrap();
        engine.tick();
        let seen = client.decode(&engine.take_world_entity_packet(0).unwrap().payload).unwrap();
        assert_eq!(seen, vec![Seen::Removed(1)]);
        assert!(client.entity(1).is_none());
    }

    #[test]
    fn test_packet_ceiling_carries_per_tick_blocks() {
        let config = InfoConfig {
            max_packet_size: 2048,
            ..config()
        };
        let mut engine = InfoEngine::new(&config).unwrap();
        let mut client = login(&mut engine, 0, start(), Platform::Desktop);
        for i in 1..=30 {
            engine.alloc_player(i, start(), Platform::Desktop).unwrap();
        }
        engine.tick();
        receive(&mut engine, &mut client, 0);
        assert_eq!(client.high_res_count(), 30);

        let shout = "x".repeat(desktop::MAX_CHAT_LENGTH);
        for i in 1..=30 {
            let next = start().translate(1, 0, 0).unwrap();
            engine.players_mut().move_to(i, next).unwrap();
            let ext = engine.players_mut().avatar_mut(i).unwrap().ext_mut();
            ext.set_appearance(named(&format!("player_{:02}", i)));
            ext.set_say(shout.clone());
        }

        let mut heard = vec![(false, false); 31];
        for round in 0..10 {
            let report = engine.tick();
            assert_eq!(report.players.aborted, 0);
            if round == 0 {
                assert!(report.players.deferred > 0);
                assert!(report.players.carried > 0);
            }
            let update = receive(&mut engine, &mut client, 0);
            for (i, ext) in &update.ext {
                if ext.say.is_some() {
                    assert_eq!(ext.say.as_deref(), Some(shout.as_str()));
                    assert!(!heard[*i].0, "slot {} heard twice", i);
                    heard[*i].0 = true;
                }
                heard[*i].1 |= ext.appearance_name.is_some();
            }
            let info = engine.players().info(0).unwrap();
            for i in 1..=30 {
                assert_eq!(client.coord(i), info.known_coord(i), "slot {} after round {}", i, round);
            }
        }

        assert_eq!(engine.players().stats().carried, 0);
        for i in 1..=30 {
            assert_eq!(heard[i], (true, true), "slot {}", i);
            assert_eq!(client.coord(i), Some(start().translate(1, 0, 0).unwrap()));
        }
    }

    #[test]
    fn test_normal_priority_wins_add_limit() {
        let config = InfoConfig {
            player_add_limit: 2,
            ..config()
        };
        let mut engine = InfoEngine::new(&config).unwrap();
        let mut client = login(&mut engine, 0, start(), Platform::Desktop);
        for i in 1..=5 {
            engine.alloc_player(i, start(), Platform::Desktop).unwrap();
        }
        engine
            .players_mut()
            .avatar_mut(5)
            .unwrap()
            .set_priority(AvatarPriority::Normal);

        engine.tick();
        let update = receive(&mut engine, &mut client, 0);
        assert_eq!(update.seen, vec![Seen::Added(1), Seen::Added(5)]);
        assert_eq!(client.high_res_count(), 2);
    }

    #[test]
    fn test_normal_priority_add_survives_packet_ceiling() {
        let config = InfoConfig {
            max_packet_size: 2048,
            ..config()
        };
        let mut engine = InfoEngine::new(&config).unwrap();
        let mut client = login(&mut engine, 0, start(), Platform::Desktop);
        for i in 1..=30 {
            engine.alloc_player(i, start(), Platform::Desktop).unwrap();
            let name = format!("player_{:02}", i);
            engine.players_mut().avatar_mut(i).unwrap().ext_mut().set_appearance(named(&name));
        }
        engine
            .players_mut()
            .avatar_mut(30)
            .unwrap()
            .set_priority(AvatarPriority::Normal);

        let report = engine.tick();
        assert!(report.players.deferred > 0);
        assert_eq!(report.players.aborted, 0);
        let update = receive(&mut engine, &mut client, 0);
        assert_eq!(update.about(30), vec![Seen::Added(30)]);
        assert_eq!(update.ext_of(30).unwrap().appearance_name.as_deref(), Some("player_30"));
        assert!(client.high_res_count() < 30);
        assert!(update.about(29).is_empty());
    }

    #[test]
    fn test_npc_packet_ceiling_carries_per_tick_blocks() {
        let config = InfoConfig {
            max_packet_size: 2048,
            ..config()
        };
        let mut engine = InfoEngine::new(&config).unwrap();
        login(&mut engine, 0, start(), Platform::Desktop);
        let mut client = NpcInfoDecoder::default();
        for i in 0..30 {
            let spawn = start().translate(i as i32 % 10 - 5, i as i32 / 10 - 1, 0).unwrap();
            engine.spawn_npc(i, 50, spawn, 0).unwrap();
        }
        for _ in 0..2 {
            engine.tick();
            client.decode(&engine.take_npc_packet(0).unwrap(), start()).unwrap();
        }
        assert_eq!(client.len(), 30);

        let shout = "x".repeat(desktop::MAX_CHAT_LENGTH);
        for i in 0..30 {
            let next = engine.npcs().avatar(i).unwrap().coord().translate(0, 1, 0).unwrap();
            engine.npcs_mut().move_to(i, next).unwrap();
            engine.npcs_mut().avatar_mut(i).unwrap().ext_mut().set_say(shout.clone());
        }

        let mut heard = vec![false; 30];
        for round in 0..10 {
            let report = engine.tick();
            assert_eq!(report.npcs.aborted, 0);
            if round == 0 {
                assert!(report.npcs.deferred > 0);
                assert!(report.npcs.carried > 0);
            }
            let update = client.decode(&engine.take_npc_packet(0).unwrap(), start()).unwrap();
            for (i, ext) in &update.ext {
                if let Some(say) = &ext.say {
                    assert_eq!(say, &shout);
                    assert!(!heard[*i], "npc {} heard twice", i);
                    heard[*i] = true;
                }
            }
            let observer = engine.npcs().observer(0).unwrap();
            for i in 0..30 {
                assert_eq!(client.coord(i), observer.known_coord(i), "npc {} after round {}", i, round);
            }
        }

        for i in 0..30 {
            assert!(heard[i], "npc {}", i);
            assert_eq!(client.coord(i), Some(engine.npcs().avatar(i).unwrap().coord()));
        }
    }

    #[test]
    fn test_npc_normal_priority_wins_add_limit() {
        let config = InfoConfig {
            npc_add_limit: 2,
            ..config()
        };
        let mut engine = InfoEngine::new(&config).unwrap();
        login(&mut engine, 0, start(), Platform::Desktop);
        for i in 1..=4 {
            engine.spawn_npc(i, 50, start().translate(i as i32, 0, 0).unwrap(), 0).unwrap();
            engine
                .npcs_mut()
                .avatar_mut(i)
                .unwrap()
                .set_priority(AvatarPriority::Low);
        }
        engine.spawn_npc(9, 60, start().translate(0, 8, 0).unwrap(), 0).unwrap();

        engine.tick();
        let mut client = NpcInfoDecoder::default();
        let update = client.decode(&engine.take_npc_packet(0).unwrap(), start()).unwrap();
        let mut added: Vec<usize> = update.adds.iter().map(|add| add.index).collect();
        added.sort_unstable();
        assert_eq!(added, vec![1, 9]);
    }
}
