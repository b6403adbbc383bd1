//! NPC extended info

use super::blocks::*;
use super::{
    BlockKind, Cached, ExtInfoLayout, ExtendedInfoBlock, OnDemand, OnDemandEncoder,
    PrecomputedEncoder,
};
use bytes::BytesMut;
use std::sync::Arc;
use tilesync_core::{Platform, Result};
use tilesync_protocol::BufferRecycler;

/// NPC extended info blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NpcBlock {
    Sequence = 0,
    FacePathingEntity = 1,
    FaceCoord = 2,
    Say = 3,
    Hits = 4,
    SpotAnims = 5,
    ExactMove = 6,
    Transformation = 7,
    CombatLevelChange = 8,
    NameChange = 9,
    Tinting = 10,
}

impl NpcBlock {
    /// Blocks kept across ticks and resent to new observers
    pub const PERSISTENT: u32 = (1 << NpcBlock::FacePathingEntity as u32)
        | (1 << NpcBlock::Transformation as u32)
        | (1 << NpcBlock::CombatLevelChange as u32)
        | (1 << NpcBlock::NameChange as u32);

    pub const fn bit(self) -> u32 {
        1 << self as u32
    }
}

impl BlockKind for NpcBlock {
    fn mask(self) -> u32 {
        self.bit()
    }
}

/// One platform's layout and encoders for NPC blocks
#[derive(Clone)]
pub struct NpcEncoders {
    pub layout: &'static ExtInfoLayout<NpcBlock>,
    pub sequence: Arc<dyn PrecomputedEncoder<Sequence>>,
    pub face_pathing_entity: Arc<dyn PrecomputedEncoder<FacePathingEntity>>,
    pub face_coord: Arc<dyn PrecomputedEncoder<FaceCoord>>,
    pub say: Arc<dyn PrecomputedEncoder<Say>>,
    pub hits: Arc<dyn OnDemandEncoder<Hits>>,
    pub spot_anims: Arc<dyn PrecomputedEncoder<SpotAnims>>,
    pub exact_move: Arc<dyn PrecomputedEncoder<ExactMove>>,
    pub transformation: Arc<dyn PrecomputedEncoder<Transformation>>,
    pub combat_level_change: Arc<dyn PrecomputedEncoder<CombatLevelChange>>,
    pub name_change: Arc<dyn PrecomputedEncoder<NameChange>>,
    pub tinting: Arc<dyn OnDemandEncoder<Tinting>>,
}

impl NpcEncoders {
    #[inline]
    pub fn platform(&self) -> Platform {
        self.layout.platform
    }
}

/// Extended info of one NPC avatar
#[derive(Debug)]
pub struct NpcExtendedInfo {
    flags: u32,
    sequence: Cached<Sequence>,
    face_pathing_entity: Cached<FacePathingEntity>,
    face_coord: Cached<FaceCoord>,
    say: Cached<Say>,
    hits: OnDemand<Hits>,
    spot_anims: Cached<SpotAnims>,
    exact_move: Cached<ExactMove>,
    transformation: Cached<Transformation>,
    combat_level_change: Cached<CombatLevelChange>,
    name_change: Cached<NameChange>,
    tinting: OnDemand<Tinting>,
    recycler: Arc<BufferRecycler>,
}

impl NpcExtendedInfo {
    pub fn new(recycler: Arc<BufferRecycler>) -> Self {
        Self {
            flags: 0,
            sequence: Cached::new(),
            face_pathing_entity: Cached::new(),
            face_coord: Cached::new(),
            say: Cached::new(),
            hits: OnDemand::new(),
            spot_anims: Cached::new(),
            exact_move: Cached::new(),
            transformation: Cached::new(),
            combat_level_change: Cached::new(),
            name_change: Cached::new(),
            tinting: OnDemand::new(),
            recycler,
        }
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn is_flagged(&self, block: NpcBlock) -> bool {
        self.flags & block.bit() != 0
    }

    pub fn set_sequence(&mut self, id: u16, delay: u8) {
        self.sequence.set(Sequence { id, delay }, &self.recycler);
        self.flags |= NpcBlock::Sequence.bit();
    }

    pub fn set_face_pathing_entity(&mut self, target: FacePathingEntity) {
        self.face_pathing_entity.set(target, &self.recycler);
        self.flags |= NpcBlock::FacePathingEntity.bit();
    }

    pub fn set_face_coord(&mut self, x: u16, z: u16, instant: bool) {
        self.face_coord.set(FaceCoord { x, z, instant }, &self.recycler);
        self.flags |= NpcBlock::FaceCoord.bit();
    }

    pub fn set_say(&mut self, text: impl Into<String>) {
        self.say.set(Say(text.into()), &self.recycler);
        self.flags |= NpcBlock::Say.bit();
    }

    pub fn add_hit(&mut self, mark: HitMark) {
        let hits = self.hits.value_mut();
        if hits.marks.len() < MAX_HIT_ENTRIES {
            hits.marks.push(mark);
            self.flags |= NpcBlock::Hits.bit();
        }
    }

    pub fn add_head_bar(&mut self, bar: HeadBar) {
        let hits = self.hits.value_mut();
        if hits.bars.len() < MAX_HIT_ENTRIES {
            hits.bars.push(bar);
            self.flags |= NpcBlock::Hits.bit();
        }
    }

    pub fn set_spot_anim(&mut self, anim: SpotAnim) {
        let mut anims = self.spot_anims.value().clone();
        anims.put(anim);
        self.spot_anims.set(anims, &self.recycler);
        self.flags |= NpcBlock::SpotAnims.bit();
    }

    pub fn set_exact_move(&mut self, exact: ExactMove) {
        self.exact_move.set(exact, &self.recycler);
        self.flags |= NpcBlock::ExactMove.bit();
    }

    /// Show the NPC as type `id`; [`Transformation::NONE`] reverts
    pub fn set_transformation(&mut self, id: u16) {
        self.transformation.set(Transformation(id), &self.recycler);
        self.flags |= NpcBlock::Transformation.bit();
    }

    #[inline]
    pub fn transformation(&self) -> u16 {
        self.transformation.value().0
    }

    pub fn set_combat_level(&mut self, level: i32) {
        self.combat_level_change.set(CombatLevelChange(level), &self.recycler);
        self.flags |= NpcBlock::CombatLevelChange.bit();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name_change.set(NameChange(name.into()), &self.recycler);
        self.flags |= NpcBlock::NameChange.bit();
    }

    pub fn set_tint(&mut self, tint: Tint) {
        self.tinting.value_mut().global = Some(tint);
        self.flags |= NpcBlock::Tinting.bit();
    }

    pub fn set_observer_tint(&mut self, observer: usize, tint: Tint) {
        self.tinting.value_mut().observers.insert(observer, tint);
        self.flags |= NpcBlock::Tinting.bit();
    }

    /// Persistent blocks holding a non-default value
    pub fn persistent_flags(&self) -> u32 {
        let mut flags = 0;
        if !self.face_pathing_entity.is_default() {
            flags |= NpcBlock::FacePathingEntity.bit();
        }
        if !self.transformation.is_default() {
            flags |= NpcBlock::Transformation.bit();
        }
        if !self.combat_level_change.is_default() {
            flags |= NpcBlock::CombatLevelChange.bit();
        }
        if !self.name_change.is_default() {
            flags |= NpcBlock::NameChange.bit();
        }
        flags
    }

    pub fn flags_for(&self, observer: usize) -> u32 {
        let mut flags = self.flags;
        if flags & NpcBlock::Tinting.bit() != 0
            && self.tinting.value().for_observer(observer).is_none()
        {
            flags &= !NpcBlock::Tinting.bit();
        }
        flags
    }

    pub fn precompute(&mut self, encoders: &NpcEncoders) -> Result<()> {
        let platform = encoders.platform();
        let wanted = self.flags | self.persistent_flags();
        let recycler = &*self.recycler;
        macro_rules! precompute {
            ($($block:ident => $field:ident),* $(,)?) => {
                $(
                    if wanted & NpcBlock::$block.bit() != 0 {
                        self.$field.precompute(platform, &*encoders.$field, recycler)?;
                    }
                )*
            };
        }
        precompute!(
            Sequence => sequence,
            FacePathingEntity => face_pathing_entity,
            FaceCoord => face_coord,
            Say => say,
            SpotAnims => spot_anims,
            ExactMove => exact_move,
            Transformation => transformation,
            CombatLevelChange => combat_level_change,
            NameChange => name_change,
        );
        Ok(())
    }

    pub fn write(
        &self,
        out: &mut BytesMut,
        encoders: &NpcEncoders,
        observer: usize,
        owner: usize,
        flags: u32,
    ) -> Result<()> {
        let platform = encoders.platform();
        encoders.layout.write_blocks(flags, out, |block, out| match block {
            NpcBlock::Sequence => self.sequence.write(platform, out),
            NpcBlock::FacePathingEntity => self.face_pathing_entity.write(platform, out),
            NpcBlock::FaceCoord => self.face_coord.write(platform, out),
            NpcBlock::Say => self.say.write(platform, out),
            NpcBlock::Hits => self.hits.write(out, &*encoders.hits, observer, owner),
            NpcBlock::SpotAnims => self.spot_anims.write(platform, out),
            NpcBlock::ExactMove => self.exact_move.write(platform, out),
            NpcBlock::Transformation => self.transformation.write(platform, out),
            NpcBlock::CombatLevelChange => self.combat_level_change.write(platform, out),
            NpcBlock::NameChange => self.name_change.write(platform, out),
            NpcBlock::Tinting => self.tinting.write(out, &*encoders.tinting, observer, owner),
        })
    }

    pub fn post_update(&mut self) {
        if self.flags == 0 {
            return;
        }
        let recycler = &*self.recycler;
        self.sequence.clear(recycler);
        self.face_coord.clear(recycler);
        self.say.clear(recycler);
        self.hits.clear(recycler);
        self.spot_anims.clear(recycler);
        self.exact_move.clear(recycler);
        self.tinting.clear(recycler);
        self.flags = 0;
    }

    pub fn reset(&mut self) {
        self.post_update();
        let recycler = &*self.recycler;
        self.face_pathing_entity.clear(recycler);
        self.transformation.clear(recycler);
        self.combat_level_change.clear(recycler);
        self.name_change.clear(recycler);
        self.flags = 0;
    }
}
