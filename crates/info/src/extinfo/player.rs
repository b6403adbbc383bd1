//! Player extended info

use super::blocks::*;
use super::{
    BlockKind, Cached, ExtInfoLayout, ExtendedInfoBlock, OnDemand, OnDemandEncoder,
    PrecomputedEncoder,
};
use bytes::BytesMut;
use std::sync::Arc;
use tilesync_core::{Platform, Result};
use tilesync_protocol::BufferRecycler;

/// Player extended info blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlayerBlock {
    Appearance = 0,
    Sequence = 1,
    FacePathingEntity = 2,
    FaceAngle = 3,
    Say = 4,
    Chat = 5,
    Hits = 6,
    SpotAnims = 7,
    ExactMove = 8,
    MoveSpeed = 9,
    TemporaryMoveSpeed = 10,
    Tinting = 11,
}

impl PlayerBlock {
    pub const ALL: [PlayerBlock; 12] = [
        PlayerBlock::Appearance,
        PlayerBlock::Sequence,
        PlayerBlock::FacePathingEntity,
        PlayerBlock::FaceAngle,
        PlayerBlock::Say,
        PlayerBlock::Chat,
        PlayerBlock::Hits,
        PlayerBlock::SpotAnims,
        PlayerBlock::ExactMove,
        PlayerBlock::MoveSpeed,
        PlayerBlock::TemporaryMoveSpeed,
        PlayerBlock::Tinting,
    ];

    /// Blocks kept across ticks and resent to new observers
    pub const PERSISTENT: u32 = (1 << PlayerBlock::Appearance as u32)
        | (1 << PlayerBlock::FacePathingEntity as u32)
        | (1 << PlayerBlock::MoveSpeed as u32);

    pub const fn bit(self) -> u32 {
        1 << self as u32
    }
}

impl BlockKind for PlayerBlock {
    fn mask(self) -> u32 {
        self.bit()
    }
}

/// One platform's layout and encoders for player blocks
#[derive(Clone)]
pub struct PlayerEncoders {
    pub layout: &'static ExtInfoLayout<PlayerBlock>,
    pub appearance: Arc<dyn PrecomputedEncoder<Appearance>>,
    pub sequence: Arc<dyn PrecomputedEncoder<Sequence>>,
    pub face_pathing_entity: Arc<dyn PrecomputedEncoder<FacePathingEntity>>,
    pub face_angle: Arc<dyn PrecomputedEncoder<FaceAngle>>,
    pub say: Arc<dyn PrecomputedEncoder<Say>>,
    pub chat: Arc<dyn PrecomputedEncoder<Chat>>,
    pub hits: Arc<dyn OnDemandEncoder<Hits>>,
    pub spot_anims: Arc<dyn PrecomputedEncoder<SpotAnims>>,
    pub exact_move: Arc<dyn PrecomputedEncoder<ExactMove>>,
    pub move_speed: Arc<dyn PrecomputedEncoder<MoveSpeed>>,
    pub temporary_move_speed: Arc<dyn PrecomputedEncoder<TemporaryMoveSpeed>>,
    pub tinting: Arc<dyn OnDemandEncoder<Tinting>>,
}

impl PlayerEncoders {
    #[inline]
    pub fn platform(&self) -> Platform {
        self.layout.platform
    }
}

/// Extended info of one player avatar
///
/// Setters raise the block's bit in the flag word. The precompute phase
/// encodes every flagged or persistent block once per active platform; the
/// observer phase then only copies bytes, except for on-demand blocks.
#[derive(Debug)]
pub struct PlayerExtendedInfo {
    flags: u32,
    appearance: Cached<Appearance>,
    sequence: Cached<Sequence>,
    face_pathing_entity: Cached<FacePathingEntity>,
    face_angle: Cached<FaceAngle>,
    say: Cached<Say>,
    chat: Cached<Chat>,
    hits: OnDemand<Hits>,
    spot_anims: Cached<SpotAnims>,
    exact_move: Cached<ExactMove>,
    move_speed: Cached<MoveSpeed>,
    temporary_move_speed: Cached<TemporaryMoveSpeed>,
    tinting: OnDemand<Tinting>,
    recycler: Arc<BufferRecycler>,
}

impl PlayerExtendedInfo {
    pub fn new(recycler: Arc<BufferRecycler>) -> Self {
        Self {
            flags: 0,
            appearance: Cached::new(),
            sequence: Cached::new(),
            face_pathing_entity: Cached::new(),
            face_angle: Cached::new(),
            say: Cached::new(),
            chat: Cached::new(),
            hits: OnDemand::new(),
            spot_anims: Cached::new(),
            exact_move: Cached::new(),
            move_speed: Cached::new(),
            temporary_move_speed: Cached::new(),
            tinting: OnDemand::new(),
            recycler,
        }
    }

    /// Blocks changed this tick
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn is_flagged(&self, block: PlayerBlock) -> bool {
        self.flags & block.bit() != 0
    }

    pub fn set_appearance(&mut self, appearance: Appearance) {
        self.appearance.set(appearance, &self.recycler);
        self.flags |= PlayerBlock::Appearance.bit();
    }

    #[inline]
    pub fn appearance(&self) -> &Appearance {
        self.appearance.value()
    }

    pub fn set_sequence(&mut self, id: u16, delay: u8) {
        self.sequence.set(Sequence { id, delay }, &self.recycler);
        self.flags |= PlayerBlock::Sequence.bit();
    }

    pub fn set_face_pathing_entity(&mut self, target: FacePathingEntity) {
        self.face_pathing_entity.set(target, &self.recycler);
        self.flags |= PlayerBlock::FacePathingEntity.bit();
    }

    pub fn set_face_angle(&mut self, angle: u16) {
        self.face_angle.set(FaceAngle(angle), &self.recycler);
        self.flags |= PlayerBlock::FaceAngle.bit();
    }

    pub fn set_say(&mut self, text: impl Into<String>) {
        self.say.set(Say(text.into()), &self.recycler);
        self.flags |= PlayerBlock::Say.bit();
    }

    pub fn set_chat(&mut self, chat: Chat) {
        self.chat.set(chat, &self.recycler);
        self.flags |= PlayerBlock::Chat.bit();
    }

    /// Queue a hit splat; extras beyond the block limit are dropped
    pub fn add_hit(&mut self, mark: HitMark) {
        let hits = self.hits.value_mut();
        if hits.marks.len() < MAX_HIT_ENTRIES {
            hits.marks.push(mark);
            self.flags |= PlayerBlock::Hits.bit();
        }
    }

    pub fn add_head_bar(&mut self, bar: HeadBar) {
        let hits = self.hits.value_mut();
        if hits.bars.len() < MAX_HIT_ENTRIES {
            hits.bars.push(bar);
            self.flags |= PlayerBlock::Hits.bit();
        }
    }

    pub fn set_spot_anim(&mut self, anim: SpotAnim) {
        let mut anims = self.spot_anims.value().clone();
        anims.put(anim);
        self.spot_anims.set(anims, &self.recycler);
        self.flags |= PlayerBlock::SpotAnims.bit();
    }

    pub fn set_exact_move(&mut self, exact: ExactMove) {
        self.exact_move.set(exact, &self.recycler);
        self.flags |= PlayerBlock::ExactMove.bit();
    }

    pub fn set_move_speed(&mut self, speed: i8) {
        self.move_speed.set(MoveSpeed(speed), &self.recycler);
        self.flags |= PlayerBlock::MoveSpeed.bit();
    }

    pub fn set_temporary_move_speed(&mut self, speed: i8) {
        self.temporary_move_speed.set(TemporaryMoveSpeed(speed), &self.recycler);
        self.flags |= PlayerBlock::TemporaryMoveSpeed.bit();
    }

    /// Tint seen by every observer without an override
    pub fn set_tint(&mut self, tint: Tint) {
        self.tinting.value_mut().global = Some(tint);
        self.flags |= PlayerBlock::Tinting.bit();
    }

    /// Tint seen by `observer` only
    pub fn set_observer_tint(&mut self, observer: usize, tint: Tint) {
        self.tinting.value_mut().observers.insert(observer, tint);
        self.flags |= PlayerBlock::Tinting.bit();
    }

    /// Persistent blocks holding a non-default value
    pub fn persistent_flags(&self) -> u32 {
        let mut flags = 0;
        if !self.appearance.is_default() {
            flags |= PlayerBlock::Appearance.bit();
        }
        if !self.face_pathing_entity.is_default() {
            flags |= PlayerBlock::FacePathingEntity.bit();
        }
        if !self.move_speed.is_default() {
            flags |= PlayerBlock::MoveSpeed.bit();
        }
        flags
    }

    /// This tick's flags as seen by `observer`
    ///
    /// On-demand blocks with nothing for the observer are dropped.
    pub fn flags_for(&self, observer: usize) -> u32 {
        let mut flags = self.flags;
        if flags & PlayerBlock::Tinting.bit() != 0
            && self.tinting.value().for_observer(observer).is_none()
        {
            flags &= !PlayerBlock::Tinting.bit();
        }
        flags
    }

    /// Encode every flagged or persistent non-default block for one platform
    ///
    /// # Errors
    /// The first encoder failure; blocks encoded before it stay cached
    pub fn precompute(&mut self, encoders: &PlayerEncoders) -> Result<()> {
        let platform = encoders.platform();
        let wanted = self.flags | self.persistent_flags();
        let recycler = &*self.recycler;
        macro_rules! precompute {
            ($($block:ident => $field:ident),* $(,)?) => {
                $(
                    if wanted & PlayerBlock::$block.bit() != 0 {
                        self.$field.precompute(platform, &*encoders.$field, recycler)?;
                    }
                )*
            };
        }
        precompute!(
            Appearance => appearance,
            Sequence => sequence,
            FacePathingEntity => face_pathing_entity,
            FaceAngle => face_angle,
            Say => say,
            Chat => chat,
            SpotAnims => spot_anims,
            ExactMove => exact_move,
            MoveSpeed => move_speed,
            TemporaryMoveSpeed => temporary_move_speed,
        );
        Ok(())
    }

    /// Write the flag word and blocks in `flags` for `observer`
    ///
    /// # Errors
    /// `ExtendedInfo` if a cached block was not precomputed for the platform,
    /// or any on-demand encoder failure. `out` may hold a partial write.
    pub fn write(
        &self,
        out: &mut BytesMut,
        encoders: &PlayerEncoders,
        observer: usize,
        owner: usize,
        flags: u32,
    ) -> Result<()> {
        let platform = encoders.platform();
        encoders.layout.write_blocks(flags, out, |block, out| match block {
            PlayerBlock::Appearance => self.appearance.write(platform, out),
            PlayerBlock::Sequence => self.sequence.write(platform, out),
            PlayerBlock::FacePathingEntity => self.face_pathing_entity.write(platform, out),
            PlayerBlock::FaceAngle => self.face_angle.write(platform, out),
            PlayerBlock::Say => self.say.write(platform, out),
            PlayerBlock::Chat => self.chat.write(platform, out),
            PlayerBlock::Hits => self.hits.write(out, &*encoders.hits, observer, owner),
            PlayerBlock::SpotAnims => self.spot_anims.write(platform, out),
            PlayerBlock::ExactMove => self.exact_move.write(platform, out),
            PlayerBlock::MoveSpeed => self.move_speed.write(platform, out),
            PlayerBlock::TemporaryMoveSpeed => self.temporary_move_speed.write(platform, out),
            PlayerBlock::Tinting => self.tinting.write(out, &*encoders.tinting, observer, owner),
        })
    }

    /// End of tick: clear transient blocks and the flag word
    ///
    /// Persistent blocks keep their value and encoded buffers.
    pub fn post_update(&mut self) {
        if self.flags == 0 {
            return;
        }
        let recycler = &*self.recycler;
        self.sequence.clear(recycler);
        self.face_angle.clear(recycler);
        self.say.clear(recycler);
        self.chat.clear(recycler);
        self.hits.clear(recycler);
        self.spot_anims.clear(recycler);
        self.exact_move.clear(recycler);
        self.temporary_move_speed.clear(recycler);
        self.tinting.clear(recycler);
        self.flags = 0;
    }

    /// Clear every block, persistent ones included
    pub fn reset(&mut self) {
        self.post_update();
        let recycler = &*self.recycler;
        self.appearance.clear(recycler);
        self.face_pathing_entity.clear(recycler);
        self.move_speed.clear(recycler);
        self.flags = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extinfo::desktop;

    fn info() -> PlayerExtendedInfo {
        PlayerExtendedInfo::new(Arc::new(BufferRecycler::default()))
    }

    #[test]
    fn test_setters_raise_flags() {
        let mut ext = info();
        assert_eq!(ext.flags(), 0);
        ext.set_sequence(808, 0);
        ext.set_say("hello");
        assert!(ext.is_flagged(PlayerBlock::Sequence));
        assert!(ext.is_flagged(PlayerBlock::Say));
        assert!(!ext.is_flagged(PlayerBlock::Chat));
    }

    #[test]
    fn test_post_update_keeps_persistent() {
        let mut ext = info();
        let encoders = desktop::player_encoders();
        ext.set_appearance(Appearance {
            name: "Zezima".into(),
            ..Default::default()
        });
        ext.set_sequence(1, 0);
        ext.precompute(&encoders).unwrap();

        ext.post_update();
        assert_eq!(ext.flags(), 0);
        assert_eq!(ext.persistent_flags(), PlayerBlock::Appearance.bit());
        assert_eq!(ext.appearance().name, "Zezima");

        let mut out = BytesMut::new();
        ext.write(&mut out, &encoders, 1, 0, PlayerBlock::Appearance.bit()).unwrap();
        assert!(!out.is_empty());
        assert!(ext.write(&mut out, &encoders, 1, 0, PlayerBlock::Sequence.bit()).is_err());
    }

    #[test]
    fn test_flags_for_drops_empty_tint() {
        let mut ext = info();
        ext.set_observer_tint(3, Tint::default());
        assert_ne!(ext.flags_for(3) & PlayerBlock::Tinting.bit(), 0);
        assert_eq!(ext.flags_for(4) & PlayerBlock::Tinting.bit(), 0);
    }

    #[test]
    fn test_reset_clears_persistent() {
        let mut ext = info();
        ext.set_move_speed(2);
        ext.reset();
        assert_eq!(ext.persistent_flags(), 0);
        assert_eq!(ext.flags(), 0);
    }

    #[test]
    fn test_hit_limit() {
        let mut ext = info();
        let mark = HitMark {
            source: None,
            self_type: 0,
            other_type: 0,
            value: 1,
            delay: 0,
        };
        for _ in 0..300 {
            ext.add_hit(mark);
        }
        let encoders = desktop::player_encoders();
        let mut out = BytesMut::new();
        ext.write(&mut out, &encoders, 0, 0, PlayerBlock::Hits.bit()).unwrap();
        // flag word, then the mark count
        assert_eq!(out[1], MAX_HIT_ENTRIES as u8);
    }
}
