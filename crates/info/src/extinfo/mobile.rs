//! Mobile client extended info
//!
//! Flag word extension markers are `0x40` and `0x4000`. Most fields carry one
//! of the `add` / `neg` / `sub` byte transforms or little-endian order, and
//! the block order is unrelated to the desktop one.

use super::blocks::*;
use super::{ExtInfoLayout, FlagWordFormat, Hits, NpcBlock, NpcEncoders, PlayerBlock, PlayerEncoders};
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tilesync_core::{Platform, Result, SyncError};
use tilesync_protocol::{
    write_p1, write_p1_add, write_p1_neg, write_p1_sub, write_p2_add, write_p2_le, write_p4_le,
    write_pjstr, write_smart,
};

pub static PLAYER_LAYOUT: ExtInfoLayout<PlayerBlock> = ExtInfoLayout {
    platform: Platform::Mobile,
    format: FlagWordFormat {
        extend_short: 0x40,
        extend_medium: Some(0x4000),
    },
    order: &[
        (PlayerBlock::Appearance, 0x1),
        (PlayerBlock::Sequence, 0x8),
        (PlayerBlock::FaceAngle, 0x10),
        (PlayerBlock::FacePathingEntity, 0x20),
        (PlayerBlock::Chat, 0x2),
        (PlayerBlock::Say, 0x80),
        (PlayerBlock::Hits, 0x4),
        (PlayerBlock::SpotAnims, 0x400),
        (PlayerBlock::ExactMove, 0x200),
        (PlayerBlock::MoveSpeed, 0x100),
        (PlayerBlock::TemporaryMoveSpeed, 0x800),
        (PlayerBlock::Tinting, 0x1000),
    ],
};

pub static NPC_LAYOUT: ExtInfoLayout<NpcBlock> = ExtInfoLayout {
    platform: Platform::Mobile,
    format: FlagWordFormat {
        extend_short: 0x40,
        extend_medium: None,
    },
    order: &[
        (NpcBlock::Sequence, 0x4),
        (NpcBlock::Hits, 0x8),
        (NpcBlock::Say, 0x2),
        (NpcBlock::FacePathingEntity, 0x80),
        (NpcBlock::FaceCoord, 0x1),
        (NpcBlock::SpotAnims, 0x10),
        (NpcBlock::Transformation, 0x20),
        (NpcBlock::ExactMove, 0x100),
        (NpcBlock::Tinting, 0x200),
        (NpcBlock::CombatLevelChange, 0x400),
        (NpcBlock::NameChange, 0x800),
    ],
};

pub fn player_encoders() -> PlayerEncoders {
    PlayerEncoders {
        layout: &PLAYER_LAYOUT,
        appearance: Arc::new(appearance),
        sequence: Arc::new(sequence),
        face_pathing_entity: Arc::new(face_pathing_entity),
        face_angle: Arc::new(face_angle),
        say: Arc::new(say),
        chat: Arc::new(chat),
        hits: Arc::new(hits),
        spot_anims: Arc::new(spot_anims),
        exact_move: Arc::new(exact_move),
        move_speed: Arc::new(move_speed),
        temporary_move_speed: Arc::new(temporary_move_speed),
        tinting: Arc::new(tinting),
    }
}

pub fn npc_encoders() -> NpcEncoders {
    NpcEncoders {
        layout: &NPC_LAYOUT,
        sequence: Arc::new(sequence),
        face_pathing_entity: Arc::new(face_pathing_entity),
        face_coord: Arc::new(face_coord),
        say: Arc::new(say),
        hits: Arc::new(hits),
        spot_anims: Arc::new(spot_anims),
        exact_move: Arc::new(exact_move),
        transformation: Arc::new(transformation),
        combat_level_change: Arc::new(combat_level_change),
        name_change: Arc::new(name_change),
        tinting: Arc::new(tinting),
    }
}

pub fn appearance(value: &Appearance, out: &mut BytesMut) -> Result<()> {
    let mut body = BytesMut::with_capacity(96);
    write_p1_add(&mut body, value.gender as i32);
    write_p1(&mut body, value.overhead_icon as i32);
    write_p1(&mut body, value.skull_icon as i32);
    match value.transform {
        Some(id) => {
            write_p2_le(&mut body, 0xFFFF);
            write_p2_le(&mut body, id as i32);
        }
        None => {
            for slot in value.equipment {
                write_p2_le(&mut body, slot as i32);
            }
        }
    }
    for colour in value.colours.iter().rev() {
        write_p1(&mut body, *colour as i32);
    }
    for anim in value.base_anims {
        write_p2_le(&mut body, anim as i32);
    }
    write_pjstr(&mut body, &value.name)?;
    write_p1_neg(&mut body, value.combat_level as i32);
    write_p2_le(&mut body, value.skill_level as i32);
    write_p1_add(&mut body, value.hidden as i32);

    if body.len() > u8::MAX as usize {
        return Err(SyncError::ExtendedInfo(format!(
            "appearance of {} bytes exceeds 255",
            body.len()
        )));
    }
    write_p1_neg(out, body.len() as i32);
    out.put_slice(&body);
    Ok(())
}

pub fn sequence(value: &Sequence, out: &mut BytesMut) -> Result<()> {
    write_p2_le(out, value.id as i32);
    write_p1_sub(out, value.delay as i32);
    Ok(())
}

pub fn face_pathing_entity(value: &FacePathingEntity, out: &mut BytesMut) -> Result<()> {
    write_p2_le(out, (value.0 & 0xFFFF) as i32);
    write_p1_add(out, (value.0 >> 16) as i32);
    Ok(())
}

pub fn face_angle(value: &FaceAngle, out: &mut BytesMut) -> Result<()> {
    write_p2_add(out, value.0 as i32);
    Ok(())
}

pub fn say(value: &Say, out: &mut BytesMut) -> Result<()> {
    write_pjstr(out, &value.0)
}

pub fn chat(value: &Chat, out: &mut BytesMut) -> Result<()> {
    let text = value.text.as_bytes();
    if text.len() > u8::MAX as usize {
        return Err(SyncError::ExtendedInfo(format!("chat of {} bytes exceeds 255", text.len())));
    }
    write_p2_le(out, ((value.colour as i32) << 8) | value.effects as i32);
    write_p1_add(out, value.mod_icon as i32);
    write_p1(out, value.auto_typed as i32);
    write_p1_neg(out, text.len() as i32);
    out.put_slice(text);
    Ok(())
}

pub fn hits(out: &mut BytesMut, observer: usize, owner: usize, value: &Hits) -> Result<()> {
    write_p1_add(out, value.marks.len().min(MAX_HIT_ENTRIES) as i32);
    for mark in value.marks.iter().take(MAX_HIT_ENTRIES) {
        write_smart(out, Hits::mark_type(mark, observer, owner) as u32)?;
        write_smart(out, mark.value as u32)?;
        write_smart(out, mark.delay as u32)?;
    }
    write_p1_sub(out, value.bars.len().min(MAX_HIT_ENTRIES) as i32);
    for bar in value.bars.iter().take(MAX_HIT_ENTRIES) {
        write_smart(out, bar.id as u32)?;
        write_smart(out, bar.start_time as u32)?;
        write_smart(out, bar.end_time as u32)?;
        write_p1_neg(out, bar.start_fill as i32);
        write_p1_add(out, bar.end_fill as i32);
    }
    Ok(())
}

pub fn spot_anims(value: &SpotAnims, out: &mut BytesMut) -> Result<()> {
    if value.0.len() > u8::MAX as usize {
        return Err(SyncError::ExtendedInfo("more than 255 spot anims".into()));
    }
    write_p1_sub(out, value.0.len() as i32);
    for anim in &value.0 {
        write_p1(out, anim.slot as i32);
        write_p2_le(out, anim.id as i32);
        write_p4_le(out, ((anim.height as i32) << 16) | anim.delay as i32);
    }
    Ok(())
}

pub fn exact_move(value: &ExactMove, out: &mut BytesMut) -> Result<()> {
    write_p1_add(out, value.delta_x1 as i32);
    write_p1_neg(out, value.delta_z1 as i32);
    write_p1_sub(out, value.delta_x2 as i32);
    write_p1(out, value.delta_z2 as i32);
    write_p2_le(out, value.delay1 as i32);
    write_p2_add(out, value.delay2 as i32);
    write_p2_le(out, value.direction as i32);
    Ok(())
}

pub fn move_speed(value: &MoveSpeed, out: &mut BytesMut) -> Result<()> {
    write_p1_sub(out, value.0 as i32);
    Ok(())
}

pub fn temporary_move_speed(value: &TemporaryMoveSpeed, out: &mut BytesMut) -> Result<()> {
    write_p1_neg(out, value.0 as i32);
    Ok(())
}

pub fn tinting(out: &mut BytesMut, observer: usize, _owner: usize, value: &Tinting) -> Result<()> {
    let tint = value.for_observer(observer).copied().unwrap_or_default();
    write_p2_le(out, tint.start as i32);
    write_p2_add(out, tint.end as i32);
    write_p1_add(out, tint.hue as i32);
    write_p1_neg(out, tint.saturation as i32);
    write_p1_sub(out, tint.luminance as i32);
    write_p1(out, tint.opacity as i32);
    Ok(())
}

pub fn face_coord(value: &FaceCoord, out: &mut BytesMut) -> Result<()> {
    write_p2_le(out, value.x as i32 * 2 + 1);
    write_p2_add(out, value.z as i32 * 2 + 1);
    write_p1_neg(out, value.instant as i32);
    Ok(())
}

pub fn transformation(value: &Transformation, out: &mut BytesMut) -> Result<()> {
    write_p2_le(out, value.0 as i32);
    Ok(())
}

pub fn combat_level_change(value: &CombatLevelChange, out: &mut BytesMut) -> Result<()> {
    write_p4_le(out, value.0);
    Ok(())
}

pub fn name_change(value: &NameChange, out: &mut BytesMut) -> Result<()> {
    write_pjstr(out, &value.0)
}
