//! # Player info tick benchmark
//!
//! A crowd of players random-walking inside one build area, so every
//! observer tracks close to its high-resolution cap.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tilesync_config::InfoConfig;
use tilesync_core::{CoordGrid, Platform};
use tilesync_info::InfoEngine;

fn populated(players: usize, rng: &mut StdRng) -> InfoEngine {
    let config = InfoConfig {
        player_capacity: 2048,
        npc_capacity: 1,
        world_entity_capacity: 1,
        ..InfoConfig::default()
    };
    let mut engine = InfoEngine::new(&config).expect("engine");
    for i in 0..players {
        let coord = CoordGrid::new(0, 3200 + rng.gen_range(0..32), 3200 + rng.gen_range(0..32));
        let platform = if i % 4 == 0 { Platform::Mobile } else { Platform::Desktop };
        engine.alloc_player(i, coord, platform).expect("login");
    }
    engine.tick();
    engine
}

fn walk(engine: &mut InfoEngine, players: usize, rng: &mut StdRng) {
    for i in 0..players {
        let Some(coord) = engine.players().avatar(i).map(|a| a.coord()) else {
            continue;
        };
        let step = coord.translate(rng.gen_range(-1..=1), rng.gen_range(-1..=1), 0);
        if let Ok(next) = step {
            let _ = engine.players_mut().move_to(i, next);
        }
        if rng.gen_bool(0.05) {
            if let Some(avatar) = engine.players_mut().avatar_mut(i) {
                avatar.ext_mut().set_say("hello");
            }
        }
    }
}

fn bench_player_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("player_info_tick");
    group.sample_size(20);

    for players in [100, 500, 2000] {
        let mut rng = StdRng::seed_from_u64(7);
        let mut engine = populated(players, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, &players| {
            b.iter(|| {
                walk(&mut engine, players, &mut rng);
                let report = engine.tick();
                for i in 0..players {
                    engine.take_player_packet(i);
                    engine.take_npc_packet(i);
                    engine.take_world_entity_packet(i);
                }
                report
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_player_tick);
criterion_main!(benches);
