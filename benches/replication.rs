use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ecs_replica::{
    apply_update, write_update, ClientView, Encoder, Health, Mob, Physical, RingTransport,
    SnapshotFormat, SnapshotSerializer, Transport, World, WorldSnapshot,
};

const MESSAGE_LIMIT: usize = 1 << 20;

fn create_test_world(entity_count: usize) -> World {
    let mut world = World::new(entity_count + 1);

    for i in 0..entity_count {
        let id = world.create().unwrap();
        let physical = world.add::<Physical>(id).unwrap();
        physical.set_x(i as f32);
        physical.set_y((i * 2) as f32);
        physical.set_radius(10.0);
        world.add::<Health>(id).unwrap().set_health(100.0);
        if i % 3 == 0 {
            world.add::<Mob>(id).unwrap().set_rarity((i % 7) as u8);
        }
    }

    world.rebuild_dense_indices();
    world
}

fn benchmark_full_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_update");

    for entity_count in [100, 1000, 5000].iter() {
        let world = create_test_world(*entity_count);
        group.throughput(Throughput::Elements(*entity_count as u64));

        group.bench_with_input(
            BenchmarkId::new("write", entity_count),
            entity_count,
            |b, _| {
                let mut enc = Encoder::new(MESSAGE_LIMIT);
                b.iter(|| {
                    let mut view = ClientView::new(world.capacity());
                    enc.clear();
                    black_box(write_update(&world, &mut view, 0, &mut enc).unwrap());
                });
            },
        );

        let mut enc = Encoder::new(MESSAGE_LIMIT);
        let mut view = ClientView::new(world.capacity());
        write_update(&world, &mut view, 0, &mut enc).unwrap();
        let bytes = enc.finish();

        group.bench_with_input(
            BenchmarkId::new("apply", entity_count),
            &bytes,
            |b, bytes| {
                b.iter(|| {
                    let mut mirror = World::new(world.capacity());
                    black_box(apply_update(&mut mirror, None, bytes).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn benchmark_delta_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_update");

    for entity_count in [100, 1000, 5000].iter() {
        let mut world = create_test_world(*entity_count);
        let mut view = ClientView::new(world.capacity());
        let mut enc = Encoder::new(MESSAGE_LIMIT);
        write_update(&world, &mut view, 0, &mut enc).unwrap();
        let mut mirror = World::new(world.capacity());
        apply_update(&mut mirror, None, &enc.finish()).unwrap();
        world.clear_dirty();

        // move every tenth entity
        for id in world.entities().collect::<Vec<_>>().into_iter().step_by(10) {
            let physical = world.get_mut::<Physical>(id).unwrap();
            let x = physical.x();
            physical.set_x(x + 1.0);
        }

        enc.clear();
        write_update(&world, &mut view, 0, &mut enc).unwrap();
        let delta = enc.finish();
        group.throughput(Throughput::Bytes(delta.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("apply", entity_count),
            &delta,
            |b, delta| {
                b.iter(|| {
                    black_box(apply_update(&mut mirror, None, delta).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn benchmark_ring_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_throughput");

    for size in [64usize, 1024, 16 * 1024].iter() {
        let payload = vec![0xA5u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("send_receive", size), &payload, |b, payload| {
            let (mut tx, mut rx) = RingTransport::pair(1 << 20, 1 << 16);
            b.iter(|| {
                tx.send(black_box(payload)).unwrap();
                black_box(rx.receive().unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_snapshot_formats(c: &mut Criterion) {
    let snapshot = WorldSnapshot::capture(&create_test_world(500));

    let mut group = c.benchmark_group("snapshot_formats");

    for format in &[SnapshotFormat::Json, SnapshotFormat::MessagePack, SnapshotFormat::Bincode] {
        let format_name = match format {
            SnapshotFormat::Json => "JSON",
            SnapshotFormat::MessagePack => "MessagePack",
            SnapshotFormat::Bincode => "Bincode",
        };

        group.bench_with_input(
            BenchmarkId::new("serialize", format_name),
            format,
            |b, format| {
                let serializer = SnapshotSerializer::new(*format);
                b.iter(|| black_box(serializer.serialize(&snapshot).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_full_update,
    benchmark_delta_update,
    benchmark_ring_throughput,
    benchmark_snapshot_formats
);
criterion_main!(benches);
