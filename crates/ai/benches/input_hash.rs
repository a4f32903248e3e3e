use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use closet_ai::{JobKind, JsonObject, input_hash};
use serde_json::json;

/// Payload with `fields` top-level keys, each holding a small nested object.
fn payload(fields: usize) -> JsonObject {
    let mut map = JsonObject::new();
    for i in (0..fields).rev() {
        map.insert(
            format!("field_{i:04}"),
            json!({"value": i, "tags": ["a", "b", "c"], "note": "lorem ipsum"}),
        );
    }
    map
}

fn bench_input_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("input_hash");

    for fields in [4usize, 64, 512] {
        let input = payload(fields);
        group.throughput(Throughput::Elements(fields as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &input, |b, input| {
            b.iter(|| input_hash(black_box(JobKind::Normalize), black_box(input), "v1"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_input_hash);
criterion_main!(benches);
