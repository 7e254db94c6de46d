use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use swap_harvest::logic::{DecodedEvent, TrackedSlot, WindowConfig, events_since};
use swap_harvest::{WindowSummary, decode_swap_volume};

fn swap_payloads(count: u64) -> Vec<(u64, String)> {
    (0..count)
        .map(|i| {
            let amount = 1_000_000_000_000_000_000u128 * (i as u128 % 97 + 1);
            (i * 3, format!("0x{:064x}{:064x}{:064x}{:064x}", 0, amount, amount / 2, 0))
        })
        .collect()
}

fn decode_chunk(payloads: &[(u64, String)]) -> Vec<DecodedEvent> {
    payloads
        .iter()
        .map(|(block_number, data)| DecodedEvent {
            block_number: *block_number,
            volume: decode_swap_volume(data, TrackedSlot::Second, 18),
        })
        .collect()
}

fn benchmark_decoder(c: &mut Criterion) {
    let payloads = swap_payloads(10_000);
    let events = decode_chunk(&payloads);
    let bounds = WindowConfig::default().bounds(30_000, 864.0);

    let mut group = c.benchmark_group("decoder");
    group.sample_size(20);

    group.bench_function("decode_10k_swaps", |b| b.iter(|| decode_chunk(black_box(&payloads))));
    group.bench_function("summarize_windows", |b| {
        b.iter(|| {
            let short = WindowSummary::from_events(events_since(black_box(&events), bounds.short_from), Some(0.002));
            let long = WindowSummary::from_events(events_since(black_box(&events), bounds.long_from), Some(0.002));
            (short, long)
        })
    });
    group.finish();
}

criterion_group!(benches, benchmark_decoder);
criterion_main!(benches);
