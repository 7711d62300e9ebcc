//! Criterion benchmarks for the log capture hot path.
//!
//! Every ingested log line is pushed into the ring buffer and tested against
//! the session filter, so both operations run at device log rate.
//!
//! Run with:
//! ```bash
//! cargo bench --package devbridge-core --bench log_filter_bench
//! ```

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use devbridge_core::domain::log::{LogBuffer, LogEntry, LogFilter, LogLevel, LOG_BUFFER_CAPACITY};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn sample_entry(i: usize) -> LogEntry {
    let level = match i % 4 {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Warn,
        _ => LogLevel::Error,
    };
    LogEntry {
        timestamp: Utc::now(),
        level,
        tag: if i % 3 == 0 { "ActivityManager" } else { "Choreographer" }.to_string(),
        message: format!("Skipped {i} frames! The application may be doing too much work"),
        device_id: "emulator-5554".to_string(),
        pid: Some(1234),
    }
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_filter_single_entry(c: &mut Criterion) {
    let entry = sample_entry(7);
    let filter = LogFilter::default()
        .with_levels([LogLevel::Warn, LogLevel::Error])
        .with_tag("choreo")
        .with_text("frames");

    c.bench_function("filter_matches_all_dimensions", |b| {
        b.iter(|| black_box(&filter).matches(black_box(&entry)))
    });
}

fn bench_buffer_push_at_capacity(c: &mut Criterion) {
    let mut buffer = LogBuffer::default();
    for i in 0..LOG_BUFFER_CAPACITY {
        buffer.push(sample_entry(i));
    }
    let entry = sample_entry(42);

    c.bench_function("buffer_push_evicting", |b| {
        b.iter(|| buffer.push(black_box(entry.clone())))
    });
}

fn bench_buffer_filtered_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_filtered");
    let filter = LogFilter::default().with_levels([LogLevel::Error]);

    for size in [100usize, 1_000, LOG_BUFFER_CAPACITY] {
        let mut buffer = LogBuffer::default();
        for i in 0..size {
            buffer.push(sample_entry(i));
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &buffer, |b, buffer| {
            b.iter(|| buffer.filtered(Some(black_box(&filter))))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_filter_single_entry,
    bench_buffer_push_at_capacity,
    bench_buffer_filtered_scaling,
);
criterion_main!(benches);
