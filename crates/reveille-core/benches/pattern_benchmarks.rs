//! Benchmarks for next-fire resolution.
//!
//! The scheduler recomputes next-fire for every fired item and for every
//! edit, so resolution across awkward zones should stay in the microsecond
//! range.

use std::time::Duration;

use chrono::{NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reveille_core::pattern::{next_fire, DaySet, RepeatPattern};

fn bench_next_fire(c: &mut Criterion) {
    let zone: Tz = "America/New_York".parse().unwrap();
    let time = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
    // Day before the spring-forward gap.
    let after = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();

    let patterns = [
        ("daily", RepeatPattern::Daily),
        ("weekdays", RepeatPattern::Weekdays),
        (
            "custom_sunday",
            RepeatPattern::Custom {
                days: DaySet::from_days([Weekday::Sun]),
            },
        ),
    ];

    let mut group = c.benchmark_group("next_fire");
    group.measurement_time(Duration::from_secs(5));
    for (name, pattern) in &patterns {
        group.bench_function(*name, |b| {
            b.iter(|| next_fire(black_box(pattern), time, zone, black_box(after)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_next_fire);
criterion_main!(benches);
