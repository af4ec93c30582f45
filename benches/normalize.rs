use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use wile::normalize_stations;

fn synthetic_response(stations: usize) -> Value {
    let station: Vec<Value> = (0..stations)
        .map(|i| {
            json!({
                "STID": format!("ST{i:04}"),
                "LATITUDE": 32.0 + (i as f64) * 0.01,
                "LONGITUDE": -124.0 + (i as f64) * 0.01,
                "ELEVATION": 100.0 + i as f64,
                "QC_FLAGGED": if i % 17 == 0 { "TRUE" } else { "FALSE" },
                "PERIOD_OF_RECORD": {
                    "start": "2002-01-01T00:00:00Z",
                    "end": "2024-05-01T00:00:00Z",
                },
                "OBSERVATIONS": {
                    "air_temp_value_1": {"value": 21.5, "date_time": "2024-05-01T12:00:00Z"},
                    "relative_humidity_value_1": {"value": 40.0, "date_time": "2024-05-01T12:00:00Z"},
                    "sea_level_pressure_value_1d": {"value": 1013.2, "date_time": "2024-05-01T12:00:00Z"},
                },
            })
        })
        .collect();
    json!({
        "SUMMARY": {"RESPONSE_CODE": 1, "NUMBER_OF_OBJECTS": stations},
        "UNITS": {"air_temp": "Celsius", "relative_humidity": "%"},
        "STATION": station,
    })
}

fn bench_normalize(c: &mut Criterion) {
    let response = synthetic_response(500);
    c.bench_function("normalize_stations_500", |b| {
        b.iter(|| normalize_stations(black_box(&response)))
    });
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
