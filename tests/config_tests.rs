//! Configuration file loading tests.

use std::io::Write;

use sweeptrack_rs::{Error, ExtractionStrategy, FramePipeline, MergePolicy, PipelineConfig};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_config_from_file() {
    let file = write_config(
        r#"{
            "sensor": { "rings": 32, "azimuth_bins": 1024 },
            "background": { "safety_margin_m": 0.3 },
            "extraction": {
                "strategy": "hybrid",
                "merge_policy": "intersection",
                "compare": true,
                "history_len": 10
            },
            "frame_budget_ms": 40.0
        }"#,
    );

    let config = PipelineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.sensor.rings, 32);
    assert_eq!(config.sensor.azimuth_bins, 1024);
    assert_eq!(config.background.safety_margin_m, 0.3);
    assert_eq!(config.background.smoothing_fraction, 0.02);
    assert_eq!(config.extraction.strategy, ExtractionStrategy::Hybrid);
    assert_eq!(config.extraction.merge_policy, MergePolicy::Intersection);
    assert_eq!(config.frame_budget_ms(), 40.0);

    let pipeline = FramePipeline::new(config).unwrap();
    assert!(pipeline.harness().is_some());
}

#[test]
fn test_saved_config_reloads_identically() {
    let mut config = PipelineConfig::default();
    config.clustering.volumetric = true;
    config.tracking.max_tracks = 16;
    config.velocity.min_coherent_neighbors = 4;

    let file = write_config(&config.to_json_string().unwrap());
    assert_eq!(PipelineConfig::from_file(file.path()).unwrap(), config);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = PipelineConfig::from_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        r#"{ "sensor": { "rings": 0 } }"#,
        r#"{ "sensor": { "min_range_m": 5.0, "max_range_m": 1.0 } }"#,
        r#"{ "velocity": { "min_speed_mps": 10.0, "max_speed_mps": 5.0 } }"#,
        r#"{ "extraction": { "fallback_foreground_ratio": 0.0 } }"#,
        r#"{ "extraction": { "compare": true, "history_len": 0 } }"#,
        r#"{ "tracking": { "gating_distance_sq": -1.0 } }"#,
        r#"{ "frame_budget_ms": 0.0 }"#,
    ];
    for json in cases {
        let file = write_config(json);
        assert!(
            PipelineConfig::from_file(file.path()).is_err(),
            "accepted {}",
            json
        );
    }
}

#[test]
fn test_unknown_strategy_is_parse_error() {
    let file = write_config(r#"{ "extraction": { "strategy": "optical_flow" } }"#);
    assert!(matches!(
        PipelineConfig::from_file(file.path()),
        Err(Error::Json(_))
    ));
}
