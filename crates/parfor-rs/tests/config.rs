use std::fs;

use parfor_rs::task::RangeEncoding;
use parfor_rs::{EvictionPolicy, ParforConfig};

#[test]
fn partial_json_keeps_defaults_for_the_rest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("parfor.json");
    fs::write(
        &path,
        r#"{
  "optimizer": { "prob_size_threshold": 500.0, "apply_nested_parallelism": true },
  "tasks": { "use_range_tasks": false, "queue_capacity": 64 },
  "buffer_pool": { "policy": "LRU", "buffer_fraction": 0.25 }
}"#,
    )
    .expect("write config");

    let cfg = ParforConfig::load_json(&path).expect("load config");
    let defaults = ParforConfig::default();
    assert_eq!(cfg.optimizer.prob_size_threshold, 500.0);
    assert!(cfg.optimizer.apply_nested_parallelism);
    assert_eq!(cfg.optimizer.mem_util_factor, defaults.optimizer.mem_util_factor);
    assert_eq!(cfg.optimizer.nested_iter_var, defaults.optimizer.nested_iter_var);
    assert_eq!(cfg.tasks.queue_capacity, Some(64));
    assert_eq!(cfg.tasks.range_task_min_size, 3);
    assert_eq!(cfg.buffer_pool.policy, EvictionPolicy::Lru);
    assert_eq!(cfg.buffer_pool.buffer_fraction, 0.25);
    assert_eq!(cfg.buffer_pool.max_entry_bytes, defaults.buffer_pool.max_entry_bytes);

    let encoding = RangeEncoding::from_config(&cfg.tasks);
    assert!(!encoding.enabled);
}

#[test]
fn empty_document_is_the_default_config() {
    let cfg = ParforConfig::from_json_str("{}").expect("empty config");
    assert_eq!(cfg, ParforConfig::default());
    assert_eq!(cfg.optimizer.prob_size_threshold, 100.0);
    assert_eq!(cfg.optimizer.max_prob_size_factor, 10.0);
    assert_eq!(cfg.optimizer.par_k_mr_factor, 2.0);
    assert_eq!(cfg.buffer_pool.buffer_fraction, 0.15);
}

#[test]
fn config_survives_a_json_round_trip() {
    let mut cfg = ParforConfig::default();
    cfg.optimizer.block_size = 2048;
    cfg.buffer_pool.policy = EvictionPolicy::Lru;
    let json = serde_json::to_string_pretty(&cfg).expect("serialize");
    assert!(json.contains("\"LRU\""));
    assert_eq!(ParforConfig::from_json_str(&json).expect("parse"), cfg);
}

#[test]
fn out_of_range_values_are_rejected() {
    let err = ParforConfig::from_json_str(r#"{ "buffer_pool": { "buffer_fraction": 1.5 } }"#)
        .expect_err("fraction above one");
    assert!(err.to_string().contains("buffer_fraction"));

    let err = ParforConfig::from_json_str(r#"{ "tasks": { "queue_capacity": 0 } }"#)
        .expect_err("zero capacity");
    assert!(err.to_string().contains("queue_capacity"));

    assert!(ParforConfig::from_json_str(r#"{ "buffer_pool": { "policy": "MRU" } }"#).is_err());
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.json");
    let err = ParforConfig::load_json(&path).expect_err("file is missing");
    assert!(format!("{err:#}").contains("absent.json"));
}
