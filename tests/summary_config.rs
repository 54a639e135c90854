use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use motion_summary::config::SummaryConfig;
use motion_summary::ObjectLabel;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SUMMARY_CONFIG",
        "SUMMARY_OUTPUT_DIR",
        "SUMMARY_MOTION_THRESHOLD",
        "SUMMARY_AREA_THRESHOLD",
        "SUMMARY_RECORD_TIMEOUT_SECS",
        "SUMMARY_CONFIDENCE",
        "SUMMARY_LABELS",
        "SUMMARY_BACKEND",
        "SUMMARY_MODEL_PATH",
        "SUMMARY_NAMES_PATH",
        "SUMMARY_API_ADDR",
        "SUMMARY_WORKERS",
        "SUMMARY_UPLOAD_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        output_dir = "/srv/summaries"
        prefetch_depth = 0

        [motion]
        pixel_threshold = 30
        area_threshold = 2500

        [recording]
        timeout_secs = 4.5
        default_frame_rate = 30.0

        [detection]
        confidence = 0.6
        labels = ["person", "car"]
        model_path = "/models/yolov8s.onnx"

        [api]
        addr = "0.0.0.0:9000"
        workers = 4
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("SUMMARY_CONFIG", file.path());
    std::env::set_var("SUMMARY_AREA_THRESHOLD", "1200");
    std::env::set_var("SUMMARY_LABELS", "truck, bus");
    std::env::set_var("SUMMARY_WORKERS", "8");

    let cfg = SummaryConfig::load().expect("load config");

    assert_eq!(cfg.output_dir, PathBuf::from("/srv/summaries"));
    assert_eq!(cfg.prefetch_depth, 0);
    assert_eq!(cfg.motion.pixel_threshold, 30);
    assert_eq!(cfg.motion.area_threshold, 1200);
    assert_eq!(cfg.record_timeout, 4.5);
    assert_eq!(cfg.default_frame_rate, 30.0);
    assert_eq!(cfg.detection.confidence, 0.6);
    assert_eq!(cfg.detection.labels, vec![ObjectLabel::Truck, ObjectLabel::Bus]);
    assert_eq!(cfg.detection.model_path, PathBuf::from("/models/yolov8s.onnx"));
    assert_eq!(cfg.detection.names_path, PathBuf::from("./yolo/coco.names"));
    assert_eq!(cfg.api.addr, "0.0.0.0:9000");
    assert_eq!(cfg.api.workers, 8);

    let pipeline = cfg.pipeline_config();
    assert_eq!(pipeline.motion.area_threshold, 1200);
    assert_eq!(pipeline.record_timeout, 4.5);

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SummaryConfig::load().expect("load config");
    assert_eq!(cfg.output_dir, PathBuf::from("./output"));
    assert_eq!(cfg.motion.pixel_threshold, 25);
    assert_eq!(cfg.motion.area_threshold, 5000);
    assert_eq!(cfg.record_timeout, 3.0);
    assert_eq!(cfg.detection.backend, "stub");
    assert_eq!(cfg.detection.confidence, 0.5);
    assert_eq!(cfg.detection.labels, ObjectLabel::ALL.to_vec());
    assert_eq!(cfg.api.addr, "127.0.0.1:8000");
    assert_eq!(cfg.api.workers, 2);
    assert_eq!(cfg.api.max_upload_bytes, 512 * 1024 * 1024);

    clear_env();
}

#[test]
fn rejects_malformed_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (key, value) in [
        ("SUMMARY_MOTION_THRESHOLD", "300"),
        ("SUMMARY_RECORD_TIMEOUT_SECS", "soon"),
        ("SUMMARY_RECORD_TIMEOUT_SECS", "-1"),
        ("SUMMARY_CONFIDENCE", "1.5"),
        ("SUMMARY_LABELS", "person,dragon"),
        ("SUMMARY_WORKERS", "0"),
    ] {
        std::env::set_var(key, value);
        let err = SummaryConfig::load().expect_err("config should be rejected");
        assert!(!err.to_string().is_empty(), "{key}={value}");
        std::env::remove_var(key);
    }

    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SUMMARY_CONFIG", "/definitely/missing/summary.toml");
    let err = SummaryConfig::load().expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[motion]\npixel_threshold = \"high\"\n").unwrap();
    std::env::set_var("SUMMARY_CONFIG", file.path());
    let err = SummaryConfig::load().expect_err("bad type");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
