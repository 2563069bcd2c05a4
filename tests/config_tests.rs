// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration loading.

use voxl_camera_server::ServerConfig;

#[test]
fn rejects_missing_file() {
    let result = ServerConfig::from_file("/nonexistent/path/to/config.toml");
    assert!(result.is_err());
}

#[test]
fn loads_and_validates_stereo_pair() {
    let toml_text = r#"
        [[cameras]]
        name = "stereo_front"
        type = "ov7251"
        camera_id = 2
        camera_id_second = 3
        frame_rate = 30
        independent_exposure = false

        [cameras.preview]
        enabled = true
        width = 640
        height = 480

        [cameras.ae]
        mode = "lme_hist"
    "#;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, toml_text).unwrap();

    let config = ServerConfig::from_file(&path).unwrap();
    assert_eq!(config.cameras.len(), 1);
    assert!(config.cameras[0].is_stereo_master());
}

#[test]
fn rejects_duplicate_camera_names_from_file() {
    let toml_text = r#"
        [[cameras]]
        name = "front"
        type = "ov7251"
        camera_id = 0

        [[cameras]]
        name = "front"
        type = "ov7251"
        camera_id = 1
    "#;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, toml_text).unwrap();

    assert!(ServerConfig::from_file(&path).is_err());
}
