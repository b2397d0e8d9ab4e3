//! Resource Loading Tests
//!
//! Exercises the background loader thread against real files: JSON parsing,
//! controller clip dependencies, failure states and hot reload. Each test
//! works in its own directory under the system temp dir.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fable::resources::ResourceServer;

fn temp_root(tag: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let root = std::env::temp_dir().join(format!("fable-test-{tag}-{}", std::process::id()));
    fs::create_dir_all(&root).unwrap();
    root
}

fn write(root: &std::path::Path, rel: &str, content: &str) {
    let full = root.join(rel);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

/// Polls the server until `done` or a 5 second deadline.
fn wait_until(server: &mut ResourceServer, mut done: impl FnMut(&ResourceServer) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        server.poll();
        if done(server) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for the loader");
        std::thread::sleep(Duration::from_millis(5));
    }
}

const SLIDE_CLIP: &str = r#"{
    "name": "slide",
    "tracks": [
        {
            "bone": "root",
            "times": [0.0, 1.0],
            "positions": [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            "rotations": [[0.0, 0.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0]]
        }
    ]
}"#;

#[test]
fn clip_loads_from_disk() {
    let root = temp_root("clip");
    write(&root, "clips/slide.json", SLIDE_CLIP);

    let mut server = ResourceServer::new(&root);
    server.load_clip("clips/slide.json");
    wait_until(&mut server, |s| s.clips.is_ready("clips/slide.json"));

    let clip = server.clips.get("clips/slide.json").unwrap();
    assert_eq!(clip.name, "slide");
    assert_eq!(clip.tracks.len(), 1);
    assert!((clip.length - 1.0).abs() < 1e-5);

    fs::remove_dir_all(root).ok();
}

#[test]
fn controller_pulls_in_its_clips() {
    let root = temp_root("controller");
    write(&root, "clips/slide.json", SLIDE_CLIP);
    write(
        &root,
        "ctrl.json",
        r#"{
            "name": "mover",
            "inputs": [{"name": "go", "type": "bool"}],
            "nodes": [{"type": "clip", "slot": "slide", "looped": true}],
            "root": 0,
            "sets": [{"name": "default", "clips": {"slide": "clips/slide.json"}}]
        }"#,
    );

    let mut server = ResourceServer::new(&root);
    server.load_controller("ctrl.json");
    wait_until(&mut server, |s| s.controllers.is_ready("ctrl.json"));

    // the dependency was loaded without an explicit request
    assert!(server.clips.is_ready("clips/slide.json"));

    fs::remove_dir_all(root).ok();
}

#[test]
fn controller_fails_when_a_clip_is_missing() {
    let root = temp_root("broken-controller");
    write(
        &root,
        "ctrl.json",
        r#"{
            "name": "mover",
            "nodes": [{"type": "clip", "slot": "slide", "looped": true}],
            "root": 0,
            "sets": [{"name": "default", "clips": {"slide": "clips/void.json"}}]
        }"#,
    );

    let mut server = ResourceServer::new(&root);
    server.load_controller("ctrl.json");
    wait_until(&mut server, |s| s.controllers.is_failed("ctrl.json"));

    fs::remove_dir_all(root).ok();
}

#[test]
fn missing_file_is_marked_failed() {
    let root = temp_root("missing");
    let mut server = ResourceServer::new(&root);
    server.load_clip("clips/void.json");
    wait_until(&mut server, |s| s.clips.is_failed("clips/void.json"));

    fs::remove_dir_all(root).ok();
}

#[test]
fn malformed_json_is_marked_failed() {
    let root = temp_root("malformed");
    write(&root, "clips/bad.json", "{ not json");

    let mut server = ResourceServer::new(&root);
    server.load_clip("clips/bad.json");
    wait_until(&mut server, |s| s.clips.is_failed("clips/bad.json"));

    fs::remove_dir_all(root).ok();
}

#[test]
fn heightmap_sample_count_must_match_dimensions() {
    let root = temp_root("heightmap");
    write(
        &root,
        "maps/short.json",
        r#"{"width": 4, "height": 4, "values": [0.0, 1.0]}"#,
    );
    write(
        &root,
        "maps/flat.json",
        r#"{"width": 2, "height": 2, "values": [0.0, 0.0, 0.0, 0.0]}"#,
    );

    let mut server = ResourceServer::new(&root);
    server.load_heightmap("maps/short.json");
    server.load_heightmap("maps/flat.json");
    wait_until(&mut server, |s| {
        s.heightmaps.is_failed("maps/short.json") && s.heightmaps.is_ready("maps/flat.json")
    });

    fs::remove_dir_all(root).ok();
}

#[test]
fn reload_picks_up_changed_content() {
    let root = temp_root("reload");
    write(&root, "clips/slide.json", SLIDE_CLIP);

    let mut server = ResourceServer::new(&root);
    server.load_clip("clips/slide.json");
    wait_until(&mut server, |s| s.clips.is_ready("clips/slide.json"));
    assert_eq!(server.clips.get("clips/slide.json").unwrap().name, "slide");

    write(
        &root,
        "clips/slide.json",
        &SLIDE_CLIP.replace("\"slide\"", "\"glide\""),
    );
    server.reload("clips/slide.json");
    wait_until(&mut server, |s| {
        s.clips
            .get("clips/slide.json")
            .is_some_and(|c| c.name == "glide")
    });

    fs::remove_dir_all(root).ok();
}
