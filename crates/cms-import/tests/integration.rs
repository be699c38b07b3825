use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const WORKSPACE: &str = "11111111-1111-4111-8111-111111111111";
const PROJECT: &str = "22222222-2222-4222-8222-222222222222";
const SCHEMA: &str = "33333333-3333-4333-8333-333333333333";
const MODEL: &str = "55555555-5555-4555-8555-555555555555";
const ITEM_A: &str = "66666666-6666-4666-8666-666666666601";
const ASSET: &str = "77777777-7777-4777-8777-777777777777";
/// Maintainer of the workspace.
const USER: &str = "88888888-8888-4888-8888-888888888888";
/// Writers of the workspace.
const WRITER: &str = "88888888-8888-4888-8888-888888888801";
const OTHER_WRITER: &str = "88888888-8888-4888-8888-888888888802";
/// Not a member.
const STRANGER: &str = "88888888-8888-4888-8888-888888888899";

fn cms_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cms-import");
    path
}

/// Temp dir with a config (chunk size 2) and a model definition at
/// `models.json`.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data").join("assets")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/cms.sqlite"

[import]
chunk_size = 2
inference_sample_size = 10

[assets]
dir = "{root}/data/assets"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("cms-import.toml");
    fs::write(&config_path, config_content).unwrap();

    let definition = serde_json::json!({
        "project": { "id": PROJECT, "workspace": WORKSPACE, "name": "City" },
        "schemas": [{
            "id": SCHEMA, "workspace": WORKSPACE, "project": PROJECT,
            "fields": [
                { "id": "44444444-4444-4444-8444-444444444401", "name": "Name",
                  "key": "name", "type": "text", "unique": true },
                { "id": "44444444-4444-4444-8444-444444444402", "name": "Size",
                  "key": "size", "type": "integer" },
                { "id": "44444444-4444-4444-8444-444444444403", "name": "Location",
                  "key": "location", "type": "geometry" }
            ]
        }],
        "models": [{
            "id": MODEL, "project": PROJECT, "key": "places",
            "name": "Places", "schema": SCHEMA
        }],
        "members": [
            { "actor": { "kind": "user", "id": USER }, "role": "maintainer" },
            { "actor": { "kind": "user", "id": WRITER }, "role": "writer" },
            { "actor": { "kind": "user", "id": OTHER_WRITER }, "role": "writer" }
        ]
    });
    fs::write(root.join("models.json"), definition.to_string()).unwrap();

    (tmp, config_path)
}

fn run_cli(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cms_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cms-import binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// `init` plus `model apply`.
fn prepare(tmp: &TempDir, config_path: &Path) {
    let (_, stderr, success) = run_cli(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let defs = tmp.path().join("models.json");
    let (stdout, stderr, success) =
        run_cli(config_path, &["model", "apply", defs.to_str().unwrap()]);
    assert!(success, "model apply failed: {} {}", stdout, stderr);
}

fn write_input(tmp: &TempDir, name: &str, content: &str) -> String {
    let path = tmp.path().join(name);
    fs::write(&path, content).unwrap();
    path.to_str().unwrap().to_string()
}

fn import(config_path: &Path, file: &str, extra: &[&str]) -> (String, String, bool) {
    import_as(config_path, USER, file, extra)
}

fn import_as(config_path: &Path, user: &str, file: &str, extra: &[&str]) -> (String, String, bool) {
    let mut args = vec!["import", file, "--model", MODEL, "--user", user];
    args.extend_from_slice(extra);
    run_cli(config_path, &args)
}

/// Ids of the model's items, oldest first, from `item list`.
fn item_ids(config_path: &Path) -> Vec<String> {
    let (stdout, stderr, success) = run_cli(config_path, &["item", "list", "--model", MODEL]);
    assert!(success, "item list failed: {}", stderr);
    stdout
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[test]
fn test_init_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, _, success1) = run_cli(&config_path, &["init"]);
    assert!(success1, "First init failed");
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_cli(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
    assert!(tmp.path().join("data").join("cms.sqlite").exists());
}

#[test]
fn test_model_apply_and_show() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let (stdout, stderr, success) = run_cli(&config_path, &["model", "show", MODEL]);
    assert!(success, "model show failed: {}", stderr);
    assert!(stdout.contains("places"));
    assert!(stdout.contains("items:    0"));
    assert!(stdout.contains("Fields (3)"));
    assert!(stdout.contains("unique"));
}

#[test]
fn test_model_show_missing() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let (_, stderr, success) = run_cli(
        &config_path,
        &["model", "show", "99999999-9999-4999-8999-999999999999"],
    );
    assert!(!success);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_import_json_insert() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(
        &tmp,
        "places.json",
        r#"[{"name":"a","size":1},{"name":"b"},{"name":"c","size":3}]"#,
    );
    let (stdout, stderr, success) = import(&config_path, &file, &[]);
    assert!(success, "import failed: {} {}", stdout, stderr);
    assert!(stdout.contains("total:      3"), "got: {}", stdout);
    assert!(stdout.contains("inserted:   3"));
    assert!(stdout.contains("ok"));

    let (stdout, _, _) = run_cli(&config_path, &["model", "show", MODEL]);
    assert!(stdout.contains("items:    3"), "got: {}", stdout);
}

#[test]
fn test_upsert_twice_updates() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let seed = write_input(&tmp, "seed.json", r#"[{"name":"a"},{"name":"b"}]"#);
    let (_, stderr, success) = import(&config_path, &seed, &[]);
    assert!(success, "seed import failed: {}", stderr);
    let ids = item_ids(&config_path);
    assert_eq!(ids.len(), 2);

    let content = format!(
        r#"[{{"id":"{}","name":"a2"}},{{"id":"{}","name":"b2"}}]"#,
        ids[0], ids[1]
    );
    let file = write_input(&tmp, "places.json", &content);

    for run in 0..2 {
        let (stdout, stderr, success) = import(&config_path, &file, &["--strategy", "upsert"]);
        assert!(success, "upsert {} failed: {}", run, stderr);
        assert!(stdout.contains("inserted:   0"), "got: {}", stdout);
        assert!(stdout.contains("updated:    2"), "got: {}", stdout);
    }

    let (stdout, _, _) = run_cli(&config_path, &["item", "get", &ids[0]]);
    assert!(stdout.contains("\"version\": 3"), "got: {}", stdout);
    assert_eq!(item_ids(&config_path), ids);
}

#[test]
fn test_insert_assigns_new_ids() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(
        &tmp,
        "places.json",
        &format!(r#"[{{"id":"{ITEM_A}","name":"a"}}]"#),
    );
    let (stdout, stderr, success) = import(&config_path, &file, &[]);
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("inserted:   1"), "got: {}", stdout);

    let ids = item_ids(&config_path);
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], ITEM_A);
    let (_, _, success) = run_cli(&config_path, &["item", "get", ITEM_A]);
    assert!(!success);
}

#[test]
fn test_import_requires_identity() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(&tmp, "places.json", r#"[{"name":"a"}]"#);
    let (_, stderr, success) = run_cli(&config_path, &["import", &file, "--model", MODEL]);
    assert!(!success);
    assert!(stderr.contains("--user"), "got: {}", stderr);
}

#[test]
fn test_non_member_is_denied() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(&tmp, "places.json", r#"[{"name":"a"}]"#);
    let (_, stderr, success) = import_as(&config_path, STRANGER, &file, &[]);
    assert!(!success);
    assert!(stderr.contains("operation denied"), "got: {}", stderr);
    assert!(item_ids(&config_path).is_empty());
}

#[test]
fn test_writer_cannot_update_items_of_others() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let seed = write_input(&tmp, "seed.json", r#"[{"name":"a"}]"#);
    let (_, stderr, success) = import_as(&config_path, WRITER, &seed, &[]);
    assert!(success, "writer insert failed: {}", stderr);
    let ids = item_ids(&config_path);

    let file = write_input(
        &tmp,
        "places.json",
        &format!(r#"[{{"id":"{}","name":"renamed"}}]"#, ids[0]),
    );
    let (stdout, stderr, success) =
        import_as(&config_path, OTHER_WRITER, &file, &["--strategy", "update"]);
    assert!(!success, "update by another writer should fail");
    assert!(stderr.contains("operation denied"), "got: {}", stderr);
    assert!(stdout.contains("updated:    0"), "got: {}", stdout);

    // The creator and a maintainer may update it.
    let (_, stderr, success) = import_as(&config_path, WRITER, &file, &["--strategy", "update"]);
    assert!(success, "creator update failed: {}", stderr);
    let (stdout, stderr, success) = import(&config_path, &file, &["--strategy", "update"]);
    assert!(success, "maintainer update failed: {}", stderr);
    assert!(stdout.contains("updated:    1"), "got: {}", stdout);
}

#[test]
fn test_update_strategy_ignores_unknown_items() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(&tmp, "places.json", r#"[{"name":"a"}]"#);
    let (stdout, _, success) = import(&config_path, &file, &["--strategy", "update"]);
    assert!(success);
    assert!(stdout.contains("ignored:    1"), "got: {}", stdout);
    assert!(stdout.contains("updated:    0"));
}

#[test]
fn test_unique_violation_keeps_earlier_chunks() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    // Chunk size is 2: the first chunk commits, the second repeats "a".
    let file = write_input(
        &tmp,
        "places.json",
        r#"[{"name":"a"},{"name":"b"},{"name":"a"}]"#,
    );
    let (stdout, stderr, success) = import(&config_path, &file, &[]);
    assert!(!success, "duplicate unique value should fail");
    assert!(stdout.contains("total:      2"), "got: {}", stdout);
    assert!(stderr.contains("stopped after 2 items"), "got: {}", stderr);

    let (stdout, _, _) = run_cli(&config_path, &["model", "show", MODEL]);
    assert!(stdout.contains("items:    2"), "got: {}", stdout);
}

#[test]
fn test_malformed_input_fails() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(&tmp, "places.json", r#"{"name":"not an array"}"#);
    let (_, stderr, success) = import(&config_path, &file, &[]);
    assert!(!success);
    assert!(stderr.contains("stopped after 0 items"), "got: {}", stderr);
}

#[test]
fn test_unknown_extension_needs_format() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(&tmp, "places.txt", r#"[{"name":"a"}]"#);
    let (_, stderr, success) = import(&config_path, &file, &[]);
    assert!(!success);
    assert!(stderr.contains("--format"), "got: {}", stderr);

    let (stdout, _, success) = import(&config_path, &file, &["--format", "json"]);
    assert!(success);
    assert!(stdout.contains("inserted:   1"));
}

#[test]
fn test_import_geojson_with_inference() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(
        &tmp,
        "parks.geojson",
        r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [139.7, 35.6]},
                 "properties": {"name": "Ueno", "area": 53.8}},
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [139.6, 35.7]},
                 "properties": {"name": "Inokashira", "area": 42.6}}
            ]
        }"#,
    );
    let (stdout, stderr, success) = import(
        &config_path,
        &file,
        &["--geometry-field", "location", "--mutate-schema"],
    );
    assert!(success, "geojson import failed: {} {}", stdout, stderr);
    assert!(stdout.contains("inserted:   2"), "got: {}", stdout);
    assert!(stdout.contains("new fields: area"), "got: {}", stdout);

    let (stdout, _, _) = run_cli(&config_path, &["model", "show", MODEL]);
    assert!(stdout.contains("Fields (4)"), "got: {}", stdout);
}

#[test]
fn test_geojson_requires_geometry_field() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(
        &tmp,
        "parks.geojson",
        r#"{"type":"FeatureCollection","features":[]}"#,
    );
    let (_, stderr, success) = import(&config_path, &file, &[]);
    assert!(!success);
    assert!(stderr.contains("geometry"), "got: {}", stderr);
}

#[test]
fn test_item_get() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    let file = write_input(&tmp, "places.json", r#"[{"name":"a","size":7}]"#);
    let (_, stderr, success) = import(&config_path, &file, &[]);
    assert!(success, "import failed: {}", stderr);
    let ids = item_ids(&config_path);
    assert_eq!(ids.len(), 1);

    let (stdout, stderr, success) = run_cli(&config_path, &["item", "get", &ids[0]]);
    assert!(success, "item get failed: {}", stderr);
    assert!(stdout.contains(&ids[0]));
    assert!(stdout.contains(MODEL));

    let (_, stderr, success) = run_cli(&config_path, &["item", "get", ITEM_A]);
    assert!(!success);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_job_run_payload() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    fs::write(
        tmp.path()
            .join("data")
            .join("assets")
            .join(format!("{ASSET}.json")),
        r#"[{"name":"a"},{"name":"b"},{"name":"c"}]"#,
    )
    .unwrap();
    let payload = serde_json::json!({
        "modelId": MODEL,
        "assetId": ASSET,
        "format": "json",
        "strategy": "insert",
        "userId": USER
    });
    let payload_path = write_input(&tmp, "job.json", &payload.to_string());

    let (stdout, stderr, success) = run_cli(&config_path, &["job", "run", &payload_path]);
    assert!(success, "job run failed: {} {}", stdout, stderr);
    assert!(stdout.contains("inserted:   3"), "got: {}", stdout);
}

#[test]
fn test_job_trigger_waits_for_worker() {
    let (tmp, config_path) = setup_test_env();
    prepare(&tmp, &config_path);

    fs::write(
        tmp.path().join("data").join("assets").join(ASSET),
        r#"[{"name":"a"},{"name":"b"}]"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_cli(
        &config_path,
        &[
            "job", "trigger", "--asset", ASSET, "--model", MODEL, "--format", "json", "--user",
            USER,
        ],
    );
    assert!(success, "job trigger failed: {} {}", stdout, stderr);
    assert!(stdout.contains("job queued"));

    let (stdout, _, _) = run_cli(&config_path, &["model", "show", MODEL]);
    assert!(stdout.contains("items:    2"), "got: {}", stdout);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_cli(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("config"), "got: {}", stderr);
}
