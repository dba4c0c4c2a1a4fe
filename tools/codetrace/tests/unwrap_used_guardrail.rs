use std::path::PathBuf;

#[test]
fn workspace_lints_deny_unwrap_used() {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("Cargo.toml");
    let raw = std::fs::read_to_string(&manifest)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", manifest.display()));
    let value: toml::Value = toml::from_str(&raw).expect("workspace manifest parses");

    let level = value
        .get("workspace")
        .and_then(|w| w.get("lints"))
        .and_then(|l| l.get("clippy"))
        .and_then(|c| c.get("unwrap_used"))
        .and_then(toml::Value::as_str);

    assert_eq!(
        level,
        Some("deny"),
        "workspace Cargo.toml should deny clippy::unwrap_used"
    );
}
