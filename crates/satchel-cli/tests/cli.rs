//! Integration tests for the `satchel` launcher binary.
//!
//! Each test lays a development container out in a temp directory and points
//! the launcher at it through `SATCHEL_CONTAINER`.

use std::path::Path;
use std::process::{Command, Output};

use satchel_runtime::container::format::pack;
use satchel_runtime::unit::unit_path;
use satchel_runtime::{UnitImage, CONFIG_RESOURCE};

fn write_file(root: &Path, path: &str, data: &[u8]) {
    let target = root.join(path);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(target, data).unwrap();
}

fn write_unit(root: &Path, bundle: &str, image: &UnitImage) {
    let path = format!("$$satchel$${}/{}", bundle, unit_path(&image.name).unwrap());
    write_file(root, &path, &image.encode());
}

fn run_satchel(container: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_satchel"))
        .args(args)
        .env("SATCHEL_CONTAINER", container)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run satchel")
}

// ────────────────────────────────────────────────────────────────────────────
// Argument forwarding
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_forwards_arguments_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), CONFIG_RESOURCE, b"# demo\napp.Echo\nlibA\n");
    write_unit(
        dir.path(),
        "libA",
        &UnitImage::new("app.Echo", vec![]).with_entry("satchel:echo"),
    );

    let output = run_satchel(dir.path(), &["first", "--", "", "--help", "x y"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "first\n--\n\n--help\nx y\n"
    );
}

#[test]
fn test_manifest_lists_bundles_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), CONFIG_RESOURCE, b"app.Manifest\nlibB\nlibA\n");
    write_unit(
        dir.path(),
        "libA",
        &UnitImage::new("app.Manifest", vec![]).with_entry("satchel:manifest"),
    );

    let output = run_satchel(dir.path(), &[]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("entry\tapp.Manifest\t"));
    assert_eq!(lines[1], "bundle\tlibB\tsatchel://container/libB.bundle");
    assert_eq!(lines[2], "bundle\tlibA\tsatchel://container/libA.bundle");
}

#[test]
fn test_runs_packed_container_file() {
    let dir = tempfile::tempdir().unwrap();
    let entries = vec![
        (CONFIG_RESOURCE.to_string(), b"app.Echo\nlibA\n".to_vec()),
        (
            format!("$$satchel$$libA/{}", unit_path("app.Echo").unwrap()),
            UnitImage::new("app.Echo", vec![])
                .with_entry("satchel:echo")
                .encode(),
        ),
    ];
    let mut bytes = Vec::new();
    pack(b"host", &entries, &mut bytes).unwrap();
    let container = dir.path().join("app.bin");
    std::fs::write(&container, &bytes).unwrap();

    let output = run_satchel(&container, &["packed"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "packed\n");
}

// ────────────────────────────────────────────────────────────────────────────
// Failure reporting
// ────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
#[test]
fn test_non_utf8_argument_is_reported() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), CONFIG_RESOURCE, b"app.Echo\nlibA\n");
    write_unit(
        dir.path(),
        "libA",
        &UnitImage::new("app.Echo", vec![]).with_entry("satchel:echo"),
    );

    let output = Command::new(env!("CARGO_BIN_EXE_satchel"))
        .arg(OsStr::from_bytes(b"a\xff"))
        .env("SATCHEL_CONTAINER", dir.path())
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run satchel");

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("satchel: Invalid launcher argument"));
    assert!(stderr.contains("not valid UTF-8"));
}

#[test]
fn test_missing_entry_unit_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), CONFIG_RESOURCE, b"app.Missing\nlibA\n");

    let output = run_satchel(dir.path(), &["ignored"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("satchel: Code unit not found: app.Missing"));
}

#[test]
fn test_unbound_entry_symbol_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), CONFIG_RESOURCE, b"app.Main\nlibA\n");
    write_unit(
        dir.path(),
        "libA",
        &UnitImage::new("app.Main", vec![]).with_entry("app:main"),
    );

    let output = run_satchel(dir.path(), &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("'app:main' is not bound"));
}

#[test]
fn test_missing_configuration_is_reported() {
    let dir = tempfile::tempdir().unwrap();

    let output = run_satchel(dir.path(), &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("satchel.conf not found"));
}
