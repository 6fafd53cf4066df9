//! End-to-end tests for the `complaint-locator` binary.
//!
//! Geocoding endpoints point at a closed local port so every lookup fails
//! fast and the address degrades to raw coordinates without touching the
//! network.

use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cli() -> Command {
    Command::cargo_bin("complaint-locator").expect("Failed to find complaint-locator binary")
}

fn write_offline_config(dir: &Path) -> Result<std::path::PathBuf, Box<dyn Error>> {
    let config_path = dir.join("locator.yaml");
    let config_content = format!(
        r#"
acquisition:
  watch_window_ms: 2000
  fallback_timeout_ms: 1000
geocoding:
  primary_url: "http://127.0.0.1:1"
  secondary_url: ""
poi:
  enabled: false
storage:
  path: "{}"
"#,
        dir.join("store.json").display()
    );
    fs::write(&config_path, config_content)?;
    Ok(config_path)
}

#[test]
fn test_init_creates_config() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("locator.yaml");

    cli()
        .arg("init")
        .current_dir(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));

    let content = fs::read_to_string(&config_path)?;
    assert!(content.contains("jump_reject_meters"));
    assert!(content.contains("primary_url"));
    assert!(content.contains("lastGoodLoc"));

    Ok(())
}

#[test]
fn test_init_without_force_keeps_existing() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("locator.yaml");
    fs::write(&config_path, "poi:\n  enabled: false\n")?;

    cli()
        .arg("init")
        .current_dir(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Config file already exists"));
    assert_eq!(fs::read_to_string(&config_path)?, "poi:\n  enabled: false\n");

    cli()
        .args(["init", "--force"])
        .current_dir(temp_dir.path())
        .assert()
        .success();
    assert!(fs::read_to_string(&config_path)?.contains("overpass_url"));

    Ok(())
}

#[test]
fn test_missing_config_error() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let nonexistent_path = temp_dir.path().join("does_not_exist.yaml");

    cli()
        .arg("last-good")
        .arg("--config")
        .arg(&nonexistent_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));

    Ok(())
}

#[test]
fn test_last_good_when_nothing_recorded() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = write_offline_config(temp_dir.path())?;

    cli()
        .arg("last-good")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("No last good fix recorded"));

    Ok(())
}

#[test]
fn test_locate_accurate_fix_then_last_good() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = write_offline_config(temp_dir.path())?;
    let fixes_path = temp_dir.path().join("fixes.yaml");
    fs::write(
        &fixes_path,
        r#"
watch:
  - delay_ms: 50
    fix: { lat: 19.076, lng: 72.8777, accuracy_meters: 8 }
"#,
    )?;

    cli()
        .arg("locate")
        .arg("--fixes")
        .arg(&fixes_path)
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("State: accurate"))
        .stdout(predicate::str::contains("Coordinate: 19.076000, 72.877700"))
        .stdout(predicate::str::contains("Status: accurate · accuracy 8m"))
        .stdout(predicate::str::contains("Address: 19.076000, 72.877700"));

    cli()
        .arg("last-good")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Last good fix: 19.076000, 72.877700"));

    Ok(())
}

#[test]
fn test_locate_permission_denied() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = write_offline_config(temp_dir.path())?;
    let fixes_path = temp_dir.path().join("fixes.yaml");
    fs::write(&fixes_path, "watch:\n  - error: denied\n")?;

    cli()
        .arg("locate")
        .arg("--fixes")
        .arg(&fixes_path)
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("State: denied"))
        .stdout(predicate::str::contains("Advisory: Location permission denied"))
        .stdout(predicate::str::contains("Address: none"));

    assert!(!temp_dir.path().join("store.json").exists());

    Ok(())
}

#[test]
fn test_resolve_falls_back_to_coordinates() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = write_offline_config(temp_dir.path())?;

    cli()
        .args(["resolve", "--lat", "-33.8688", "--lng", "151.2093", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("-33.868800, 151.209300"));

    Ok(())
}
