mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn shipway() -> Command {
    let mut cmd = Command::new(cargo_bin!("shipway"));
    cmd.env("SHIPWAY_ENV", "development")
        .env_remove("PAYMENT_REQUIRE_SIGNATURE")
        .env_remove("PAYMENT_WEBHOOK_SECRET");
    cmd
}

#[test]
fn test_quote_with_explicit_distance() -> Result<(), Box<dyn std::error::Error>> {
    let output = shipway()
        .args(["quote", "--distance-km", "8.5", "--weight", "5.5"])
        .args(["--vehicle", "bike", "--cod", "500000"])
        .output()?;
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["vehicle_type"], "bike");
    assert_eq!(report["distance_km"], "8.5");
    assert!(report["shipping_fee"].as_str().unwrap().starts_with("46000"));
    assert!(report["total_amount"].as_str().unwrap().starts_with("546000"));
    Ok(())
}

#[test]
fn test_quote_from_coordinates() {
    shipway()
        .args(["quote", "--weight", "5.5", "--cod", "500000"])
        .args(["--pickup-lat", "10.7329", "--pickup-lng", "106.7173"])
        .args(["--dropoff-lat", "10.8231", "--dropoff-lng", "106.7575"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"distance_km\": \"10.95\""))
        .stdout(predicate::str::contains("\"suggested_vehicle\": \"bike\""))
        .stdout(predicate::str::contains("\"total_amount\": \"553000"));
}

#[test]
fn test_quote_rejects_overweight_parcel() {
    shipway()
        .args(["quote", "--distance-km", "5", "--weight", "45", "--vehicle", "bike"])
        .assert()
        .failure();
}

#[test]
fn test_reconcile_reports_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("settlements.csv");
    common::write_notifications_csv(&input, &[("P1", "success"), ("P2", "maybe"), ("P3", "failed")])
        .unwrap();

    shipway()
        .arg("reconcile")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "payment_id,result,transaction_id,new_balance,message",
        ))
        .stdout(predicate::str::contains("P1,not_found"))
        .stdout(predicate::str::contains("P3,not_found"))
        .stdout(predicate::str::contains("P2").not())
        .stderr(predicate::str::contains("Error reading notification"));
}

#[test]
fn test_audit_on_empty_store() {
    shipway()
        .arg("audit")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "user_id,phone,balance,total_topup,total_usage,total_refund,ledger_balance,consistent",
        ));
}

#[test]
fn test_sweep_on_empty_store() {
    shipway()
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("otc_purged=0 topups_expired=0"));
}

#[test]
fn test_invalid_environment_is_a_config_error() {
    shipway()
        .env("SHIPWAY_ENV", "staging")
        .arg("audit")
        .assert()
        .failure();
}
