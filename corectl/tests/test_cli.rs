use std::process::{Command, Output};

use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test]
fn test_cli_version() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let output = corectl(&home, &["version"])?;

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?.trim(),
        format!("corectl {}", env!("CARGO_PKG_VERSION"))
    );
    Ok(())
}

#[test]
fn test_cli_ls_all_json_on_empty_home() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let output = corectl(&home, &["ls", "--all", "--json"])?;

    assert!(output.status.success());
    let listing: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    for channel in ["alpha", "beta", "stable"] {
        assert_eq!(listing[channel], serde_json::json!([]));
    }
    Ok(())
}

#[test]
fn test_cli_ps_and_query_without_instances() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;

    let output = corectl(&home, &["ps"])?;
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?.trim(),
        "found 0 running VMs, summing 0 vCPUs and 0MB"
    );

    let output = corectl(&home, &["query", "nope"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("instance `nope` not found"));
    Ok(())
}

#[test]
fn test_cli_put_rejects_malformed_destination() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let output = corectl(&home, &["put", "Cargo.toml", "no-colon"])?;

    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("<instance>:<path>"));
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn corectl(home: &TempDir, args: &[&str]) -> anyhow::Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_corectl"))
        .args(args)
        .env("CORECTL_HOME", home.path())
        .env_remove("CORECTL_RELEASE_URL")
        .output()?)
}
