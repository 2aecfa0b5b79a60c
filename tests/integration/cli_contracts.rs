use std::fs;

use pinset::config::PinsetConfig;
use pinset::tooling::cli::{CliContext, Commands};
use tempfile::TempDir;

fn open(temp_dir: &TempDir) -> CliContext {
    let mut config = PinsetConfig::default();
    config.storage.data_dir = Some(temp_dir.path().join("store"));
    config.queue.min_interval_ms = 0;
    CliContext::new(&config).unwrap()
}

fn put(cli: &CliContext, temp_dir: &TempDir, name: &str, body: &str) -> String {
    let path = temp_dir.path().join(name);
    fs::write(&path, body).unwrap();
    cli.execute(&Commands::Put { file: path }).unwrap()
}

#[test]
fn status_json_contract_has_required_fields() {
    let temp_dir = TempDir::new().unwrap();
    let cli = open(&temp_dir);
    let cid = put(&cli, &temp_dir, "a.txt", "a");
    cli.execute(&Commands::Pin {
        name: "a".to_string(),
        cid: format!("pinset://{}", cid),
        wait: Some(30),
    })
    .unwrap();

    let output = cli
        .execute(&Commands::Status {
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert!(parsed
        .get("root")
        .and_then(|v| v.as_str())
        .is_some_and(|root| root.starts_with("pinset://")));
    assert!(parsed.get("links").and_then(|v| v.as_array()).is_some());
    assert!(parsed.get("storage_used").and_then(|v| v.as_u64()).is_some());
    assert!(parsed.get("storage_limit").and_then(|v| v.as_u64()).is_some());
    cli.close();
}

#[test]
fn unpin_then_status_text_lists_remaining_links() {
    let temp_dir = TempDir::new().unwrap();
    let cli = open(&temp_dir);
    let a = put(&cli, &temp_dir, "a.txt", "alpha");
    let b = put(&cli, &temp_dir, "b.txt", "beta");
    for (name, cid) in [("alpha", &a), ("beta", &b)] {
        cli.execute(&Commands::Pin {
            name: name.to_string(),
            cid: cid.clone(),
            wait: Some(30),
        })
        .unwrap();
    }
    cli.execute(&Commands::Unpin {
        name: "alpha".to_string(),
        wait: Some(30),
    })
    .unwrap();

    let output = cli
        .execute(&Commands::Status {
            format: "text".to_string(),
        })
        .unwrap();
    assert!(output.starts_with("Root: pinset://"));
    assert!(output.contains("beta"));
    assert!(!output.contains("alpha"));
    cli.close();
}

#[test]
fn reset_and_usage_contract() {
    let temp_dir = TempDir::new().unwrap();
    let cli = open(&temp_dir);
    let cid = put(&cli, &temp_dir, "big.bin", &"x".repeat(4096));
    cli.execute(&Commands::Pin {
        name: "big".to_string(),
        cid,
        wait: Some(30),
    })
    .unwrap();

    let usage = |cli: &CliContext| -> u64 {
        let output = cli
            .execute(&Commands::Usage {
                format: "json".to_string(),
            })
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["limit"].as_u64(), Some(500_000_000));
        parsed["used"].as_u64().unwrap()
    };
    assert!(usage(&cli) > 4096);

    let output = cli.execute(&Commands::Reset).unwrap();
    assert!(output.starts_with("Reset bucket"));
    assert!(usage(&cli) < 4096);

    let text = cli
        .execute(&Commands::Usage {
            format: "text".to_string(),
        })
        .unwrap();
    assert!(text.contains("/ 500000000 bytes"));
    cli.close();
}

#[test]
fn pin_rejects_empty_content_id() {
    let temp_dir = TempDir::new().unwrap();
    let cli = open(&temp_dir);
    let result = cli.execute(&Commands::Pin {
        name: "a".to_string(),
        cid: "pinset://".to_string(),
        wait: None,
    });
    assert!(result.is_err());
    cli.close();
}
