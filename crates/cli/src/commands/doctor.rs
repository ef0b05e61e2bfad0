//! `duet doctor` — Diagnose configuration and credentials.

use std::path::{Path, PathBuf};

use duet_agent::SessionOptions;
use duet_config::AppConfig;
use duet_core::Provider;
use duet_document::{Validator, persist};

use super::load_config;

pub async fn run(config_path: Option<&Path>, ping: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Duet Doctor — System Diagnostics");
    println!("===================================\n");

    let mut issues = 0;

    println!("  ✅ Rust binary running");

    // Check config
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    if path.exists() {
        println!("  ✅ Config file found: {}", path.display());
    } else {
        println!("  ⚠️  No config file at {} — using defaults (`duet init --with-config` writes one)", path.display());
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!();
            println!("  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    // Check API key
    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key configured — set DUET_API_KEY or ANTHROPIC_API_KEY");
        issues += 1;
    }
    println!("  ✅ Model: {}", config.model);
    println!(
        "  ✅ Reload policy: {}",
        if config.reload.atomic_commit { "atomic commit" } else { "commit, then reload" }
    );

    // Check the default document
    let document = PathBuf::from(&config.document.path);
    if document.exists() {
        let options = SessionOptions::from_config(&config);
        match persist::load(&document).await {
            Ok(text) => match Validator::new(options.layout).validate(&text) {
                Ok(_) => println!("  ✅ Document valid: {}", document.display()),
                Err(e) => {
                    println!("  ❌ Document {}: {} — {e}", document.display(), e.kind());
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ Document unreadable: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ⚠️  No document at {} — `duet init {}` writes one", document.display(), document.display());
    }

    // Reach the provider
    if ping {
        match duet_providers::build_from_config(&config) {
            Some(provider) => match provider.health_check().await {
                Ok(true) => println!("  ✅ Provider '{}' reachable", provider.name()),
                Ok(false) => {
                    println!("  ❌ Provider '{}' rejected the API key", provider.name());
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Provider '{}' unreachable: {e}", provider.name());
                    issues += 1;
                }
            },
            None => println!("  ⚠️  Skipping ping: no API key"),
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
