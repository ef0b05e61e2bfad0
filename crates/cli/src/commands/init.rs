//! `duet init` — Write a starter document.

use std::path::Path;

use duet_agent::SessionOptions;
use duet_config::AppConfig;
use duet_core::AnnotationTurn;
use duet_document::annotation::render_turn;
use duet_document::{DocumentLayout, Validator, persist};

use super::load_config;

const STARTER_KERNEL: &str = "\
# Everything above the separator is the kernel. It reloads after every edit.

def greet(name):
    return \"hello, \" + name
";

const STARTER_NOTE: &str = "New document. Write notes below, then :invoke to ask the collaborator.";

pub async fn run(
    config_path: Option<&Path>,
    path: &Path,
    force: bool,
    with_config: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🎼 Duet — New Document");
    println!("======================\n");

    if with_config {
        let config_dir = AppConfig::config_dir();
        let config_file = config_dir.join("config.toml");
        if config_file.exists() {
            println!("  Config file exists: {}", config_file.display());
        } else {
            std::fs::create_dir_all(&config_dir)?;
            std::fs::write(&config_file, AppConfig::default_toml())?;
            println!("✅ Created config file: {}", config_file.display());
        }
    }

    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }

    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let options = SessionOptions::from_config(&config);
    let text = starter_document(&options.layout);

    // The starter must pass the same gate every commit does
    Validator::new(options.layout).validate(&text)?;
    persist::save_atomic(path, &text).await?;
    println!("✅ Wrote {}", path.display());

    println!();
    println!("  Next steps:");
    println!("    duet session --file {}", path.display());
    println!("    duet call {} greet '\"world\"'", path.display());
    println!();

    Ok(())
}

fn starter_document(layout: &DocumentLayout) -> String {
    let note = render_turn(&AnnotationTurn::system(STARTER_NOTE), &layout.comment_prefix);
    layout.compose(STARTER_KERNEL.trim_end(), &format!("{note}\n"))
}
