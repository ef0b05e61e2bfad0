//! `duet check` — Validate a document without running it.

use std::path::Path;

use duet_agent::SessionOptions;
use duet_document::{Validator, persist};
use duet_kernel::KernelInstance;

use super::load_config;

pub async fn run(config_path: Option<&Path>, path: &Path, load: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let options = SessionOptions::from_config(&config);

    let text = persist::load(path)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;

    let outcome = Validator::new(options.layout.clone()).check(&text);
    if let Some(error) = outcome.error {
        println!("  ❌ {} — {}: {error}", path.display(), error.kind());
        return Err(format!("{} failed validation", path.display()).into());
    }
    println!("  ✅ {} — structure and syntax valid", path.display());

    if load {
        let doc = options.layout.split(&text)?;
        match KernelInstance::load(doc.kernel_text(), &options.load) {
            Ok(instance) => {
                for line in instance.load_output() {
                    println!("  | {line}");
                }
                let names: Vec<&str> = instance.bindings().names().collect();
                println!("  ✅ Kernel loads — {} binding(s): {}", names.len(), names.join(", "));
            }
            Err(e) => {
                println!("  ❌ ReloadError: {e}");
                return Err(format!("{} kernel failed to load", path.display()).into());
            }
        }
    }

    Ok(())
}
