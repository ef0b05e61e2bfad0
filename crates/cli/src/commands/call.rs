//! `duet call` — Load a document's kernel and call one function.

use std::path::Path;

use duet_agent::SessionOptions;
use duet_document::{Validator, persist};
use duet_kernel::KernelInstance;

use super::load_config;

pub async fn run(
    config_path: Option<&Path>,
    path: &Path,
    name: &str,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let options = SessionOptions::from_config(&config);

    let text = persist::load(path)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let doc = Validator::new(options.layout.clone()).validate(&text)?;
    let instance = KernelInstance::load(doc.kernel_text(), &options.load)?;

    if !instance.bindings().get(name).is_some_and(|v| v.is_callable()) {
        return Err(format!("kernel does not define a function named '{name}'").into());
    }

    let invocation = instance.eval(&call_expression(name, args))?;
    for line in &invocation.output {
        println!("{line}");
    }
    println!("{}", invocation.value.repr());
    Ok(())
}

/// Arguments are kernel literals, so the call is just an expression.
fn call_expression(name: &str, args: &[String]) -> String {
    format!("{name}({})", args.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_call_expression() {
        assert_eq!(call_expression("f", &[]), "f()");
        assert_eq!(
            call_expression("add", &["1".into(), "\"x\"".into()]),
            "add(1, \"x\")"
        );
    }
}
