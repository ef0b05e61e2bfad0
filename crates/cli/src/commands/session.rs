//! `duet session` — the interactive loop over one document.

use std::io::Write;
use std::path::{Path, PathBuf};

use duet_agent::{
    CollaboratorGateway, GatewayReply, InvokeOutcome, PendingInvoke, Session, SessionCommand,
    SessionOptions,
};
use duet_document::persist;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use super::load_config;

enum Flow {
    Continue,
    Quit,
}

pub async fn run(config_path: Option<&Path>, file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let path = file.unwrap_or_else(|| PathBuf::from(&config.document.path));
    let options = SessionOptions::from_config(&config).with_path(&path);

    let text = if path.exists() {
        persist::load(&path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?
    } else {
        info!(path = %path.display(), "No document yet, starting from a blank one");
        options.layout.blank()
    };
    debug!(path = %path.display(), bytes = text.len(), "Document loaded");

    let gateway = CollaboratorGateway::from_config(&config);
    let mut session = Session::open(text, options, gateway)
        .map_err(|e| format!("{}: structure broken: {e}", path.display()))?;

    let _autosave = config
        .document
        .autosave
        .then(|| persist::spawn_autosave(session.events(), path.clone()));

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║            Duet — Interactive Session        ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Document:  {}", path.display());
    println!("  Model:     {}", config.model);
    println!("  Kernel:    generation {} ({})", session.generation(), session.reload_state());
    println!("  Autosave:  {}", if config.document.autosave { "on" } else { "off" });
    println!();
    if !session.gateway().has_credential() {
        println!("  ⚠️  No API key configured — :invoke will fail until DUET_API_KEY or");
        println!("     ANTHROPIC_API_KEY is set.");
        println!();
    }
    for turn in session.log().pending() {
        println!("  {} > {}", turn.origin(), turn.text());
    }
    println!("  Type a note and press Enter, or :help for commands.");
    println!();

    let mut saved = session.text().to_string();
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut pending: Option<PendingInvoke> = None;

    prompt(&session)?;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match SessionCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(command)) => {
                        if let Flow::Quit = handle(&mut session, &mut pending, &mut saved, command).await {
                            break;
                        }
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                }
                prompt(&session)?;
            }
            reply = wait(&mut pending), if pending.is_some() => {
                pending = None;
                let outcome = session.finish(reply);
                print_outcome(&outcome);
                prompt(&session)?;
            }
        }
    }

    session.quit();
    if let Some(p) = pending.take() {
        p.abort();
        let reply = p.await;
        session.finish(reply);
    }

    if !config.document.autosave && (session.text() != saved || session.log().has_pending()) {
        println!("  ⚠️  Unsaved changes were not written (use :save).");
    }
    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}

async fn wait(pending: &mut Option<PendingInvoke>) -> GatewayReply {
    match pending.as_mut() {
        Some(p) => p.await,
        None => std::future::pending().await,
    }
}

fn prompt(session: &Session) -> std::io::Result<()> {
    if session.is_busy() {
        print!("  You (waiting) > ");
    } else {
        print!("  You > ");
    }
    std::io::stdout().flush()
}

async fn handle(
    session: &mut Session,
    pending: &mut Option<PendingInvoke>,
    saved: &mut String,
    command: SessionCommand,
) -> Flow {
    match command {
        SessionCommand::Invoke => match session.invoke() {
            Ok(p) => {
                println!("  ... asking the collaborator (ticket {})", p.ticket());
                *pending = Some(p);
            }
            Err(e) => eprintln!("  ❌ {e}"),
        },
        SessionCommand::Save => match session.save().await {
            Ok(Some(path)) => {
                *saved = session.text().to_string();
                println!("  ✅ Saved {}", path.display());
            }
            Ok(None) => println!("  Nothing to write: the session has no path"),
            Err(e) => eprintln!("  ❌ Save failed: {e}"),
        },
        SessionCommand::Reload => match session.reload() {
            Ok(generation) => println!("  ✅ Reloaded (generation {generation})"),
            Err(e) => eprintln!("  ❌ Reload failed: {e}"),
        },
        SessionCommand::Quit => return Flow::Quit,
        SessionCommand::Call(expression) => match session.eval(&expression) {
            Ok(invocation) => {
                for line in &invocation.output {
                    println!("  | {line}");
                }
                println!("  = {}", invocation.value.repr());
            }
            Err(e) => eprintln!("  ❌ {e}"),
        },
        SessionCommand::Show => {
            println!();
            for line in session.working_text().lines() {
                println!("  {line}");
            }
            println!();
        }
        SessionCommand::Submit(path) => match persist::load(&path).await {
            Ok(text) => match session.submit(&text) {
                Ok(report) => {
                    println!("  ✅ Committed {}", path.display());
                    if let Some(generation) = report.generation {
                        println!("  ✅ Kernel reloaded (generation {generation})");
                    }
                    if let Some(e) = report.reload_error {
                        println!("  ⚠️  Kernel committed but not loaded: {e}");
                    }
                }
                Err(e) => eprintln!("  ❌ {e}"),
            },
            Err(e) => eprintln!("  ❌ Failed to read {}: {e}", path.display()),
        },
        SessionCommand::Status => {
            let status = session.status();
            println!("  Kernel:      generation {} ({})", status.generation, status.reload_state);
            println!("  Bindings:    {}", status.bindings.join(", "));
            println!("  Turns:       {} ({} pending)", status.turns, status.pending_turns);
            match status.in_flight {
                Some(ticket) => println!("  In flight:   ticket {ticket}"),
                None => println!("  In flight:   none"),
            }
            if let Some(error) = &status.last_error {
                println!("  Last error:  {error}");
            }
            println!(
                "  Credential:  {}",
                if status.has_credential { "configured" } else { "missing" }
            );
        }
        SessionCommand::Help => {
            for (usage, what) in SessionCommand::help() {
                println!("  {usage:<16} {what}");
            }
        }
        SessionCommand::Note(text) => {
            session.note(&text);
            println!("  noted ({} pending)", session.log().pending().len());
        }
    }
    Flow::Continue
}

fn print_outcome(outcome: &InvokeOutcome) {
    match outcome {
        InvokeOutcome::Applied {
            edits,
            message,
            report,
        } => {
            if !message.trim().is_empty() {
                println!();
                for line in message.lines() {
                    println!("  Collaborator > {line}");
                }
                println!();
            }
            println!("  ✅ Applied {edits} edit(s)");
            if let Some(generation) = report.generation {
                println!("  ✅ Kernel reloaded (generation {generation})");
            }
            if let Some(e) = &report.reload_error {
                println!("  ⚠️  Kernel committed but not loaded: {e}");
            }
        }
        InvokeOutcome::Rejected { kind, reason } => {
            println!("  ❌ {kind}: {reason}");
        }
        InvokeOutcome::Discarded => println!("  (stale reply discarded)"),
    }
}
