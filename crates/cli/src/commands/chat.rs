//! `nexus chat` — interactive conversation.
//!
//! Each line is one turn. Successful turns are appended to the history that
//! travels with the next request; aborted turns are not.

use nexus_config::GovernorConfig;
use nexus_core::Message;
use nexus_governor::TurnResult;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    config: GovernorConfig,
    user: &str,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = super::build_orchestrator(&config)?;
    let session = session.unwrap_or_else(|| format!("chat-{}", std::process::id()));
    let keep = config.budget.history_messages();

    println!();
    println!("  nexus — interactive mode");
    println!();
    println!("  Provider:  {}", config.model.provider);
    println!("  Model:     {}", config.model.model);
    println!("  Budget:    {} tokens ({} reserved for output)", config.budget.total_tokens, config.budget.reserved_output);
    println!("  Memory:    {}", config.memory.backend);
    println!("  Session:   {session}");
    println!();
    println!("  Type your message and press Enter. Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(text, "exit" | "quit" | "/exit") {
            break;
        }

        let result = orchestrator.process_turn(user, &session, text, &history).await;
        print_result(&result);

        if !result.aborted {
            history.push(Message::user(text));
            history.push(Message::assistant(result.response_text.clone()));
            if history.len() > keep {
                history.drain(..history.len() - keep);
            }
        }
        prompt()?;
    }

    if let Some(engine) = orchestrator.telemetry() {
        let snap = engine.snapshot();
        println!();
        println!(
            "  {} turns, {} tokens, {} degradation events",
            snap.turns_total, snap.tokens_total, snap.degradation_events_total
        );
    }
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_result(result: &TurnResult) {
    println!();
    if result.aborted {
        eprintln!("  [Aborted: {}] {}", result.abort_reason.map(|r| r.as_str()).unwrap_or("unknown"), result.response_text);
        println!();
        return;
    }
    for line in result.response_text.lines() {
        println!("  Assistant > {line}");
    }
    if let Some(note) = &result.safety_annotation {
        println!("  [Note] {note}");
    }
    if result.is_degraded() {
        let failed: Vec<_> = result.failed_subsystems.iter().map(|s| s.as_str()).collect();
        println!("  [{}: {}]", result.degradation_mode, failed.join(", "));
    }
    println!(
        "  ({} prompt + {} completion tokens, {:.1}% of budget)",
        result.token_usage.prompt_tokens, result.token_usage.completion_tokens, result.token_usage.utilization_pct
    );
    println!();
}
