//! `nexus turn` — process a single turn and print the result as JSON.

use nexus_config::GovernorConfig;

pub async fn run(
    config: GovernorConfig,
    user: &str,
    session: &str,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = super::build_orchestrator(&config)?;
    let result = orchestrator.process_turn(user, session, message, &[]).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.aborted {
        let reason = result.abort_reason.map(|r| r.as_str()).unwrap_or("unknown");
        return Err(format!("turn aborted: {reason}").into());
    }
    Ok(())
}
