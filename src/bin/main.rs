use finance_automation_agents::{agent::Orchestrator, config::Settings, models::Task};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    let orchestrator = Orchestrator::from_settings(settings)?;

    info!("Finance automation orchestrator ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nEnter a task (or 'exit'/'quit'): ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let description = line.trim();
        if description.is_empty() {
            continue;
        }
        if is_exit_command(description) {
            break;
        }

        match orchestrator.execute_task(Task::new(description)).await {
            Ok(result) => {
                println!("\n=== {} AGENT ===", result.agent.to_string().to_uppercase());
                println!("Run ID: {}", result.run_id);
                println!("Status: {:?}", result.status);
                println!("Summary: {}", result.summary);
                println!("Risk Level: {}", result.risk_summary);
                println!("Compliance: {}", result.compliance_statement);
                println!("Audit ID: {}", result.audit_id);
                if !result.corrections.is_empty() {
                    println!("Corrections: {}", result.corrections.len());
                }
                println!("\nReasoning Trace:");
                for (i, trace) in result.reasoning_trace.iter().enumerate() {
                    println!("  {}: {}", i + 1, trace);
                }
            }
            Err(e) => {
                error!(error = %e, "Task failed");
                eprintln!("Task failed: {}", e);
            }
        }
    }

    info!("Goodbye");
    Ok(())
}

fn is_exit_command(input: &str) -> bool {
    ["exit", "quit"]
        .iter()
        .any(|command| input.trim().eq_ignore_ascii_case(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command(" QUIT "));
        assert!(!is_exit_command("quit payroll"));
        assert!(!is_exit_command("Run payroll"));
    }
}
