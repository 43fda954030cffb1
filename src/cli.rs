//! Interactive and batch front-ends over the agent.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::agent::{Agent, AgentEvent};
use crate::context::AnalysisReport;

/// What a REPL input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Quit,
    Clear,
    Status,
    Tools,
    Request(String),
    Empty,
}

/// Maps one input line to a command; anything unrecognized is a request.
pub fn parse_line(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "" => ReplCommand::Empty,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        "clear" => ReplCommand::Clear,
        "status" => ReplCommand::Status,
        "tools" => ReplCommand::Tools,
        _ => ReplCommand::Request(trimmed.to_string()),
    }
}

/// Extracts runnable requests from a batch file: one per line, blank lines
/// and `#` comments skipped.
pub fn batch_requests(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

const HELP: &str = "\
Commands:
  help     show this help
  tools    list available tools
  status   show agent status
  clear    clear the screen
  quit     exit

Anything else is executed as an analysis request.";

/// Console event printer, suitable as the agent's callback.
pub fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::Step { message } => println!("* {message}"),
        AgentEvent::ToolCall { tool, success } => {
            let mark = if success { "ok" } else { "failed" };
            println!("  [{mark}] {tool}");
        }
        AgentEvent::Decision { action, confidence } => {
            println!("  -> {action:?} ({:.0}%)", confidence * 100.0);
        }
        AgentEvent::Error { message } => eprintln!("error: {message}"),
    }
}

fn print_report(report: &AnalysisReport) {
    println!("\n{}", report.summary);
    println!(
        "steps: {} executed, {} failed, {:.1}s",
        report.steps_executed, report.steps_failed, report.duration_secs
    );
    for insight in &report.insights {
        println!("  {insight}");
    }
    for recommendation in &report.recommendations {
        println!("  hint: {recommendation}");
    }
    if let Some(error) = &report.error {
        println!("  error: {error}");
    }
    println!();
}

/// Reads requests from stdin until quit or EOF.
pub async fn run_repl(agent: Arc<Agent>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("memagent interactive mode, 'help' for commands");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_line(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Clear => print!("\x1b[2J\x1b[H"),
            ReplCommand::Status => println!("status: {:?}", agent.status()),
            ReplCommand::Tools => {
                for metadata in agent_tools(&agent) {
                    println!("  {metadata}");
                }
            }
            ReplCommand::Request(request) => {
                let report = agent.execute(&request).await;
                print_report(&report);
            }
        }
    }

    info!("interactive session ended");
    Ok(())
}

fn agent_tools(agent: &Agent) -> Vec<String> {
    agent
        .tool_listing()
        .into_iter()
        .map(|(name, description)| format!("{name}  {description}"))
        .collect()
}

/// Executes every request in a batch file. The reports go to `output` as one
/// JSON array when a path is given, otherwise to stdout.
pub async fn run_batch(
    agent: Arc<Agent>,
    contents: &str,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let requests = batch_requests(contents);
    info!(count = requests.len(), "running batch");

    let mut reports = Vec::with_capacity(requests.len());
    for request in &requests {
        reports.push(agent.execute(request).await);
    }

    let rendered = serde_json::to_string_pretty(&reports)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, rendered).await?;
            info!(path = %path.display(), "batch results written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
