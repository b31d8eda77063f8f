//! `hacxgent` — interactive chat mode.

use futures::StreamExt;
use hacxgent_agent::{AgentEvent, AgentLoop, ApprovalDecision, reload_mcp};
use std::error::Error;
use std::future::Future;
use std::io::Write;
use std::process::ExitCode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

use super::setup::{self, Resume};
use crate::Cli;

type Input = Lines<BufReader<Stdin>>;

pub async fn run(cli: &Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config = setup::load_config(cli)?;
    let mut runtime = setup::prepare(&config, &Resume::from_cli(cli)).await?;

    let tools = runtime.agent.executor().registry().names();
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Hacxgent — Interactive Mode           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", runtime.agent.model().alias());
    println!("  Agent:     {}", config.agent);
    println!("  Tools:     {}", tools.join(", "));
    let seeded = runtime.agent.conversation().len().saturating_sub(1);
    if seeded > 0 {
        println!("  Resumed:   {seeded} messages");
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C interrupts a turn; '/reload' restarts tool servers;");
    println!("  'exit' or Ctrl+D quits.");
    println!();

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = cli.initial_prompt.clone();

    loop {
        let line = match pending.take() {
            Some(line) => line,
            None => {
                print!("  You > ");
                std::io::stdout().flush()?;
                tokio::select! {
                    line = input.next_line() => match line? {
                        Some(line) => line,
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if line == "/reload" {
            reload(cli, &mut runtime).await?;
            continue;
        }
        converse(&mut runtime.agent, line, &mut input).await?;
    }

    println!();
    if let Some(id) = runtime.resumable_id().await {
        println!("  To continue this session, run: hacxgent --continue");
        println!("  Or: hacxgent --resume {id}");
        println!();
    }
    runtime.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Drive one submission to its final event.
async fn converse(agent: &mut AgentLoop, text: &str, input: &mut Input) -> std::io::Result<()> {
    let handle = agent.handle();
    let mut renderer = Renderer::default();
    let events = agent.submit(text);
    futures::pin_mut!(events);

    loop {
        let event = tokio::select! {
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                continue;
            }
        };

        let out = renderer.render(&event);
        print!("{out}");
        std::io::stdout().flush()?;

        if let AgentEvent::ApprovalRequired { id, .. } = &event {
            let interrupt = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            match read_decision(input, interrupt).await? {
                Some(decision) => {
                    handle.approve(id, decision);
                }
                None => {
                    println!();
                    handle.cancel();
                }
            }
        }
    }
    Ok(())
}

/// Wait for the answer to an approval prompt; `None` if `interrupt` fires
/// first.
async fn read_decision<R>(
    input: &mut Lines<R>,
    interrupt: impl Future<Output = ()>,
) -> std::io::Result<Option<ApprovalDecision>>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = input.next_line() => Ok(Some(parse_decision(&line?.unwrap_or_default()))),
        _ = interrupt => Ok(None),
    }
}

/// Re-read the config and restart the remote tool servers.
async fn reload(cli: &Cli, runtime: &mut setup::Runtime) -> Result<(), Box<dyn Error>> {
    let config = match setup::load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            println!("  [Error] {e}\n");
            return Ok(());
        }
    };
    let cwd = std::env::current_dir()?;
    let failures = reload_mcp(&config, &cwd, &runtime.mcp, &mut runtime.agent).await;
    for (server, error) in &failures {
        println!("  [Error] {server}: {error}");
    }
    let tools = runtime.agent.executor().registry().names();
    println!("  Tools:     {}\n", tools.join(", "));
    Ok(())
}

/// y / yes approves once, a / always stops asking for this tool; anything
/// else denies.
fn parse_decision(answer: &str) -> ApprovalDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approve,
        "a" | "always" => ApprovalDecision::ApproveAlways,
        _ => ApprovalDecision::Deny(None),
    }
}

/// Turns events into terminal text, tracking whether the assistant's
/// answer is mid-line.
#[derive(Default)]
struct Renderer {
    streaming: bool,
}

impl Renderer {
    fn render(&mut self, event: &AgentEvent) -> String {
        if let AgentEvent::Chunk { content } = event {
            let prefix = if self.streaming { "" } else { "\n  Assistant > " };
            self.streaming = true;
            return format!("{prefix}{content}");
        }

        let mut out = String::new();
        if self.streaming {
            out.push('\n');
            self.streaming = false;
        }
        match event {
            AgentEvent::Chunk { .. } | AgentEvent::Reasoning { .. } | AgentEvent::Committed { .. } => {}
            AgentEvent::ToolCall {
                name, arguments, ..
            } => out.push_str(&format!("  ⚙ {name}({})\n", preview(arguments, 120))),
            AgentEvent::ApprovalRequired {
                name, arguments, ..
            } => out.push_str(&format!(
                "  Allow {name}({})? [y]es / [n]o / [a]lways > ",
                preview(arguments, 200)
            )),
            AgentEvent::ToolProgress { message, .. } => {
                out.push_str(&format!("    … {message}\n"))
            }
            AgentEvent::ToolResult {
                name,
                output,
                success,
                ..
            } => {
                let mark = if *success { "✓" } else { "✗" };
                out.push_str(&format!("    {mark} {name}: {}\n", preview(output, 120)));
            }
            AgentEvent::Compacted {
                replaced_messages,
                tokens_before,
                tokens_after,
                ..
            } => out.push_str(&format!(
                "  (compacted {replaced_messages} messages: ~{tokens_before} → ~{tokens_after} tokens)\n"
            )),
            AgentEvent::Done {
                turns, usage, cost, ..
            } => out.push_str(&format!(
                "\n  [{turns} turns · {} tokens · ${cost:.4}]\n\n",
                usage.total()
            )),
            AgentEvent::LimitReached { reason } => out.push_str(&format!("\n  [Limit] {reason}\n\n")),
            AgentEvent::Cancelled => out.push_str("\n  Interrupted; the turn was discarded.\n\n"),
            AgentEvent::Error { message } => out.push_str(&format!("\n  [Error] {message}\n\n")),
        }
        out
    }
}

/// First line of `text`, cut to `max` characters.
fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max).collect();
        format!("{cut}…")
    } else if text.lines().nth(1).is_some() {
        format!("{line} …")
    } else {
        line.to_string()
    }
}
