//! `hacxgent -p` — programmatic mode.
//!
//! Runs one prompt under the turn and price budgets, prints the result in
//! the requested format and exits non-zero when a budget stops the run.

use hacxgent_agent::{AgentEvent, Limits};
use hacxgent_core::error::Error as AgentError;
use hacxgent_core::message::Message;
use std::error::Error;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use super::setup::{self, Resume};
use crate::{Cli, OutputFormat};

pub async fn run(cli: &Cli, prompt: String) -> Result<ExitCode, Box<dyn Error>> {
    let prompt = if prompt.is_empty() {
        let mut input = String::new();
        tokio::io::stdin().read_to_string(&mut input).await?;
        input
    } else {
        prompt
    };
    if prompt.trim().is_empty() {
        return Err("No prompt given; pass text to -p or pipe it on stdin".into());
    }

    let config = setup::load_config(cli)?;
    let mut runtime = setup::prepare(&config, &Resume::from_cli(cli)).await?;
    let limits = Limits {
        max_turns: cli.max_turns,
        max_price: cli.max_price,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx, cli.output));

    let handle = runtime.agent.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let result = runtime.agent.run_programmatic(prompt, limits, &tx).await;
    interrupt.abort();
    drop(tx);
    let _ = printer.await;

    let code = match result {
        Ok(text) => {
            let messages = &runtime.agent.conversation().messages;
            match final_output(cli.output, &text, messages) {
                Ok(Some(out)) => {
                    println!("{out}");
                    ExitCode::SUCCESS
                }
                Ok(None) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: failed to render output: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(AgentError::Limit(limit)) => {
            eprintln!("{limit}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    };

    runtime.shutdown().await;
    Ok(code)
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<AgentEvent>, format: OutputFormat) {
    while let Some(event) = rx.recv().await {
        if let Some(line) = streamed_line(format, &event) {
            println!("{line}");
        }
    }
}

/// In streaming format every committed message becomes one JSON line.
fn streamed_line(format: OutputFormat, event: &AgentEvent) -> Option<String> {
    match (format, event) {
        (OutputFormat::Streaming, AgentEvent::Committed { message }) => {
            serde_json::to_string(message).ok()
        }
        _ => None,
    }
}

/// What to print once the run finished.
fn final_output(
    format: OutputFormat,
    text: &str,
    messages: &[Message],
) -> Result<Option<String>, serde_json::Error> {
    Ok(match format {
        OutputFormat::Text => Some(text.to_string()),
        OutputFormat::Json => Some(serde_json::to_string_pretty(messages)?),
        OutputFormat::Streaming => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(text: &str) -> AgentEvent {
        AgentEvent::Committed {
            message: Message::assistant(text),
        }
    }

    #[test]
    fn only_streaming_prints_committed_messages() {
        let line = streamed_line(OutputFormat::Streaming, &committed("done")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"], "done");

        assert!(streamed_line(OutputFormat::Text, &committed("done")).is_none());
        assert!(streamed_line(OutputFormat::Json, &committed("done")).is_none());
        let chunk = AgentEvent::Chunk {
            content: "do".into(),
        };
        assert!(streamed_line(OutputFormat::Streaming, &chunk).is_none());
    }

    #[test]
    fn final_output_per_format() {
        let messages = vec![Message::user("hi"), Message::assistant("hello")];

        let text = final_output(OutputFormat::Text, "hello", &messages).unwrap();
        assert_eq!(text.as_deref(), Some("hello"));

        let json = final_output(OutputFormat::Json, "hello", &messages)
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[1]["content"], "hello");

        assert!(
            final_output(OutputFormat::Streaming, "hello", &messages)
                .unwrap()
                .is_none()
        );
    }
}
