use anyhow::Result;
use console::style;
use std::io::{BufRead, Write};
use std::sync::Arc;
use switchboard_core::{HumanRequest, Outbound, Session};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Reads stdin on its own thread so a pending read never holds up
/// runtime shutdown. The receiver yields `None` at EOF.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn prompt(label: &str) {
    print!("{} ", style(label).cyan().bold());
    let _ = std::io::stdout().flush();
}

fn show_request(request: &HumanRequest) {
    println!();
    println!(
        "{} {}",
        style("[operator]").yellow().bold(),
        style(format!("session {}", request.session)).dim()
    );
    println!("  {}", request.latest_text().unwrap_or("(no message)"));
}

fn deliver(request: HumanRequest, answer: String) {
    let session = request.session.clone();
    if !request.answer(answer) {
        tracing::warn!(session = %session, "Session went away before the operator answered");
    }
}

fn show_outbound(outbound: Outbound) {
    match outbound {
        Outbound::Reply { agent, text } => {
            println!();
            println!("{} {}", style(format!("{agent}:")).green().bold(), text);
            println!();
        }
        Outbound::Failed { reason } => {
            eprintln!();
            eprintln!("{} {}", style("error:").red().bold(), reason);
            eprintln!();
        }
    }
}

/// Answers human-agent escalations from stdin while the server runs.
pub async fn run_operator(mut requests: mpsc::Receiver<HumanRequest>, shutdown: CancellationToken) {
    let mut lines = stdin_lines();

    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        show_request(&request);
        prompt("operator>");

        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => line,
        };
        match line {
            Some(answer) => deliver(request, answer.trim().to_string()),
            None => {
                tracing::warn!("Operator console closed; escalations will go unanswered");
                break;
            }
        }
    }
}

/// Interactive single-session chat. Escalations to the human agent are
/// answered inline from the same terminal.
pub async fn run_chat(
    session: Arc<Session>,
    mut requests: mpsc::Receiver<HumanRequest>,
) -> Result<()> {
    let mut lines = stdin_lines();

    println!("{}", style("switchboard").cyan().bold());
    println!("Type your message (Ctrl+D or 'exit' to quit):");
    println!();

    loop {
        prompt(">");
        let Some(line) = lines.recv().await else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        session.send(input).await?;

        loop {
            tokio::select! {
                outbound = session.recv() => {
                    match outbound {
                        Some(outbound) => show_outbound(outbound),
                        None => return Ok(()),
                    }
                    break;
                }
                Some(request) = requests.recv() => {
                    show_request(&request);
                    prompt("you (as operator)>");
                    match lines.recv().await {
                        Some(answer) => deliver(request, answer.trim().to_string()),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    println!();
    println!("Goodbye!");
    Ok(())
}
