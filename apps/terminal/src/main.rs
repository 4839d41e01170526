use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    config::DEFAULT_CONFIG_FILE, load_settings, ChatClient, ChatError, ChatEvent, StreamPhase,
};
use shared::protocol::AssistantFile;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;

use render::{write_files, ResponseView};

#[derive(Parser, Debug)]
#[command(about = "Interactive client for a streaming assistant chat backend")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Overrides the backend URL from the config file and environment.
    #[arg(long)]
    backend_url: Option<String>,
    /// Per-response deadline in seconds, 0 disables it.
    #[arg(long)]
    stream_timeout_seconds: Option<u64>,
    /// Print the assistant's files and exit.
    #[arg(long)]
    list_files: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    if let Some(backend_url) = args.backend_url {
        settings.backend_url = backend_url;
    }
    if let Some(seconds) = args.stream_timeout_seconds {
        settings.stream_timeout_seconds = Some(seconds);
    }
    let client = ChatClient::from_settings(&settings).context("failed to build chat client")?;

    match client.check_assistant().await {
        Ok(assistant) if assistant.exists => {
            println!("Connected to assistant {}", assistant.assistant_name);
        }
        Ok(_) => bail!("Please create an Assistant"),
        Err(error) => {
            warn!(%error, "assistant check failed");
            bail!("Error connecting to the Assistant");
        }
    }

    let mut files = fetch_files(&client).await;
    if args.list_files {
        print_files(&files)?;
        return Ok(());
    }

    let (interrupt_tx, mut interrupts) = mpsc::unbounded_channel();
    tokio::spawn(interrupt_handler(interrupt_tx));

    println!("Type a message, /files, /bootstrap or /quit. Ctrl-C stops a reply.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = interrupts.recv() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        match line.trim() {
            "" => {}
            "/quit" | "/exit" => break,
            "/files" => {
                files = fetch_files(&client).await;
                print_files(&files)?;
            }
            "/bootstrap" => match client.trigger_bootstrap().await {
                Ok(response) if response.success => println!("Bootstrap started."),
                Ok(_) => println!("Bootstrap was not accepted."),
                Err(error) => eprintln!("Bootstrap failed: {error}"),
            },
            message => {
                let known = files.as_deref().unwrap_or_default();
                converse(&client, message, known, &mut interrupts, &mut io::stdout()).await?;
            }
        }
        prompt()?;
    }

    info!("input closed, exiting");
    Ok(())
}

/// Sends one message and renders its events until the turn is sealed.
///
/// An interrupt arriving before the request is registered is held until the
/// client reports `Sending`, then cancels that stream.
async fn converse(
    client: &Arc<ChatClient>,
    message: &str,
    files: &[AssistantFile],
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    out: &mut impl Write,
) -> Result<()> {
    let mut events = client.subscribe_events();
    let mut view = ResponseView::new(files);
    let mut interrupted = false;

    let send = client.send_message(message);
    tokio::pin!(send);
    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            Ok(event) = events.recv() => {
                if interrupted && matches!(event, ChatEvent::PhaseChanged(StreamPhase::Sending)) {
                    interrupted = !client.cancel().await;
                }
                view.apply(event, out)?;
            }
            Some(()) = interrupts.recv() => {
                interrupted = !client.cancel().await;
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        view.apply(event, out)?;
    }

    if let Err(error) = result {
        if !error.is_user_visible() {
            eprintln!("{error}");
        }
    }
    client.acknowledge().await;
    Ok(())
}

/// Forwards every Ctrl-C to the shell loop.
async fn interrupt_handler(interrupts: mpsc::UnboundedSender<()>) {
    loop {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "cannot listen for interrupts");
            return;
        }
        if interrupts.send(()).is_err() {
            return;
        }
    }
}

async fn fetch_files(client: &ChatClient) -> Result<Vec<AssistantFile>, ChatError> {
    let files = client.list_assistant_files().await;
    if let Err(error) = &files {
        warn!(%error, "listing assistant files failed");
    }
    files
}

fn print_files(files: &Result<Vec<AssistantFile>, ChatError>) -> Result<()> {
    let mut stdout = io::stdout();
    match files {
        Ok(files) => write_files(&mut stdout, files)?,
        Err(ChatError::Assistant(message)) => writeln!(stdout, "{message}")?,
        Err(_) => writeln!(stdout, "Error fetching assistant files")?,
    }
    Ok(())
}

fn prompt() -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
