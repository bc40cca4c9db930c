//! Practice English with LingoLift in the terminal.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use lingolift::core::{CancellationToken, Error as CoreError, Snapshot};
use lingolift::{SubmitError, Tutor, TutorBuilder, markdown};
use lingolift_gemini_model::{
    DEFAULT_BASE_URL, GeminiConfigBuilder, GeminiProvider,
};
use lingolift_model::{DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader, Stdin};
use tokio::select;
use tokio::signal::ctrl_c;

const BAR_CHAR: &str = "▎";

/// An English tutor for native Chinese speakers.
///
/// Send Chinese to get it paraphrased in English, or send English to get
/// your grammar checked. Type `/reset` to clear the conversation and
/// `/quit` to leave. Press Ctrl-C to stop a reply.
#[derive(Parser, Debug)]
#[command(name = "lingolift", version, about)]
struct Args {
    /// API key for the Gemini API (falls back to `API_KEY`)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model to chat with
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Sampling temperature
    #[arg(
        long,
        env = "LINGOLIFT_TEMPERATURE",
        default_value_t = DEFAULT_TEMPERATURE
    )]
    temperature: f32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let api_key = args
        .api_key
        .or_else(|| env::var("API_KEY").ok())
        .filter(|key| !key.is_empty())
        .context("GEMINI_API_KEY environment variable is not set")?;

    let config = GeminiConfigBuilder::with_api_key(api_key)
        .with_base_url(args.base_url)
        .build();
    let connect = move || GeminiProvider::new(config.clone());
    let mut tutor = TutorBuilder::with_connector(connect)
        .with_model(args.model)
        .with_temperature(args.temperature)
        .build();

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .context("invalid progress template")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let mut stdin = BufReader::new(io::stdin());
    print_last_turn(&tutor);

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = select! {
            line = read_line(&mut stdin) => line,
            _ = ctrl_c() => {
                // The pending stdin read would keep the runtime alive.
                println!();
                std::process::exit(0);
            }
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                tutor.reset();
                println!("{}\n", "Conversation cleared.".dimmed());
                print_last_turn(&tutor);
            }
            message => ask(&mut tutor, message, &progress_style).await,
        }
    }

    Ok(())
}

async fn ask(tutor: &mut Tutor, message: &str, style: &ProgressStyle) {
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(style.clone());
    progress_bar.set_message("🤔 Thinking...");
    progress_bar.enable_steady_tick(Duration::from_millis(100));

    let cancel = CancellationToken::new();
    let on_update = |snapshot: Snapshot| {
        // Only the line being written fits next to the spinner.
        let tail = snapshot.text().lines().last().unwrap_or_default();
        progress_bar.set_message(format!("✍️  {tail}"));
    };
    let result = {
        let submit = tutor.submit_with_cancel(message, on_update, &cancel);
        tokio::pin!(submit);
        select! {
            result = &mut submit => result,
            _ = ctrl_c() => {
                cancel.cancel();
                submit.await
            }
        }
    };
    progress_bar.finish_and_clear();

    if let Err(err) = &result {
        debug!("submission ended early: {err}");
    }
    print_last_turn(tutor);
    if matches!(result, Err(SubmitError::Core(CoreError::Cancelled))) {
        println!("{}\n", "(stopped)".dimmed());
    }
}

fn print_last_turn(tutor: &Tutor) {
    let Some(turn) = tutor.transcript().last() else {
        return;
    };
    let bar = BAR_CHAR.bright_cyan();
    for (idx, line) in markdown::render(turn.content()).lines().enumerate() {
        if idx == 0 {
            println!("{bar}🤖 {line}");
        } else {
            println!("{bar}   {line}");
        }
    }
    println!();
}

async fn read_line(stdin: &mut BufReader<Stdin>) -> Option<String> {
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
