//! Command-line tarot readings.
//!
//! Reads a reading request as JSON from a file or stdin and prints the
//! response JSON to stdout. Logs go to stderr.
//!
//! ```bash
//! cargo run -p tarot -- request.json
//! echo '{"layout":"three-card","spread":[...],"question":"..."}' | cargo run -p tarot
//! cargo run -p tarot -- --stream request.json
//! ```

use anyhow::{Context, Result};
use std::io::{self, Read, Write};
use tarot_core::backend::StreamChunk;
use tarot_core::{ReadingConfig, ReadingRequest, ReadingService};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

struct Args {
    input: Option<String>,
    stream: bool,
    print_config: bool,
}

fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut parsed = Args {
        input: None,
        stream: false,
        print_config: false,
    };
    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--stream" => parsed.stream = true,
            "--print-config" => parsed.print_config = true,
            "-" => parsed.input = None,
            flag if flag.starts_with('-') => anyhow::bail!("unknown option: {flag}"),
            path => parsed.input = Some(path.to_string()),
        }
    }
    Ok(Some(parsed))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(args) = parse_args(&args)? else {
        print_help();
        return Ok(());
    };

    let config = ReadingConfig::from_env()
        .await
        .context("failed to load configuration")?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let request = read_request(args.input.as_deref()).await?;
    let service = ReadingService::from_config(&config).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling reading");
            on_interrupt.cancel();
        }
    });

    if args.stream {
        let (tx, mut rx) = mpsc::channel(32);
        let printer = tokio::spawn(async move {
            let mut stdout = io::stdout();
            while let Some(chunk) = rx.recv().await {
                match chunk {
                    StreamChunk::Delta(text) => {
                        let _ = write!(stdout, "{text}");
                        let _ = stdout.flush();
                    }
                    StreamChunk::Restart { next_backend } => {
                        let _ = writeln!(stdout);
                        eprintln!("[restarting with {next_backend}]");
                    }
                }
            }
            let _ = writeln!(stdout);
        });
        let response = service.read_streaming(request, &cancel, tx).await;
        printer.await.context("stream printer failed")?;
        let response = response?;
        eprintln!(
            "[provider: {}, request: {}{}]",
            response.provider,
            response.request_id,
            response
                .block_reason
                .as_deref()
                .map(|r| format!(", blocked: {r}"))
                .unwrap_or_default()
        );
        return Ok(());
    }

    let response = service.read(request, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn read_request(path: Option<&str>) -> Result<ReadingRequest> {
    let json = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {path}"))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read request from stdin")?;
            buf
        }
    };
    serde_json::from_str(&json).context("request is not valid JSON")
}

fn print_help() {
    println!("tarot - tarot readings from the command line");
    println!();
    println!("USAGE:");
    println!("  tarot [OPTIONS] [REQUEST.json]");
    println!();
    println!("Reads the request from stdin when no file is given.");
    println!();
    println!("OPTIONS:");
    println!("  --stream        Print the reading as it is generated");
    println!("  --print-config  Print the effective configuration and exit");
    println!("  -h, --help      Show this help");
    println!();
    println!("ENVIRONMENT:");
    println!("  ANTHROPIC_API_KEY     Enables the Claude backend and model judge");
    println!("  OPENAI_API_KEY        Enables the OpenAI fallback backend");
    println!("  TAROT_CONFIG          JSON configuration file");
    println!("  TAROT_EVAL_GATE       true/false");
    println!("  TAROT_EVAL_MODE       rule_based or model");
    println!("  TAROT_ON_EVAL_ERROR   fail_open or fail_closed");
    println!("  TAROT_PROMPT_SLIMMING true/false");
    println!("  TAROT_METRICS_PATH    JSONL file for metrics records");
    println!("  RUST_LOG              Log filter (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("tarot")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(&args(&["--stream", "req.json"])).unwrap().unwrap();
        assert!(parsed.stream);
        assert!(!parsed.print_config);
        assert_eq!(parsed.input.as_deref(), Some("req.json"));

        assert!(parse_args(&args(&["--help"])).unwrap().is_none());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&[])).unwrap().unwrap().input.is_none());
    }
}
