//! Zentinel Request Stub - rule file checker
//!
//! Loads a rule file and reports which rule would claim each given URL.
//! No requests are sent.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_request_stub::config::EXAMPLE_CONFIG;
use zentinel_request_stub::{Outcome, Request, RequestStub, StubConfig};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-request-stub",
    about = "Check request stub rule files against URLs",
    version
)]
struct Args {
    /// Path to rule file
    #[arg(short, long, default_value = "request-stub.yaml")]
    config: PathBuf,

    /// URL to match against the rules (repeatable)
    #[arg(short, long)]
    url: Vec<String>,

    /// HTTP method of the checked requests
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "warn")]
    log_level: Level,

    /// Print an example rule file and exit
    #[arg(long)]
    print_config: bool,

    /// Validate the rule file and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        print!("{}", EXAMPLE_CONFIG);
        return Ok(());
    }

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    }
    info!(path = ?args.config, "Loading rules");
    let config = StubConfig::from_file(&args.config)?;

    if args.validate {
        println!("Configuration is valid ({} rules defined)", config.rules.len());
        return Ok(());
    }

    let stub = RequestStub::from_config(&config)?;
    for url in &args.url {
        let request = Request::new(args.method.as_str(), url.as_str());
        match stub.find_match(&request) {
            Some(result) => {
                let response = &result.response;
                let outcome = match &response.outcome {
                    Outcome::Success(body) => format!("{} body bytes", body.len()),
                    Outcome::Failure(error) => format!("failure: {}", error),
                };
                let delay = response
                    .delay
                    .map(|d| format!(" after {}ms", d.as_millis()))
                    .unwrap_or_default();
                println!(
                    "{} -> rule {} (status {}, {}{})",
                    url, result.source, response.status, outcome, delay
                );
            }
            None => println!("{} -> no match", url),
        }
    }

    Ok(())
}
