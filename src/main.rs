use std::path::PathBuf;

use tracing::{info, warn};

use cameo_pilot::core::config::Config;
use cameo_pilot::{preflight, runner};

struct CliArgs {
    check: bool,
    headless: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let mut parsed = CliArgs {
        check: false,
        headless: false,
        config: None,
    };
    let mut args = std::env::args().skip(1).peekable();
    while let Some(a) = args.next() {
        match a.as_str() {
            "--check" => parsed.check = true,
            "--headless" => parsed.headless = true,
            "--config" => {
                if let Some(v) = args.next() {
                    parsed.config = Some(PathBuf::from(v));
                }
            }
            other => {
                if let Some(rest) = other.strip_prefix("--config=") {
                    parsed.config = Some(PathBuf::from(rest));
                }
            }
        }
    }
    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = parse_args();
    let mut cfg = Config::load(args.config.as_deref());
    if args.headless {
        cfg.headless = true;
    }

    // Checklist-only mode: print the report and exit.
    if args.check {
        let report = preflight::check_all(&cfg);
        println!("{report}");
        if report.has_failures() {
            std::process::exit(2);
        }
        return Ok(());
    }

    let report = preflight::check_all(&cfg);
    info!("{}", report.summarize_for_logs());
    if report.has_failures() {
        warn!("preflight found failures; run with --check for remediation details");
    }

    let summary = runner::run(&cfg).await?;
    println!(
        "{} task(s) processed: {} completed, {} failed",
        summary.fetched, summary.completed, summary.failed
    );
    Ok(())
}
