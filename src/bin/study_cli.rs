//! study-cli — 配置校验、限额查看与限流模拟的命令行工具
//!
//! Usage:
//!   study-cli validate [--config <path>]                     Validate a configuration file
//!   study-cli limits [--config <path>]                       Show effective limits
//!   study-cli simulate <service> <count> [--config <path>]   Replay checks at one instant

use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use study_companion::config::{StudyConfig, CONFIG_ENV};
use study_companion::resilience::{RateLimiter, DEFAULT_SERVICE};
use study_companion::{telemetry, Clock, ManualClock, SystemClock};

const SIMULATED_CLIENT: &str = "simulated-client";

fn main() {
    telemetry::init_tracing_with("warn");
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "validate" => cmd_validate(&args[2..]),
        "limits" => cmd_limits(&args[2..]),
        "simulate" => cmd_simulate(&args[2..]),
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"study-cli — study companion 命令行工具

USAGE:
    study-cli <COMMAND> [OPTIONS]

COMMANDS:
    validate [--config <path>]                    Validate a YAML configuration
    limits [--config <path>]                      Show rate limits and breaker settings
    simulate <service> <count> [--config <path>]  Run <count> checks at one instant
    version                                       Show version information
    help                                          Show this help message

ENVIRONMENT:
    {CONFIG_ENV}                Configuration file used when --config is absent
    RUST_LOG                              Log filter (default: warn)"#
    );
}

fn cmd_version() {
    println!("study-cli {}", env!("CARGO_PKG_VERSION"));
}

/// `--config <path>` if given; the remaining arguments are returned positionally.
fn split_config_flag(args: &[String]) -> anyhow::Result<(Option<PathBuf>, Vec<&str>)> {
    let mut path = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let value = iter.next().ok_or_else(|| anyhow!("--config requires a path"))?;
            path = Some(PathBuf::from(value));
        } else {
            rest.push(arg.as_str());
        }
    }
    Ok((path, rest))
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<StudyConfig> {
    match path {
        Some(p) => StudyConfig::from_path(&p)
            .with_context(|| format!("loading configuration from {}", p.display())),
        None => StudyConfig::from_env().context("loading configuration"),
    }
}

fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let (path, _) = split_config_flag(args)?;
    let label = path
        .as_ref()
        .map(|p| p.display().to_string())
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| "<defaults>".to_string());
    load_config(path)?;
    println!("{label}: OK");
    Ok(())
}

fn cmd_limits(args: &[String]) -> anyhow::Result<()> {
    let (path, _) = split_config_flag(args)?;
    let cfg = load_config(path)?;

    println!("=== Rate Limits ===");
    let mut services: Vec<&String> = cfg.rate_limits.services.keys().collect();
    services.sort();
    for name in services {
        let limit = cfg.rate_limits.limit_for(name);
        println!(
            "  {name:<16} {:>6} requests / {}s",
            limit.max_requests, limit.window_seconds
        );
    }
    let default = &cfg.rate_limits.default;
    println!(
        "  {:<16} {:>6} requests / {}s",
        format!("({DEFAULT_SERVICE}, default)"),
        default.max_requests,
        default.window_seconds
    );
    println!(
        "  tracked keys: at most {}, idle after {}s",
        cfg.rate_limits.max_keys, cfg.rate_limits.idle_ttl_seconds
    );

    println!("\n=== Circuit Breaker ===");
    let breaker = &cfg.circuit_breaker.defaults;
    println!(
        "  default          threshold {}, timeout {}s",
        breaker.failure_threshold, breaker.timeout_seconds
    );
    let mut overrides: Vec<_> = cfg.circuit_breaker.overrides.iter().collect();
    overrides.sort_by(|a, b| a.0.cmp(b.0));
    for (name, s) in overrides {
        println!(
            "  {name:<16} threshold {}, timeout {}s",
            s.failure_threshold, s.timeout_seconds
        );
    }
    Ok(())
}

fn cmd_simulate(args: &[String]) -> anyhow::Result<()> {
    let (path, rest) = split_config_flag(args)?;
    let (service, count) = match rest.as_slice() {
        [service, count] => (
            *service,
            count
                .parse::<u32>()
                .with_context(|| format!("invalid count: {count}"))?,
        ),
        _ => bail!("usage: study-cli simulate <service> <count> [--config <path>]"),
    };
    let cfg = load_config(path)?;

    let clock = Arc::new(ManualClock::new(SystemClock.now().floor()));
    let limiter = RateLimiter::with_clock(cfg.rate_limits, clock);
    let mut allowed = 0u32;
    for i in 1..=count {
        let d = limiter.check(SIMULATED_CLIENT, service);
        if d.allowed {
            allowed += 1;
            println!("  #{i:<4} allowed   remaining {}", d.remaining);
        } else {
            println!("  #{i:<4} rejected  retry after {:.0}s", d.retry_after.ceil());
        }
    }
    println!("\n{allowed}/{count} allowed for service {service}");
    Ok(())
}
