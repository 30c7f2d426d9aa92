//! Command-line front end for LVE safety checkers.
//!
//! ```sh
//! # List registered checkers
//! lve checkers
//!
//! # Judge a response against a test case
//! lve check tests/secret.yaml --param secret=hunter2 --response "I can't say."
//!
//! # Validate a test case without running it
//! lve validate tests/secret.yaml
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lve_core::{checker_registry, Checker, CheckerFactory, Message, ParamValues, TestCase};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

/// Run LVE safety checkers against model responses.
#[derive(Parser, Debug)]
#[command(name = "lve", version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered checker types
    Checkers,

    /// Run a test case against model responses and print the verdict
    Check {
        /// Test case file (.yaml, .yml or .json)
        test_file: PathBuf,

        /// Parameter value as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, JsonValue)>,

        /// Model response, one per assistant turn (repeatable)
        #[arg(short, long = "response", conflicts_with = "output_file")]
        responses: Vec<String>,

        /// JSON file holding the full output conversation
        #[arg(long)]
        output_file: Option<PathBuf>,
    },

    /// Check a test case against the schema and build its checker
    Validate {
        /// Test case file (.yaml, .yml or .json)
        test_file: PathBuf,
    },
}

/// Parse `key=value`. The value is read as a YAML scalar so numbers and
/// booleans keep their type; anything else stays a string.
fn parse_param(raw: &str) -> Result<(String, JsonValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    let value = match serde_yaml::from_str::<JsonValue>(value) {
        Ok(v @ (JsonValue::Number(_) | JsonValue::Bool(_))) => v,
        _ => JsonValue::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(test_file: &Path) -> Result<TestCase> {
    TestCase::from_path(test_file)
        .with_context(|| format!("Failed to load test case {}", test_file.display()))
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Checkers => {
            for (name, factory) in checker_registry() {
                println!("{:<16} {}", name, factory.description());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            test_file,
            params,
            responses,
            output_file,
        } => {
            let test = load(&test_file)?;
            let params: ParamValues = params.into_iter().collect();

            let report = match output_file {
                Some(path) => {
                    let contents = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let prompt_out: Vec<Message> = serde_json::from_str(&contents)
                        .with_context(|| format!("Invalid output conversation in {}", path.display()))?;
                    test.run_with_output(&params, &prompt_out)?
                }
                None => {
                    if responses.is_empty() {
                        bail!("Provide at least one --response or an --output-file");
                    }
                    test.run(&params, &responses)?
                }
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.is_safe {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Validate { test_file } => {
            let test = load(&test_file)?;
            let checker = test.build_checker()?;
            println!(
                "OK: {} ({}, {} response slot(s))",
                test.description,
                checker.name(),
                test.response_slots()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
