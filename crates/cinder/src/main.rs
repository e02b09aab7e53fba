//! The `cinder` CLI: initialize a project configuration and run fuzzing
//! campaigns against compiled contract artifacts.

use clap::{Parser, Subcommand};
use cinder_config::ProjectConfig;
use cinder_fuzzing::{
    chain::scripted::ScriptedEvm, CompilationArtifacts, Fuzzer, TestCaseStatus,
};
use eyre::{bail, WrapErr};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "cinder", version, about = "Coverage-guided smart contract fuzzer")]
struct Cinder {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default project configuration file.
    Init {
        /// Output path of the configuration file.
        #[arg(long, default_value = "cinder.json")]
        out: PathBuf,
    },
    /// Run a fuzzing campaign.
    Fuzz {
        /// Path of the project configuration file.
        #[arg(long, default_value = "cinder.json")]
        config: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:?}");
            std::process::exit(2);
        }
    }
}

fn run() -> eyre::Result<i32> {
    let cli = Cinder::parse();
    match cli.command {
        Command::Init { out } => {
            if out.exists() {
                bail!("refusing to overwrite existing configuration at {}", out.display());
            }
            ProjectConfig::default().write(&out)?;
            info!(path = %out.display(), "wrote default project configuration");
            Ok(0)
        }
        Command::Fuzz { config } => {
            let project = ProjectConfig::read(&config)?;
            let artifacts =
                CompilationArtifacts::load_directory(&project.compilation.artifacts_directory)
                    .wrap_err("failed to load compilation artifacts")?;

            let mut fuzzer = Fuzzer::new(project, artifacts)?;
            fuzzer.initialize(ScriptedEvm::new())?;
            let results = fuzzer.run()?;

            for case in &results.test_cases {
                let verdict = match case.status {
                    TestCaseStatus::Passed => "PASSED",
                    TestCaseStatus::Failed => "FAILED",
                    TestCaseStatus::Running | TestCaseStatus::NotStarted => "NOT RUN",
                };
                println!("[{verdict}] {}", case.id);
                if case.status == TestCaseStatus::Failed {
                    println!("         {}", case.message);
                    if let Some(sequence) = &case.call_sequence {
                        for (index, element) in sequence.iter().enumerate() {
                            let call = element
                                .message
                                .data_abi
                                .as_ref()
                                .map(|data| data.method_signature.clone())
                                .unwrap_or_else(|| "<raw call>".into());
                            println!("         {}. {call}", index + 1);
                        }
                    }
                }
            }
            println!(
                "fuzzing finished: {:?}, {} calls, {} corpus entries, {} failed test(s)",
                results.state,
                results.metrics.calls_tested,
                results.metrics.corpus_entries,
                results.metrics.failed_tests,
            );
            Ok(results.exit_code())
        }
    }
}
