// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use arb_cli::{ColorMode, resolve_color_from_env};
use arb_config::ResolverInputs;
use arb_core::ContractFailurePolicy;
use arb_events::{ConsoleWarningSink, EventBus};
use arb_policy::PolicyFlags;
use arb_provider::{
    CompletionProvider, EmbeddingProvider, MockCompletionProvider, MockEmbeddingProvider,
    OPENROUTER_API_KEY_ENV, OpenRouterClient,
};
use arb_ratelimit::RateLimit;
use arb_runtime::{RunOptions, RunOrchestrator};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "arbiter", version, about = "Audit-first sampling harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a measurement run.
    Run {
        /// Run configuration document.
        #[arg(long)]
        config: PathBuf,

        /// Model catalog document.
        #[arg(long)]
        catalog: PathBuf,

        /// Prompt manifest document.
        #[arg(long)]
        prompts: PathBuf,

        /// Root for manifest-relative prompt assets.
        #[arg(long, default_value = ".")]
        assets: PathBuf,

        /// Treat policy findings as errors.
        #[arg(long)]
        strict: bool,

        /// Permit free-tier models under --strict.
        #[arg(long)]
        allow_free: bool,

        /// Permit aliased model slugs under --strict.
        #[arg(long)]
        allow_aliased: bool,

        /// How contract fallbacks/failures affect the run.
        #[arg(long, value_enum, default_value_t = ContractPolicyArg::Warn)]
        contract_failure_policy: ContractPolicyArg,

        /// Force the deterministic mock providers even when an API key
        /// is present.
        #[arg(long)]
        mock: bool,
    },

    /// Check the invariants of a finished run directory.
    Verify {
        /// The run directory to check.
        run_dir: PathBuf,

        /// Print the report as JSON instead of per-check lines.
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContractPolicyArg {
    Warn,
    Exclude,
    Fail,
}

impl From<ContractPolicyArg> for ContractFailurePolicy {
    fn from(arg: ContractPolicyArg) -> Self {
        match arg {
            ContractPolicyArg::Warn => Self::Warn,
            ContractPolicyArg::Exclude => Self::Exclude,
            ContractPolicyArg::Fail => Self::Fail,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = dispatch(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            config,
            catalog,
            prompts,
            assets,
            strict,
            allow_free,
            allow_aliased,
            contract_failure_policy,
            mock,
        } => {
            run(
                ResolverInputs {
                    config_path: config,
                    catalog_path: catalog,
                    prompt_manifest_path: prompts,
                    asset_root: assets,
                },
                PolicyFlags {
                    strict,
                    allow_free,
                    allow_aliased,
                    contract_failure_policy: contract_failure_policy.into(),
                },
                mock,
            )
            .await
        }
        Commands::Verify { run_dir, json } => verify(&run_dir, json),
    }
}

async fn run(inputs: ResolverInputs, flags: PolicyFlags, force_mock: bool) -> Result<()> {
    let resolved = arb_config::resolve(&inputs).context("failed to resolve run inputs")?;
    let seed = resolved.config.run.seed.to_string();
    let dims = resolved.config.measurement.embedding_dimensions;

    let api_key = std::env::var(OPENROUTER_API_KEY_ENV).ok();
    let (completion, embedding): (Arc<dyn CompletionProvider>, Arc<dyn EmbeddingProvider>) =
        match api_key {
            Some(key) if !force_mock => {
                let client = Arc::new(OpenRouterClient::new(key, RateLimit::from_env(), dims));
                (client.clone(), client)
            }
            _ => (
                Arc::new(MockCompletionProvider::new(seed.clone())),
                Arc::new(MockEmbeddingProvider::new(seed, dims)),
            ),
        };

    let orchestrator = RunOrchestrator::new(RunOptions {
        flags,
        bus: Arc::new(EventBus::new()),
        warnings: Arc::new(ConsoleWarningSink),
        completion,
        embedding,
        handle_signals: true,
    });
    let outcome = orchestrator
        .execute_resolved(resolved)
        .await
        .context("run failed")?;

    println!("{}", outcome.run_dir.display());
    Ok(())
}

fn verify(run_dir: &std::path::Path, json: bool) -> Result<()> {
    let report = arb_verify::verify_run_dir(run_dir).context("verification could not start")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let color = resolve_color_from_env(std::io::stdout().is_terminal());
        for check in &report.checks {
            let (ok, fail) = match color {
                ColorMode::Enabled => ("\x1b[32mOK\x1b[0m", "\x1b[31mFAIL\x1b[0m"),
                ColorMode::Disabled => ("OK", "FAIL"),
            };
            if check.ok {
                println!("{ok}    {}", check.name);
            } else {
                println!("{fail}  {}: {}", check.name, check.detail);
            }
        }
    }
    if report.all_ok() {
        Ok(())
    } else {
        anyhow::bail!("verification failed for run {}", report.run_id)
    }
}
