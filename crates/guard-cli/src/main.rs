//! Egress Guard CLI - scan responses and validate policy documents.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use guard_core::{run_pipeline, GuardRequest, Settings};

#[derive(Parser)]
#[command(name = "egress-guard")]
#[command(about = "LLM Egress Guard - inline response scanning and sanitization")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a response through the guard pipeline and print the result
    Scan {
        /// Response text; reads stdin when neither this nor --file is given
        text: Option<String>,

        /// Read the response from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Policy to evaluate against
        #[arg(long, default_value = "default")]
        policy_id: String,

        /// Policy document path (overrides POLICY_FILE)
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Tenant recorded in the request metadata
        #[arg(long)]
        tenant: Option<String>,

        /// Exit non-zero when the response is blocked
        #[arg(long)]
        fail_on_block: bool,
    },
    /// Load and validate a policy document
    CheckPolicy {
        /// Policy document path (defaults to POLICY_FILE)
        path: Option<PathBuf>,
    },
    /// Dump current metrics in Prometheus text format
    Metrics,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Scan {
            text,
            file,
            policy_id,
            policy,
            tenant,
            fail_on_block,
        }) => {
            let mut settings = Settings::from_env();
            if let Some(policy) = policy {
                settings.policy_file = policy;
            }

            let response = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("reading stdin")?;
                    buffer
                }
            };

            let mut request = GuardRequest::new(response).with_policy_id(policy_id);
            if let Some(tenant) = tenant {
                request = request.with_metadata("tenant", tenant);
            }

            let result = run_pipeline(&request, &settings).context("pipeline failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            if fail_on_block && result.blocked {
                std::process::exit(2);
            }
        }
        Some(Commands::CheckPolicy { path }) => {
            let path = path.unwrap_or_else(|| Settings::from_env().policy_file);
            let store = guard_policy::load_policy_uncached(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            for (policy_id, policy) in &store.definitions {
                println!(
                    "policy {policy_id}: tier={}, rules={}, allowlist entries={}",
                    policy.tier,
                    policy.rules.len(),
                    policy.allowlist.len()
                );
            }
        }
        Some(Commands::Metrics) => {
            let (body, _content_type) = guard_telemetry::metrics().render()?;
            print!("{body}");
        }
        None => {
            println!("egress-guard v0.1.0 - use --help for commands");
        }
    }

    Ok(())
}
