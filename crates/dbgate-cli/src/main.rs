mod bootstrap_helpers;
mod cli_args;

use anyhow::{Context, Result};
use clap::Parser;
use dbgate_approval::GatePolicy;
use dbgate_postgres::{PostgresConfig, PostgresEndpoint};
use dbgate_slack_runtime::{run_slack_gate, SlackGateRuntimeConfig};

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

fn build_runtime_config(cli: Cli) -> Result<SlackGateRuntimeConfig> {
    let policy = GatePolicy::load(&cli.policy)
        .with_context(|| format!("failed to load gate policy {}", cli.policy.display()))?;
    Ok(SlackGateRuntimeConfig {
        bind: cli.bind,
        api_base: cli.slack_api_base,
        bot_token: cli.slack_bot_token,
        signing_secret: cli.slack_signing_secret,
        bot_user_id: cli.slack_bot_user_id,
        policy,
        postgres: PostgresConfig {
            production: PostgresEndpoint {
                host: cli.prod_host,
                user: cli.prod_user,
                password: cli.prod_password,
            },
            preproduction: PostgresEndpoint {
                host: cli.preprod_host,
                user: cli.preprod_user,
                password: cli.preprod_password,
            },
            read_port: cli.read_port,
            write_port: cli.write_port,
            connect_timeout_ms: cli.connect_timeout_ms,
            pg_dump_bin: cli.pg_dump_bin,
        },
        scratch_dir: cli.scratch_dir,
        worker_count: cli.workers,
        queue_capacity: cli.queue_capacity,
        request_timeout_ms: cli.request_timeout_ms,
        max_skew_seconds: cli.max_skew_seconds,
        dump_part_size_bytes: cli.dump_part_size_bytes,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = build_runtime_config(cli)?;
    run_slack_gate(config).await
}
