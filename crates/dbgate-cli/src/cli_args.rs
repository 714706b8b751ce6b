use std::path::PathBuf;

use clap::Parser;

const DEFAULT_DUMP_PART_SIZE_BYTES: u64 = 900 * 1024 * 1024;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "dbgate",
    about = "Approval-gated Slack bot for production PostgreSQL access",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "bind",
        env = "DBGATE_BIND",
        default_value = "0.0.0.0:3000",
        help = "Address the Events API webhook listens on"
    )]
    pub(crate) bind: String,

    #[arg(
        long = "slack-api-base",
        env = "DBGATE_SLACK_API_BASE",
        default_value = "https://slack.com/api",
        help = "Base URL for Slack Web API calls"
    )]
    pub(crate) slack_api_base: String,

    #[arg(
        long = "slack-bot-token",
        env = "DBGATE_SLACK_BOT_TOKEN",
        hide_env_values = true,
        help = "Slack bot token for Web API (xoxb-...)"
    )]
    pub(crate) slack_bot_token: String,

    #[arg(
        long = "slack-signing-secret",
        env = "DBGATE_SLACK_SIGNING_SECRET",
        hide_env_values = true,
        help = "Signing secret used to verify Events API requests"
    )]
    pub(crate) slack_signing_secret: String,

    #[arg(
        long = "slack-bot-user-id",
        env = "DBGATE_SLACK_BOT_USER_ID",
        help = "Bot user id; resolved with auth.test when omitted"
    )]
    pub(crate) slack_bot_user_id: Option<String>,

    #[arg(
        long = "policy",
        env = "DBGATE_POLICY",
        default_value = "gate-policy.json",
        help = "Gate policy file with allowed channels and approvers"
    )]
    pub(crate) policy: PathBuf,

    #[arg(
        long = "scratch-dir",
        env = "DBGATE_SCRATCH_DIR",
        default_value = "worker-cache",
        help = "Directory for dump files; wiped at startup"
    )]
    pub(crate) scratch_dir: PathBuf,

    #[arg(
        long = "workers",
        env = "DBGATE_WORKERS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Number of execution workers"
    )]
    pub(crate) workers: usize,

    #[arg(
        long = "queue-capacity",
        env = "DBGATE_QUEUE_CAPACITY",
        default_value_t = 64,
        value_parser = parse_positive_usize,
        help = "Maximum approved requests waiting for a worker"
    )]
    pub(crate) queue_capacity: usize,

    #[arg(
        long = "request-timeout-ms",
        env = "DBGATE_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout for one Slack Web API call"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "max-skew-seconds",
        env = "DBGATE_MAX_SKEW_SECONDS",
        default_value_t = 300,
        help = "Accepted clock skew for signed webhook requests (0 disables)"
    )]
    pub(crate) max_skew_seconds: u64,

    #[arg(
        long = "dump-part-size-bytes",
        env = "DBGATE_DUMP_PART_SIZE_BYTES",
        default_value_t = DEFAULT_DUMP_PART_SIZE_BYTES,
        value_parser = parse_positive_u64,
        help = "Dumps larger than this are delivered in parts"
    )]
    pub(crate) dump_part_size_bytes: u64,

    #[arg(long = "prod-host", env = "DBGATE_PROD_HOST", help = "Production host")]
    pub(crate) prod_host: String,

    #[arg(long = "prod-user", env = "DBGATE_PROD_USER", help = "Production user")]
    pub(crate) prod_user: String,

    #[arg(
        long = "prod-password",
        env = "DBGATE_PROD_PASSWORD",
        hide_env_values = true,
        help = "Production password"
    )]
    pub(crate) prod_password: String,

    #[arg(
        long = "preprod-host",
        env = "DBGATE_PREPROD_HOST",
        help = "Preproduction host used for dry runs"
    )]
    pub(crate) preprod_host: String,

    #[arg(
        long = "preprod-user",
        env = "DBGATE_PREPROD_USER",
        help = "Preproduction user"
    )]
    pub(crate) preprod_user: String,

    #[arg(
        long = "preprod-password",
        env = "DBGATE_PREPROD_PASSWORD",
        hide_env_values = true,
        help = "Preproduction password"
    )]
    pub(crate) preprod_password: String,

    #[arg(
        long = "read-port",
        env = "DBGATE_READ_PORT",
        default_value_t = 5001,
        help = "Read replica port"
    )]
    pub(crate) read_port: u16,

    #[arg(
        long = "write-port",
        env = "DBGATE_WRITE_PORT",
        default_value_t = 5000,
        help = "Primary port"
    )]
    pub(crate) write_port: u16,

    #[arg(
        long = "connect-timeout-ms",
        env = "DBGATE_CONNECT_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for opening one database connection"
    )]
    pub(crate) connect_timeout_ms: u64,

    #[arg(
        long = "pg-dump-bin",
        env = "DBGATE_PG_DUMP_BIN",
        default_value = "pg_dump",
        help = "pg_dump executable"
    )]
    pub(crate) pg_dump_bin: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, DEFAULT_DUMP_PART_SIZE_BYTES};

    const REQUIRED: [&str; 15] = [
        "dbgate",
        "--slack-bot-token",
        "xoxb-test",
        "--slack-signing-secret",
        "secret",
        "--prod-host",
        "db.prod",
        "--prod-user",
        "gate",
        "--prod-password",
        "pw",
        "--preprod-host",
        "db.preprod",
        "--preprod-user",
        "gate",
    ];

    fn args(extra: &[&str]) -> Vec<String> {
        REQUIRED
            .iter()
            .chain(["--preprod-password", "pw2"].iter())
            .chain(extra.iter())
            .map(|value| value.to_string())
            .collect()
    }

    #[test]
    fn unit_cli_defaults_match_deployment_layout() {
        let cli = Cli::try_parse_from(args(&[])).expect("parse");
        assert_eq!(cli.bind, "0.0.0.0:3000");
        assert_eq!(cli.slack_api_base, "https://slack.com/api");
        assert_eq!(cli.read_port, 5001);
        assert_eq!(cli.write_port, 5000);
        assert_eq!(cli.max_skew_seconds, 300);
        assert_eq!(cli.dump_part_size_bytes, DEFAULT_DUMP_PART_SIZE_BYTES);
        assert_eq!(cli.scratch_dir.to_str(), Some("worker-cache"));
        assert_eq!(cli.policy.to_str(), Some("gate-policy.json"));
        assert!(cli.slack_bot_user_id.is_none());
    }

    #[test]
    fn unit_cli_rejects_zero_workers() {
        let error = Cli::try_parse_from(args(&["--workers", "0"])).expect_err("zero workers");
        assert!(error.to_string().contains("value must be greater than 0"));
    }

    #[test]
    fn unit_cli_accepts_overrides() {
        let cli = Cli::try_parse_from(args(&[
            "--workers",
            "8",
            "--queue-capacity",
            "2",
            "--slack-bot-user-id",
            "UBOT",
        ]))
        .expect("parse");
        assert_eq!(cli.workers, 8);
        assert_eq!(cli.queue_capacity, 2);
        assert_eq!(cli.slack_bot_user_id.as_deref(), Some("UBOT"));
    }
}
