use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{ExecutionError, PostgresConfig, TargetEnvironment};

#[async_trait]
/// Produces a full plain-text dump of one resource into `output_dir`.
pub trait DumpRunner: Send + Sync {
    async fn dump(&self, resource: &str, output_dir: &Path) -> Result<PathBuf, ExecutionError>;
}

/// [`DumpRunner`] that shells out to `pg_dump` against the production read
/// replica.
pub struct PgDumpRunner {
    config: PostgresConfig,
}

impl PgDumpRunner {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    fn dump_error(resource: &str, message: String) -> ExecutionError {
        ExecutionError::Dump {
            environment: TargetEnvironment::Production,
            resource: resource.to_string(),
            message,
        }
    }
}

#[async_trait]
impl DumpRunner for PgDumpRunner {
    async fn dump(&self, resource: &str, output_dir: &Path) -> Result<PathBuf, ExecutionError> {
        // pg_dump expands a --dbname that looks like a URI or conninfo string.
        if !is_plain_identifier(resource) {
            return Err(Self::dump_error(
                resource,
                "resource must contain only letters, digits, '_' or '-'".to_string(),
            ));
        }
        let endpoint = self.config.endpoint(TargetEnvironment::Production);
        let output_path = output_dir.join(format!("{resource}.sql"));
        tracing::info!(
            resource,
            host = %endpoint.host,
            output = %output_path.display(),
            "starting pg_dump"
        );
        let output = tokio::process::Command::new(&self.config.pg_dump_bin)
            .arg("--format=plain")
            .arg("--no-password")
            .arg("--host")
            .arg(&endpoint.host)
            .arg("--port")
            .arg(self.config.port(true).to_string())
            .arg("--username")
            .arg(&endpoint.user)
            .arg("--dbname")
            .arg(resource)
            .arg("--file")
            .arg(&output_path)
            .env("PGPASSWORD", &endpoint.password)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                Self::dump_error(
                    resource,
                    format!(
                        "failed to spawn {}: {error}",
                        self.config.pg_dump_bin.display()
                    ),
                )
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("pg_dump exited with {}", output.status)
            } else {
                stderr
            };
            return Err(Self::dump_error(resource, message));
        }
        Ok(output_path)
    }
}

fn is_plain_identifier(resource: &str) -> bool {
    !resource.is_empty()
        && resource
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Byte range of a dump file delivered as one upload.
pub struct DumpPartPlan {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
    pub filename: String,
}

/// Splits a dump of `total_bytes` into parts of at most `part_size` bytes.
///
/// A dump that fits in one part keeps the plain `{resource}.sql` name; larger
/// dumps are numbered `{resource}.sql.part01`, `part02`, and so on.
pub fn plan_dump_parts(resource: &str, total_bytes: u64, part_size: u64) -> Vec<DumpPartPlan> {
    let part_size = part_size.max(1);
    if total_bytes <= part_size {
        return vec![DumpPartPlan {
            index: 1,
            offset: 0,
            len: total_bytes,
            filename: format!("{resource}.sql"),
        }];
    }
    let mut parts = Vec::new();
    let mut offset = 0_u64;
    while offset < total_bytes {
        let len = part_size.min(total_bytes - offset);
        let index = parts.len() + 1;
        parts.push(DumpPartPlan {
            index,
            offset,
            len,
            filename: format!("{resource}.sql.part{index:02}"),
        });
        offset += len;
    }
    parts
}

pub async fn read_dump_part(path: &Path, part: &DumpPartPlan) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(part.offset)).await?;
    let capacity = usize::try_from(part.len).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("dump part {} is too large to buffer", part.filename),
        )
    })?;
    let mut buffer = vec![0_u8; capacity];
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PostgresEndpoint;

    fn endpoint(host: &str) -> PostgresEndpoint {
        PostgresEndpoint {
            host: host.to_string(),
            user: "postgres".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn unit_plan_dump_parts_keeps_small_dump_whole() {
        let parts = plan_dump_parts("orders", 10, 900);
        assert_eq!(
            parts,
            vec![DumpPartPlan {
                index: 1,
                offset: 0,
                len: 10,
                filename: "orders.sql".to_string(),
            }]
        );
    }

    #[test]
    fn unit_plan_dump_parts_numbers_split_parts() {
        let parts = plan_dump_parts("orders", 25, 10);
        let summary = parts
            .iter()
            .map(|part| (part.filename.as_str(), part.offset, part.len))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("orders.sql.part01", 0, 10),
                ("orders.sql.part02", 10, 10),
                ("orders.sql.part03", 20, 5),
            ]
        );
    }

    #[tokio::test]
    async fn functional_read_dump_part_returns_requested_range() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orders.sql");
        std::fs::write(&path, b"0123456789abcdef").expect("write dump");
        let parts = plan_dump_parts("orders", 16, 6);
        assert_eq!(parts.len(), 3);
        let last = read_dump_part(&path, &parts[2]).await.expect("read part");
        assert_eq!(last, b"cdef");
        let first = read_dump_part(&path, &parts[0]).await.expect("read part");
        assert_eq!(first, b"012345");
    }

    #[tokio::test]
    async fn regression_missing_pg_dump_binary_reports_dump_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = PgDumpRunner::new(PostgresConfig {
            production: endpoint("db.prod.internal"),
            preproduction: endpoint("db.preprod.internal"),
            read_port: 5001,
            write_port: 5000,
            connect_timeout_ms: 50,
            pg_dump_bin: temp.path().join("no-such-pg_dump"),
        });
        let error = runner
            .dump("orders", temp.path())
            .await
            .expect_err("missing binary");
        assert_eq!(error.environment(), TargetEnvironment::Production);
        assert!(error
            .render_failure()
            .starts_with("Query failed on prod: pg_dump of orders failed: failed to spawn"));
    }

    #[tokio::test]
    async fn regression_dump_refuses_conninfo_and_path_resources() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scratch = temp.path().join("scratch");
        std::fs::create_dir_all(&scratch).expect("scratch");
        let runner = PgDumpRunner::new(PostgresConfig {
            production: endpoint("db.prod.internal"),
            preproduction: endpoint("db.preprod.internal"),
            read_port: 5001,
            write_port: 5000,
            connect_timeout_ms: 50,
            pg_dump_bin: temp.path().join("no-such-pg_dump"),
        });
        for resource in ["postgresql://other-host/db", "../outside", "host=evil dbname=x"] {
            let error = runner
                .dump(resource, &scratch)
                .await
                .expect_err("resource must be refused");
            let rendered = error.to_string();
            assert!(
                rendered.contains("resource must contain only letters"),
                "{resource}: {rendered}"
            );
            assert!(!rendered.contains("failed to spawn"));
        }
        assert!(!temp.path().join("outside.sql").exists());
    }
}
