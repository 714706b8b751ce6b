use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Column, Connection, Either, Row, ValueRef};

use crate::{ExecutionError, QueryOutcome, ResultTable, TargetEnvironment};

const APPLICATION_NAME: &str = "dbgate";

#[async_trait]
/// Runs a payload against one resource in one environment.
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        environment: TargetEnvironment,
        resource: &str,
        query: &str,
        read_only: bool,
    ) -> Result<QueryOutcome, ExecutionError>;
}

#[derive(Clone)]
/// Host and credentials for one environment.
pub struct PostgresEndpoint {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for PostgresEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresEndpoint")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
/// Connection settings shared by the executor and the dump runner.
pub struct PostgresConfig {
    pub production: PostgresEndpoint,
    pub preproduction: PostgresEndpoint,
    /// Read replica port.
    pub read_port: u16,
    /// Primary port.
    pub write_port: u16,
    pub connect_timeout_ms: u64,
    pub pg_dump_bin: PathBuf,
}

impl PostgresConfig {
    pub fn endpoint(&self, environment: TargetEnvironment) -> &PostgresEndpoint {
        match environment {
            TargetEnvironment::Production => &self.production,
            TargetEnvironment::Preproduction => &self.preproduction,
        }
    }

    pub fn port(&self, read_only: bool) -> u16 {
        if read_only {
            self.read_port
        } else {
            self.write_port
        }
    }

    pub(crate) fn connect_options(
        &self,
        environment: TargetEnvironment,
        resource: &str,
        read_only: bool,
    ) -> PgConnectOptions {
        let endpoint = self.endpoint(environment);
        let options = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(self.port(read_only))
            .username(&endpoint.user)
            .password(&endpoint.password)
            .database(resource)
            .application_name(APPLICATION_NAME);
        if read_only {
            options.options([("default_transaction_read_only", "on")])
        } else {
            options
        }
    }
}

/// [`QueryExecutor`] backed by a fresh `sqlx` connection per run.
pub struct PostgresQueryExecutor {
    config: PostgresConfig,
}

impl PostgresQueryExecutor {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    async fn connect(
        &self,
        environment: TargetEnvironment,
        resource: &str,
        read_only: bool,
    ) -> Result<PgConnection, ExecutionError> {
        let options = self
            .config
            .connect_options(environment, resource, read_only);
        let connection_error = |message: String| ExecutionError::Connection {
            environment,
            resource: resource.to_string(),
            message,
        };
        let timeout = Duration::from_millis(self.config.connect_timeout_ms.max(1));
        match tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(error)) => Err(connection_error(error.to_string())),
            Err(_) => Err(connection_error(format!(
                "timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl QueryExecutor for PostgresQueryExecutor {
    async fn execute(
        &self,
        environment: TargetEnvironment,
        resource: &str,
        query: &str,
        read_only: bool,
    ) -> Result<QueryOutcome, ExecutionError> {
        let mut connection = self.connect(environment, resource, read_only).await?;
        tracing::info!(
            environment = environment.as_str(),
            resource,
            read_only,
            "running query"
        );
        let outcome = if read_only {
            fetch_table(&mut connection, query)
                .await
                .map(QueryOutcome::Rows)
        } else {
            sqlx::Executor::execute(&mut connection, sqlx::raw_sql(query))
                .await
                .map(|result| QueryOutcome::Status(render_status(result.rows_affected())))
        };
        if let Err(error) = connection.close().await {
            tracing::warn!(resource, %error, "failed to close postgres connection");
        }
        outcome.map_err(|error| ExecutionError::Query {
            environment,
            message: error.to_string(),
        })
    }
}

/// Collects the result set of the final statement in a payload. A reset
/// happens on the first event after each statement completes, so earlier
/// statements never leak rows into the table.
#[derive(Debug, Default)]
struct LastResultSet {
    table: ResultTable,
    statement_completed: bool,
}

impl LastResultSet {
    fn take_reset(&mut self) {
        if self.statement_completed {
            self.table = ResultTable::default();
            self.statement_completed = false;
        }
    }

    fn push_row(&mut self, columns: impl FnOnce() -> Vec<String>, values: Vec<Option<String>>) {
        self.take_reset();
        if self.table.columns.is_empty() {
            self.table.columns = columns();
        }
        self.table.rows.push(values);
    }

    fn complete_statement(&mut self) {
        self.take_reset();
        self.statement_completed = true;
    }

    fn finish(self) -> ResultTable {
        self.table
    }
}

async fn fetch_table(connection: &mut PgConnection, query: &str) -> sqlx::Result<ResultTable> {
    let mut result_set = LastResultSet::default();
    let mut stream = sqlx::Executor::fetch_many(connection, sqlx::raw_sql(query));
    while let Some(item) = stream.try_next().await? {
        let row = match item {
            Either::Left(_) => {
                result_set.complete_statement();
                continue;
            }
            Either::Right(row) => row,
        };
        let mut values = Vec::with_capacity(row.len());
        for index in 0..row.len() {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                values.push(None);
                continue;
            }
            // The simple query protocol returns every value in text format.
            let text = raw.as_str().map_err(sqlx::Error::Decode)?;
            values.push(Some(text.to_string()));
        }
        result_set.push_row(
            || {
                row.columns()
                    .iter()
                    .map(|column| column.name().to_string())
                    .collect()
            },
            values,
        );
    }
    Ok(result_set.finish())
}

fn render_status(rows_affected: u64) -> String {
    format!("{rows_affected} rows affected")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PostgresConfig {
        PostgresConfig {
            production: PostgresEndpoint {
                host: "db.prod.internal".to_string(),
                user: "postgres".to_string(),
                password: "prod-secret".to_string(),
            },
            preproduction: PostgresEndpoint {
                host: "db.preprod.internal".to_string(),
                user: "postgres".to_string(),
                password: "preprod-secret".to_string(),
            },
            read_port: 5001,
            write_port: 5000,
            connect_timeout_ms: 50,
            pg_dump_bin: PathBuf::from("pg_dump"),
        }
    }

    #[test]
    fn unit_endpoint_and_port_follow_environment_and_mode() {
        let config = config();
        assert_eq!(
            config.endpoint(TargetEnvironment::Production).host,
            "db.prod.internal"
        );
        assert_eq!(
            config.endpoint(TargetEnvironment::Preproduction).host,
            "db.preprod.internal"
        );
        assert_eq!(config.port(true), 5001);
        assert_eq!(config.port(false), 5000);
    }

    #[test]
    fn unit_connect_options_target_resource_database() {
        let options = config().connect_options(TargetEnvironment::Preproduction, "orders", true);
        assert_eq!(options.get_host(), "db.preprod.internal");
        assert_eq!(options.get_port(), 5001);
        assert_eq!(options.get_database(), Some("orders"));
    }

    fn text_row(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|value| Some(value.to_string())).collect()
    }

    fn columns(names: &'static [&'static str]) -> impl FnOnce() -> Vec<String> {
        move || names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn regression_multi_statement_read_keeps_only_final_result_set() {
        let mut result_set = LastResultSet::default();
        result_set.push_row(columns(&["id"]), text_row(&["1"]));
        result_set.push_row(columns(&["id"]), text_row(&["2"]));
        result_set.complete_statement();
        result_set.push_row(columns(&["email", "plan"]), text_row(&["a@example.com", "pro"]));
        result_set.complete_statement();

        let table = result_set.finish();
        assert_eq!(table.columns, vec!["email".to_string(), "plan".to_string()]);
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.to_csv(), "email,plan\na@example.com,pro");
    }

    #[test]
    fn regression_final_statement_without_rows_yields_empty_table() {
        let mut result_set = LastResultSet::default();
        result_set.push_row(columns(&["id"]), text_row(&["1"]));
        result_set.complete_statement();
        result_set.complete_statement();

        let table = result_set.finish();
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn unit_single_statement_result_set_is_kept() {
        let mut result_set = LastResultSet::default();
        result_set.push_row(columns(&["id"]), text_row(&["7"]));
        result_set.complete_statement();
        assert_eq!(result_set.finish().to_csv(), "id\n7");
    }

    #[test]
    fn regression_endpoint_debug_redacts_password() {
        let rendered = format!("{:?}", config().production);
        assert!(!rendered.contains("prod-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn integration_execute_reports_connection_failure_with_environment() {
        let mut config = config();
        config.preproduction.host = "127.0.0.1".to_string();
        config.read_port = 1;
        let executor = PostgresQueryExecutor::new(config);
        let error = executor
            .execute(TargetEnvironment::Preproduction, "orders", "SELECT 1", true)
            .await
            .expect_err("no server listens on port 1");
        assert_eq!(error.environment(), TargetEnvironment::Preproduction);
        assert!(error.render_failure().starts_with("Query failed on preprod: "));
    }
}
