use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which database host/credential pair a run targets.
pub enum TargetEnvironment {
    Production,
    Preproduction,
}

impl TargetEnvironment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "prod",
            Self::Preproduction => "preprod",
        }
    }

    /// Qualifier appended to failure messages.
    pub fn failure_qualifier(self) -> &'static str {
        match self {
            Self::Production => " on prod",
            Self::Preproduction => " on preprod",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Rows returned by a read, with column names as the header.
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Data rows only; the header is not counted.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Header plus data rows as comma-joined lines. NULL renders as an empty
    /// field.
    pub fn to_csv(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len().saturating_add(1));
        lines.push(self.columns.join(","));
        for row in &self.rows {
            lines.push(
                row.iter()
                    .map(|value| value.as_deref().unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Successful result of one execution.
pub enum QueryOutcome {
    Rows(ResultTable),
    Status(String),
}

#[derive(Debug, Error)]
/// Enumerates supported `ExecutionError` values.
pub enum ExecutionError {
    #[error("connection to {resource} failed: {message}")]
    Connection {
        environment: TargetEnvironment,
        resource: String,
        message: String,
    },
    #[error("{message}")]
    Query {
        environment: TargetEnvironment,
        message: String,
    },
    #[error("pg_dump of {resource} failed: {message}")]
    Dump {
        environment: TargetEnvironment,
        resource: String,
        message: String,
    },
}

impl ExecutionError {
    pub fn environment(&self) -> TargetEnvironment {
        match self {
            Self::Connection { environment, .. }
            | Self::Query { environment, .. }
            | Self::Dump { environment, .. } => *environment,
        }
    }

    /// Thread reply text for this failure, e.g. `Query failed on preprod: ...`.
    pub fn render_failure(&self) -> String {
        format!(
            "Query failed{}: {}",
            self.environment().failure_qualifier(),
            self
        )
    }
}
