use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ApproverLookup, AuthorizationMatrix, Command};

pub const GATE_POLICY_SCHEMA_VERSION: u32 = 1;
pub const GATE_POLICY_FILE_NAME: &str = "gate-policy.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// On-disk policy: allowed channels and approvers per command keyword.
pub struct GatePolicyFile {
    pub schema_version: u32,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub approvers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub enabled_commands: Option<Vec<String>>,
}

#[derive(Debug, Error)]
/// Enumerates supported `PolicyError` values.
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unsupported gate policy schema: expected {expected}, found {found}")]
    UnsupportedSchema { expected: u32, found: u32 },
    #[error("gate policy must allow at least one channel")]
    NoChannels,
    #[error("gate policy references unknown command '{keyword}'")]
    UnknownCommand { keyword: String },
    #[error("gate policy lists no approvers for {command}")]
    EmptyApprovers { command: Command },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime policy, built once at startup.
pub struct GatePolicy {
    channels: BTreeSet<String>,
    authorization: AuthorizationMatrix,
    enabled_commands: BTreeSet<Command>,
}

impl GatePolicy {
    pub fn new<I, S>(channels: I, authorization: AuthorizationMatrix) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            authorization,
            enabled_commands: Command::ALL.into_iter().collect(),
        }
    }

    pub fn with_enabled_commands<I>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = Command>,
    {
        self.enabled_commands = commands.into_iter().collect();
        self
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = serde_json::from_str::<GatePolicyFile>(&raw).map_err(|source| {
            PolicyError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let policy = Self::from_file(file)?;
        tracing::info!(
            path = %path.display(),
            channels = policy.channels.len(),
            commands = policy.enabled_commands.len(),
            "gate policy loaded"
        );
        Ok(policy)
    }

    pub fn from_file(file: GatePolicyFile) -> Result<Self, PolicyError> {
        if file.schema_version != GATE_POLICY_SCHEMA_VERSION {
            return Err(PolicyError::UnsupportedSchema {
                expected: GATE_POLICY_SCHEMA_VERSION,
                found: file.schema_version,
            });
        }
        let channels = file
            .channels
            .iter()
            .map(|channel| channel.trim())
            .filter(|channel| !channel.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>();
        if channels.is_empty() {
            return Err(PolicyError::NoChannels);
        }

        let mut authorization = AuthorizationMatrix::new();
        for (keyword, users) in &file.approvers {
            let command = parse_command_keyword(keyword)?;
            let users = users
                .iter()
                .map(|user| user.trim())
                .filter(|user| !user.is_empty())
                .collect::<Vec<_>>();
            if users.is_empty() {
                return Err(PolicyError::EmptyApprovers { command });
            }
            authorization = authorization.with_approvers(command, users);
        }

        let enabled_commands = match &file.enabled_commands {
            Some(keywords) => keywords
                .iter()
                .map(|keyword| parse_command_keyword(keyword))
                .collect::<Result<BTreeSet<_>, _>>()?,
            None => Command::ALL.into_iter().collect(),
        };

        Ok(Self {
            channels,
            authorization,
            enabled_commands,
        })
    }

    pub fn channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    pub fn authorization(&self) -> &AuthorizationMatrix {
        &self.authorization
    }

    pub fn is_channel_allowed(&self, channel_id: &str) -> bool {
        self.channels.contains(channel_id)
    }

    /// Approver lookup for a new request; disabled commands are unknown here.
    pub fn lookup_for_mention(&self, keyword: &str) -> ApproverLookup<'_> {
        match self.authorization.lookup(keyword) {
            ApproverLookup::Known { command, .. } if !self.enabled_commands.contains(&command) => {
                ApproverLookup::Unknown
            }
            lookup => lookup,
        }
    }
}

fn parse_command_keyword(keyword: &str) -> Result<Command, PolicyError> {
    Command::from_keyword(keyword).ok_or_else(|| PolicyError::UnknownCommand {
        keyword: keyword.to_string(),
    })
}
