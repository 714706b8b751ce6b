use std::collections::{BTreeMap, BTreeSet};

use crate::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Static command -> approvers mapping, fixed for the process lifetime.
pub struct AuthorizationMatrix {
    approvers: BTreeMap<Command, BTreeSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of resolving a command keyword against the matrix.
pub enum ApproverLookup<'a> {
    Known {
        command: Command,
        approvers: &'a BTreeSet<String>,
    },
    Unknown,
}

impl AuthorizationMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approvers<I, S>(mut self, command: Command, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approvers
            .entry(command)
            .or_default()
            .extend(users.into_iter().map(Into::into));
        self
    }

    pub fn approvers_for(&self, command: Command) -> Option<&BTreeSet<String>> {
        self.approvers.get(&command).filter(|users| !users.is_empty())
    }

    /// Resolves a raw keyword; unknown keywords and commands without approvers
    /// take the invalid-command path.
    pub fn lookup(&self, keyword: &str) -> ApproverLookup<'_> {
        let Some(command) = Command::from_keyword(keyword) else {
            return ApproverLookup::Unknown;
        };
        match self.approvers_for(command) {
            Some(approvers) => ApproverLookup::Known { command, approvers },
            None => ApproverLookup::Unknown,
        }
    }

    pub fn is_approved(&self, command: Command, user_id: &str) -> bool {
        self.approvers_for(command)
            .is_some_and(|users| users.contains(user_id))
    }

    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        self.approvers.keys().copied()
    }
}

/// Renders approvers as Slack mentions, e.g. `<@U1>, <@U2>`.
pub fn render_approver_mentions(approvers: &BTreeSet<String>) -> String {
    approvers
        .iter()
        .map(|user| format!("<@{user}>"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::{render_approver_mentions, ApproverLookup, AuthorizationMatrix};
    use crate::Command;

    fn matrix() -> AuthorizationMatrix {
        AuthorizationMatrix::new()
            .with_approvers(Command::Read, ["U2", "U1"])
            .with_approvers(Command::Write, ["U1"])
    }

    #[test]
    fn unit_lookup_resolves_prefixed_keywords() {
        let matrix = matrix();
        let ApproverLookup::Known { command, approvers } = matrix.lookup("PG_READ") else {
            panic!("expected known command");
        };
        assert_eq!(command, Command::Read);
        assert_eq!(render_approver_mentions(approvers), "<@U1>, <@U2>");
    }

    #[test]
    fn unit_lookup_reports_unknown_for_unlisted_or_unconfigured_commands() {
        let matrix = matrix();
        assert_eq!(matrix.lookup("PG_DELETE"), ApproverLookup::Unknown);
        assert_eq!(matrix.lookup("DUMP"), ApproverLookup::Unknown);
    }

    #[test]
    fn unit_is_approved_checks_membership_per_command() {
        let matrix = matrix();
        assert!(matrix.is_approved(Command::Read, "U2"));
        assert!(!matrix.is_approved(Command::Write, "U2"));
        assert!(!matrix.is_approved(Command::Dump, "U1"));
    }
}
