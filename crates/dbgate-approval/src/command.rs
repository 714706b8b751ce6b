use serde::{Deserialize, Serialize};

const LEGACY_KEYWORD_PREFIX: &str = "PG_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Database operations a request can ask for.
pub enum Command {
    Read,
    Write,
    Dump,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Read, Command::Write, Command::Dump];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Dump => "DUMP",
        }
    }

    /// Resolves a command keyword. Accepts `READ` as well as the `PG_READ` form.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let keyword = keyword.trim();
        let bare = keyword
            .strip_prefix(LEGACY_KEYWORD_PREFIX)
            .unwrap_or(keyword);
        match bare {
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            "DUMP" => Some(Self::Dump),
            _ => None,
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read | Self::Dump)
    }

    /// Dumps have no dry-run counterpart.
    pub fn has_preview(self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Command;

    #[test]
    fn unit_from_keyword_accepts_short_and_prefixed_forms() {
        assert_eq!(Command::from_keyword("READ"), Some(Command::Read));
        assert_eq!(Command::from_keyword("PG_READ"), Some(Command::Read));
        assert_eq!(Command::from_keyword("PG_WRITE"), Some(Command::Write));
        assert_eq!(Command::from_keyword("DUMP"), Some(Command::Dump));
    }

    #[test]
    fn regression_from_keyword_is_case_sensitive_and_rejects_unknown() {
        assert_eq!(Command::from_keyword("read"), None);
        assert_eq!(Command::from_keyword("PG_DELETE"), None);
        assert_eq!(Command::from_keyword("PG_"), None);
    }

    #[test]
    fn unit_only_read_and_write_have_previews() {
        assert!(Command::Read.has_preview());
        assert!(Command::Write.has_preview());
        assert!(!Command::Dump.has_preview());
        assert!(!Command::Write.is_read_only());
    }
}
