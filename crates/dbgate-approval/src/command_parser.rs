//! Extracts the command line and fenced code block from a mention message.
//!
//! Slack delivers message text HTML-escaped, so a quoted command line arrives
//! as `&gt; READ orders:` and the code block keeps `&lt;`/`&gt;`/`&amp;`
//! entities until [`unescape_code_block`] restores them.

use thiserror::Error;

pub const COMMAND_LINE_PREFIX: &str = "&gt; ";
const CODE_FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq)]
/// A fully parsed request. Never constructed with an empty field.
pub struct CommandRequest {
    /// Command keyword exactly as written, e.g. `READ` or `PG_WRITE`.
    pub keyword: String,
    pub resource: String,
    /// Fenced block as it appeared in the message, fences included.
    pub code_block: String,
    /// Unescaped block contents handed to the executor.
    pub payload: String,
}

impl CommandRequest {
    /// Renders the command line the way approvers saw it in the request.
    pub fn command_line(&self) -> String {
        format!("{COMMAND_LINE_PREFIX}{} {}:", self.keyword, self.resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `ParseError` values.
pub enum ParseError {
    #[error("No command found")]
    MissingCommandLine,
    #[error("malformed command line '{line}': expected `COMMAND resource:`")]
    MalformedCommandLine { line: String },
    #[error("No code block found")]
    MissingCodeBlock,
    #[error("invalid resource '{resource}': use only letters, digits, '_' or '-'")]
    InvalidResource { resource: String },
}

/// Resource names become database names and dump file names, so only plain
/// identifiers are accepted.
pub fn is_valid_resource(resource: &str) -> bool {
    !resource.is_empty()
        && resource
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

/// Parses raw mention text into a [`CommandRequest`].
///
/// The first line is the mention itself and is skipped. The latest command
/// line seen before a code block opens wins; anything after the closing fence
/// is ignored.
pub fn parse_command_request(text: &str) -> Result<CommandRequest, ParseError> {
    let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));
    let _mention_line = lines.next();

    let mut command_line: Option<&str> = None;
    let mut block_lines: Vec<&str> = Vec::new();
    let mut block_open = false;

    for line in lines {
        if block_open {
            block_lines.push(line);
            if line.trim_end().ends_with(CODE_FENCE) {
                break;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(COMMAND_LINE_PREFIX) {
            command_line = Some(rest);
            continue;
        }
        if command_line.is_none() {
            continue;
        }

        let trimmed = line.trim();
        if !trimmed.starts_with(CODE_FENCE) {
            continue;
        }
        block_lines.push(trimmed);
        if trimmed.len() >= CODE_FENCE.len() * 2 && trimmed.ends_with(CODE_FENCE) {
            break;
        }
        block_open = true;
    }

    let command_line = command_line.ok_or(ParseError::MissingCommandLine)?;
    let (keyword, resource) = split_command_line(command_line)?;

    let code_block = block_lines.join("\n");
    let payload = unescape_code_block(&code_block);
    if payload.is_empty() {
        return Err(ParseError::MissingCodeBlock);
    }

    Ok(CommandRequest {
        keyword,
        resource,
        code_block,
        payload,
    })
}

fn split_command_line(raw: &str) -> Result<(String, String), ParseError> {
    let malformed = || ParseError::MalformedCommandLine {
        line: raw.trim().to_string(),
    };
    let mut tokens = raw.split_whitespace();
    let keyword = tokens.next().ok_or_else(malformed)?;
    let resource = tokens.next().ok_or_else(malformed)?;
    if tokens.next().is_some() {
        return Err(malformed());
    }
    let resource = resource.trim_end_matches(':');
    if resource.is_empty() {
        return Err(malformed());
    }
    if !is_valid_resource(resource) {
        return Err(ParseError::InvalidResource {
            resource: resource.to_string(),
        });
    }
    Ok((keyword.to_string(), resource.to_string()))
}

/// Strips backtick fences and reverses Slack's HTML escaping.
pub fn unescape_code_block(code_block: &str) -> String {
    code_block
        .replace(CODE_FENCE, "")
        .replace('`', "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{
        is_valid_resource, parse_command_request, unescape_code_block, CommandRequest, ParseError,
    };

    #[test]
    fn functional_parse_single_line_block() {
        let request =
            parse_command_request("<@UBOT>\n&gt; READ mydb:\n```SELECT 1```").expect("parse");
        assert_eq!(
            request,
            CommandRequest {
                keyword: "READ".to_string(),
                resource: "mydb".to_string(),
                code_block: "```SELECT 1```".to_string(),
                payload: "SELECT 1".to_string(),
            }
        );
    }

    #[test]
    fn functional_parse_multi_line_block_with_intervening_lines() {
        let text = "<@UBOT> please run this\nsome context first\n\n&gt; PG_WRITE billing:\nnote for approvers\n```\nUPDATE invoices\nSET paid = true\nWHERE id &gt; 10;\n```\ntrailing chatter";
        let request = parse_command_request(text).expect("parse");
        assert_eq!(request.keyword, "PG_WRITE");
        assert_eq!(request.resource, "billing");
        assert_eq!(
            request.payload,
            "UPDATE invoices\nSET paid = true\nWHERE id > 10;"
        );
        assert!(request.code_block.starts_with("```"));
        assert!(request.code_block.ends_with("```"));
        assert_eq!(request.command_line(), "&gt; PG_WRITE billing:");
    }

    #[test]
    fn functional_parse_block_opening_with_content_on_fence_line() {
        let text = "<@UBOT>\n&gt; READ orders:\n```SELECT *\nFROM orders```";
        let request = parse_command_request(text).expect("parse");
        assert_eq!(request.payload, "SELECT *\nFROM orders");
    }

    #[test]
    fn regression_parse_ignores_second_block_after_first_closes() {
        let text = "<@UBOT>\n&gt; READ orders:\n```SELECT 1```\n```SELECT 2```";
        let request = parse_command_request(text).expect("parse");
        assert_eq!(request.payload, "SELECT 1");
    }

    #[test]
    fn regression_parse_skips_first_line_even_if_it_looks_like_a_command() {
        let error = parse_command_request("&gt; READ orders:\n```SELECT 1```").expect_err("fail");
        assert_eq!(error, ParseError::MissingCommandLine);
    }

    #[test]
    fn unit_parse_fails_without_command_line() {
        let error = parse_command_request("<@UBOT>\n```SELECT 1```").expect_err("fail");
        assert_eq!(error, ParseError::MissingCommandLine);
        assert_eq!(error.to_string(), "No command found");
    }

    #[test]
    fn unit_parse_fails_without_code_block() {
        let error = parse_command_request("<@UBOT>\n&gt; READ orders:\nSELECT 1").expect_err("fail");
        assert_eq!(error, ParseError::MissingCodeBlock);
    }

    #[test]
    fn unit_parse_fails_on_empty_code_block() {
        let error =
            parse_command_request("<@UBOT>\n&gt; READ orders:\n``````").expect_err("fail");
        assert_eq!(error, ParseError::MissingCodeBlock);
        let error =
            parse_command_request("<@UBOT>\n&gt; READ orders:\n```\n   \n```").expect_err("fail");
        assert_eq!(error, ParseError::MissingCodeBlock);
    }

    #[test]
    fn unit_parse_rejects_malformed_command_line() {
        let error =
            parse_command_request("<@UBOT>\n&gt; READ\n```SELECT 1```").expect_err("fail");
        assert!(matches!(error, ParseError::MalformedCommandLine { .. }));
        let error = parse_command_request("<@UBOT>\n&gt; READ orders: extra\n```SELECT 1```")
            .expect_err("fail");
        assert!(matches!(error, ParseError::MalformedCommandLine { .. }));
        let error =
            parse_command_request("<@UBOT>\n&gt; READ :\n```SELECT 1```").expect_err("fail");
        assert!(matches!(error, ParseError::MalformedCommandLine { .. }));
    }

    #[test]
    fn regression_parse_rejects_resource_that_is_not_an_identifier() {
        for resource in [
            "postgresql://other-host/db",
            "../../etc",
            "/var/lib/dump",
            "host=evil.example",
            "orders;x",
        ] {
            let text = format!("<@UBOT>\n&gt; DUMP {resource}:\n```{resource}```");
            let error = parse_command_request(&text).expect_err(resource);
            assert_eq!(
                error,
                ParseError::InvalidResource {
                    resource: resource.to_string()
                },
                "{resource}"
            );
        }
        assert!(is_valid_resource("orders_2024-archive"));
        assert!(!is_valid_resource(""));
    }

    #[test]
    fn unit_unescape_code_block_restores_entities_once() {
        assert_eq!(
            unescape_code_block("```a &lt; b &amp;&amp; c &gt; `d````"),
            "a < b && c > d"
        );
        assert_eq!(unescape_code_block("```&amp;lt;```"), "&lt;");
    }
}
