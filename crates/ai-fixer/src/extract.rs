//! Pulls the proposed manifest out of an inference response.
//!
//! The response body is scanned as opaque text. Models usually answer with a
//! chat-completion JSON document, so the fenced block tends to arrive with its
//! newlines still escaped (`\n` as two characters); those escapes are undone
//! here. Whether the result is a well-formed manifest is decided later, when
//! the apply step parses it.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{FixerError, Result};

const FENCE: &str = "```";

/// First fence, an optional info-string, then everything up to the next fence.
static FENCED_BLOCK: OnceLock<Regex> = OnceLock::new();

fn fenced_block() -> &'static Regex {
    FENCED_BLOCK.get_or_init(|| {
        Regex::new(r"(?s)```([A-Za-z0-9_+.-]*)(.*?)```").expect("valid fenced block regex")
    })
}

/// Extract the first fenced block from `response`.
///
/// The block's content has `\n`, `\t`, `\"` and `\\` escapes undone and
/// surrounding whitespace trimmed. Returns [`FixerError::FixNotFound`] when
/// the text contains no complete fenced block.
pub fn extract_fenced_block(response: &str) -> Result<String> {
    let captures = fenced_block()
        .captures(response)
        .ok_or(FixerError::FixNotFound)?;

    let tag = captures.get(1).map_or("", |m| m.as_str());
    let body = captures.get(2).map_or("", |m| m.as_str());

    // An info string must be followed by a line break (real or escaped);
    // otherwise the "tag" is the first word of the content.
    let content = if tag.is_empty() || starts_with_break(body) {
        body.to_string()
    } else {
        format!("{tag}{body}")
    };

    Ok(unescape(&content).trim().to_string())
}

fn starts_with_break(body: &str) -> bool {
    body.is_empty()
        || body.starts_with(char::is_whitespace)
        || body.starts_with("\\n")
        || body.starts_with("\\r")
        || body.starts_with("\\t")
}

/// Undo JSON-style escapes in one left-to-right pass.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => {}
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Wrap a manifest in a yaml fence, the shape the model is asked to answer in.
pub(crate) fn fence_yaml(manifest: &str) -> String {
    format!("{FENCE}yaml\n{manifest}\n{FENCE}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_yaml_block_with_real_newlines() {
        let response = "Here you go:\n```yaml\napiVersion: apps/v1\nkind: Deployment\n```\nDone.";
        assert_eq!(
            extract_fenced_block(response).unwrap(),
            "apiVersion: apps/v1\nkind: Deployment"
        );
    }

    #[test]
    fn test_unescapes_json_encoded_block() {
        let response = r#"{"choices":[{"message":{"content":"```yaml\n  apiVersion: apps/v1\n  metadata:\n\tname: \"nginx\"\n  path: C:\\tmp\n```"}}]}"#;
        assert_eq!(
            extract_fenced_block(response).unwrap(),
            "apiVersion: apps/v1\n  metadata:\n\tname: \"nginx\"\n  path: C:\\tmp"
        );
    }

    #[test]
    fn test_untagged_block() {
        let response = "```\nkind: Deployment\n```";
        assert_eq!(extract_fenced_block(response).unwrap(), "kind: Deployment");
    }

    #[test]
    fn test_other_language_tag_is_dropped() {
        let response = "```yml\nkind: Deployment\n```";
        assert_eq!(extract_fenced_block(response).unwrap(), "kind: Deployment");
    }

    #[test]
    fn test_content_on_fence_line_is_kept() {
        let response = "```kind: Deployment```";
        assert_eq!(extract_fenced_block(response).unwrap(), "kind: Deployment");
    }

    #[test]
    fn test_first_block_wins() {
        let response = "```yaml\nfirst: 1\n```\nand also\n```yaml\nsecond: 2\n```";
        assert_eq!(extract_fenced_block(response).unwrap(), "first: 1");
    }

    #[test]
    fn test_escaped_backslash_before_n_stays_literal() {
        assert_eq!(unescape(r"a\\nb"), r"a\nb");
    }

    #[test]
    fn test_no_fence_is_not_found() {
        let err = extract_fenced_block("I could not fix this deployment.").unwrap_err();
        assert!(matches!(err, FixerError::FixNotFound));
    }

    #[test]
    fn test_unterminated_fence_is_not_found() {
        assert!(matches!(
            extract_fenced_block("```yaml\nkind: Deployment"),
            Err(FixerError::FixNotFound)
        ));
    }

    #[test]
    fn test_fence_yaml_round_trips() {
        let fenced = fence_yaml("kind: Deployment");
        assert_eq!(extract_fenced_block(&fenced).unwrap(), "kind: Deployment");
    }
}
