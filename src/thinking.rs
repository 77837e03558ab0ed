// Thinking segment formats, tried in order, first hit wins:
// <think>..</think>, [thinking]..[/thinking], <!-- thinking: .. -->, {"thinking": ..}

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extracted {
    pub thinking: Option<String>,
    pub response: String,
}

/// Splits `content` into its thinking segment and the visible response.
pub fn extract(content: &str) -> Extracted {
    let found = delimited(content, "<think>", "</think>")
        .or_else(|| delimited(content, "[thinking]", "[/thinking]"))
        .or_else(|| comment(content))
        .or_else(|| embedded_json(content));

    match found {
        Some((span, thinking)) => {
            let mut response = String::with_capacity(content.len());
            response.push_str(&content[..span.start]);
            response.push_str(&content[span.end..]);
            Extracted {
                thinking: Some(thinking.trim().to_string()),
                response: response.trim().to_string(),
            }
        }
        None => Extracted {
            thinking: None,
            response: content.to_string(),
        },
    }
}

type Match = (std::ops::Range<usize>, String);

// First `open`, then the nearest `close` after it.
fn delimited(content: &str, open: &str, close: &str) -> Option<Match> {
    let start = content.find(open)?;
    let inner_start = start + open.len();
    let inner_len = content[inner_start..].find(close)?;
    let inner_end = inner_start + inner_len;
    Some((
        start..inner_end + close.len(),
        content[inner_start..inner_end].to_string(),
    ))
}

// `<!--` ws* `thinking:` ws* body ws* `-->`
fn comment(content: &str) -> Option<Match> {
    let mut from = 0;
    while let Some(rel) = content[from..].find("<!--") {
        let start = from + rel;
        let after_open = start + "<!--".len();
        let rest = content[after_open..].trim_start();
        if let Some(body) = rest.strip_prefix("thinking:") {
            let body_start = content.len() - body.len();
            let close = content[body_start..].find("-->")?;
            let body_end = body_start + close;
            return Some((
                start..body_end + "-->".len(),
                content[body_start..body_end].to_string(),
            ));
        }
        from = after_open;
    }
    None
}

// Shortest `{ ... "thinking" ... }` span: the first `{`, the first `"thinking"`
// after it, then the first `}` after that. Parse failures fall through.
fn embedded_json(content: &str) -> Option<Match> {
    if !content.contains("\"thinking\"") {
        return None;
    }
    let start = content.find('{')?;
    let key = start + content[start..].find("\"thinking\"")?;
    let key_end = key + "\"thinking\"".len();
    let end = key_end + content[key_end..].find('}')? + 1;
    let candidate = &content[start..end];

    let parsed: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Embedded thinking JSON did not parse: {}", e);
            return None;
        }
    };
    let thinking = parsed.get("thinking")?.as_str()?;
    if thinking.is_empty() {
        return None;
    }
    Some((start..end, thinking.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn tag_format() {
        let out = extract("Before <think> pondering </think> after");
        assert_eq!(out.thinking, some("pondering"));
        assert_eq!(out.response, "Before  after");
    }

    #[test]
    fn bracket_format() {
        let out = extract("[thinking]\nstep one\n[/thinking]\nThe answer is 4.");
        assert_eq!(out.thinking, some("step one"));
        assert_eq!(out.response, "The answer is 4.");
    }

    #[test]
    fn comment_format() {
        let out = extract("Intro <!--  thinking: hidden notes  --> outro");
        assert_eq!(out.thinking, some("hidden notes"));
        assert_eq!(out.response, "Intro  outro");
    }

    #[test]
    fn comment_without_thinking_label_is_ignored() {
        let content = "<!-- plain comment --> text";
        let out = extract(content);
        assert_eq!(out.thinking, None);
        assert_eq!(out.response, content);
    }

    #[test]
    fn json_format() {
        let out = extract(r#"prefix {"thinking": " reasoning here "} suffix"#);
        assert_eq!(out.thinking, some("reasoning here"));
        assert_eq!(out.response, "prefix  suffix");
    }

    #[test]
    fn malformed_json_falls_through() {
        let content = r#"{"thinking": unterminated"#;
        let out = extract(content);
        assert_eq!(out.thinking, None);
        assert_eq!(out.response, content);
    }

    #[test]
    fn no_format_returns_content_untouched() {
        let content = "  Just a plain answer.\n";
        let out = extract(content);
        assert_eq!(out.thinking, None);
        assert_eq!(out.response, content);
    }

    #[test]
    fn earlier_format_wins() {
        let out = extract("[thinking]b[/thinking] <think>a</think> rest");
        assert_eq!(out.thinking, some("a"));
        assert_eq!(out.response, "[thinking]b[/thinking]  rest");
    }

    #[test]
    fn only_first_block_is_removed() {
        let out = extract("<think>one</think>mid<think>two</think>");
        assert_eq!(out.thinking, some("one"));
        assert_eq!(out.response, "mid<think>two</think>");
    }

    #[test]
    fn unclosed_tag_is_not_a_match() {
        let content = "<think>still streaming";
        let out = extract(content);
        assert_eq!(out.thinking, None);
        assert_eq!(out.response, content);
    }
}
