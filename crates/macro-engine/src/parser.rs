//! Macro source parser
//!
//! Turns macro text into an ordered list of [`Command`]s. Parsing never fails:
//! a line that cannot be tokenised cleanly still becomes a command, flagged via
//! [`Command::malformed`], so the execution loop reports it like any other
//! command failure. Values are kept unexpanded; placeholders are resolved per
//! execution.

use crate::types::{Command, Parameter};

const QUOTE: char = '"';

/// Parse macro source text
pub fn parse(text: &str) -> Vec<Command> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| parse_line(line, idx + 1))
        .collect()
}

/// Parse one source line; blank lines and `'` comments yield `None`
pub fn parse_line(line: &str, line_number: usize) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('\'') {
        return None;
    }

    let (tokens, unterminated) = tokenize(trimmed);
    let mut tokens = tokens.into_iter();
    let name_token = tokens.next()?;
    let name = name_token.to_ascii_uppercase();

    let parameters: Vec<Parameter> = tokens.map(|token| split_parameter(&token)).collect();

    let malformed = if unterminated {
        Some("Unterminated quoted value".to_string())
    } else if !is_valid_name(&name) {
        Some(format!("Invalid command name '{}'", name_token))
    } else {
        None
    };

    Some(Command {
        name,
        parameters,
        raw: trimmed.to_string(),
        line: line_number,
        malformed,
    })
}

fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Split on whitespace outside quotes. Returns the tokens and whether a quote
/// was left open at end of line.
fn tokenize(line: &str) -> (Vec<String>, bool) {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in line.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            QUOTE => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    (tokens, in_quotes)
}

fn split_parameter(token: &str) -> Parameter {
    match find_unquoted_eq(token) {
        Some(pos) if pos > 0 => {
            let key = &token[..pos];
            let value = unquote(&token[pos + 1..]);
            Parameter::keyed(key, value, token)
        }
        _ => Parameter::positional(unquote(token), token),
    }
}

fn find_unquoted_eq(token: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in token.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            QUOTE => in_quotes = !in_quotes,
            '=' if !in_quotes => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Strip one pair of surrounding quotes and resolve `\"` / `\\` escapes.
/// Values that are not wholly quoted are returned as written.
pub fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with(QUOTE) && value.ends_with(QUOTE) {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(next @ (QUOTE | '\\')) => out.push(next),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drops_blank_lines_and_comments() {
        let commands = parse("VERSION BUILD=1\n\n   ' a comment\n  SET !VAR1 5\r\n");
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].name, "VERSION");
        assert_eq!(commands[0].line, 1);
        assert_eq!(commands[1].name, "SET");
        assert_eq!(commands[1].line, 4);
        assert_eq!(commands[1].raw, "SET !VAR1 5");
    }

    #[test]
    fn test_parse_key_value_and_positional() {
        let cmd = parse_line("tag POS=1 TYPE=INPUT:TEXT ATTR=NAME:q CONTENT=hi", 3).unwrap();
        assert_eq!(cmd.name, "TAG");
        assert_eq!(cmd.parameters.len(), 4);
        assert_eq!(cmd.param("type").unwrap().raw_value, "INPUT:TEXT");
        assert!(cmd.parameters.iter().all(|p| !p.positional));

        let cmd = parse_line("TAB OPEN", 1).unwrap();
        assert!(cmd.parameters[0].positional);
        assert_eq!(cmd.parameters[0].key, "OPEN");
    }

    #[test]
    fn test_parse_quoted_values() {
        let cmd = parse_line(r#"SET !VAR1 "hello world""#, 1).unwrap();
        assert_eq!(cmd.parameters.len(), 2);
        assert_eq!(cmd.parameters[1].raw_value, "hello world");
        assert!(cmd.parameters[1].positional);

        let cmd = parse_line(r#"TAG ATTR="TXT:a=b c" CONTENT="say \"hi\"""#, 1).unwrap();
        assert_eq!(cmd.param("ATTR").unwrap().raw_value, "TXT:a=b c");
        assert_eq!(cmd.param("CONTENT").unwrap().raw_value, r#"say "hi""#);
    }

    #[test]
    fn test_parse_eval_stays_one_positional_token() {
        let cmd = parse_line(r#"SET !VAR2 EVAL("(1 + 2) * 3")"#, 1).unwrap();
        assert_eq!(cmd.parameters.len(), 2);
        assert!(cmd.parameters[1].positional);
        assert_eq!(cmd.parameters[1].raw_value, r#"EVAL("(1 + 2) * 3")"#);
    }

    #[test]
    fn test_parse_keeps_placeholders_unexpanded() {
        let cmd = parse_line("URL GOTO=http://example.com/?q={{!VAR1}}", 1).unwrap();
        assert_eq!(
            cmd.param("GOTO").unwrap().raw_value,
            "http://example.com/?q={{!VAR1}}"
        );
    }

    #[test]
    fn test_parse_keeps_original_token() {
        let cmd = parse_line("SET !VAR1 a=b", 1).unwrap();
        assert!(!cmd.parameters[1].positional);
        assert_eq!(cmd.parameters[1].token, "a=b");
    }

    #[test]
    fn test_parse_flags_malformed_lines() {
        let cmd = parse_line(r#"SET !VAR1 "unterminated"#, 7).unwrap();
        assert_eq!(cmd.malformed.as_deref(), Some("Unterminated quoted value"));
        assert_eq!(cmd.line, 7);

        let cmd = parse_line("{{!VAR1}} X=1", 1).unwrap();
        assert!(cmd.malformed.is_some());
    }
}
