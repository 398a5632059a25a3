//! SQL statement splitting
//!
//! Splits a script into individual statements on terminator semicolons,
//! honoring `DELIMITER` redefinitions used by stored-procedure files.
//! String literals and comments are scanned so a `;` inside either never
//! terminates a statement.

/// Split a SQL script into executable statements.
///
/// Empty statements and pure comments are dropped. `DELIMITER` lines
/// change the active terminator and are not statements themselves.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_content = false;
    let mut delimiter = String::from(";");

    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let rest = &sql[i..];

        // Line start: a DELIMITER directive redefines the terminator
        let at_line_start =
            current.ends_with('\n') || current.chars().all(|c| c.is_whitespace());
        if at_line_start && !has_content {
            let line_end = rest.find('\n').map(|p| i + p).unwrap_or(bytes.len());
            let line = sql[i..line_end].trim();
            if line
                .get(..9)
                .is_some_and(|head| head.eq_ignore_ascii_case("delimiter"))
            {
                let new_delim = line[9..].trim();
                if !new_delim.is_empty() {
                    delimiter = new_delim.to_string();
                }
                current.clear();
                i = line_end + 1;
                continue;
            }
        }

        // Comments pass through without counting as content
        if rest.starts_with("--") {
            let line_end = rest.find('\n').map(|p| i + p + 1).unwrap_or(bytes.len());
            current.push_str(&sql[i..line_end]);
            i = line_end;
            continue;
        }
        if rest.starts_with('#') {
            let line_end = rest.find('\n').map(|p| i + p + 1).unwrap_or(bytes.len());
            current.push_str(&sql[i..line_end]);
            i = line_end;
            continue;
        }
        if rest.starts_with("/*") {
            let close = rest.find("*/").map(|p| i + p + 2).unwrap_or(bytes.len());
            current.push_str(&sql[i..close]);
            i = close;
            continue;
        }

        // String literals and quoted identifiers swallow everything
        let ch = rest.chars().next().unwrap_or('\0');
        if ch == '\'' || ch == '"' || ch == '`' {
            let quote = ch;
            current.push(quote);
            i += quote.len_utf8();
            while i < bytes.len() {
                let c = sql[i..].chars().next().unwrap_or('\0');
                current.push(c);
                i += c.len_utf8();
                if c == '\\' && quote != '`' {
                    // Consume the escaped character
                    if let Some(escaped) = sql[i..].chars().next() {
                        current.push(escaped);
                        i += escaped.len_utf8();
                    }
                    continue;
                }
                if c == quote {
                    break;
                }
            }
            has_content = true;
            continue;
        }

        // Terminator check
        if rest.starts_with(delimiter.as_str()) {
            let trimmed = current.trim();
            if has_content && !trimmed.is_empty() {
                statements.push(trimmed.to_string());
            }
            current.clear();
            has_content = false;
            i += delimiter.len();
            continue;
        }

        if !ch.is_whitespace() {
            has_content = true;
        }
        current.push(ch);
        i += ch.len_utf8();
    }

    let trimmed = current.trim();
    if has_content && !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }

    statements
}
