use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    ReadOnly,
    Mutating,
}

/// Allow-list classification: only a single statement that lexically starts
/// with `SELECT` is read-only. Everything else, including unknown keywords,
/// CTEs and `SELECT 1; DROP ...` batches, needs confirmation.
pub fn classify_statement(sql: &str) -> StatementKind {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("SELECT") && !is_batch(trimmed) {
        StatementKind::ReadOnly
    } else {
        StatementKind::Mutating
    }
}

/// True when a `;` outside quotes and comments is followed by more SQL.
/// Trailing separators and comments do not count.
fn is_batch(sql: &str) -> bool {
    let mut chars = sql.chars().peekable();
    let mut separated = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                if separated {
                    return true;
                }
                skip_quoted(&mut chars, c);
            }
            '-' if chars.peek() == Some(&'-') => skip_line(&mut chars),
            '#' => skip_line(&mut chars),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ';' => separated = true,
            c if c.is_whitespace() => {}
            _ => {
                if separated {
                    return true;
                }
            }
        }
    }
    false
}

fn skip_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) {
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            // '' is an escaped quote inside the literal
            if chars.peek() == Some(&quote) {
                chars.next();
            } else {
                return;
            }
        }
    }
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for c in chars.by_ref() {
        if c == '\n' {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_read_only() {
        for sql in [
            "SELECT 1",
            "  select * from t",
            "\n\tSeLeCt count(*) from t",
            "SELECT 1;",
            "SELECT 1;  -- done",
            "SELECT client_name FROM t WHERE note = 'paid; thanks'",
            "SELECT \"a;b\" AS x, `p.d.t;x` FROM t",
            "SELECT 'it''s; fine' FROM t /* one; two */",
            "SELECT 'esc\\'; still quoted' FROM t",
        ] {
            assert_eq!(classify_statement(sql), StatementKind::ReadOnly, "{}", sql);
        }
    }

    #[test]
    fn test_everything_else_is_mutating() {
        for sql in [
            "UPDATE t SET a = 1",
            "DELETE FROM t",
            "INSERT INTO t VALUES (1)",
            "MERGE t USING s ON true WHEN MATCHED THEN DELETE",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "TRUNCATE TABLE t",
            "EXPLAIN SELECT 1",
            "SELECT 1; DROP TABLE t",
            "SELECT 'a;b'; DELETE FROM t",
            "SELECT 1 -- comment\n; DROP TABLE t",
            "SELECT 1;'x'",
            "",
        ] {
            assert_eq!(classify_statement(sql), StatementKind::Mutating, "{}", sql);
        }
    }
}
