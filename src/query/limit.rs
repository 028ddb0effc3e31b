//! Row-limit reconciliation for native SQL.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// `LIMIT n [OFFSET m]` at the very end of a statement body.
static TRAILING_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+(\d+)(?:\s+OFFSET\s+(\d+))?$")
        .unwrap_or_else(|e| panic!("Internal error: invalid limit pattern: {}", e))
});

/// Outcome of reconciling a query's LIMIT with the requested row limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRewrite {
    pub original_query: String,
    pub rewritten_query: String,
    /// Never greater than the requested limit.
    pub applied_limit: usize,
    pub had_existing_limit: bool,
}

impl QueryRewrite {
    pub fn was_rewritten(&self) -> bool {
        self.original_query != self.rewritten_query
    }
}

/// Make `sql` return at most `requested` rows.
///
/// Trailing comments, `;` and whitespace are set aside before looking for
/// the statement's own LIMIT, and comments are re-attached after it.
///
/// - no trailing LIMIT: append one
/// - `LIMIT n` with `n <= requested`: leave the query alone
/// - `LIMIT n` with `n > requested`: lower it, keeping any `OFFSET`
pub fn apply_limit(sql: &str, requested: usize) -> QueryRewrite {
    let original_query = sql.to_string();
    let (body, comments) = split_trailing_trivia(sql);
    let trailer: String = comments.iter().map(|c| format!(" {c}")).collect();

    if let Some(caps) = TRAILING_LIMIT.captures(body) {
        let existing = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(usize::MAX);

        if existing <= requested {
            return QueryRewrite {
                rewritten_query: original_query.clone(),
                original_query,
                applied_limit: existing,
                had_existing_limit: true,
            };
        }

        let start = caps.get(0).map(|m| m.start()).unwrap_or(body.len());
        let offset = caps
            .get(2)
            .map(|m| format!(" OFFSET {}", m.as_str()))
            .unwrap_or_default();

        return QueryRewrite {
            rewritten_query: format!("{}LIMIT {}{}{}", &body[..start], requested, offset, trailer),
            original_query,
            applied_limit: requested,
            had_existing_limit: true,
        };
    }

    QueryRewrite {
        rewritten_query: format!("{body} LIMIT {requested}{trailer}"),
        original_query,
        applied_limit: requested,
        had_existing_limit: false,
    }
}

/// Split `sql` into its statement body and the comments that trail it.
///
/// Trailing whitespace and `;` are dropped. Comments come back in source
/// order.
fn split_trailing_trivia(sql: &str) -> (&str, Vec<&str>) {
    let mut end = sql.len();
    let mut comments = Vec::new();

    loop {
        let head = sql[..end].trim_end();
        end = head.len();

        if let Some(rest) = head.strip_suffix(';') {
            end = rest.len();
            continue;
        }

        if let Some(inner) = head.strip_suffix("*/") {
            if let Some(open) = inner.rfind("/*") {
                if !inner[open + 2..].contains("*/") {
                    comments.push(&head[open..]);
                    end = open;
                    continue;
                }
            }
        }

        let line_start = head.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let before = &head[..line_start];
        if before.rfind("/*") > before.rfind("*/") {
            // Last line continues a block comment opened above.
            break;
        }
        if let Some(offset) = line_comment_start(&head[line_start..]) {
            comments.push(&head[line_start + offset..]);
            end = line_start + offset;
            continue;
        }

        break;
    }

    comments.reverse();
    (&sql[..end], comments)
}

/// Byte offset of a `--` comment in one line, skipping string literals and
/// block comments.
fn line_comment_start(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'-' if !in_string && bytes.get(i + 1) == Some(&b'-') => return Some(i),
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'*') => {
                match line[i + 2..].find("*/") {
                    Some(close) => i += close + 3,
                    None => return None,
                }
            }
            _ => {}
        }
        i += 1;
    }

    None
}
