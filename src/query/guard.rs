//! Read-only classification for native SQL.
//!
//! Classification looks only at the leading keyword after comments are
//! stripped. It is a first line of defense: Metabase permissions and the
//! database user's grants remain the real boundary.

use super::limit::{apply_limit, QueryRewrite};
use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::error::ServerError;
use crate::tools::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Leading keywords rejected in read-only mode.
pub const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "CALL", "EXEC", "EXECUTE", "GRANT", "REVOKE", "SET",
];

/// Patterns are hardcoded constants; a compile failure is a programming error.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| compile(r"(?s)/\*.*?\*/"));
static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| compile(r"--[^\n]*"));

/// Remove `/* */` block comments and `--` line comments.
pub fn strip_comments(sql: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(sql, " ");
    LINE_COMMENT.replace_all(&without_blocks, " ").into_owned()
}

/// First keyword of the statement, uppercased, ignoring comments and any
/// leading whitespace, `;` or `(`.
pub fn leading_keyword(sql: &str) -> Option<String> {
    let stripped = strip_comments(sql);
    let keyword: String = stripped
        .trim_start_matches(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if keyword.is_empty() {
        None
    } else {
        Some(keyword.to_ascii_uppercase())
    }
}

/// Whether the statement's leading keyword is outside the write deny-list.
pub fn is_read_only(sql: &str) -> bool {
    match leading_keyword(sql) {
        Some(keyword) => !WRITE_KEYWORDS.contains(&keyword.as_str()),
        None => true,
    }
}

/// Gate for native queries headed to Metabase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryGuard {
    read_only: bool,
}

impl QueryGuard {
    pub fn new(read_only: bool) -> Self {
        Self { read_only }
    }

    /// Whether write statements are being rejected.
    pub fn is_read_only_mode(&self) -> bool {
        self.read_only
    }

    /// Reject empty statements, and writes when read-only mode is on.
    pub fn check(&self, sql: &str) -> Result<(), ServerError> {
        if strip_comments(sql).trim().trim_end_matches(';').trim().is_empty() {
            return Err(ServerError::validation(
                "query",
                "query must not be empty",
                "Provide a SQL SELECT statement in `query`, or pass `card_id` to run a saved question.",
            ));
        }

        if !self.read_only {
            return Ok(());
        }

        if let Some(keyword) = leading_keyword(sql) {
            if WRITE_KEYWORDS.contains(&keyword.as_str()) {
                warn!(%keyword, query = %truncate_for_log(sql, LOG_QUERY_TRUNCATE_LENGTH), "Blocked write statement");
                return Err(ServerError::write_blocked(keyword));
            }
        }

        Ok(())
    }

    /// Check the statement, then reconcile its LIMIT with `row_limit`.
    pub fn prepare(&self, sql: &str, row_limit: usize) -> Result<QueryRewrite, ServerError> {
        self.check(sql)?;
        let rewrite = apply_limit(sql, row_limit);
        if rewrite.was_rewritten() {
            debug!(
                applied_limit = rewrite.applied_limit,
                had_existing_limit = rewrite.had_existing_limit,
                query = %truncate_for_log(&rewrite.rewritten_query, LOG_QUERY_TRUNCATE_LENGTH),
                "Rewrote query limit"
            );
        }
        Ok(rewrite)
    }
}
