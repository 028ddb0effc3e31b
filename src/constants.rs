//! Centralized constants for the Metabase MCP Server.
//!
//! This module contains all magic numbers and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default upstream request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 600_000;

/// Default upstream request timeout as Duration.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS);

// =============================================================================
// Cache Constants
// =============================================================================

/// Default cache TTL in milliseconds (10 minutes).
pub const DEFAULT_CACHE_TTL_MS: u64 = 600_000;

/// Default cache TTL as Duration.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(DEFAULT_CACHE_TTL_MS);

// =============================================================================
// Batch Retrieval Constants
// =============================================================================

/// Maximum number of ids in a single `retrieve` call.
pub const MAX_BATCH_IDS: usize = 50;

/// Default number of concurrent upstream fetches per batch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

/// Default page size for the tables embedded in a database record.
pub const DEFAULT_TABLE_PAGE_LIMIT: usize = 100;

/// Maximum page size for the tables embedded in a database record.
pub const MAX_TABLE_PAGE_LIMIT: usize = 1000;

// =============================================================================
// Listing and Search Constants
// =============================================================================

/// Default page size for `list`.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Maximum page size for `list`.
pub const MAX_LIST_LIMIT: usize = 1000;

/// Default number of search hits.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Maximum number of search hits.
pub const MAX_SEARCH_LIMIT: usize = 200;

// =============================================================================
// Query Execution Constants
// =============================================================================

/// Default row limit for `execute`.
pub const DEFAULT_EXECUTE_ROW_LIMIT: usize = 500;

/// Maximum row limit for `execute`.
pub const MAX_EXECUTE_ROW_LIMIT: usize = 2000;

/// Default row limit for `export`.
pub const DEFAULT_EXPORT_ROW_LIMIT: usize = 10_000;

/// Maximum row limit for `export`.
pub const MAX_EXPORT_ROW_LIMIT: usize = 1_000_000;

// =============================================================================
// Retry Constants
// =============================================================================

/// Default number of attempts for transient upstream failures.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff delay in milliseconds.
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 250;

/// Default maximum backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;

// =============================================================================
// Percentage Constants (for calculations)
// =============================================================================

/// Percentage multiplier for rate calculations.
pub const PERCENTAGE_MULTIPLIER: f64 = 100.0;
