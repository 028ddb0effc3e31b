//! Native query handling: read-only classification, row-limit rewriting and
//! dataset result formatting.

mod dataset;
mod guard;
mod limit;

pub use dataset::{Column, DatasetResult, ExportFormat};
pub use guard::{is_read_only, leading_keyword, strip_comments, QueryGuard, WRITE_KEYWORDS};
pub use limit::{apply_limit, QueryRewrite};
