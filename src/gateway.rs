//! Raw access to the Metabase REST API.
//!
//! [`ApiGateway`] is the seam between the tool layer and the network:
//! [`MetabaseClient`] talks HTTP, tests substitute an in-memory implementation.

mod client;

pub use client::MetabaseClient;

use crate::error::ServerError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// HTTP method of an upstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single upstream call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            query: Vec::new(),
        }
    }

    /// Append a query-string parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Source of raw Metabase JSON.
///
/// Implementations return the decoded response body on 2xx and
/// [`ServerError::Upstream`] with the status and upstream message otherwise.
#[async_trait]
pub trait ApiGateway: Send + Sync {
    async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, ServerError>;

    async fn get(&self, path: &str) -> Result<Value, ServerError> {
        self.request(path, RequestOptions::get()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_options_builders() {
        let get = RequestOptions::get().with_query("q", "revenue");
        assert_eq!(get.method, Method::Get);
        assert_eq!(get.query, vec![("q".to_string(), "revenue".to_string())]);

        let post = RequestOptions::post(json!({"database": 1}));
        assert_eq!(post.method, Method::Post);
        assert_eq!(post.body, Some(json!({"database": 1})));
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Post.to_string(), "POST");
    }
}
