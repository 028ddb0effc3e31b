//! Shared test fixtures: an in-memory Metabase that records traffic.

#![allow(dead_code)]

use async_trait::async_trait;
use metabase_mcp_server::config::Config;
use metabase_mcp_server::gateway::{ApiGateway, Method, RequestOptions};
use metabase_mcp_server::{MetabaseMcpServer, ServerError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One request seen by the fake.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

/// Canned Metabase responses keyed by path.
///
/// Paths without a route answer 404 with Metabase's usual `"Not found."`
/// body. Each route can carry a delay, which makes completion order differ
/// from request order.
#[derive(Default)]
pub struct FakeMetabase {
    routes: Mutex<HashMap<String, (Value, Duration)>>,
    failures: Mutex<HashMap<String, u16>>,
    log: Mutex<Vec<Recorded>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeMetabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, path: impl Into<String>, body: Value) {
        self.route_with_delay(path, body, Duration::ZERO);
    }

    pub fn route_with_delay(&self, path: impl Into<String>, body: Value, delay: Duration) {
        self.routes.lock().insert(path.into(), (body, delay));
    }

    /// Answer `path` with the given status instead of a body.
    pub fn fail(&self, path: impl Into<String>, status: u16) {
        self.failures.lock().insert(path.into(), status);
    }

    pub fn calls(&self) -> usize {
        self.log.lock().len()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.log.lock().iter().filter(|r| r.path == path).count()
    }

    pub fn last_request(&self) -> Option<Recorded> {
        self.log.lock().last().cloned()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiGateway for FakeMetabase {
    async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, ServerError> {
        self.log.lock().push(Recorded {
            method: options.method,
            path: path.to_string(),
            body: options.body.clone(),
            query: options.query.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let route = self.routes.lock().get(path).cloned();
        let failure = self.failures.lock().get(path).copied();

        let delay = route.as_ref().map(|(_, d)| *d).unwrap_or(Duration::ZERO);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(status) = failure {
            return Err(ServerError::upstream(status, format!("HTTP {status}")));
        }
        match route {
            Some((body, _)) => Ok(body),
            None => Err(ServerError::upstream(404, "Not found.")),
        }
    }
}

/// Environment for a server in read-only mode with default settings.
pub fn env(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("METABASE_URL".to_string(), "https://metabase.example.com".to_string()),
        ("METABASE_API_KEY".to_string(), "mb_test_key".to_string()),
    ]);
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).expect("test config")
}

pub fn server(fake: &Arc<FakeMetabase>) -> MetabaseMcpServer {
    server_with(fake, &[])
}

pub fn server_with(fake: &Arc<FakeMetabase>, overrides: &[(&str, &str)]) -> MetabaseMcpServer {
    let gateway: Arc<dyn ApiGateway> = fake.clone();
    MetabaseMcpServer::with_gateway(env(overrides), gateway)
}

pub fn card(id: u64) -> Value {
    json!({
        "id": id,
        "name": format!("Card {id}"),
        "description": null,
        "collection_id": 4,
        "database_id": 1,
        "display": "table",
        "type": "question",
        "query_type": "native",
        "archived": false,
        "dataset_query": {
            "type": "native",
            "database": 1,
            "native": {"query": "SELECT * FROM orders", "template-tags": {}}
        },
        "result_metadata": [
            {"name": "ID", "fingerprint": {"global": {"distinct-count": 18760}}}
        ],
        "visualization_settings": {"table.pivot": false}
    })
}

/// A successful `/api/dataset` body with `n` rows of (ID, TOTAL).
pub fn dataset(n: usize) -> Value {
    let rows: Vec<Value> = (1..=n).map(|i| json!([i, i as f64 * 1.5])).collect();
    json!({
        "status": "completed",
        "row_count": n,
        "data": {
            "cols": [
                {"name": "ID", "display_name": "ID", "base_type": "type/BigInteger"},
                {"name": "TOTAL", "display_name": "Total", "base_type": "type/Float"}
            ],
            "rows": rows
        }
    })
}
