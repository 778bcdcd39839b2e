//! Gremlin Server store over HTTP.
//!
//! Every mutation is one `POST` of a parameterised Gremlin script:
//!
//! ```text
//! {"gremlin": "g.V(vertexId).fold().coalesce(__.unfold().constant(false), ...)",
//!  "bindings": {"vertexLabel": "user", "vertexId": "alice"}}
//! ```
//!
//! Ids and labels always travel as bindings, never spliced into the script.
//! Both create scripts are create-if-absent and yield `true` when they
//! created something and `false` when it was already there; the latter is
//! surfaced as a 409, like any store that rejects duplicates. An edge script
//! yields nothing when an endpoint is missing, surfaced as a 404.
//! The resource charge is read from the response status attributes
//! (`x-ms-total-request-charge` or `x-ms-request-charge`, as reported by
//! Cosmos DB); stores that do not report one are charged zero.

use super::{GraphStore, MutationReceipt};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::time::Duration;

const ADD_VERTEX: &str = "g.V(vertexId).fold().coalesce(\
    __.unfold().constant(false), \
    __.addV(vertexLabel).property('id', vertexId).constant(true))";
const ADD_EDGE: &str = "g.V(fromId).as('a').V(toId).coalesce(\
    __.inE(edgeLabel).where(__.outV().as('a')).constant(false), \
    __.addE(edgeLabel).from('a').constant(true))";
const DROP_ALL: &str = "g.V().drop()";

const CHARGE_ATTRIBUTES: [&str; 2] = ["x-ms-total-request-charge", "x-ms-request-charge"];

/// Configuration for the Gremlin store.
#[derive(Debug, Clone)]
pub struct GremlinConfig {
    /// Gremlin Server HTTP endpoint (e.g., "http://localhost:8182/gremlin").
    pub url: String,

    /// Basic auth user name.
    pub username: Option<String>,

    /// Basic auth password.
    pub password: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for GremlinConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8182/gremlin".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScriptRequest<'a> {
    gremlin: &'a str,
    bindings: Map<String, Value>,
}

/// [`GraphStore`] backed by a Gremlin Server HTTP endpoint.
pub struct GremlinStore {
    client: reqwest::Client,
    config: GremlinConfig,
}

impl GremlinStore {
    /// Create a new store client.
    pub fn new(config: GremlinConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        tracing::info!(
            "Gremlin store initialized: url={}, timeout={:?}",
            config.url,
            config.timeout
        );

        Ok(Self { client, config })
    }

    /// Check the endpoint answers a trivial script.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self.submit("g.inject(1)", Map::new()).await?;
        Ok(result_len(&response) == 1)
    }

    /// Submit a script and return the decoded response body.
    async fn submit(&self, script: &str, bindings: Map<String, Value>) -> Result<Value> {
        let mut request = self.client.post(&self.config.url).json(&ScriptRequest {
            gremlin: script,
            bindings,
        });
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let http_status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        let status = body
            .pointer("/status/code")
            .and_then(Value::as_u64)
            .map(|code| code as u16)
            .unwrap_or(http_status.as_u16());

        if !http_status.is_success() || !(200..300).contains(&status) {
            let message = body
                .pointer("/status/message")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no message")
                .to_string();
            return Err(Error::Store { status, message });
        }

        Ok(body)
    }
}

#[async_trait]
impl GraphStore for GremlinStore {
    fn name(&self) -> &'static str {
        "gremlin"
    }

    async fn create_vertex(&self, label: &str, id: &str) -> Result<MutationReceipt> {
        let response = self.submit(ADD_VERTEX, vertex_bindings(label, id)).await?;
        created(&response, || format!("vertex '{id}'"))
    }

    async fn create_edge(&self, from: &str, to: &str, label: &str) -> Result<MutationReceipt> {
        let response = self.submit(ADD_EDGE, edge_bindings(from, to, label)).await?;
        created(&response, || format!("edge '{from}' -[{label}]-> '{to}'"))
    }

    async fn reset(&self) -> Result<MutationReceipt> {
        let response = self.submit(DROP_ALL, Map::new()).await?;
        Ok(receipt(&response))
    }
}

fn vertex_bindings(label: &str, id: &str) -> Map<String, Value> {
    let mut bindings = Map::new();
    bindings.insert("vertexLabel".into(), json!(label));
    bindings.insert("vertexId".into(), json!(id));
    bindings
}

fn edge_bindings(from: &str, to: &str, label: &str) -> Map<String, Value> {
    let mut bindings = Map::new();
    bindings.insert("fromId".into(), json!(from));
    bindings.insert("toId".into(), json!(to));
    bindings.insert("edgeLabel".into(), json!(label));
    bindings
}

fn receipt(response: &Value) -> MutationReceipt {
    MutationReceipt {
        request_charge: request_charge(response),
    }
}

/// Interpret the single boolean a create-if-absent script yields.
fn created(response: &Value, what: impl FnOnce() -> String) -> Result<MutationReceipt> {
    match result_items(response).first().and_then(Value::as_bool) {
        Some(true) => Ok(receipt(response)),
        Some(false) => Err(Error::Store {
            status: 409,
            message: format!("{} already exists", what()),
        }),
        // the traversal found no starting vertex
        None => Err(Error::Store {
            status: 404,
            message: format!("{} not created: endpoint vertex not found", what()),
        }),
    }
}

/// Resource charge from the status attributes; numbers or numeric strings.
fn request_charge(response: &Value) -> f64 {
    let Some(attributes) = response.pointer("/status/attributes") else {
        return 0.0;
    };

    CHARGE_ATTRIBUTES
        .iter()
        .filter_map(|key| attributes.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(0.0)
}

/// Result items, for both plain (GraphSON 1) and typed (GraphSON 2/3) lists.
fn result_items(response: &Value) -> &[Value] {
    match response.pointer("/result/data") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::Object(typed)) => typed
            .get("@value")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    }
}

fn result_len(response: &Value) -> usize {
    result_items(response).len()
}
