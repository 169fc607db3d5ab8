//! Newline-delimited JSON-RPC 2.0 dispatch over standard input/output.
//!
//! Input arrives in chunks; each chunk is decoded, trimmed and split on
//! newlines into request lines that are handled strictly in order. A
//! malformed line produces a single parse-error response and abandons the
//! rest of its chunk; responses already emitted for earlier lines stand.

use crate::ProjectServer;
use crate::tools::{ListDirectoryParams, ReadFileParams, SearchFilesParams, ToolError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Protocol version reported by `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC code for a malformed request line.
const PARSE_ERROR: i64 = -32700;

/// JSON-RPC code for any failure while handling a parsed request.
const INTERNAL_ERROR: i64 = -32603;

/// One JSON-RPC request line.
#[derive(Debug, Deserialize)]
pub struct Request {
    /// Method name, matched against the fixed set of four.
    pub method: String,
    /// Raw parameters, deserialized per method.
    #[serde(default)]
    pub params: Option<Value>,
    /// Correlation id echoed back in the response.
    #[serde(default)]
    pub id: Option<Value>,
}

/// One JSON-RPC response line. Exactly one of `result`/`error` is set.
#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    /// The request's id, or null for parse errors.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }
}

/// The fixed set of recognized methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Initialize,
    ListDirectory,
    ReadFile,
    SearchFiles,
}

impl Method {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "initialize" => Some(Self::Initialize),
            "list_directory" => Some(Self::ListDirectory),
            "read_file" => Some(Self::ReadFile),
            "search_files" => Some(Self::SearchFiles),
            _ => None,
        }
    }
}

/// Failures while handling a parsed request; all map to `-32603`.
#[derive(Error, Debug)]
enum DispatchError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Params(#[from] serde_json::Error),
}

/// Deserialize per-method params, treating absent or null params as the
/// method's defaults.
fn parse_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T, serde_json::Error> {
    match params {
        Some(Value::Null) | None => Ok(T::default()),
        Some(value) => serde_json::from_value(value),
    }
}

/// Constant capability descriptor returned by `initialize`. No filesystem
/// access happens here.
fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {
                "list_directory": {
                    "description": "List directory contents"
                },
                "read_file": {
                    "description": "Read file contents"
                },
                "search_files": {
                    "description": "Search for files"
                }
            }
        },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

impl ProjectServer {
    /// Handle one parsed request, producing its response.
    pub async fn handle_request(&self, req: Request) -> Response {
        let id = req.id.unwrap_or(Value::Null);
        match self.dispatch(&req.method, req.params).await {
            Ok(result) => Response::ok(id, result),
            Err(e) => Response::err(id, INTERNAL_ERROR, e.to_string()),
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, DispatchError> {
        let method = Method::from_name(method)
            .ok_or_else(|| DispatchError::UnknownMethod(method.to_string()))?;
        match method {
            Method::Initialize => Ok(initialize_result()),
            Method::ListDirectory => {
                let params: ListDirectoryParams = parse_params(params)?;
                Ok(serde_json::to_value(self.list_directory(params).await?)?)
            }
            Method::ReadFile => {
                let params: ReadFileParams = parse_params(params)?;
                Ok(serde_json::to_value(self.read_file(params).await?)?)
            }
            Method::SearchFiles => {
                let params: SearchFilesParams = parse_params(params)?;
                Ok(serde_json::to_value(self.search_files(params).await?)?)
            }
        }
    }

    /// Process one input chunk: zero or more newline-separated request
    /// lines, handled in order.
    ///
    /// The first malformed line yields a single `-32700` response with a
    /// null id and abandons the remainder of the chunk. Tool failures only
    /// fail their own request.
    pub async fn process_chunk(&self, chunk: &str) -> Vec<Response> {
        let mut responses = Vec::new();
        for line in chunk.trim().split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let req: Request = match serde_json::from_str(line) {
                Ok(req) => req,
                Err(e) => {
                    responses.push(Response::err(
                        Value::Null,
                        PARSE_ERROR,
                        format!("Parse error: {e}"),
                    ));
                    break;
                }
            };
            debug!(method = %req.method, "handling request");
            responses.push(self.handle_request(req).await);
        }
        responses
    }

    /// Read stdin in chunks until EOF, writing one JSON response per line
    /// to stdout.
    pub async fn serve(&self) -> std::io::Result<()> {
        let mut stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = stdin.read(&mut buf).await?;
            if n == 0 {
                debug!("stdin closed, shutting down");
                return Ok(());
            }
            let chunk = String::from_utf8_lossy(&buf[..n]);
            for response in self.process_chunk(&chunk).await {
                let mut line = serde_json::to_vec(&response)?;
                line.push(b'\n');
                stdout.write_all(&line).await?;
                stdout.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Response;
    use crate::ProjectServer;
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ProjectServer) {
        let tmp = TempDir::new().expect("temp dir");
        let server = ProjectServer::new(tmp.path().to_path_buf());
        (tmp, server)
    }

    fn to_json(responses: &[Response]) -> Vec<Value> {
        responses
            .iter()
            .map(|r| serde_json::to_value(r).expect("serialize response"))
            .collect()
    }

    #[tokio::test]
    async fn two_requests_in_one_chunk_answer_in_order() {
        let (tmp, server) = fixture();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();

        let chunk = concat!(
            r#"{"method":"read_file","params":{"file_path":"a.txt"},"id":1}"#,
            "\n",
            r#"{"method":"list_directory","id":2}"#,
        );
        let responses = to_json(&server.process_chunk(chunk).await);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(responses[0]["result"]["content"], json!("a"));
        assert_eq!(responses[0]["result"]["path"], json!("a.txt"));
        assert_eq!(responses[1]["id"], json!(2));
        assert!(responses[1]["result"].is_array());
    }

    #[tokio::test]
    async fn malformed_line_poisons_the_rest_of_the_chunk() {
        let (_tmp, server) = fixture();

        let chunk = "{not json\n{\"method\":\"initialize\",\"id\":1}";
        let responses = to_json(&server.process_chunk(chunk).await);

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[0]["error"]["code"], json!(-32700));
        let message = responses[0]["error"]["message"].as_str().unwrap();
        assert!(message.starts_with("Parse error:"));
    }

    #[tokio::test]
    async fn lines_before_a_malformed_line_still_answer() {
        let (_tmp, server) = fixture();

        let chunk = "{\"method\":\"initialize\",\"id\":1}\n{broken";
        let responses = to_json(&server.process_chunk(chunk).await);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(
            responses[0]["result"]["protocolVersion"],
            json!("2024-11-05")
        );
        assert_eq!(responses[1]["id"], Value::Null);
        assert_eq!(responses[1]["error"]["code"], json!(-32700));
    }

    #[tokio::test]
    async fn unknown_method_maps_to_internal_error() {
        let (_tmp, server) = fixture();

        let responses =
            to_json(&server.process_chunk(r#"{"method":"delete_file","id":7}"#).await);

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], json!(7));
        assert_eq!(responses[0]["error"]["code"], json!(-32603));
        assert_eq!(
            responses[0]["error"]["message"],
            json!("Unknown method: delete_file")
        );
    }

    #[tokio::test]
    async fn tool_failure_does_not_poison_later_lines() {
        let (_tmp, server) = fixture();

        let chunk = concat!(
            r#"{"method":"read_file","params":{"file_path":"missing.txt"},"id":1}"#,
            "\n",
            r#"{"method":"initialize","id":2}"#,
        );
        let responses = to_json(&server.process_chunk(chunk).await);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], json!(-32603));
        let message = responses[0]["error"]["message"].as_str().unwrap();
        assert!(message.starts_with("Failed to read file:"));
        assert!(responses[1]["result"].is_object());
    }

    #[tokio::test]
    async fn initialize_descriptor_is_constant() {
        let (_tmp, server) = fixture();

        let plain = to_json(&server.process_chunk(r#"{"method":"initialize","id":1}"#).await);
        let with_params = to_json(
            &server
                .process_chunk(r#"{"method":"initialize","params":{"whatever":true},"id":2}"#)
                .await,
        );

        assert_eq!(plain[0]["result"], with_params[0]["result"]);
        let result = &plain[0]["result"];
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        let tools = result["capabilities"]["tools"].as_object().unwrap();
        assert_eq!(tools.len(), 3);
        assert!(tools.contains_key("list_directory"));
        assert!(tools.contains_key("read_file"));
        assert!(tools.contains_key("search_files"));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (_tmp, server) = fixture();

        let chunk = "\n\n{\"method\":\"initialize\",\"id\":1}\n\n";
        let responses = to_json(&server.process_chunk(chunk).await);

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn missing_id_comes_back_null() {
        let (_tmp, server) = fixture();

        let responses = to_json(&server.process_chunk(r#"{"method":"initialize"}"#).await);

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], Value::Null);
    }

    #[tokio::test]
    async fn responses_carry_exactly_one_of_result_and_error() {
        let (_tmp, server) = fixture();

        let ok = to_json(&server.process_chunk(r#"{"method":"initialize","id":1}"#).await);
        let err = to_json(&server.process_chunk(r#"{"method":"nope","id":2}"#).await);

        assert!(ok[0].get("result").is_some());
        assert!(ok[0].get("error").is_none());
        assert!(err[0].get("error").is_some());
        assert!(err[0].get("result").is_none());
        assert_eq!(ok[0]["jsonrpc"], json!("2.0"));
        assert_eq!(err[0]["jsonrpc"], json!("2.0"));
    }

    #[tokio::test]
    async fn list_directory_defaults_to_the_root() {
        let (tmp, server) = fixture();
        fs::write(tmp.path().join("only.txt"), "x").unwrap();

        let responses = to_json(&server.process_chunk(r#"{"method":"list_directory","id":3}"#).await);

        let entries = responses[0]["result"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["name"], json!("only.txt"));
        assert_eq!(entries[0]["type"], json!("file"));
        assert_eq!(entries[0]["path"], json!("only.txt"));
    }
}
