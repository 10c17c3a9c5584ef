//! Types for the line-delimited Electrum JSON-RPC protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Method names the proxy consumes or intercepts.
pub mod methods {
	pub const SERVER_VERSION: &str = "server.version";
	pub const SERVER_FEATURES: &str = "server.features";
	pub const SERVER_PING: &str = "server.ping";
	pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
	pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
	pub const SCRIPTHASH_UNSUBSCRIBE: &str = "blockchain.scripthash.unsubscribe";
	pub const TRANSACTION_GET: &str = "blockchain.transaction.get";
	pub const TRANSACTION_BROADCAST: &str = "blockchain.transaction.broadcast";
	pub const ESTIMATE_FEE: &str = "blockchain.estimatefee";
	pub const RELAY_FEE: &str = "blockchain.relayfee";
}

/// Protocol version string sent by the proxy during `server.version` negotiation.
pub const CLIENT_NAME: &str = concat!("electrum-sync-proxy/", env!("CARGO_PKG_VERSION"));
/// Electrum protocol version requested from upstream servers.
pub const PROTOCOL_VERSION: &str = "1.4";

/// Script hash → server-computed history status (`None` when the script has no history).
pub type StatusMap = BTreeMap<String, Option<String>>;

fn jsonrpc_version() -> String {
	"2.0".to_string()
}

/// A JSON-RPC request as written by a caller or by the proxy itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
	#[serde(default = "jsonrpc_version")]
	pub jsonrpc: String,
	/// Caller-chosen id; the proxy replaces it with a process-unique one upstream.
	pub id: Value,
	pub method: String,
	#[serde(default)]
	pub params: Vec<Value>,
}

impl Request {
	pub fn new(id: Value, method: &str, params: Vec<Value>) -> Self {
		Self {
			jsonrpc: jsonrpc_version(),
			id,
			method: method.to_string(),
			params,
		}
	}

	/// Positional parameter as a string slice, if present.
	pub fn str_param(&self, index: usize) -> Option<&str> {
		self.params.get(index).and_then(|v| v.as_str())
	}

	/// Whether a `blockchain.transaction.get` request asks for the verbose form.
	pub fn is_verbose(&self) -> bool {
		self.params
			.get(1)
			.and_then(|v| v.as_bool())
			.unwrap_or(false)
	}
}

/// A JSON-RPC response. `result` is kept as a raw value because `null` is a meaningful
/// result for several Electrum methods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
	#[serde(default = "jsonrpc_version")]
	pub jsonrpc: String,
	pub id: Value,
	#[serde(default)]
	pub result: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<Value>,
}

impl Response {
	pub fn success(id: Value, result: Value) -> Self {
		Self {
			jsonrpc: jsonrpc_version(),
			id,
			result,
			error: None,
		}
	}

	pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
		Self {
			jsonrpc: jsonrpc_version(),
			id,
			result: Value::Null,
			error: Some(serde_json::json!({ "code": code, "message": message.into() })),
		}
	}

	/// Convert into the outcome seen by an internal caller.
	pub fn into_result(self) -> Result<Value, ElectrumError> {
		match self.error {
			Some(error) if !error.is_null() => Err(ElectrumError::from_error_value(&error)),
			_ => Ok(self.result),
		}
	}
}

/// An unsolicited message pushed by the server for an active subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerPush {
	#[serde(default = "jsonrpc_version")]
	pub jsonrpc: String,
	pub method: String,
	#[serde(default)]
	pub params: Vec<Value>,
}

/// A message read from the upstream connection.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
	Response(Response),
	Push(ServerPush),
}

impl UpstreamMessage {
	/// Classify one line received from the server.
	pub fn parse(line: &str) -> Result<Self, ElectrumError> {
		let value: Value = serde_json::from_str(line)
			.map_err(|e| ElectrumError::Malformed(format!("invalid JSON from server: {}", e)))?;

		let is_push = value.get("method").is_some() && value.get("id").is_none_or(Value::is_null);
		if is_push {
			let push = serde_json::from_value(value)
				.map_err(|e| ElectrumError::Malformed(format!("invalid notification: {}", e)))?;
			return Ok(Self::Push(push));
		}

		if value.get("id").is_some() {
			let response = serde_json::from_value(value)
				.map_err(|e| ElectrumError::Malformed(format!("invalid response: {}", e)))?;
			return Ok(Self::Response(response));
		}

		Err(ElectrumError::Malformed(
			"message has neither id nor method".to_string(),
		))
	}
}

/// Notifications republished by the proxy on its internal event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectrumNotification {
	/// The server's chain tip moved.
	NewBlockHeader { height: u32 },
	/// The history digest of a subscribed script changed.
	ScriptHashChanged {
		script_hash: String,
		new_status: Option<String>,
	},
}

impl ElectrumNotification {
	/// Translate a server push into a notification, ignoring unknown methods.
	pub fn from_push(push: &ServerPush) -> Option<Self> {
		match push.method.as_str() {
			methods::HEADERS_SUBSCRIBE => {
				let height = push.params.first().and_then(header_height)?;
				Some(Self::NewBlockHeader { height })
			}
			methods::SCRIPTHASH_SUBSCRIBE => {
				let script_hash = push.params.first()?.as_str()?.to_string();
				let new_status = push
					.params
					.get(1)
					.and_then(|s| s.as_str())
					.map(str::to_string);
				Some(Self::ScriptHashChanged {
					script_hash,
					new_status,
				})
			}
			_ => None,
		}
	}
}

/// Extract the height from a `blockchain.headers.subscribe` result or push payload.
pub fn header_height(header: &Value) -> Option<u32> {
	header
		.get("height")
		.and_then(|h| h.as_u64())
		.and_then(|h| u32::try_from(h).ok())
}

/// Protocol-level errors: error responses and malformed messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ElectrumError {
	#[error("Server error {code}: {message}")]
	Server { code: i64, message: String },

	#[error("Malformed message: {0}")]
	Malformed(String),

	#[error("Unexpected result for {method}: {detail}")]
	UnexpectedResult { method: String, detail: String },
}

impl ElectrumError {
	/// Build from the `error` member of a response, which servers send either as an
	/// object with `code`/`message` or as a bare string.
	pub fn from_error_value(error: &Value) -> Self {
		match error {
			Value::String(message) => Self::Server {
				code: 0,
				message: message.clone(),
			},
			Value::Object(obj) => Self::Server {
				code: obj.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
				message: obj
					.get("message")
					.and_then(|m| m.as_str())
					.unwrap_or("unknown server error")
					.to_string(),
			},
			other => Self::Server {
				code: 0,
				message: other.to_string(),
			},
		}
	}
}
