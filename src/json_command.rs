//! One in-flight command: line buffer, request tree, response builder.
//!
//! A `JsonCommand` owns everything a single command needs between its
//! first serial byte and its response line. The line buffer is bounded by
//! [`MAX_JSON`]; the request/response trees share a fixed node budget that
//! stands in for the firmware's JSON arena. The response always carries
//! `"s"` (status code) and `"r"` (the request echoed with query values
//! filled in); `"e"` appears exactly when an error string was set.
//!
//! Lifecycle: `clear()` → `parse()` (possibly across several heartbeats
//! while the line accumulates) → controller mutates the request tree →
//! response serialized once → `clear()` for the next line.

use log::warn;
use serde_json::{Map, Value};

use crate::machine::{Quad, StepCoord};
use crate::port::SerialIo;
use crate::status::Status;

/// Maximum command line length in bytes, terminator included. A line of
/// `MAX_JSON - 1` characters plus `\n` parses; `MAX_JSON` characters with
/// no newline in sight is `JSON_TOO_LONG`.
pub const MAX_JSON: usize = 255;

/// Node budget shared by the request tree and its query expansions.
pub const JSON_NODE_BUDGET: usize = 128;

const MAX_ERROR_LEN: usize = 32;

/// Count of tree nodes (objects, arrays, and scalars each count once).
fn node_count(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(node_count).sum::<usize>(),
        Value::Array(items) => 1 + items.iter().map(node_count).sum::<usize>(),
        _ => 1,
    }
}

/// A single command with its dual request/response state.
#[derive(Debug)]
pub struct JsonCommand {
    line: String,
    parsed: bool,
    responded: bool,
    status: Status,
    error: Option<String>,
    request: Value,
    nodes_allocated: usize,
    /// Absolute motor targets populated by `mov` initialization.
    pub mov: Quad<StepCoord>,
    /// Step rate populated by `mov.sr`.
    pub step_rate: StepCoord,
}

impl Default for JsonCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonCommand {
    /// New empty command.
    pub fn new() -> Self {
        let mut command = Self {
            line: String::new(),
            parsed: false,
            responded: false,
            status: Status::Empty,
            error: None,
            request: Value::Object(Map::new()),
            nodes_allocated: 1,
            mov: Quad::zero(),
            step_rate: 0,
        };
        command.clear();
        command
    }

    /// Reset to the initial shape: empty buffers, response `{"s":-1,"r":{}}`.
    pub fn clear(&mut self) {
        self.line.clear();
        self.parsed = false;
        self.responded = false;
        self.status = Status::Empty;
        self.error = None;
        self.request = Value::Object(Map::new());
        self.nodes_allocated = 1;
        self.mov = Quad::zero();
        self.step_rate = 0;
    }

    /// True once a parse attempt has committed (successfully or not).
    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    /// True once the request parsed into a usable object.
    pub fn is_valid(&self) -> bool {
        self.parsed && self.request.is_object()
    }

    /// True once the response line has been written to the port.
    pub fn has_responded(&self) -> bool {
        self.responded
    }

    /// Latch the response as emitted.
    pub fn set_responded(&mut self) {
        self.responded = true;
    }

    /// Current aggregate status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Store the aggregate status.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Error text, if one was set.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Attach a short error key or message and the failing status; returns
    /// the status unchanged so call sites can tail-return it.
    pub fn set_error(&mut self, status: Status, msg: &str) -> Status {
        let mut text = msg.to_string();
        text.truncate(MAX_ERROR_LEN);
        self.error = Some(text);
        self.status = status;
        status
    }

    /// Reserve `nodes` from the arena budget. False means the allocation
    /// would overflow and the caller must fail the expansion.
    pub fn alloc_nodes(&mut self, nodes: usize) -> bool {
        if self.nodes_allocated + nodes > JSON_NODE_BUDGET {
            return false;
        }
        self.nodes_allocated += nodes;
        true
    }

    /// Remaining arena headroom (surfaced as `sys.fr`).
    pub fn response_available(&self) -> usize {
        JSON_NODE_BUDGET.saturating_sub(self.nodes_allocated)
    }

    /// Move the request tree out for mutation; pair with [`Self::put_request`].
    pub fn take_request(&mut self) -> Map<String, Value> {
        match std::mem::take(&mut self.request) {
            Value::Object(map) => map,
            other => {
                self.request = other;
                Map::new()
            }
        }
    }

    /// Restore the request tree after mutation.
    pub fn put_request(&mut self, map: Map<String, Value>) {
        self.request = Value::Object(map);
    }

    /// Borrow the request tree.
    pub fn request(&self) -> &Value {
        &self.request
    }

    /// Parse a supplied literal line, or drain `port` one character at a
    /// time until a newline arrives. Emits a minimal `{"s":N}` line
    /// directly to the port on any structural failure, so the host sees
    /// the outcome even when the response tree never became usable.
    pub fn parse(&mut self, port: &mut dyn SerialIo, literal: Option<&str>) -> Status {
        let status = self.parse_input(port, literal);
        if status.is_error() {
            self.status = status;
            let line = format!("{{\"s\":{}}}", status.code());
            if let Err(e) = port.write_line(&line) {
                warn!("failed to report parse failure: {}", e);
            }
            self.responded = true;
        }
        status
    }

    fn parse_input(&mut self, port: &mut dyn SerialIo, literal: Option<&str>) -> Status {
        if self.parsed {
            return Status::BusyParsed;
        }
        if let Some(text) = literal {
            if text.len() > MAX_JSON - 1 {
                self.line.push_str(&text[..MAX_JSON - 1]);
                self.parsed = true;
                return Status::JsonTooLong;
            }
            self.line.push_str(text);
            return self.parse_core();
        }
        while port.available() {
            let Some(byte) = port.read_byte() else {
                break;
            };
            if byte == b'\n' {
                return self.parse_core();
            }
            if self.line.len() >= MAX_JSON - 1 {
                self.parsed = true;
                return Status::JsonTooLong;
            }
            self.line.push(byte as char);
        }
        Status::WaitEol
    }

    fn parse_core(&mut self) -> Status {
        if self.line.is_empty() {
            return Status::WaitIdle;
        }
        self.parsed = true;
        match serde_json::from_str::<Value>(&self.line) {
            Ok(Value::Object(map)) => {
                if map.is_empty() {
                    return Status::JsonMem;
                }
                let tree = Value::Object(map);
                let nodes = node_count(&tree);
                if nodes > JSON_NODE_BUDGET {
                    return Status::JsonMem;
                }
                self.nodes_allocated = nodes;
                self.request = tree;
                self.status = Status::BusyParsed;
                Status::BusyParsed
            }
            Ok(_) | Err(_) => {
                self.request = Value::String("?".to_string());
                Status::JsonParseError
            }
        }
    }

    /// Response tree: `{"s":code, "r":request[, "e":error]}`.
    pub fn response_json(&self) -> Value {
        let mut root = Map::new();
        root.insert("s".to_string(), Value::from(self.status.code()));
        root.insert("r".to_string(), self.request.clone());
        if let Some(error) = &self.error {
            root.insert("e".to_string(), Value::String(error.clone()));
        }
        Value::Object(root)
    }

    /// Serialize the response, compact or pretty.
    pub fn serialize_response(&self, pretty: bool) -> String {
        let root = self.response_json();
        let rendered = if pretty {
            serde_json::to_string_pretty(&root)
        } else {
            serde_json::to_string(&root)
        };
        rendered.unwrap_or_else(|_| format!("{{\"s\":{}}}", self.status.code()))
    }
}
