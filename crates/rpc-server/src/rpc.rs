use cardtrust::prelude::*;
use cardtrust::protocol::paginate;
use cardtrust::tag::TagError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Simulated reader: an in-memory NTAG215 driven through APDUs
pub type SimulatedReader = ApduPageTransport<MemoryTag>;

pub const SIMULATED_UID: [u8; 7] = [0x04, 0x5A, 0x3C, 0x11, 0x72, 0x80, 0x01];

// --- Struct Definitions ---
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Serialize, Debug)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Serialize, Debug)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Deserialize, Debug)]
struct TextParams {
    text: String,
    #[serde(default = "default_language")]
    language: String,
}

#[derive(Deserialize, Debug)]
struct DecodeParams {
    data_hex: String,
}

#[derive(Deserialize, Debug)]
struct CredentialParams {
    text: String,
}

#[derive(Deserialize, Debug)]
struct PresenceParams {
    present: bool,
}

#[derive(Deserialize, Debug)]
struct ConnectivityParams {
    online: bool,
}
// --- Struct Definitions End ---

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const PARSE_ERROR: i32 = -32700;
pub const SERVER_ERROR: i32 = -32000;

pub fn create_error_response(id: Value, code: i32, message: String) -> RpcResponse {
    error!(code, %message, "responding with error");
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(RpcError { code, message }),
    }
}

pub fn create_success_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

fn tool_schemas() -> Value {
    let text = json!({"type": "object","properties": {"text": {"type": "string"},"language": {"type": "string"}},"required": ["text"]});
    json!({
        "ndef_encode": {"description": "Encodes text as an NDEF text TLV and splits it into tag pages","schema": text},
        "ndef_decode": {"description": "Decodes an NDEF text record from hex bytes","schema": {"type": "object","properties": {"data_hex": {"type": "string"}},"required": ["data_hex"]}},
        "normalize": {"description": "Classifies captured credential text","schema": {"type": "object","properties": {"text": {"type": "string"}},"required": ["text"]}},
        "verify": {"description": "Runs the full verification pipeline on credential text","schema": {"type": "object","properties": {"text": {"type": "string"}},"required": ["text"]}},
        "tag_write": {"description": "Writes text to the simulated tag","schema": text},
        "tag_read": {"description": "Reads UID and NDEF text from the simulated tag","schema": {"type": "object"}},
        "tag_verify": {"description": "Reads the simulated tag and verifies its credential","schema": {"type": "object"}},
        "tag_presence": {"description": "Places or removes the simulated tag","schema": {"type": "object","properties": {"present": {"type": "boolean"}},"required": ["present"]}},
        "trust_key": {"description": "Resolves the current trust key","schema": {"type": "object"}},
        "set_connectivity": {"description": "Switches between online and offline verification","schema": {"type": "object","properties": {"online": {"type": "boolean"}},"required": ["online"]}}
    })
}

fn parse_params<T: serde::de::DeserializeOwned>(
    id: &Value,
    method: &str,
    params: Value,
) -> Result<T, RpcResponse> {
    serde_json::from_value(params).map_err(|e| {
        create_error_response(
            id.clone(),
            INVALID_PARAMS,
            format!("Invalid params for {}: {}", method, e),
        )
    })
}

/// Everything a request handler can touch
pub struct ServerState {
    orchestrator: VerificationOrchestrator,
    reader: SharedTransport<SimulatedReader>,
    connectivity: Arc<ConnectivityFlag>,
    scan_page_limit: usize,
}

impl ServerState {
    pub fn new(
        orchestrator: VerificationOrchestrator,
        connectivity: Arc<ConnectivityFlag>,
        scan_page_limit: usize,
    ) -> Self {
        let tag = MemoryTag::blank(SIMULATED_UID.to_vec());
        Self {
            orchestrator,
            reader: shared_transport(ApduPageTransport::new(tag)),
            connectivity,
            scan_page_limit,
        }
    }

    /// Offline-only state for tests and air-gapped use
    pub fn offline(config: &VerifierConfig) -> Self {
        let resolver = Arc::new(TrustKeyResolver::new(config, None));
        let orchestrator = VerificationOrchestrator::new(config, resolver);
        Self::new(
            orchestrator,
            Arc::new(ConnectivityFlag::new(false)),
            config.scan_page_limit,
        )
    }

    pub fn reader(&self) -> &SharedTransport<SimulatedReader> {
        &self.reader
    }

    pub async fn process_request(&self, req: RpcRequest) -> RpcResponse {
        debug!(method = %req.method, id = ?req.id, "processing request");

        if req.jsonrpc != "2.0" {
            return create_error_response(
                req.id,
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"".to_string(),
            );
        }

        let RpcRequest {
            id, method, params, ..
        } = req;
        let result = match method.as_str() {
            "help" => Ok(self.help()),
            "initialize" => Ok(self.initialize()),
            "listTools" | "tools/list" => Ok(self.list_tools()),
            "ndef_encode" => self.ndef_encode(&id, params),
            "ndef_decode" => self.ndef_decode(&id, params),
            "normalize" => self.normalize(&id, params),
            "verify" => self.verify(&id, params).await,
            "tag_write" => self.tag_write(&id, params).await,
            "tag_read" => self.tag_read(&id).await,
            "tag_verify" => self.tag_verify(&id).await,
            "tag_presence" => self.tag_presence(&id, params).await,
            "trust_key" => self.trust_key(&id).await,
            "set_connectivity" => self.set_connectivity(&id, params),
            other => Err(create_error_response(
                id.clone(),
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };

        match result {
            Ok(value) => create_success_response(id, value),
            Err(response) => response,
        }
    }

    fn help(&self) -> Value {
        info!("Received help request");
        let mut commands = Map::new();
        commands.insert("help".into(), json!({"description": "Displays this help message."}));
        commands.insert("initialize".into(), json!({"description": "Initializes the server."}));
        commands.insert("tools/list".into(), json!({"description": "Lists available tools."}));
        if let Value::Object(tools) = tool_schemas() {
            for (name, def) in tools {
                commands.insert(name, json!({"description": def["description"]}));
            }
        }
        json!({"message": "cardtrust RPC server: available commands.", "commands": commands})
    }

    fn initialize(&self) -> Value {
        info!("Received initialize request");
        let mut tools = Map::new();
        if let Value::Object(defs) = tool_schemas() {
            for (name, def) in defs {
                tools.insert(
                    name,
                    json!({"description": def["description"], "inputSchema": def["schema"]}),
                );
            }
        }
        json!({
            "serverInfo": {"name": "cardtrust-rpc", "version": env!("CARGO_PKG_VERSION")},
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": Value::Object(tools)}
        })
    }

    fn list_tools(&self) -> Value {
        let mut tools = Vec::new();
        if let Value::Object(defs) = tool_schemas() {
            for (name, def) in defs {
                tools.push(json!({
                    "name": name,
                    "description": def["description"],
                    "inputSchema": def["schema"]
                }));
            }
        }
        info!(count = tools.len(), "Sending tools/list response");
        json!({ "tools": tools })
    }

    fn ndef_encode(&self, id: &Value, params: Value) -> Result<Value, RpcResponse> {
        let p: TextParams = parse_params(id, "ndef_encode", params)?;
        let tlv = encode_text_tlv(&p.text, &p.language)
            .map_err(|e| create_error_response(id.clone(), INVALID_PARAMS, e.to_string()))?;
        let pages: Vec<String> = paginate(&tlv).iter().map(hex::encode_upper).collect();
        Ok(json!({
            "tlv_hex": hex::encode_upper(&tlv),
            "page_count": pages.len(),
            "pages": pages
        }))
    }

    fn ndef_decode(&self, id: &Value, params: Value) -> Result<Value, RpcResponse> {
        let p: DecodeParams = parse_params(id, "ndef_decode", params)?;
        let cleaned: String = p.data_hex.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&cleaned).map_err(|e| {
            create_error_response(id.clone(), INVALID_PARAMS, format!("Invalid hex: {}", e))
        })?;
        Ok(match decode_text_from_bytes(&bytes) {
            Some(record) => json!({"found": true, "text": record.text, "language": record.language}),
            None => json!({"found": false}),
        })
    }

    fn normalize(&self, id: &Value, params: Value) -> Result<Value, RpcResponse> {
        let p: CredentialParams = parse_params(id, "normalize", params)?;
        Ok(match normalize(&p.text) {
            Ok(CredentialEnvelope::Standard(standard)) => json!({
                "kind": "standard",
                "payload_bytes": standard.payload.len(),
                "signature_bytes": standard.signature.len()
            }),
            Ok(envelope) => json!({"kind": envelope.kind()}),
            Err(rejection) => json!({"rejection": rejection}),
        })
    }

    async fn verify(&self, id: &Value, params: Value) -> Result<Value, RpcResponse> {
        let p: CredentialParams = parse_params(id, "verify", params)?;
        let verdict = self
            .orchestrator
            .verify_text(&p.text, &CancellationToken::new())
            .await;
        to_value(id, &verdict)
    }

    async fn tag_write(&self, id: &Value, params: Value) -> Result<Value, RpcResponse> {
        let p: TextParams = parse_params(id, "tag_write", params)?;
        let mut session = TagSession::open(&self.reader).await;
        let pages = session
            .codec()
            .write_text(&p.text, &p.language)
            .map_err(|e: TagError| create_error_response(id.clone(), SERVER_ERROR, e.to_string()))?;
        Ok(json!({"pages_written": pages}))
    }

    async fn tag_read(&self, id: &Value) -> Result<Value, RpcResponse> {
        let mut session = TagSession::open(&self.reader).await;
        let mut codec = session.codec();
        let probe = codec
            .probe_uid()
            .map_err(|e| create_error_response(id.clone(), SERVER_ERROR, e.to_string()))?;
        let read = codec.read_text(self.scan_page_limit);
        Ok(json!({
            "uid": probe.uid_hex(),
            "family": probe.family.to_string(),
            "text": read.text(),
            "language": read.record.as_ref().map(|r| r.language.clone()),
            "raw_hex": hex::encode_upper(&read.raw)
        }))
    }

    async fn tag_verify(&self, id: &Value) -> Result<Value, RpcResponse> {
        let mut session = TagSession::open(&self.reader).await;
        let verdict = self
            .orchestrator
            .verify_tag(&mut session, &CancellationToken::new())
            .await;
        to_value(id, &verdict)
    }

    async fn tag_presence(&self, id: &Value, params: Value) -> Result<Value, RpcResponse> {
        let p: PresenceParams = parse_params(id, "tag_presence", params)?;
        self.reader.lock().await.channel_mut().set_present(p.present);
        Ok(json!({"present": p.present}))
    }

    async fn trust_key(&self, id: &Value) -> Result<Value, RpcResponse> {
        let key = self
            .orchestrator
            .resolver()
            .resolve()
            .await
            .map_err(|e| create_error_response(id.clone(), SERVER_ERROR, e.to_string()))?;
        Ok(json!({
            "source": key.source(),
            "key_id": key.fingerprint(),
            "bits": key.key().bits(),
            "obtained_at": key.obtained_at().to_rfc3339()
        }))
    }

    fn set_connectivity(&self, id: &Value, params: Value) -> Result<Value, RpcResponse> {
        let p: ConnectivityParams = parse_params(id, "set_connectivity", params)?;
        self.connectivity.set_online(p.online);
        info!(online = p.online, "connectivity changed");
        Ok(json!({"online": p.online}))
    }
}

fn to_value<T: Serialize>(id: &Value, value: &T) -> Result<Value, RpcResponse> {
    serde_json::to_value(value).map_err(|e| {
        create_error_response(
            id.clone(),
            SERVER_ERROR,
            format!("Failed to serialize result: {}", e),
        )
    })
}
