//! Wire envelopes for the owner/proxy protocol.
//!
//! Every message is a JSON object tagged with `"tenantCache": true`. Requests
//! flow from a proxy to the owner, replies flow back. A reply is matched to
//! its request by [`Signature`], which both sides derive from the same
//! request fields.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tenantcache_core::{CacheKey, CacheResult, ProtocolError, Ttl};
use uuid::Uuid;

/// Field that marks a message as belonging to this protocol.
pub const PROTOCOL_TAG: &str = "tenantCache";

/// Tenant name carried by requests that address every tenant.
pub const ALL_TENANTS: &str = "*";

// ============================================================================
// METHOD
// ============================================================================

/// Operation requested of the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Get,
    Set,
    Delete,
    GetStats,
    /// Clear one tenant.
    Flush,
    /// Clear every tenant.
    FlushAll,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Set => "set",
            Method::Delete => "delete",
            Method::GetStats => "getStats",
            Method::Flush => "flush",
            Method::FlushAll => "flushAll",
        }
    }

    /// Whether the owner rejects this method when the request has no key.
    pub fn requires_key(&self) -> bool {
        matches!(self, Method::Get | Method::Set | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SIGNATURE
// ============================================================================

/// Correlation key of a request: `tenant_method_key_token`.
///
/// A missing key renders as `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn new(tenant: &str, method: Method, key: Option<&CacheKey>, token: &str) -> Self {
        let key = key.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string());
        Signature(format!("{}_{}_{}_{}", tenant, method, key, token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// Proxy-to-owner request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(rename = "tenantCache")]
    pub tag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub method: Method,
    pub tenant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CacheKey>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Ttl>,
    pub token: String,
}

impl Request {
    /// New request with a fresh random token.
    pub fn new(namespace: Option<String>, method: Method, tenant: impl Into<String>) -> Self {
        Self {
            tag: true,
            namespace,
            method,
            tenant_name: tenant.into(),
            key: None,
            value: None,
            ttl: None,
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_key(mut self, key: CacheKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn signature(&self) -> Signature {
        Signature::new(&self.tenant_name, self.method, self.key.as_ref(), &self.token)
    }

    pub fn to_value(&self) -> CacheResult<Value> {
        serde_json::to_value(self).map_err(|e| {
            ProtocolError::Malformed {
                reason: format!("Failed to encode {} request: {}", self.method, e),
            }
            .into()
        })
    }
}

// ============================================================================
// REPLY
// ============================================================================

/// Classification of an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The request needed a key and had none.
    MissingKey,
    /// The owner's loader failed while serving the request.
    LoaderFailed,
    /// Any other owner-side failure.
    Internal,
}

/// Payload of a reply: either a value or an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyBody {
    /// Absent on a miss. A stored JSON `null` is carried as `"value": null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ReplyBody {
    pub fn ok(value: Option<Value>) -> Self {
        Self {
            value,
            error: None,
            error_kind: None,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            value: None,
            error: Some(message.into()),
            error_kind: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the caller-facing result for `method`.
    pub fn into_result(self, method: Method) -> CacheResult<Option<Value>> {
        match (self.error, self.error_kind) {
            (None, _) => Ok(self.value),
            (Some(_), Some(ErrorKind::MissingKey)) => Err(ProtocolError::MissingKey {
                method: method.to_string(),
            }
            .into()),
            (Some(message), _) => Err(ProtocolError::Remote {
                method: method.to_string(),
                message,
            }
            .into()),
        }
    }
}

/// Owner-to-proxy reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(rename = "tenantCache")]
    pub tag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub signature: Signature,
    pub body: ReplyBody,
}

impl Reply {
    pub fn new(namespace: Option<String>, signature: Signature, body: ReplyBody) -> Self {
        Self {
            tag: true,
            namespace,
            signature,
            body,
        }
    }

    pub fn to_value(&self) -> CacheResult<Value> {
        serde_json::to_value(self).map_err(|e| {
            ProtocolError::Malformed {
                reason: format!("Failed to encode reply {}: {}", self.signature, e),
            }
            .into()
        })
    }
}

/// Deserialize a field that is present on the wire, keeping an explicit
/// `null` as `Some(Value::Null)`. Absent fields fall back to `default`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// ============================================================================
// INBOUND FILTERING
// ============================================================================

/// Outcome of examining a raw inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<T> {
    /// Tagged, in our namespace and well-formed.
    Accepted(T),
    /// Not a tenant cache message.
    Foreign,
    /// A tenant cache message for another namespace.
    OtherNamespace(String),
    /// Tagged and in our namespace, but undecodable.
    Malformed(String),
}

/// Whether a message stamped with `theirs` should be processed by a node
/// configured with `ours`. Only a mismatch where both are set is rejected.
pub fn accepts_namespace(ours: Option<&str>, theirs: Option<&str>) -> bool {
    match (ours, theirs) {
        (Some(ours), Some(theirs)) => ours == theirs,
        _ => true,
    }
}

/// Filter and decode a raw message.
pub fn decode<T: DeserializeOwned>(message: &Value, namespace: Option<&str>) -> Inbound<T> {
    if message.get(PROTOCOL_TAG).and_then(Value::as_bool) != Some(true) {
        return Inbound::Foreign;
    }

    let theirs = message.get("namespace").and_then(Value::as_str);
    if !accepts_namespace(namespace, theirs) {
        return Inbound::OtherNamespace(theirs.unwrap_or_default().to_string());
    }

    match serde_json::from_value(message.clone()) {
        Ok(decoded) => Inbound::Accepted(decoded),
        Err(e) => Inbound::Malformed(e.to_string()),
    }
}

/// Decode the value carried by a successful reply.
pub fn decode_value<T: DeserializeOwned>(method: Method, value: Option<Value>) -> CacheResult<T> {
    serde_json::from_value(value.unwrap_or(Value::Null)).map_err(|e| {
        ProtocolError::Malformed {
            reason: format!("Unexpected {} reply value: {}", method, e),
        }
        .into()
    })
}
