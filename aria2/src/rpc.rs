use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use crate::{Error, Result};

pub const ADD_URI: &str = "aria2.addUri";
pub const TELL_STATUS: &str = "aria2.tellStatus";
pub const REMOVE: &str = "aria2.remove";
pub const GET_VERSION: &str = "aria2.getVersion";
pub const PURGE_DOWNLOAD_RESULT: &str = "aria2.purgeDownloadResult";

/// The six push notifications aria2 emits for a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Start,
    Pause,
    Stop,
    Error,
    Complete,
    BtComplete,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 6] = [
        Self::Start,
        Self::Pause,
        Self::Stop,
        Self::Error,
        Self::Complete,
        Self::BtComplete,
    ];

    pub fn method(self) -> &'static str {
        match self {
            Self::Start => "aria2.onDownloadStart",
            Self::Pause => "aria2.onDownloadPause",
            Self::Stop => "aria2.onDownloadStop",
            Self::Error => "aria2.onDownloadError",
            Self::Complete => "aria2.onDownloadComplete",
            Self::BtComplete => "aria2.onBtDownloadComplete",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.method() == method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub gid: String,
}

impl Notification {
    pub fn new<S: Into<String>>(kind: NotificationKind, gid: S) -> Self {
        Self {
            kind,
            gid: gid.into(),
        }
    }

    /// Encodes the notification the way the daemon sends it.
    pub fn to_json(&self) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": self.kind.method(),
            "params": [{ "gid": self.gid }],
        })
        .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Vec<Value>,
}

impl Request {
    /// Builds a request, prefixing the params with the shared secret when one
    /// is configured.
    pub fn new(id: u64, method: &'static str, secret: Option<&str>, params: Vec<Value>) -> Self {
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = secret {
            all.push(Value::String(format!("token:{secret}")));
        }
        all.extend(params);
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params: all,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug)]
pub struct Response {
    pub id: u64,
    pub result: Result<Value>,
}

#[derive(Debug)]
pub enum Incoming {
    Response(Response),
    Notification(Notification),
    /// A notification for a method this crate does not model.
    Ignored(String),
}

#[derive(Deserialize)]
struct RawError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RawEvent {
    gid: String,
}

#[derive(Deserialize)]
struct RawMessage {
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Vec<Value>,
    result: Option<Value>,
    error: Option<RawError>,
}

impl Incoming {
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text)?;
        if let Some(method) = raw.method {
            let Some(kind) = NotificationKind::from_method(&method) else {
                trace!(method, "ignoring unknown notification");
                return Ok(Self::Ignored(method));
            };
            let event = raw
                .params
                .into_iter()
                .next()
                .ok_or_else(|| Error::Unexpected(Value::String(method.clone())))?;
            let event: RawEvent = serde_json::from_value(event)?;
            return Ok(Self::Notification(Notification {
                kind,
                gid: event.gid,
            }));
        }

        let id = match raw.id {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        let Some(id) = id else {
            return Err(Error::Unexpected(serde_json::from_str(text)?));
        };
        let result = match (raw.result, raw.error) {
            (_, Some(err)) => Err(Error::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        };
        Ok(Self::Response(Response { id, result }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_prefixes_secret() {
        let request = Request::new(7, TELL_STATUS, Some("s3cret"), vec![json!("abc")]);
        let encoded: Value = serde_json::from_str(&request.encode().unwrap()).unwrap();
        assert_eq!(encoded["jsonrpc"], "2.0");
        assert_eq!(encoded["id"], 7);
        assert_eq!(encoded["method"], "aria2.tellStatus");
        assert_eq!(encoded["params"], json!(["token:s3cret", "abc"]));
    }

    #[test]
    fn test_request_without_secret() {
        let request = Request::new(1, GET_VERSION, None, vec![]);
        let encoded: Value = serde_json::from_str(&request.encode().unwrap()).unwrap();
        assert_eq!(encoded["params"], json!([]));
    }

    #[test]
    fn test_decode_notification() {
        let text = Notification::new(NotificationKind::BtComplete, "2089b05ecca3d829").to_json();
        let Incoming::Notification(notification) = Incoming::decode(&text).unwrap() else {
            panic!("expected a notification");
        };
        assert_eq!(notification.kind, NotificationKind::BtComplete);
        assert_eq!(notification.gid, "2089b05ecca3d829");
    }

    #[test]
    fn test_decode_unknown_notification_is_ignored() {
        let text = r#"{"jsonrpc":"2.0","method":"aria2.onSomethingNew","params":[{"gid":"a"}]}"#;
        assert!(matches!(
            Incoming::decode(text).unwrap(),
            Incoming::Ignored(method) if method == "aria2.onSomethingNew"
        ));
    }

    #[test]
    fn test_decode_error_response() {
        let text = r#"{"id":"3","jsonrpc":"2.0","error":{"code":1,"message":"GID 1 is not found"}}"#;
        let Incoming::Response(response) = Incoming::decode(text).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.id, 3);
        assert!(matches!(response.result, Err(Error::Rpc { code: 1, .. })));
    }
}
