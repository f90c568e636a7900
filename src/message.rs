// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Chat-completion wire shapes
//
// Everything that knows where content lives inside request bodies,
// single-shot responses and streamed delta chunks. Absent fields are
// modelled as `None` and read as empty text by callers.

use crate::moderation::ModerationLevel;
use bytes::Bytes;
use serde_json::Value;

/// Body fields consumed by the proxy and never forwarded upstream.
pub const PROXY_ONLY_FIELDS: &[&str] = &["moderation", "moderation_level"];

/// Moderation options the caller put in the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyOptions {
    pub moderation: bool,
    pub moderation_level: ModerationLevel,
}

/// Errors parsing an inbound body.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),
}

/// An inbound request body, split into what the proxy reads and what is
/// forwarded.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub model: Option<String>,
    pub stream: bool,
    pub options: ProxyOptions,
    /// String `messages[*].content` values, in order.
    pub message_contents: Vec<String>,
    /// Body to send upstream (proxy-only fields removed). `None` when the
    /// inbound body was empty.
    pub forward_body: Option<Bytes>,
}

impl InboundRequest {
    /// Parse an inbound body. Empty bodies are valid (e.g. `GET /v1/models`).
    pub fn parse(body: &Bytes) -> Result<Self, MessageError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let mut json: Value =
            serde_json::from_slice(body).map_err(|e| MessageError::MalformedJson(e.to_string()))?;

        let Some(obj) = json.as_object_mut() else {
            // Valid JSON but not an object: nothing for us to read.
            return Ok(Self {
                forward_body: Some(body.clone()),
                ..Self::default()
            });
        };

        let options = ProxyOptions {
            moderation: obj.get("moderation").map(is_truthy).unwrap_or(false),
            moderation_level: ModerationLevel::parse(
                obj.get("moderation_level").and_then(Value::as_str),
            ),
        };
        for field in PROXY_ONLY_FIELDS {
            obj.shift_remove(*field);
        }

        let model = obj.get("model").and_then(Value::as_str).map(String::from);
        let stream = obj.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let message_contents = obj
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.get("content").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            model,
            stream,
            options,
            message_contents,
            forward_body: Some(Bytes::from(json.to_string())),
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || s == "1",
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Streamed chunks
// ---------------------------------------------------------------------------

/// Content fragment of a streamed chunk: `choices[0].delta.content`, or
/// `choices[0].text` for legacy completions.
pub fn delta_fragment(chunk: &Value) -> Option<&str> {
    let choice = chunk.get("choices")?.get(0)?;
    match choice.get("delta") {
        Some(delta) => delta.get("content")?.as_str(),
        None => choice.get("text")?.as_str(),
    }
}

/// Whether a streamed chunk carries a `choices[0]` object. Usage and other
/// metadata chunks do not.
pub fn has_choice(chunk: &Value) -> bool {
    chunk
        .get("choices")
        .and_then(|c| c.get(0))
        .is_some_and(Value::is_object)
}

/// Copy of `chunk` with its content fragment replaced by `text`.
///
/// Chunks without a `choices[0]` object are returned unchanged.
pub fn with_delta_content(chunk: &Value, text: &str) -> Value {
    let mut out = chunk.clone();
    if let Some(choice) = out
        .get_mut("choices")
        .and_then(|c| c.get_mut(0))
        .and_then(Value::as_object_mut)
    {
        if choice.get("delta").is_none() && choice.contains_key("text") {
            choice.insert("text".to_string(), Value::String(text.to_string()));
        } else {
            let delta = choice
                .entry("delta")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(delta) = delta.as_object_mut() {
                delta.insert("content".to_string(), Value::String(text.to_string()));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Single-shot responses
// ---------------------------------------------------------------------------

/// Assistant text of a complete response: `choices[0].message.content`, or
/// `choices[0].text` for legacy completions.
pub fn response_content(response: &Value) -> Option<&str> {
    let choice = response.get("choices")?.get(0)?;
    match choice.get("message") {
        Some(message) => message.get("content")?.as_str(),
        None => choice.get("text")?.as_str(),
    }
}

/// Replace the assistant text of a complete response in place.
/// Returns false when the response has no content to replace.
pub fn replace_response_content(response: &mut Value, text: &str) -> bool {
    let Some(choice) = response
        .get_mut("choices")
        .and_then(|c| c.get_mut(0))
        .and_then(Value::as_object_mut)
    else {
        return false;
    };

    if let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) {
        message.insert("content".to_string(), Value::String(text.to_string()));
        return true;
    }
    if choice.contains_key("text") {
        choice.insert("text".to_string(), Value::String(text.to_string()));
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: &str) -> InboundRequest {
        InboundRequest::parse(&Bytes::from(body.to_string())).unwrap()
    }

    #[test]
    fn proxy_fields_read_and_stripped() {
        let req = parse(
            r#"{"model":"gpt-3.5-turbo","stream":true,"moderation":true,"moderation_level":"high","messages":[{"role":"user","content":"hi"}]}"#,
        );

        assert_eq!(req.model.as_deref(), Some("gpt-3.5-turbo"));
        assert!(req.stream);
        assert!(req.options.moderation);
        assert_eq!(req.options.moderation_level, ModerationLevel::High);
        assert_eq!(req.message_contents, vec!["hi"]);

        let forwarded: Value = serde_json::from_slice(req.forward_body.as_ref().unwrap()).unwrap();
        assert!(forwarded.get("moderation").is_none());
        assert!(forwarded.get("moderation_level").is_none());
        assert_eq!(forwarded["model"], "gpt-3.5-turbo");
    }

    #[test]
    fn forwarded_body_keeps_field_order() {
        let req = parse(r#"{"model":"m","moderation":false,"messages":[],"stream":false}"#);
        let forwarded = String::from_utf8(req.forward_body.unwrap().to_vec()).unwrap();
        assert_eq!(forwarded, r#"{"model":"m","messages":[],"stream":false}"#);
    }

    #[test]
    fn empty_body_is_allowed() {
        let req = parse("");
        assert!(req.forward_body.is_none());
        assert!(!req.options.moderation);
        assert!(req.model.is_none());
    }

    #[test]
    fn malformed_body_is_an_error() {
        let err = InboundRequest::parse(&Bytes::from_static(b"{not json")).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn non_string_contents_skipped() {
        let req = parse(
            r#"{"messages":[{"content":"a"},{"content":[{"type":"text","text":"b"}]},{"role":"user"}]}"#,
        );
        assert_eq!(req.message_contents, vec!["a"]);
    }

    #[test]
    fn moderation_truthiness() {
        assert!(parse(r#"{"moderation":"true"}"#).options.moderation);
        assert!(parse(r#"{"moderation":1}"#).options.moderation);
        assert!(!parse(r#"{"moderation":0}"#).options.moderation);
        assert!(!parse(r#"{"moderation":null}"#).options.moderation);
    }

    #[test]
    fn delta_fragment_shapes() {
        assert_eq!(
            delta_fragment(&json!({"choices":[{"delta":{"content":"hi"}}]})),
            Some("hi")
        );
        assert_eq!(delta_fragment(&json!({"choices":[{"text":"legacy"}]})), Some("legacy"));
        assert_eq!(delta_fragment(&json!({"choices":[{"delta":{"role":"assistant"}}]})), None);
        assert_eq!(delta_fragment(&json!({"choices":[]})), None);
        assert_eq!(delta_fragment(&json!({"object":"ping"})), None);
    }

    #[test]
    fn with_delta_content_replaces_without_mutating_input() {
        let chunk = json!({"id":"c1","choices":[{"index":0,"delta":{"content":"。"},"finish_reason":null}]});
        let out = with_delta_content(&chunk, "你好。");

        assert_eq!(out["choices"][0]["delta"]["content"], "你好。");
        assert_eq!(out["id"], "c1");
        assert_eq!(chunk["choices"][0]["delta"]["content"], "。");
    }

    #[test]
    fn with_delta_content_handles_legacy_and_missing_delta() {
        let legacy = with_delta_content(&json!({"choices":[{"text":"a"}]}), "b");
        assert_eq!(legacy["choices"][0]["text"], "b");

        let bare = with_delta_content(&json!({"choices":[{"index":0}]}), "x");
        assert_eq!(bare["choices"][0]["delta"]["content"], "x");
    }

    #[test]
    fn response_content_replaced() {
        let mut resp = json!({"choices":[{"message":{"role":"assistant","content":"bad"}}]});
        assert_eq!(response_content(&resp), Some("bad"));
        assert!(replace_response_content(&mut resp, "clean"));
        assert_eq!(response_content(&resp), Some("clean"));

        let mut empty = json!({"error":{"message":"nope"}});
        assert_eq!(response_content(&empty), None);
        assert!(!replace_response_content(&mut empty, "clean"));
    }
}
