use serde_json::Value;

/// Response shapes the text-generation endpoint has used, most specific first.
///
/// `result_format = "message"` answers under `output.choices`; the compatible-mode
/// endpoint drops the `output` wrapper; the legacy `text` format answers under `output.text`.
const REPLY_POINTERS: &[&str] = &[
    "/output/choices/0/message/content",
    "/choices/0/message/content",
    "/output/text",
    "/text",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub source: &'static str,
}

/// Apply each strategy in order until one yields non-empty text.
pub fn extract_reply(body: &Value) -> Option<Extracted> {
    REPLY_POINTERS.iter().copied().find_map(|pointer| {
        body.pointer(pointer)
            .and_then(text_of)
            .filter(|t| !t.trim().is_empty())
            .map(|text| Extracted {
                text,
                source: pointer,
            })
    })
}

/// Content is either a plain string or a list of `{"text": ...}` parts.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let joined: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join(""))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_structured_message_content() {
        let body = json!({
            "output": {
                "choices": [{"message": {"role": "assistant", "content": "structured"}}],
                "text": "flat"
            }
        });
        let got = extract_reply(&body).unwrap();
        assert_eq!(got.text, "structured");
        assert_eq!(got.source, "/output/choices/0/message/content");
    }

    #[test]
    fn falls_back_to_flat_text() {
        let body = json!({"output": {"text": "flat answer", "finish_reason": "stop"}});
        assert_eq!(extract_reply(&body).unwrap().text, "flat answer");
    }

    #[test]
    fn accepts_compatible_mode_shape() {
        let body = json!({"choices": [{"message": {"content": "compat"}}]});
        assert_eq!(extract_reply(&body).unwrap().text, "compat");
    }

    #[test]
    fn joins_multimodal_parts() {
        let body = json!({
            "output": {"choices": [{"message": {"content": [{"text": "a"}, {"image": "x"}, {"text": "b"}]}}]}
        });
        assert_eq!(extract_reply(&body).unwrap().text, "ab");
    }

    #[test]
    fn empty_content_falls_through_to_next_strategy() {
        let body = json!({
            "output": {"choices": [{"message": {"content": ""}}], "text": "fallback"}
        });
        assert_eq!(extract_reply(&body).unwrap().text, "fallback");
    }

    #[test]
    fn no_match_is_none() {
        assert!(extract_reply(&json!({"output": {"choices": []}})).is_none());
        assert!(extract_reply(&json!({"request_id": "r1"})).is_none());
    }
}
