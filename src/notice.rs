//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`.
//! Role: Shared contract helper for CLI diagnostics such as skipped records.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is additive-only.
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    /// Where the record came from: `stdin` or an input file path.
    pub input: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("input".to_string(), json!(notice.input));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::{Notice, notice_json};
    use serde_json::{Map, Value};

    #[test]
    fn skipped_record_notice_has_required_fields() {
        let mut details = Map::new();
        details.insert("record".to_string(), Value::from(4));
        details.insert("stage".to_string(), Value::from(1));

        let notice = Notice {
            kind: "skip".to_string(),
            time: "2026-02-01T00:00:00Z".to_string(),
            cmd: "run".to_string(),
            input: "stdin".to_string(),
            message: "stage 1 (increment) failed".to_string(),
            details,
        };

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("skip"));
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("run"));
        assert_eq!(obj.get("input").and_then(|v| v.as_str()), Some("stdin"));
        assert_eq!(
            obj.get("details")
                .and_then(|v| v.get("record"))
                .and_then(|v| v.as_u64()),
            Some(4)
        );
    }
}
