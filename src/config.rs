//! Structured configuration ingestion: a UCL-style config value can carry
//! either a single string or a list of strings for an upstream directive;
//! this crate's equivalent input is an already-parsed [`serde_json::Value`].
//! Loading the surrounding config file is the embedder's job, not this
//! crate's.

use serde_json::Value;

use crate::list::UpstreamList;

/// Feeds every string reachable from `value` through
/// [`UpstreamList::parse_line`]. Accepts a bare string, an array of
/// strings, or an object with an `"upstreams"` (or singular `"upstream"`)
/// key holding either shape — nested arbitrarily. Returns `true` if at
/// least one upstream was accepted from any string, matching
/// `parse_line`'s own partial-success contract.
pub fn from_json(list: &UpstreamList, value: &Value, default_port: u16) -> bool {
    let mut any = false;
    for line in collect_strings(value) {
        if list.parse_line(&line, default_port) {
            any = true;
        }
    }
    any
}

fn collect_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(collect_strings).collect(),
        Value::Object(map) => map
            .get("upstreams")
            .or_else(|| map.get("upstream"))
            .map(collect_strings)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use serde_json::json;

    #[test]
    fn accepts_single_string_value() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        assert!(from_json(&list, &json!("127.0.0.1:80;127.0.0.2:80"), 80));
        assert_eq!(list.count(), 2);
    }

    #[test]
    fn accepts_array_of_strings() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        assert!(from_json(&list, &json!(["127.0.0.1:80", "127.0.0.2:80"]), 80));
        assert_eq!(list.count(), 2);
    }

    #[test]
    fn accepts_object_with_upstreams_key() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        let cfg = json!({"upstreams": ["127.0.0.1:80", "127.0.0.2:80"]});
        assert!(from_json(&list, &cfg, 80));
        assert_eq!(list.count(), 2);
    }

    #[test]
    fn accepts_object_with_singular_upstream_key() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        let cfg = json!({"upstream": "127.0.0.1:80"});
        assert!(from_json(&list, &cfg, 80));
        assert_eq!(list.count(), 1);
    }

    #[test]
    fn rejects_unrelated_shapes() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        assert!(!from_json(&list, &json!(42), 80));
        assert!(!from_json(&list, &json!({"other": "127.0.0.1:80"}), 80));
        assert_eq!(list.count(), 0);
    }
}
