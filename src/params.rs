//! Request parameter assembly.
//!
//! Query-string and body parameters are merged into one multimap so the rest
//! of the pipeline never cares how the client chose to send them. Body
//! parsing recognizes JSON objects and form encoding; unknown content types
//! contribute nothing. Malformed individual values are dropped silently.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};

/// A multimap of string keys to ordered string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, Vec<String>>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble parameters from the raw query string plus, when present, the
    /// request body. Query-string parameters come first, then body-derived
    /// ones.
    ///
    /// Fails only when the request carries no parseable parameters at all.
    pub fn assemble(query: Option<&str>, content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let mut params = Self::new();

        if let Some(qs) = query {
            for (k, v) in url::form_urlencoded::parse(qs.as_bytes()) {
                params.add(&k, &v);
            }
        }

        if !body.is_empty() {
            let ct = content_type.unwrap_or("");
            if ct.contains("application/json") {
                params.add_json_object(body);
            } else if ct.contains("application/x-www-form-urlencoded") {
                for (k, v) in url::form_urlencoded::parse(body) {
                    params.add(&k, &v);
                }
            }
        }

        if params.0.is_empty() {
            return Err(Error::InvalidInput("no parameters".to_string()));
        }
        Ok(params)
    }

    /// Merge a top-level JSON object: scalars become single entries, arrays
    /// become repeated entries. Nested objects and nulls are dropped.
    fn add_json_object(&mut self, body: &[u8]) {
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
            return;
        };
        for (k, v) in map {
            match v {
                Value::Array(items) => {
                    for item in items {
                        if let Some(s) = scalar_to_string(&item) {
                            self.add(&k, &s);
                        }
                    }
                }
                other => {
                    if let Some(s) = scalar_to_string(&other) {
                        self.add(&k, &s);
                    }
                }
            }
        }
    }

    /// First value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|vs| vs.first()).map(String::as_str)
    }

    /// All values for a key, in insertion order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a value.
    pub fn add(&mut self, key: &str, value: &str) {
        self.0
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Replace all values for a key with a single one.
    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), vec![value.to_string()]);
    }

    /// Remove a key, returning its values.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    /// Replace the value list for a key; an empty list removes the key.
    pub fn set_all(&mut self, key: &str, values: Vec<String>) {
        if values.is_empty() {
            self.0.remove(key);
        } else {
            self.0.insert(key.to_string(), values);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remap a single-valued `match` parameter to `match[]` when the latter
    /// is absent, so later stages see one canonical form.
    pub fn remap_match(&mut self) {
        if self.0.contains_key("match[]") {
            return;
        }
        if let Some(values) = self.0.remove("match") {
            self.0.insert("match[]".to_string(), values);
        }
    }

    /// Serialize to a query string. Multi-valued keys without a `[]` suffix
    /// get one, matching the repeated-parameter convention of the v1 API.
    pub fn to_query_string(&self) -> String {
        let mut out = url::form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.0 {
            let name = if values.len() > 1 && !key.ends_with("[]") {
                format!("{key}[]")
            } else {
                key.clone()
            };
            for value in values {
                out.append_pair(&name, value);
            }
        }
        out.finish()
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_query_string_params() {
        let params = Params::assemble(Some("foo=bar&foo=baz&x=1"), None, b"").unwrap();
        assert_eq!(params.get_all("foo"), ["bar", "baz"]);
        assert_eq!(params.get("x"), Some("1"));
    }

    #[test]
    fn assembles_json_body() {
        let body = br#"{"foo":["a","b"],"x":1,"flag":true,"skip":{"nested":1}}"#;
        let params = Params::assemble(None, Some("application/json"), body).unwrap();
        assert_eq!(params.get_all("foo"), ["a", "b"]);
        assert_eq!(params.get("x"), Some("1"));
        assert_eq!(params.get("flag"), Some("true"));
        assert_eq!(params.get("skip"), None);
    }

    #[test]
    fn assembles_form_body_after_query_string() {
        let params = Params::assemble(
            Some("foo=a"),
            Some("application/x-www-form-urlencoded"),
            b"foo=b&x=2",
        )
        .unwrap();
        assert_eq!(params.get_all("foo"), ["a", "b"]);
        assert_eq!(params.get("x"), Some("2"));
    }

    #[test]
    fn unknown_content_type_contributes_nothing() {
        let params = Params::assemble(Some("q=up"), Some("text/plain"), b"x=1").unwrap();
        assert_eq!(params.get("x"), None);
        assert_eq!(params.get("q"), Some("up"));
    }

    #[test]
    fn empty_request_is_an_error() {
        assert!(Params::assemble(None, None, b"").is_err());
        assert!(Params::assemble(Some(""), Some("application/json"), b"not json").is_err());
    }

    #[test]
    fn remaps_single_match_to_bracketed_form() {
        let mut params = Params::assemble(Some(r#"match=a%3D%221%22&match=b%3D%222%22"#), None, b"")
            .unwrap();
        params.remap_match();
        assert_eq!(params.get("match"), None);
        assert_eq!(params.get_all("match[]"), [r#"a="1""#, r#"b="2""#]);
    }

    #[test]
    fn remap_keeps_existing_bracketed_entries() {
        let mut params = Params::new();
        params.add("match", "a");
        params.add("match[]", "b");
        params.remap_match();
        assert_eq!(params.get_all("match[]"), ["b"]);
        assert_eq!(params.get_all("match"), ["a"]);
    }

    #[test]
    fn query_string_round_trips_repeated_values() {
        let mut params = Params::new();
        params.set("foo", "bar");
        let qs = params.to_query_string();
        assert_eq!(qs, "foo=bar");

        let mut params = Params::new();
        params.add("match", r#"a="1""#);
        params.add("match", r#"b="2""#);
        let qs = params.to_query_string();
        let reparsed: Vec<(String, String)> = url::form_urlencoded::parse(qs.as_bytes())
            .into_owned()
            .collect();
        assert_eq!(
            reparsed,
            vec![
                ("match[]".to_string(), r#"a="1""#.to_string()),
                ("match[]".to_string(), r#"b="2""#.to_string()),
            ]
        );
    }
}
