//! Lenient field lookups over provider JSON, where the same value may
//! live under several keys depending on the actor or API version.

use serde_json::Value;

/// First non-blank string (or number rendered as a string) among the JSON pointers.
pub(crate) fn text_at(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|pointer| match value.pointer(pointer)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

pub(crate) fn int_at(value: &Value, pointers: &[&str]) -> Option<i64> {
    pointers.iter().find_map(|pointer| {
        let field = value.pointer(pointer)?;
        field
            .as_i64()
            .or_else(|| field.as_f64().map(|number| number as i64))
    })
}

pub(crate) fn float_at(value: &Value, pointers: &[&str]) -> Option<f64> {
    pointers
        .iter()
        .find_map(|pointer| value.pointer(pointer)?.as_f64())
}

pub(crate) fn bool_at(value: &Value, pointers: &[&str]) -> Option<bool> {
    pointers
        .iter()
        .find_map(|pointer| value.pointer(pointer)?.as_bool())
}

/// First non-empty array among `keys`, or `value` itself when it is an array.
pub(crate) fn entries<'a>(value: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(array) = value.as_array() {
        return array;
    }
    keys.iter()
        .filter_map(|key| value.get(key)?.as_array())
        .find(|array| !array.is_empty())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Path segment following `marker`, e.g. the post id after `comments`.
pub(crate) fn segment_after<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    segments.find(|segment| *segment == marker)?;
    segments.next()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn pointers_are_tried_in_order() {
        let value = json!({ "id": 17, "user": { "screen_name": "" }, "username": "ana" });

        assert_eq!(text_at(&value, &["/id_str", "/id"]).as_deref(), Some("17"));
        assert_eq!(
            text_at(&value, &["/user/screen_name", "/username"]).as_deref(),
            Some("ana")
        );
        assert_eq!(int_at(&value, &["/missing", "/id"]), Some(17));
    }

    #[test]
    fn entries_prefer_first_non_empty_array() {
        let value = json!({ "items": [], "defaultDatasetItems": [{ "a": 1 }] });

        assert_eq!(entries(&value, &["items", "defaultDatasetItems"]).len(), 1);
        assert!(entries(&json!({}), &["items"]).is_empty());
    }

    #[test]
    fn finds_segment_after_marker() {
        let url = "https://www.reddit.com/r/rust/comments/abc123/some_title/?sort=top";

        assert_eq!(segment_after(url, "comments"), Some("abc123"));
        assert_eq!(segment_after("https://x.com/jack/status/20", "status"), Some("20"));
        assert_eq!(segment_after("https://x.com/jack", "status"), None);
    }
}
