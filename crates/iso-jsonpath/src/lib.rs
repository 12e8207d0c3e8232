#![forbid(unsafe_code)]

use serde_json::Value;

/// Resolves `path` and renders the node as trimmed text. JSON `null` becomes
/// the empty string; any unmatched segment yields `None`.
#[must_use]
pub fn resolve(root: &Value, path: &str) -> Option<String> {
    resolve_node(root, path).map(text_of)
}

/// Walks `a.b[2].c`, trying an exact key first and then a case-insensitive
/// match at every segment.
#[must_use]
pub fn resolve_node<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in path.split('.') {
        let (key, indices) = split_segment(segment)?;
        if !key.is_empty() {
            current = lookup_key(current, key)?;
        }
        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// Text form used by every comparator: strings verbatim, scalars via their
/// JSON spelling, containers as compact JSON.
#[must_use]
pub fn text_of(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };
    text.trim().to_owned()
}

/// First element of the array at `path`, or the node itself when it is not
/// an array.
#[must_use]
pub fn first_element<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    match resolve_node(root, path)? {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn lookup_key<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    let map = node.as_object()?;
    map.get(key).or_else(|| {
        map.iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

/// `name[1][0]` -> (`name`, [1, 0]). Malformed brackets resolve to nothing.
fn split_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let segment = segment.trim();
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };

    let (key, mut rest) = segment.split_at(open);
    let mut indices = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].trim().parse::<usize>().ok()?);
        rest = &inner[close + 1..];
    }
    Some((key, indices))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{first_element, resolve, resolve_node};

    fn canonical() -> serde_json::Value {
        json!({
            "Transaction": {
                "Amount": {"amount": " 10000 ", "currency": "840"},
                "fees": [
                    {"type": "INTERCHANGE", "amount": "125"},
                    {"type": "SURCHARGE", "amount": "50"}
                ],
                "approved": true,
                "count": 3,
                "note": null
            }
        })
    }

    #[test]
    fn resolution_is_case_insensitive_per_segment() {
        let root = canonical();
        assert_eq!(
            resolve(&root, "Transaction.Amount.amount"),
            resolve(&root, "transaction.amount.AMOUNT")
        );
        assert_eq!(resolve(&root, "transaction.amount.amount").as_deref(), Some("10000"));
    }

    #[test]
    fn indexed_segments_walk_arrays() {
        let root = canonical();
        assert_eq!(
            resolve(&root, "transaction.fees[1].type").as_deref(),
            Some("SURCHARGE")
        );
        assert_eq!(resolve(&root, "transaction.fees[2].type"), None);
        assert_eq!(resolve(&root, "transaction.amount[0]"), None);
        assert_eq!(resolve(&root, "transaction.fees[x]"), None);
    }

    #[test]
    fn scalars_render_as_text_and_null_as_empty() {
        let root = canonical();
        assert_eq!(resolve(&root, "transaction.approved").as_deref(), Some("true"));
        assert_eq!(resolve(&root, "transaction.count").as_deref(), Some("3"));
        assert_eq!(resolve(&root, "transaction.note").as_deref(), Some(""));
        assert_eq!(resolve(&root, "transaction.missing"), None);
        assert_eq!(resolve(&root, "transaction.count.deeper"), None);
    }

    #[test]
    fn first_element_unwraps_arrays() {
        let root = canonical();
        let first = first_element(&root, "transaction.fees").expect("fees");
        assert_eq!(first["type"], "INTERCHANGE");
        assert!(resolve_node(&root, "").is_some());
    }
}
