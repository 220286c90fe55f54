//! Filter construction for scoped Qdrant queries.
//!
//! Every search and delete runs behind an owner filter so one user's vectors
//! are never visible to another. File-scoped operations narrow further by
//! `source`.

use serde_json::{Value, json};

/// Build a `must` filter over the `owner_id` payload field, optionally
/// narrowed to a single source filename.
pub(crate) fn owner_filter(owner_id: &str, source: Option<&str>) -> Value {
    let mut must = vec![json!({
        "key": "owner_id",
        "match": { "value": owner_id }
    })];

    if let Some(source) = source.filter(|value| !value.is_empty()) {
        must.push(json!({
            "key": "source",
            "match": { "value": source }
        }));
    }

    json!({ "must": must })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_filter_matches_owner_only() {
        let filter = owner_filter("user-1", None);
        let must = filter["must"].as_array().expect("must clause");
        assert_eq!(must.len(), 1);
        assert_eq!(must[0]["key"], "owner_id");
        assert_eq!(must[0]["match"]["value"], "user-1");
    }

    #[test]
    fn owner_filter_narrows_by_source() {
        let filter = owner_filter("user-1", Some("report.pdf"));
        let must = filter["must"].as_array().expect("must clause");
        assert_eq!(must.len(), 2);
        assert_eq!(must[1]["key"], "source");
        assert_eq!(must[1]["match"]["value"], "report.pdf");
    }

    #[test]
    fn empty_source_is_ignored() {
        let filter = owner_filter("user-1", Some(""));
        assert_eq!(filter["must"].as_array().map(|m| m.len()), Some(1));
    }
}
