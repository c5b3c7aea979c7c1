//! Field-equality filtering
//!
//! A payload is a JSON object; a filter is an ordered list of constraint
//! groups (field name → expected string) plus an invert flag. The decision
//! procedure below is order- and invert-sensitive and must stay literal:
//!
//! - `invert == false`: groups are checked in order and the first group with
//!   a mismatching field discards the message; later groups are not looked at.
//! - `invert == true`: `skip` is reset for every group, so only the last group
//!   decides. It keeps the message when at least one of its pairs matches.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{Decision, FilterError};

/// One group of field constraints. Order within a group is irrelevant.
pub type ConstraintGroup = HashMap<String, String>;

/// Field-equality filter for JSON object payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    groups: Vec<ConstraintGroup>,
    invert: bool,
}

impl FieldFilter {
    pub fn new(groups: Vec<ConstraintGroup>, invert: bool) -> Self {
        Self { groups, invert }
    }

    pub fn groups(&self) -> &[ConstraintGroup] {
        &self.groups
    }

    pub fn invert(&self) -> bool {
        self.invert
    }

    /// Parse `payload` as a JSON object and decide.
    pub fn evaluate(&self, payload: &[u8]) -> Result<Decision, FilterError> {
        let fields = parse_object(payload)?;
        Ok(Decision::from_skip(self.should_skip(&fields)))
    }

    /// Returns `true` when the message must be discarded.
    pub fn should_skip(&self, fields: &Map<String, Value>) -> bool {
        let invert = self.invert;
        let mut skip = false;

        for group in &self.groups {
            skip = invert;
            for (key, expected) in group {
                if field_equals(fields, key, expected) == invert {
                    skip = !invert;
                }
                if !invert && skip {
                    break;
                }
            }
            if !invert && skip {
                break;
            }
        }

        skip
    }
}

/// A field equals the expected value only when it is a JSON string with the
/// same contents. Missing fields, numbers, booleans and null never match.
fn field_equals(fields: &Map<String, Value>, key: &str, expected: &str) -> bool {
    fields.get(key).and_then(Value::as_str) == Some(expected)
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, FilterError> {
    serde_json::from_slice::<Map<String, Value>>(payload)
        .map_err(|e| FilterError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn group(pairs: &[(&str, &str)]) -> ConstraintGroup {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn decide(filter: &FieldFilter, payload: &str) -> Decision {
        filter.evaluate(payload.as_bytes()).unwrap()
    }

    #[test_case(r#"{"kind":"alarm","site":"north"}"#, Decision::Keep ; "all keys match")]
    #[test_case(r#"{"kind":"alarm","site":"south"}"#, Decision::Skip ; "one key mismatched")]
    #[test_case(r#"{"kind":"alarm"}"#, Decision::Skip ; "key missing")]
    #[test_case(r#"{"kind":"alarm","site":"north","extra":1}"#, Decision::Keep ; "extra fields ignored")]
    fn test_single_group_not_inverted(payload: &str, expected: Decision) {
        let filter = FieldFilter::new(vec![group(&[("kind", "alarm"), ("site", "north")])], false);
        assert_eq!(decide(&filter, payload), expected);
    }

    #[test]
    fn test_first_group_failure_discards_even_if_later_group_matches() {
        let filter = FieldFilter::new(
            vec![group(&[("kind", "alarm")]), group(&[("kind", "status")])],
            false,
        );
        assert_eq!(decide(&filter, r#"{"kind":"status"}"#), Decision::Skip);
    }

    #[test]
    fn test_not_inverted_mismatch_in_later_group_discards() {
        let filter = FieldFilter::new(
            vec![group(&[("kind", "alarm")]), group(&[("site", "north")])],
            false,
        );
        assert_eq!(decide(&filter, r#"{"kind":"alarm","site":"north"}"#), Decision::Keep);
        assert_eq!(decide(&filter, r#"{"kind":"alarm","site":"south"}"#), Decision::Skip);
    }

    #[test_case(r#"{"kind":"alarm","site":"south"}"#, Decision::Keep ; "one key matches")]
    #[test_case(r#"{"kind":"alarm","site":"north"}"#, Decision::Keep ; "all keys match")]
    #[test_case(r#"{"kind":"status","site":"south"}"#, Decision::Skip ; "no key matches")]
    #[test_case(r#"{}"#, Decision::Skip ; "empty object")]
    fn test_single_group_inverted(payload: &str, expected: Decision) {
        let filter = FieldFilter::new(vec![group(&[("kind", "alarm"), ("site", "north")])], true);
        assert_eq!(decide(&filter, payload), expected);
    }

    #[test]
    fn test_inverted_only_last_group_counts() {
        let filter = FieldFilter::new(
            vec![group(&[("kind", "alarm")]), group(&[("site", "north")])],
            true,
        );
        // Group 1 matches fully, group 2 has no match
        assert_eq!(decide(&filter, r#"{"kind":"alarm","site":"south"}"#), Decision::Skip);
        // Group 1 has no match, group 2 matches
        assert_eq!(decide(&filter, r#"{"kind":"status","site":"north"}"#), Decision::Keep);
    }

    #[test]
    fn test_no_groups_keeps() {
        let payload = r#"{"kind":"alarm"}"#;
        assert_eq!(decide(&FieldFilter::new(vec![], false), payload), Decision::Keep);
        assert_eq!(decide(&FieldFilter::new(vec![], true), payload), Decision::Keep);
    }

    #[test]
    fn test_empty_last_group_inverted_discards() {
        let filter = FieldFilter::new(vec![group(&[("kind", "alarm")]), group(&[])], true);
        assert_eq!(decide(&filter, r#"{"kind":"alarm"}"#), Decision::Skip);
    }

    #[test_case(r#"{"level":"3"}"#, Decision::Keep ; "string equal")]
    #[test_case(r#"{"level":3}"#, Decision::Skip ; "number never equals string")]
    #[test_case(r#"{"level":null}"#, Decision::Skip ; "null never equals string")]
    #[test_case(r#"{"level":["3"]}"#, Decision::Skip ; "array never equals string")]
    fn test_only_json_strings_compare_equal(payload: &str, expected: Decision) {
        let filter = FieldFilter::new(vec![group(&[("level", "3")])], false);
        assert_eq!(decide(&filter, payload), expected);
    }

    #[test_case(b"not json" ; "garbage")]
    #[test_case(b"[1,2,3]" ; "array document")]
    #[test_case(b"\"text\"" ; "string document")]
    #[test_case(b"" ; "empty payload")]
    fn test_non_object_payload_is_an_error(payload: &[u8]) {
        let filter = FieldFilter::new(vec![group(&[("kind", "alarm")])], false);
        assert!(matches!(
            filter.evaluate(payload),
            Err(FilterError::Payload(_))
        ));
    }

    fn small_group() -> impl Strategy<Value = ConstraintGroup> {
        prop::collection::hash_map("[a-c]", "[x-z]", 0..3)
    }

    fn small_object() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::hash_map("[a-c]", "[x-z]", 0..4).prop_map(|m| {
            m.into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_not_inverted_keeps_iff_every_group_fully_matches(
            groups in prop::collection::vec(small_group(), 0..4),
            fields in small_object(),
        ) {
            let filter = FieldFilter::new(groups.clone(), false);
            let all_match = groups.iter().all(|g| {
                g.iter().all(|(k, v)| field_equals(&fields, k, v))
            });
            prop_assert_eq!(filter.should_skip(&fields), !all_match);
        }

        #[test]
        fn prop_inverted_depends_only_on_last_group(
            groups in prop::collection::vec(small_group(), 1..4),
            fields in small_object(),
        ) {
            let filter = FieldFilter::new(groups.clone(), true);
            let last_only = FieldFilter::new(vec![groups[groups.len() - 1].clone()], true);
            prop_assert_eq!(filter.should_skip(&fields), last_only.should_skip(&fields));

            let last = &groups[groups.len() - 1];
            let any_match = last.iter().any(|(k, v)| field_equals(&fields, k, v));
            prop_assert_eq!(filter.should_skip(&fields), !any_match);
        }
    }
}
