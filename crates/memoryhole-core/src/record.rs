//! Submission payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One intake form submission: field names mapped to the values the
/// volunteer entered, in the order they were sent.
///
/// No schema is enforced. A record has no mutating API, so it cannot change
/// after the coordinator accepts it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionRecord(Map<String, Value>);

impl SubmissionRecord {
    /// Iterates over fields in submission order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Looks up a single field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes the record as a single line of JSON (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_line(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
    }
}

impl From<Map<String, Value>> for SubmissionRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl FromIterator<(String, Value)> for SubmissionRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The request body of `POST /submit`.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    /// Form fields.
    pub data: SubmissionRecord,
    /// Captcha token issued to the browser.
    pub token: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preserves_field_order() {
        let record: SubmissionRecord =
            serde_json::from_value(json!({"zeta": 1, "alpha": "a", "mid": true})).unwrap();
        let names: Vec<&str> = record.fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn json_line_has_no_newline() {
        let record: SubmissionRecord =
            serde_json::from_value(json!({"notes": "line one\nline two"})).unwrap();
        let line = record.to_json_line().unwrap();
        assert!(!line.contains(&b'\n'));
        let back: SubmissionRecord = serde_json::from_slice(&line).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn parses_submit_body() {
        let submission: Submission = serde_json::from_value(json!({
            "data": {"legal_first_name": "Fakey", "email": "john@doe.com"},
            "token": "valid"
        }))
        .unwrap();
        assert_eq!(submission.token, "valid");
        assert_eq!(submission.data.len(), 2);
        assert_eq!(submission.data.get("legal_first_name"), Some(&json!("Fakey")));
    }

    #[test]
    fn rejects_non_object_data() {
        let result: Result<Submission, _> =
            serde_json::from_value(json!({"data": ["a"], "token": "t"}));
        assert!(result.is_err());
    }
}
