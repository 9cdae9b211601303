// Jaskier Shared Pattern -- isolation validator
//! Response-isolation validator (spec §4.6.1), used only by load tests —
//! grounded in the Python source's `IsolationValidator`
//! (`tests/load/isolation_validator.py`). The core never post-filters
//! results itself; this exists solely to catch a leak in the repository
//! contract during testing.

use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct IsolationViolation {
    pub path: String,
    pub found_tenant_id: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationReport {
    pub checked: usize,
    pub violations: Vec<IsolationViolation>,
}

impl ValidationReport {
    pub fn success_rate(&self) -> f64 {
        if self.checked == 0 {
            return 1.0;
        }
        let violating = self.violations.len();
        (self.checked.saturating_sub(violating)) as f64 / self.checked as f64
    }
}

/// Recursively extracts every `tenant_id`-shaped field in `payload` and
/// flags any value that doesn't equal `requesting_tenant_id`.
pub fn validate_response(requesting_tenant_id: Uuid, payload: &serde_json::Value) -> ValidationReport {
    let mut found = Vec::new();
    extract_tenant_ids(payload, "$", &mut found);

    let checked = found.len();
    let violations = found
        .into_iter()
        .filter(|(_, tid)| *tid != requesting_tenant_id.to_string())
        .map(|(path, tid)| IsolationViolation {
            path,
            found_tenant_id: tid,
        })
        .collect();

    ValidationReport { checked, violations }
}

fn extract_tenant_ids(value: &serde_json::Value, path: &str, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map {
                let child_path = format!("{path}.{key}");
                if key == "tenant_id" {
                    if let Some(s) = v.as_str() {
                        out.push((child_path.clone(), s.to_string()));
                    }
                }
                extract_tenant_ids(v, &child_path, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                extract_tenant_ids(item, &format!("{path}[{idx}]"), out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_cross_tenant_record_nested_in_array() {
        let requesting = Uuid::new_v4();
        let leaked = Uuid::new_v4();
        let payload = serde_json::json!({
            "report": {
                "tenant_id": requesting.to_string(),
                "citations": [
                    {"tenant_id": requesting.to_string(), "source_record_id": "a"},
                    {"tenant_id": leaked.to_string(), "source_record_id": "b"},
                ]
            }
        });

        let report = validate_response(requesting, &payload);
        assert_eq!(report.checked, 3);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].found_tenant_id, leaked.to_string());
    }

    #[test]
    fn clean_payload_has_perfect_success_rate() {
        let requesting = Uuid::new_v4();
        let payload = serde_json::json!({"tenant_id": requesting.to_string()});
        let report = validate_response(requesting, &payload);
        assert_eq!(report.success_rate(), 1.0);
    }
}
