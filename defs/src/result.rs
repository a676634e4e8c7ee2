use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Succeeded,
    Failed,
}

impl OperationStatus {
    /// Maps the provider's update result ("succeeded", "failed",
    /// "in-progress", ...) onto a terminal status.
    pub fn from_provider(result: &str) -> Self {
        if result.eq_ignore_ascii_case("succeeded") {
            OperationStatus::Succeeded
        } else {
            OperationStatus::Failed
        }
    }
}

/// Result and message of a finished stack operation, as recorded by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationSummary {
    pub result: OperationStatus,
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct OperationResult {
    pub result: OperationStatus,
    pub message: String,
    pub outputs: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_operation_result_wire_format() {
        let result = OperationResult {
            result: OperationStatus::Succeeded,
            message: "Deployed".to_string(),
            outputs: Map::new(),
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "result": "succeeded", "message": "Deployed", "outputs": {} })
        );
    }

    #[test]
    fn test_unknown_provider_result_is_failure() {
        assert_eq!(OperationStatus::from_provider("succeeded"), OperationStatus::Succeeded);
        assert_eq!(OperationStatus::from_provider("in-progress"), OperationStatus::Failed);
    }
}
