use serde::{Deserialize, Serialize};

/// Handle of a started workflow execution, in the shape the front-end polls with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartExecutionResponse {
    #[serde(rename = "executionArn")]
    pub execution_arn: String,
    #[serde(rename = "startDate")]
    pub start_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionDescription {
    pub status: String,
    pub output: Option<String>,
}

impl ExecutionDescription {
    pub fn is_succeeded(&self) -> bool {
        self.status == "SUCCEEDED"
    }
}
