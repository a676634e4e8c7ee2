use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use sc_defs::DeploymentRequest;
use serde_json::{json, Value};

use crate::backend::{StackCatalog, WorkflowEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn WorkflowEngine>,
    pub catalog: Arc<dyn StackCatalog>,
    pub default_branch: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/execute", post(start_execution))
        .route("/api/execute/{execution}/status", get(execution_status))
        .route("/api/projects/{project}/stacks", get(list_stacks))
        .with_state(state)
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Workflow input for a request, with the source branch defaulted.
pub fn workflow_input(mut request: DeploymentRequest, default_branch: &str) -> DeploymentRequest {
    if request.branch.as_deref().unwrap_or_default().is_empty() {
        request.branch = Some(default_branch.to_string());
    }
    request
}

pub async fn start_execution(
    State(state): State<AppState>,
    payload: Result<Json<DeploymentRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => workflow_input(request, &state.default_branch),
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if let Err(e) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let input = match serde_json::to_string(&request) {
        Ok(input) => input,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let name = uuid::Uuid::new_v4().to_string();
    info!(
        "Starting execution {} for {}/{}",
        name,
        request.project,
        request.stack_name()
    );

    match state.engine.start_execution(&name, input).await {
        Ok(started) => (StatusCode::OK, Json(started)).into_response(),
        Err(e) => {
            error!("{:?}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

pub async fn execution_status(
    State(state): State<AppState>,
    Path(execution): Path<String>,
) -> Response {
    let description = match state.engine.describe_execution(&execution).await {
        Ok(description) => description,
        Err(e) => {
            error!("{:?}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e));
        }
    };

    if !description.is_succeeded() {
        return (
            StatusCode::ACCEPTED,
            Json(json!({ "status": description.status })),
        )
            .into_response();
    }

    let output = description.output.as_deref().unwrap_or("null");
    match serde_json::from_str::<Value>(output) {
        Ok(output) => (StatusCode::OK, Json(output)).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Execution output is not JSON: {}", e),
        ),
    }
}

pub async fn list_stacks(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Response {
    match state.catalog.list_stacks(&project).await {
        Ok(stacks) => (StatusCode::OK, Json(stacks)).into_response(),
        Err(e) => {
            error!("{:?}", e);
            error_response(StatusCode::BAD_GATEWAY, format!("{:#}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{ExecutionDescription, StartExecutionResponse};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeEngine {
        started: Mutex<Vec<(String, Value)>>,
        description: Option<ExecutionDescription>,
        fail: bool,
    }

    #[async_trait]
    impl WorkflowEngine for FakeEngine {
        async fn start_execution(
            &self,
            name: &str,
            input: String,
        ) -> Result<StartExecutionResponse> {
            if self.fail {
                return Err(anyhow!("AccessDeniedException"));
            }
            let input: Value = serde_json::from_str(&input)?;
            self.started.lock().unwrap().push((name.to_string(), input));
            Ok(StartExecutionResponse {
                execution_arn: format!("arn:aws:states:us-west-2:1:execution:sc:{}", name),
                start_date: "2026-10-16T00:00:00+00:00".to_string(),
            })
        }

        async fn describe_execution(&self, _execution_arn: &str) -> Result<ExecutionDescription> {
            self.description
                .clone()
                .ok_or_else(|| anyhow!("ExecutionDoesNotExist"))
        }
    }

    struct FakeCatalog;

    #[async_trait]
    impl StackCatalog for FakeCatalog {
        async fn list_stacks(&self, project: &str) -> Result<Value> {
            Ok(json!({ "stacks": [{ "orgName": "initech", "projectName": project, "stackName": "dev" }] }))
        }
    }

    fn app(engine: Arc<FakeEngine>) -> Router {
        create_router(AppState {
            engine,
            catalog: Arc::new(FakeCatalog),
            default_branch: "refs/heads/main".to_string(),
        })
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_execute(body: Value) -> Request<Body> {
        Request::builder()
            .uri("/api/execute")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_defaults_branch_and_starts_execution() {
        let engine = Arc::new(FakeEngine::default());
        let response = app(Arc::clone(&engine))
            .oneshot(post_execute(json!({
                "repository_url": "git@x/y.git",
                "project": "demo",
                "projectPath": "infra",
                "environments": ["prod"]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let started = engine.started.lock().unwrap();
        let (name, input) = &started[0];
        assert!(uuid::Uuid::parse_str(name).is_ok());
        assert_eq!(
            body["executionArn"],
            json!(format!("arn:aws:states:us-west-2:1:execution:sc:{}", name))
        );
        assert_eq!(
            input,
            &json!({
                "repository_url": "git@x/y.git",
                "branch": "refs/heads/main",
                "project": "demo",
                "projectPath": "infra",
                "environments": ["prod"]
            })
        );
    }

    #[tokio::test]
    async fn test_execute_rejects_missing_project() {
        let response = app(Arc::new(FakeEngine::default()))
            .oneshot(post_execute(json!({ "repository_url": "git@x/y.git" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_stack_name() {
        let response = app(Arc::new(FakeEngine::default()))
            .oneshot(post_execute(json!({
                "repository_url": "git@x/y.git",
                "project": "demo",
                "stack": "--force"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execute_engine_failure_is_500() {
        let engine = Arc::new(FakeEngine {
            fail: true,
            ..Default::default()
        });
        let response = app(engine)
            .oneshot(post_execute(json!({
                "repository_url": "git@x/y.git",
                "project": "demo"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], json!("AccessDeniedException"));
    }

    #[tokio::test]
    async fn test_running_execution_is_accepted() {
        let engine = Arc::new(FakeEngine {
            description: Some(ExecutionDescription {
                status: "RUNNING".to_string(),
                output: None,
            }),
            ..Default::default()
        });
        let response = app(engine)
            .oneshot(get("/api/execute/arn:aws:states:x/status"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await, json!({ "status": "RUNNING" }));
    }

    #[tokio::test]
    async fn test_succeeded_execution_returns_parsed_output() {
        let engine = Arc::new(FakeEngine {
            description: Some(ExecutionDescription {
                status: "SUCCEEDED".to_string(),
                output: Some(r#"{"result":"succeeded","message":"","outputs":{}}"#.to_string()),
            }),
            ..Default::default()
        });
        let response = app(engine)
            .oneshot(get("/api/execute/arn:aws:states:x/status"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "result": "succeeded", "message": "", "outputs": {} })
        );
    }

    #[tokio::test]
    async fn test_unknown_execution_is_500() {
        let response = app(Arc::new(FakeEngine::default()))
            .oneshot(get("/api/execute/missing/status"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_list_stacks_for_project() {
        let response = app(Arc::new(FakeEngine::default()))
            .oneshot(get("/api/projects/demo/stacks"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["stacks"][0]["projectName"], json!("demo"));
    }
}
