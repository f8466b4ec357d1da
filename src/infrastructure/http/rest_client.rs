use crate::application::ports::{RemoteApi, RemoteResult};
use crate::domain::entities::Entity;
use crate::domain::value_objects::{EntityId, EntityKind, FieldDelta};
use crate::shared::config::ApiConfig;
use crate::shared::error::{RemoteError, SyncError};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// REST client for the board API. Responses may be wrapped as `{"data": ...}`.
#[derive(Clone)]
pub struct HttpRemoteApi {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl HttpRemoteApi {
    pub fn new(config: &ApiConfig) -> Result<Self, SyncError> {
        let trimmed = config.base_url.trim();
        if trimmed.is_empty() {
            return Err(SyncError::Configuration("api.base_url is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| SyncError::Configuration(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            base_url: trimmed.trim_end_matches('/').to_string(),
            auth_token: config
                .auth_token
                .clone()
                .filter(|value| !value.trim().is_empty()),
            http,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> RemoteResult<Value> {
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(RemoteError::http(status.as_u16(), error_message(status, &body)));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| RemoteError::new(Some(status.as_u16()), format!("invalid JSON body: {err}")))?;
        Ok(unwrap_envelope(parsed))
    }

    async fn fetch_one(&self, kind: EntityKind, builder: reqwest::RequestBuilder) -> RemoteResult<Entity> {
        let body = self.send(builder).await?;
        Entity::from_payload(kind, body).map_err(|err| RemoteError::network(err.to_string()))
    }

    async fn fetch_many(
        &self,
        kind: EntityKind,
        builder: reqwest::RequestBuilder,
    ) -> RemoteResult<Vec<Entity>> {
        match self.send(builder).await? {
            Value::Array(items) => Ok(parse_list(kind, items)),
            Value::Null => Ok(Vec::new()),
            other => Err(RemoteError::network(format!(
                "expected a list of {kind}s, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn fetch_projects(&self) -> RemoteResult<Vec<Entity>> {
        self.fetch_many(EntityKind::Project, self.request(Method::GET, "/projects"))
            .await
    }

    async fn fetch_project(&self, project_id: &EntityId) -> RemoteResult<Entity> {
        self.fetch_one(
            EntityKind::Project,
            self.request(Method::GET, &format!("/projects/{project_id}")),
        )
        .await
    }

    async fn create_project(&self, fields: Map<String, Value>) -> RemoteResult<Entity> {
        self.fetch_one(
            EntityKind::Project,
            self.request(Method::POST, "/projects").json(&fields),
        )
        .await
    }

    async fn update_project(
        &self,
        project_id: &EntityId,
        delta: &FieldDelta,
    ) -> RemoteResult<Entity> {
        self.fetch_one(
            EntityKind::Project,
            self.request(Method::PUT, &format!("/projects/{project_id}"))
                .json(delta.as_map()),
        )
        .await
    }

    async fn delete_project(&self, project_id: &EntityId) -> RemoteResult<()> {
        self.send(self.request(Method::DELETE, &format!("/projects/{project_id}")))
            .await
            .map(|_| ())
    }

    async fn fetch_project_tasks(&self, project_id: &EntityId) -> RemoteResult<Vec<Entity>> {
        let primary = self
            .fetch_many(
                EntityKind::Task,
                self.request(Method::GET, &format!("/tasks/project/{project_id}")),
            )
            .await;
        match primary {
            Err(err) if err.is_not_found() => {
                debug!(
                    "/tasks/project/{} not found, falling back to /projects/{}/tasks",
                    project_id, project_id
                );
                self.fetch_many(
                    EntityKind::Task,
                    self.request(Method::GET, &format!("/projects/{project_id}/tasks")),
                )
                .await
            }
            other => other,
        }
    }

    async fn create_task(
        &self,
        project_id: &EntityId,
        fields: Map<String, Value>,
    ) -> RemoteResult<Entity> {
        self.fetch_one(
            EntityKind::Task,
            self.request(Method::POST, &format!("/tasks/project/{project_id}"))
                .json(&fields),
        )
        .await
    }

    async fn update_task(&self, task_id: &EntityId, delta: &FieldDelta) -> RemoteResult<Entity> {
        self.fetch_one(
            EntityKind::Task,
            self.request(Method::PUT, &format!("/tasks/{task_id}"))
                .json(delta.as_map()),
        )
        .await
    }

    async fn delete_task(&self, task_id: &EntityId) -> RemoteResult<()> {
        self.send(self.request(Method::DELETE, &format!("/tasks/{task_id}")))
            .await
            .map(|_| ())
    }

    async fn fetch_comments(&self, task_id: &EntityId) -> RemoteResult<Vec<Entity>> {
        self.fetch_many(
            EntityKind::Comment,
            self.request(Method::GET, &format!("/tasks/{task_id}/comments")),
        )
        .await
    }

    async fn add_comment(&self, task_id: &EntityId, text: &str) -> RemoteResult<Entity> {
        self.fetch_one(
            EntityKind::Comment,
            self.request(Method::POST, &format!("/tasks/{task_id}/comments"))
                .json(&json!({ "text": text })),
        )
        .await
    }

    async fn delete_comment(&self, task_id: &EntityId, comment_id: &EntityId) -> RemoteResult<()> {
        self.send(self.request(
            Method::DELETE,
            &format!("/tasks/{task_id}/comments/{comment_id}"),
        ))
        .await
        .map(|_| ())
    }

    async fn fetch_notifications(&self) -> RemoteResult<Vec<Entity>> {
        self.fetch_many(
            EntityKind::Notification,
            self.request(Method::GET, "/notifications"),
        )
        .await
    }

    async fn mark_notification_read(
        &self,
        notification_id: &EntityId,
    ) -> RemoteResult<Option<Entity>> {
        let body = self
            .send(self.request(
                Method::PUT,
                &format!("/notifications/{notification_id}/read"),
            ))
            .await?;
        // 本文が空、またはIDを含まない応答もある
        Ok(Entity::from_payload(EntityKind::Notification, body).ok())
    }

    async fn mark_all_notifications_read(&self) -> RemoteResult<()> {
        self.send(self.request(Method::PUT, "/notifications/read-all"))
            .await
            .map(|_| ())
    }

    async fn delete_notification(&self, notification_id: &EntityId) -> RemoteResult<()> {
        self.send(self.request(
            Method::DELETE,
            &format!("/notifications/{notification_id}"),
        ))
        .await
        .map(|_| ())
    }
}

fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_list(kind: EntityKind, items: Vec<Value>) -> Vec<Entity> {
    items
        .into_iter()
        .filter_map(|item| match Entity::from_payload(kind, item) {
            Ok(entity) => Some(entity),
            Err(err) => {
                warn!("Skipping malformed {} in list response: {}", kind, err);
                None
            }
        })
        .collect()
}

fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match from_json {
        Some(message) if !message.trim().is_empty() => message,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}
