//! Template registration and lookup over the persistence trait.

use std::sync::Arc;

use serde_json::Value;

use super::{render, ParamMap, TaskTemplate};
use crate::error::{ErrorCode, Result, TaskHubError};
use crate::store::TemplateStore;

/// Service facade over template storage plus rendering.
pub struct TemplateService {
    store: Arc<dyn TemplateStore>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, body: &Value) -> Result<TaskTemplate> {
        let tpl = TaskTemplate::from_body(body)?;
        self.store.upsert_template(&tpl.to_row()).await?;
        Ok(tpl)
    }

    pub async fn get(&self, template_id: &str) -> Result<TaskTemplate> {
        let row = self
            .store
            .get_template(template_id)
            .await?
            .ok_or_else(|| TaskHubError::not_found("template", template_id))?;
        TaskTemplate::from_row(&row)
    }

    pub async fn delete(&self, template_id: &str) -> Result<()> {
        if !self.store.delete_template(template_id).await? {
            return Err(TaskHubError::not_found("template", template_id));
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TaskTemplate>> {
        let rows = self.store.list_templates().await?;
        rows.iter().map(TaskTemplate::from_row).collect()
    }

    /// Resolve + render in one step, as used by the cron scheduler, the
    /// Template strategy, and the render endpoint.
    pub async fn render_by_id(&self, template_id: &str, params: &Value) -> Result<Value> {
        let tpl = self.get(template_id).await?;
        let map: ParamMap = match params {
            Value::Object(m) => m.clone(),
            Value::Null => ParamMap::new(),
            _ => return Err(TaskHubError::new(ErrorCode::InvalidParam, "params must be a JSON object")),
        };
        render(&tpl, &map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> TemplateService {
        TemplateService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn register_get_render_delete() {
        let svc = service();
        svc.register(&json!({
            "template_id": "tpl-1",
            "name": "echo",
            "task_json_template": {"task": {"id": "t", "exec_type": "Shell", "exec_command": "echo {{msg}}"}},
            "schema": [{"name": "msg", "type": "string", "required": true}]
        }))
        .await
        .unwrap();

        let rendered = svc.render_by_id("tpl-1", &json!({"msg": "hello"})).await.unwrap();
        assert_eq!(rendered["task"]["exec_command"], "echo hello");

        svc.delete("tpl-1").await.unwrap();
        assert!(svc.get("tpl-1").await.is_err());
    }

    #[tokio::test]
    async fn unknown_template_is_not_found() {
        let svc = service();
        let err = svc.render_by_id("ghost", &json!({})).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TemplateNotFound);
    }
}
