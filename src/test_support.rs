//! Fixtures shared by the unit tests.

use crate::api::ApiClient;
use crate::cache::Cache;
use crate::labels::LabelList;
use crate::models::TaskLabel;
use crate::tasks::{TaskEntry, TaskList};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn label(id: &str, title: &str, color: &str) -> TaskLabel {
    TaskLabel {
        id: id.to_string(),
        title: title.to_string(),
        color: color.to_string(),
    }
}

pub fn label_json(id: &str, title: &str) -> Value {
    json!({"id": id, "title": title, "color": "#336699"})
}

pub fn task_json(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "content": "notes",
        "status": "Open",
        "labels": [],
        "created_at": "2024-03-01T00:00:00Z",
        "updated_at": "2024-03-01T00:00:00Z"
    })
}

pub fn envelope(data: Value) -> Value {
    json!({"meta": {}, "data": data})
}

pub fn labels_cache(api: &ApiClient) -> Cache<LabelList> {
    Cache::new(Arc::new(api.clone()))
}

pub fn task_cache(api: &ApiClient) -> Cache<TaskEntry> {
    Cache::new(Arc::new(api.clone()))
}

pub fn task_list_cache(api: &ApiClient) -> Cache<TaskList> {
    Cache::new(Arc::new(api.clone()))
}
