use serde::{Deserialize, Serialize};
use std::fmt;

/// The `{meta, data}` wrapper around every API response.
#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
pub struct Envelope<T> {
    #[serde(default)]
    pub meta: serde_json::Value,
    pub data: T,
}

impl<T> Envelope<T> {
    /// Same meta, different payload.
    pub fn with_data<U>(&self, data: U) -> Envelope<U> {
        Envelope {
            meta: self.meta.clone(),
            data,
        }
    }
}

#[derive(Clone, Copy, Deserialize, Serialize, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "Open")]
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Completed")]
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "Open",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
        }
    }

    /// The option after this one in selector order, wrapping around.
    pub fn next(self) -> TaskStatus {
        let i = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
pub struct TaskLabel {
    pub id: String,
    pub title: String,
    pub color: String,
}

// Read-only; there is no endpoint to create or edit reminders.
#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub datetime: String,
    pub repeat: u32,
    pub interval: u64,
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub content: Option<String>,
    pub status: TaskStatus,
    pub labels: Option<Vec<TaskLabel>>,
    pub reminders: Option<Vec<Reminder>>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial body for `PUT /tasks/:id`. Unset fields are left out.
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<TaskLabel>>,
}

#[derive(Serialize, Debug)]
pub struct SignInRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SignInData {
    pub user_id: String,
    pub token: String,
    pub email: String,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct NewLabel {
    pub title: String,
    pub color: String,
}
