use crate::api::ApiClient;
use crate::cache::{Cache, MutateOptions};
use crate::error::ApiError;
use crate::models::{Envelope, Reminder, Task, TaskLabel, TaskPatch, TaskStatus};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use tracing::{info, warn};

pub type TaskEntry = Envelope<Task>;
pub type TaskList = Envelope<Vec<Task>>;

/// Tasks shown on the home screen, completed ones only on request.
pub fn visible_tasks(tasks: &[Task], show_completed: bool) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| show_completed || task.status != TaskStatus::Completed)
        .cloned()
        .collect()
}

async fn refresh(api: &ApiClient, tasks: &Cache<TaskEntry>, task_id: &str) {
    if let Err(err) = tasks.invalidate(&api.task_url(task_id)).await {
        warn!(task_id, error = %err, "task refresh failed");
    }
}

/// Rename a task optimistically: the new title is published to subscribers
/// before the PUT, rolled back if it fails and refetched once it succeeds.
/// Blank or unchanged titles are not sent and yield `Ok(None)`.
pub async fn update_title(
    api: &ApiClient,
    tasks: &Cache<TaskEntry>,
    task_id: &str,
    title: &str,
) -> Result<Option<TaskEntry>, ApiError> {
    let title = title.trim();
    let key = api.task_url(task_id);
    let current = tasks.peek(&key);

    if title.is_empty() || current.as_ref().map(|t| t.data.title.as_str()) == Some(title) {
        return Ok(None);
    }

    let optimistic_data = current.map(|entry| {
        let mut task = entry.data.clone();
        task.title = title.to_string();
        entry.with_data(task)
    });
    let patch = TaskPatch {
        title: Some(title.to_string()),
        ..TaskPatch::default()
    };

    let saved = tasks
        .mutate(
            &key,
            api.update_task(task_id, &patch),
            MutateOptions {
                optimistic_data,
                rollback_on_error: true,
                revalidate: true,
            },
        )
        .await?;
    info!(task_id, "title updated");
    Ok(Some(saved))
}

pub async fn change_status(
    api: &ApiClient,
    tasks: &Cache<TaskEntry>,
    task_id: &str,
    status: TaskStatus,
) -> Result<(), ApiError> {
    let patch = TaskPatch {
        status: Some(status),
        ..TaskPatch::default()
    };
    api.update_task(task_id, &patch).await?;
    info!(task_id, %status, "status updated");
    refresh(api, tasks, task_id).await;
    Ok(())
}

/// Save new content. The task is refetched whether or not the write
/// succeeded, so the view always shows what the server has.
pub async fn save_content(
    api: &ApiClient,
    tasks: &Cache<TaskEntry>,
    task_id: &str,
    content: &str,
) -> Result<(), ApiError> {
    let patch = TaskPatch {
        content: Some(content.to_string()),
        ..TaskPatch::default()
    };
    let result = api.update_task(task_id, &patch).await;
    refresh(api, tasks, task_id).await;
    result.map(|_| ())
}

fn current_labels(api: &ApiClient, tasks: &Cache<TaskEntry>, task_id: &str) -> Vec<TaskLabel> {
    tasks
        .peek(&api.task_url(task_id))
        .and_then(|entry| entry.data.labels)
        .unwrap_or_default()
}

/// Attach `label`. Returns `Ok(false)` without a request if it is already
/// attached.
pub async fn add_label(
    api: &ApiClient,
    tasks: &Cache<TaskEntry>,
    task_id: &str,
    label: TaskLabel,
) -> Result<bool, ApiError> {
    let mut labels = current_labels(api, tasks, task_id);
    if labels.iter().any(|l| l.id == label.id) {
        return Ok(false);
    }
    labels.push(label);

    let patch = TaskPatch {
        labels: Some(labels),
        ..TaskPatch::default()
    };
    api.update_task(task_id, &patch).await?;
    refresh(api, tasks, task_id).await;
    Ok(true)
}

pub async fn remove_label(
    api: &ApiClient,
    tasks: &Cache<TaskEntry>,
    task_id: &str,
    label_id: &str,
) -> Result<(), ApiError> {
    let labels: Vec<TaskLabel> = current_labels(api, tasks, task_id)
        .into_iter()
        .filter(|l| l.id != label_id)
        .collect();

    let patch = TaskPatch {
        labels: Some(labels),
        ..TaskPatch::default()
    };
    api.update_task(task_id, &patch).await?;
    refresh(api, tasks, task_id).await;
    Ok(())
}

/// Delete the task, drop its cache entry and refresh the task list.
pub async fn delete_task(
    api: &ApiClient,
    tasks: &Cache<TaskEntry>,
    list: &Cache<TaskList>,
    task_id: &str,
) -> Result<(), ApiError> {
    api.delete_task(task_id).await?;
    info!(task_id, "task deleted");

    tasks.set(&api.task_url(task_id), None);
    if let Err(err) = list.invalidate(&api.tasks_url()).await {
        warn!(error = %err, "task list refresh failed after delete");
    }
    Ok(())
}

/// The status selector's state. `selected` is what the control shows;
/// `confirmed` is the last value the server accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSelector {
    confirmed: TaskStatus,
    selected: TaskStatus,
    pending: bool,
}

impl StatusSelector {
    pub fn new(status: TaskStatus) -> StatusSelector {
        StatusSelector {
            confirmed: status,
            selected: status,
            pending: false,
        }
    }

    pub fn selected(&self) -> TaskStatus {
        self.selected
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Move the control to `next`. Returns the status to send, or `None`
    /// if a change is already in flight or nothing changed.
    pub fn choose(&mut self, next: TaskStatus) -> Option<TaskStatus> {
        if self.pending || next == self.selected {
            return None;
        }
        self.selected = next;
        self.pending = true;
        Some(next)
    }

    pub fn confirm(&mut self) {
        self.confirmed = self.selected;
        self.pending = false;
    }

    /// Put the control back on the last confirmed value.
    pub fn revert(&mut self) {
        self.selected = self.confirmed;
        self.pending = false;
    }

    /// Follow a fresh server copy of the task.
    pub fn sync(&mut self, status: TaskStatus) {
        self.confirmed = status;
        if !self.pending {
            self.selected = status;
        }
    }
}

/// Display strings for a reminder: date, time and repeat notice.
pub struct ReminderView {
    pub date: String,
    pub time: String,
    pub repeat: String,
}

fn parse_datetime<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(tz));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .and_then(|naive| tz.from_local_datetime(&naive).single())
}

pub fn describe_reminder_in<Tz>(reminder: &Reminder, tz: &Tz) -> ReminderView
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let repeat = format!(
        "{} times every {}s",
        reminder.repeat, reminder.interval
    );
    match parse_datetime(&reminder.datetime, tz) {
        Some(dt) => ReminderView {
            date: dt.format("%d %b %Y").to_string(),
            time: dt.format("%H:%M").to_string(),
            repeat,
        },
        None => ReminderView {
            date: reminder.datetime.clone(),
            time: String::new(),
            repeat,
        },
    }
}

pub fn describe_reminder(reminder: &Reminder) -> ReminderView {
    describe_reminder_in(reminder, &Local)
}
