use crate::api::ApiClient;
use crate::cache::Cache;
use crate::error::ApiError;
use crate::labels::{self, filter_labels, LabelError, LabelList};
use crate::models::{Task, TaskLabel, TaskStatus};
use crate::route::{protect_route, Route};
use crate::session::{self, Session, SessionStore};
use crate::tasks::{self, StatusSelector, TaskEntry, TaskList};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::ListState;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TOAST_TTL: Duration = Duration::from_secs(4);

/// Mount-time load: fetch when nothing is cached, otherwise revalidate.
async fn load<T>(cache: Cache<T>, key: String) -> Result<(), ApiError>
where
    T: Clone + Send + Sync + 'static,
{
    if cache.peek(&key).is_some() {
        cache.invalidate(&key).await.map(|_| ())
    } else {
        cache.get(&key).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    shown_at: Instant,
}

/// Results of background work, delivered back to the UI loop.
#[derive(Debug)]
pub enum AppEvent {
    TasksLoaded(Result<(), ApiError>),
    TaskLoaded(Result<(), ApiError>),
    LabelsLoaded(Result<(), ApiError>),
    SignedIn(Result<Session, ApiError>),
    TitleSaved(Result<Option<TaskEntry>, ApiError>),
    StatusSaved(Result<(), ApiError>),
    ContentSaved(Result<(), ApiError>),
    LabelAdded(Result<bool, ApiError>),
    LabelRemoved(Result<(), ApiError>),
    LabelCreated(Result<TaskLabel, LabelError>),
    LabelDeleted(Result<(), ApiError>),
    TaskDeleted(Result<(), ApiError>),
}

/// An event tagged with the screen that asked for it.
#[derive(Debug)]
pub struct ScreenEvent {
    screen: u64,
    event: AppEvent,
}

/// What a key press asks the app to do outside the current screen.
#[derive(Debug, PartialEq)]
enum Action {
    None,
    Quit,
    Navigate(Route),
    SignIn { email: String, password: String },
    SignOut,
    Reload,
    SaveTitle(String),
    SaveContent(String),
    ChangeStatus(TaskStatus),
    OpenLabels,
    AddLabel(TaskLabel),
    RemoveLabel(String),
    CreateLabel(String),
    DeleteLabel(String),
    DeleteTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInField {
    Email,
    Password,
}

pub struct SignInView {
    pub email: String,
    pub password: String,
    pub focus: SignInField,
    pub submitting: bool,
}

impl SignInView {
    fn new() -> SignInView {
        SignInView {
            email: String::new(),
            password: String::new(),
            focus: SignInField::Email,
            submitting: false,
        }
    }

    pub fn can_submit(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }

    fn handle_key(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Esc => return Action::Quit,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Down | KeyCode::Up => {
                self.focus = match self.focus {
                    SignInField::Email => SignInField::Password,
                    SignInField::Password => SignInField::Email,
                };
            }
            KeyCode::Enter => {
                if self.can_submit() && !self.submitting {
                    self.submitting = true;
                    return Action::SignIn {
                        email: self.email.clone(),
                        password: self.password.clone(),
                    };
                }
            }
            KeyCode::Char(c) => match self.focus {
                SignInField::Email => self.email.push(c),
                SignInField::Password => self.password.push(c),
            },
            KeyCode::Backspace => match self.focus {
                SignInField::Email => {
                    self.email.pop();
                }
                SignInField::Password => {
                    self.password.pop();
                }
            },
            _ => {}
        }
        Action::None
    }
}

pub struct TaskListView {
    pub tasks: watch::Receiver<Option<TaskList>>,
    pub state: ListState,
    pub show_completed: bool,
    pub load_error: bool,
}

impl TaskListView {
    pub fn is_loading(&self) -> bool {
        self.tasks.borrow().is_none() && !self.load_error
    }

    pub fn visible(&self) -> Vec<Task> {
        self.tasks
            .borrow()
            .as_ref()
            .map(|list| tasks::visible_tasks(&list.data, self.show_completed))
            .unwrap_or_default()
    }

    fn next(&mut self) {
        let len = self.visible().len();
        if len == 0 {
            self.state.select(None);
            return;
        }
        let i = match self.state.selected() {
            Some(i) => {
                if i >= len - 1 {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        self.state.select(Some(i));
    }

    fn previous(&mut self) {
        let len = self.visible().len();
        if len == 0 {
            self.state.select(None);
            return;
        }
        let i = match self.state.selected() {
            Some(i) => {
                if i == 0 {
                    len - 1
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        self.state.select(Some(i));
    }

    fn handle_key(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Char('q') => return Action::Quit,
            KeyCode::Char('j') | KeyCode::Down => self.next(),
            KeyCode::Char('k') | KeyCode::Up => self.previous(),
            KeyCode::Char('t') => {
                self.show_completed = !self.show_completed;
                self.state.select(Some(0));
            }
            KeyCode::Char('r') => return Action::Reload,
            KeyCode::Char('x') => return Action::SignOut,
            KeyCode::Enter => {
                let selected = self
                    .state
                    .selected()
                    .and_then(|i| self.visible().get(i).map(|task| task.id.clone()));
                if let Some(id) = selected {
                    return Action::Navigate(Route::Task(id));
                }
            }
            _ => {}
        }
        Action::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    Title,
    Content,
}

pub struct Editor {
    pub target: EditTarget,
    pub buffer: String,
    pub mode: InputMode,
    pub saving: bool,
}

pub struct LabelSelector {
    pub labels: watch::Receiver<Option<LabelList>>,
    pub load_error: bool,
    pub search: String,
    pub state: ListState,
    /// Input of the "new label" prompt while it is open.
    pub creator: Option<String>,
}

impl LabelSelector {
    fn new(labels: watch::Receiver<Option<LabelList>>) -> LabelSelector {
        let mut state = ListState::default();
        state.select(Some(0));
        LabelSelector {
            labels,
            load_error: false,
            search: String::new(),
            state,
            creator: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.labels.borrow().is_none() && !self.load_error
    }

    /// Labels matching the search box, `None` until the list has loaded.
    pub fn displayed(&self) -> Option<Vec<TaskLabel>> {
        self.labels.borrow().as_ref().map(|list| {
            filter_labels(&list.data, &self.search)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    fn highlighted(&self) -> Option<TaskLabel> {
        let i = self.state.selected()?;
        self.displayed()?.get(i).cloned()
    }

    fn step(&mut self, forward: bool) {
        let len = self.displayed().map(|l| l.len()).unwrap_or(0);
        if len == 0 {
            self.state.select(None);
            return;
        }
        let i = self.state.selected().unwrap_or(0).min(len - 1);
        let i = if forward {
            (i + 1) % len
        } else {
            (i + len - 1) % len
        };
        self.state.select(Some(i));
    }
}

pub struct TaskDetailView {
    pub task_id: String,
    pub task: watch::Receiver<Option<TaskEntry>>,
    pub load: LoadState,
    pub status: Option<StatusSelector>,
    pub editor: Option<Editor>,
    pub label_cursor: usize,
    pub selector: Option<LabelSelector>,
}

impl TaskDetailView {
    pub fn current(&self) -> Option<TaskEntry> {
        self.task.borrow().clone()
    }

    fn attached_labels(&self) -> Vec<TaskLabel> {
        self.task
            .borrow()
            .as_ref()
            .and_then(|entry| entry.data.labels.clone())
            .unwrap_or_default()
    }

    fn open_editor(&mut self, target: EditTarget) {
        let Some(entry) = self.current() else {
            return;
        };
        let buffer = match target {
            EditTarget::Title => entry.data.title,
            EditTarget::Content => entry.data.content.unwrap_or_default(),
        };
        self.editor = Some(Editor {
            target,
            buffer,
            mode: InputMode::Editing,
            saving: false,
        });
    }

    fn submit_editor(&mut self) -> Action {
        let Some(editor) = self.editor.as_mut() else {
            return Action::None;
        };
        if editor.saving {
            return Action::None;
        }
        match editor.target {
            EditTarget::Title => {
                let title = editor.buffer.clone();
                self.editor = None;
                Action::SaveTitle(title)
            }
            EditTarget::Content => {
                editor.saving = true;
                Action::SaveContent(editor.buffer.clone())
            }
        }
    }

    fn handle_editor_key(&mut self, key: KeyEvent) -> Action {
        let Some((mode, target)) = self.editor.as_ref().map(|e| (e.mode, e.target)) else {
            return Action::None;
        };
        match (mode, key.code) {
            (InputMode::Editing, KeyCode::Char('i')) => {
                if let Some(editor) = self.editor.as_mut() {
                    editor.mode = InputMode::Insert;
                }
            }
            (InputMode::Editing, KeyCode::Enter) => return self.submit_editor(),
            (InputMode::Editing, KeyCode::Esc) => self.editor = None,
            (InputMode::Insert, KeyCode::Enter) if target == EditTarget::Title => {
                return self.submit_editor();
            }
            (InputMode::Insert, KeyCode::Enter) => {
                if let Some(editor) = self.editor.as_mut() {
                    editor.buffer.push('\n');
                }
            }
            (InputMode::Insert, KeyCode::Char(c)) => {
                if let Some(editor) = self.editor.as_mut() {
                    editor.buffer.push(c);
                }
            }
            (InputMode::Insert, KeyCode::Backspace) => {
                if let Some(editor) = self.editor.as_mut() {
                    editor.buffer.pop();
                }
            }
            (InputMode::Insert, KeyCode::Esc) => {
                if let Some(editor) = self.editor.as_mut() {
                    editor.mode = InputMode::Editing;
                }
            }
            _ => {}
        }
        Action::None
    }

    fn handle_selector_key(&mut self, key: KeyEvent) -> Action {
        let Some(selector) = self.selector.as_mut() else {
            return Action::None;
        };

        if let Some(input) = selector.creator.as_mut() {
            match key.code {
                KeyCode::Char(c) => input.push(c),
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Enter => return Action::CreateLabel(input.clone()),
                KeyCode::Esc => selector.creator = None,
                _ => {}
            }
            return Action::None;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.selector = None,
            KeyCode::Down => selector.step(true),
            KeyCode::Up => selector.step(false),
            KeyCode::Enter => {
                if let Some(label) = selector.highlighted() {
                    self.selector = None;
                    return Action::AddLabel(label);
                }
            }
            KeyCode::Char('d') if ctrl => {
                if let Some(label) = selector.highlighted() {
                    return Action::DeleteLabel(label.id);
                }
            }
            KeyCode::Char('n') if ctrl => selector.creator = Some(String::new()),
            KeyCode::Char(c) => {
                selector.search.push(c);
                selector.state.select(Some(0));
            }
            KeyCode::Backspace => {
                selector.search.pop();
                selector.state.select(Some(0));
            }
            _ => {}
        }
        Action::None
    }

    fn handle_key(&mut self, key: KeyEvent) -> Action {
        if self.selector.is_some() {
            return self.handle_selector_key(key);
        }
        if self.editor.is_some() {
            return self.handle_editor_key(key);
        }
        if self.load != LoadState::Ready {
            return match key.code {
                KeyCode::Char('q') => Action::Quit,
                KeyCode::Esc | KeyCode::Char('b') => Action::Navigate(Route::Home),
                _ => Action::None,
            };
        }

        match key.code {
            KeyCode::Char('q') => return Action::Quit,
            KeyCode::Esc | KeyCode::Char('b') => return Action::Navigate(Route::Home),
            KeyCode::Char('r') => return Action::Reload,
            KeyCode::Char('e') => self.open_editor(EditTarget::Title),
            KeyCode::Char('c') => self.open_editor(EditTarget::Content),
            KeyCode::Char('s') => {
                if let Some(selector) = self.status.as_mut() {
                    if let Some(next) = selector.choose(selector.selected().next()) {
                        return Action::ChangeStatus(next);
                    }
                }
            }
            KeyCode::Char('l') => return Action::OpenLabels,
            KeyCode::Char(']') => {
                let count = self.attached_labels().len();
                if count > 0 {
                    self.label_cursor = (self.label_cursor + 1) % count;
                }
            }
            KeyCode::Char('[') => {
                let count = self.attached_labels().len();
                if count > 0 {
                    self.label_cursor = (self.label_cursor + count - 1) % count;
                }
            }
            KeyCode::Char('x') => {
                if let Some(label) = self.attached_labels().get(self.label_cursor) {
                    return Action::RemoveLabel(label.id.clone());
                }
            }
            KeyCode::Char('D') => return Action::DeleteTask,
            _ => {}
        }
        Action::None
    }

    /// Follow the cached task: the status control tracks the server copy.
    fn sync(&mut self) {
        if !self.task.has_changed().unwrap_or(false) {
            return;
        }
        let status = self
            .task
            .borrow_and_update()
            .as_ref()
            .map(|entry| entry.data.status);
        if let Some(status) = status {
            match self.status.as_mut() {
                Some(selector) => selector.sync(status),
                None => self.status = Some(StatusSelector::new(status)),
            }
            if self.load == LoadState::Loading {
                self.load = LoadState::Ready;
            }
        }
        let count = self.attached_labels().len();
        if self.label_cursor >= count {
            self.label_cursor = count.saturating_sub(1);
        }
    }
}

pub enum Screen {
    SignIn(SignInView),
    TaskList(TaskListView),
    TaskDetail(TaskDetailView),
}

pub struct App {
    api: ApiClient,
    store: SessionStore,
    session: Option<Session>,
    task_cache: Cache<TaskEntry>,
    list_cache: Cache<TaskList>,
    label_cache: Cache<LabelList>,
    pub screen: Screen,
    screen_id: u64,
    screen_token: CancellationToken,
    shutdown: CancellationToken,
    events: mpsc::UnboundedSender<ScreenEvent>,
    pub toast: Option<Toast>,
    pub should_quit: bool,
}

impl App {
    /// Build the app and enter the home screen (or sign-in, if there is no
    /// session). Must be called inside a tokio runtime.
    pub fn new(
        api: ApiClient,
        store: SessionStore,
        session: Option<Session>,
        events: mpsc::UnboundedSender<ScreenEvent>,
        shutdown: CancellationToken,
    ) -> App {
        if let Some(token) = session.as_ref().and_then(|s| s.token.clone()) {
            api.set_token(Some(token));
        }
        let screen_token = shutdown.child_token();
        let mut app = App {
            task_cache: Cache::new(Arc::new(api.clone())),
            list_cache: Cache::new(Arc::new(api.clone())),
            label_cache: Cache::new(Arc::new(api.clone())),
            api,
            store,
            session,
            screen: Screen::SignIn(SignInView::new()),
            screen_id: 0,
            screen_token,
            shutdown,
            events,
            toast: None,
            should_quit: false,
        };
        app.navigate(Route::Home);
        app
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn route(&self) -> Route {
        match &self.screen {
            Screen::SignIn(_) => Route::SignIn,
            Screen::TaskList(_) => Route::Home,
            Screen::TaskDetail(view) => Route::Task(view.task_id.clone()),
        }
    }

    pub fn input_mode(&self) -> InputMode {
        match &self.screen {
            Screen::TaskDetail(view) => view
                .editor
                .as_ref()
                .map(|e| e.mode)
                .unwrap_or(InputMode::Normal),
            Screen::SignIn(_) => InputMode::Insert,
            Screen::TaskList(_) => InputMode::Normal,
        }
    }

    fn notify(&mut self, kind: ToastKind, message: impl Into<String>) {
        self.toast = Some(Toast {
            kind,
            message: message.into(),
            shown_at: Instant::now(),
        });
    }

    fn report(&mut self, err: &dyn std::error::Error, message: &str) {
        warn!(error = %err, "{}", message);
        self.notify(ToastKind::Error, message);
    }

    /// Switch screens, applying the auth gate. Work still running for the
    /// previous screen is cancelled.
    pub fn navigate(&mut self, route: Route) {
        let route = match protect_route(route.required_auth(), self.session.as_ref()) {
            Some(redirect) => {
                debug!(from = %route.path(), to = %redirect.path(), "redirected by auth gate");
                redirect
            }
            None => route,
        };
        info!(path = %route.path(), "entering screen");

        self.screen_token.cancel();
        self.screen_token = self.shutdown.child_token();
        self.screen_id += 1;

        self.screen = match route {
            Route::SignIn => Screen::SignIn(SignInView::new()),
            Route::Home => {
                let key = self.api.tasks_url();
                let view = TaskListView {
                    tasks: self.list_cache.subscribe(&key),
                    state: {
                        let mut state = ListState::default();
                        state.select(Some(0));
                        state
                    },
                    show_completed: false,
                    load_error: false,
                };
                let cache = self.list_cache.clone();
                self.spawn_load(async move { AppEvent::TasksLoaded(load(cache, key).await) });
                Screen::TaskList(view)
            }
            Route::Task(task_id) => {
                let key = self.api.task_url(&task_id);
                let task = self.task_cache.subscribe(&key);
                let cached = task.borrow().as_ref().map(|entry| entry.data.status);
                let view = TaskDetailView {
                    task_id,
                    task,
                    load: if cached.is_some() {
                        LoadState::Ready
                    } else {
                        LoadState::Loading
                    },
                    status: cached.map(StatusSelector::new),
                    editor: None,
                    label_cursor: 0,
                    selector: None,
                };
                let cache = self.task_cache.clone();
                self.spawn_load(async move { AppEvent::TaskLoaded(load(cache, key).await) });
                Screen::TaskDetail(view)
            }
        };
    }

    /// Loads are dropped (aborting the request) when their screen closes.
    fn spawn_load<F>(&self, work: F)
    where
        F: Future<Output = AppEvent> + Send + 'static,
    {
        let token = self.screen_token.clone();
        let events = self.events.clone();
        let screen = self.screen_id;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!(screen, "screen closed, load aborted"),
                event = work => {
                    let _ = events.send(ScreenEvent { screen, event });
                }
            }
        });
    }

    /// Writes always run to completion; only their result is dropped if the
    /// screen has closed meanwhile.
    fn spawn_write<F>(&self, work: F)
    where
        F: Future<Output = AppEvent> + Send + 'static,
    {
        let token = self.screen_token.clone();
        let events = self.events.clone();
        let screen = self.screen_id;
        tokio::spawn(async move {
            let event = work.await;
            if token.is_cancelled() {
                debug!(screen, "screen closed, dropping write result");
                return;
            }
            let _ = events.send(ScreenEvent { screen, event });
        });
    }

    fn detail_task_id(&self) -> Option<String> {
        match &self.screen {
            Screen::TaskDetail(view) => Some(view.task_id.clone()),
            _ => None,
        }
    }

    fn sign_out(&mut self) {
        if let Err(err) = session::sign_out(&self.api, &self.store) {
            self.report(&err, "Signed out, but the saved session could not be removed.");
        }
        self.session = None;
        self.task_cache = Cache::new(Arc::new(self.api.clone()));
        self.list_cache = Cache::new(Arc::new(self.api.clone()));
        self.label_cache = Cache::new(Arc::new(self.api.clone()));
        self.navigate(Route::SignIn);
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }
        let action = match &mut self.screen {
            Screen::SignIn(view) => view.handle_key(key),
            Screen::TaskList(view) => view.handle_key(key),
            Screen::TaskDetail(view) => view.handle_key(key),
        };
        self.perform(action);
    }

    fn perform(&mut self, action: Action) {
        let api = self.api.clone();
        match action {
            Action::None => {}
            Action::Quit => self.should_quit = true,
            Action::Navigate(route) => self.navigate(route),
            Action::SignIn { email, password } => self.spawn_write(async move {
                AppEvent::SignedIn(session::sign_in(&api, &email, &password).await)
            }),
            Action::SignOut => self.sign_out(),
            Action::Reload => match self.detail_task_id() {
                Some(task_id) => {
                    let cache = self.task_cache.clone();
                    self.spawn_load(async move {
                        let key = api.task_url(&task_id);
                        AppEvent::TaskLoaded(cache.invalidate(&key).await.map(|_| ()))
                    });
                }
                None => {
                    let cache = self.list_cache.clone();
                    self.spawn_load(async move {
                        AppEvent::TasksLoaded(cache.invalidate(&api.tasks_url()).await.map(|_| ()))
                    });
                }
            },
            Action::SaveTitle(title) => {
                if let Some(task_id) = self.detail_task_id() {
                    let cache = self.task_cache.clone();
                    self.spawn_write(async move {
                        AppEvent::TitleSaved(tasks::update_title(&api, &cache, &task_id, &title).await)
                    });
                }
            }
            Action::SaveContent(content) => {
                if let Some(task_id) = self.detail_task_id() {
                    let cache = self.task_cache.clone();
                    self.spawn_write(async move {
                        AppEvent::ContentSaved(
                            tasks::save_content(&api, &cache, &task_id, &content).await,
                        )
                    });
                }
            }
            Action::ChangeStatus(status) => {
                if let Some(task_id) = self.detail_task_id() {
                    let cache = self.task_cache.clone();
                    self.spawn_write(async move {
                        AppEvent::StatusSaved(
                            tasks::change_status(&api, &cache, &task_id, status).await,
                        )
                    });
                }
            }
            Action::OpenLabels => {
                let key = api.labels_url();
                let labels = self.label_cache.subscribe(&key);
                if let Screen::TaskDetail(view) = &mut self.screen {
                    view.selector = Some(LabelSelector::new(labels));
                    let cache = self.label_cache.clone();
                    self.spawn_load(async move { AppEvent::LabelsLoaded(load(cache, key).await) });
                }
            }
            Action::AddLabel(label) => {
                if let Some(task_id) = self.detail_task_id() {
                    let cache = self.task_cache.clone();
                    self.spawn_write(async move {
                        AppEvent::LabelAdded(tasks::add_label(&api, &cache, &task_id, label).await)
                    });
                }
            }
            Action::RemoveLabel(label_id) => {
                if let Some(task_id) = self.detail_task_id() {
                    let cache = self.task_cache.clone();
                    self.spawn_write(async move {
                        AppEvent::LabelRemoved(
                            tasks::remove_label(&api, &cache, &task_id, &label_id).await,
                        )
                    });
                }
            }
            Action::CreateLabel(input) => {
                let cache = self.label_cache.clone();
                self.spawn_write(async move {
                    AppEvent::LabelCreated(labels::create_label(&api, &cache, &input).await)
                });
            }
            Action::DeleteLabel(label_id) => {
                let cache = self.label_cache.clone();
                self.spawn_write(async move {
                    AppEvent::LabelDeleted(labels::delete_label(&api, &cache, &label_id).await)
                });
            }
            Action::DeleteTask => {
                if let Some(task_id) = self.detail_task_id() {
                    let cache = self.task_cache.clone();
                    let list = self.list_cache.clone();
                    self.spawn_write(async move {
                        AppEvent::TaskDeleted(tasks::delete_task(&api, &cache, &list, &task_id).await)
                    });
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: ScreenEvent) {
        if event.screen != self.screen_id {
            debug!(screen = event.screen, "ignoring event for a closed screen");
            return;
        }

        match event.event {
            AppEvent::TasksLoaded(result) => {
                if let Screen::TaskList(view) = &mut self.screen {
                    view.load_error = result.is_err();
                }
                if let Err(err) = result {
                    // A session restored from disk has no token until the next sign-in.
                    let message = if self.api.has_token() {
                        "Error fetching tasks, try again in a moment."
                    } else {
                        "Error fetching tasks, your session may have expired: press x to sign in again."
                    };
                    self.report(&err, message);
                }
            }
            AppEvent::TaskLoaded(result) => {
                if let Screen::TaskDetail(view) = &mut self.screen {
                    match result {
                        Ok(()) => {
                            view.load = LoadState::Ready;
                            view.sync();
                        }
                        Err(err) => {
                            warn!(task_id = %view.task_id, error = %err, "task could not be loaded");
                            view.load = LoadState::NotFound;
                        }
                    }
                }
            }
            AppEvent::LabelsLoaded(result) => {
                if let Screen::TaskDetail(view) = &mut self.screen {
                    if let Some(selector) = view.selector.as_mut() {
                        selector.load_error = result.is_err();
                    }
                }
                if let Err(err) = result {
                    warn!(error = %err, "label list could not be loaded");
                }
            }
            AppEvent::SignedIn(result) => match result {
                Ok(session) => {
                    if let Err(err) = self.store.save(&session) {
                        warn!(error = %err, "session could not be saved, it will not survive a restart");
                    }
                    self.session = Some(session);
                    self.navigate(Route::Home);
                }
                Err(err) => {
                    if let Screen::SignIn(view) = &mut self.screen {
                        view.submitting = false;
                    }
                    self.report(&err, "Cannot log in, check your credentials and try again.");
                }
            },
            AppEvent::TitleSaved(result) => {
                if let Err(err) = result {
                    self.report(&err, "Failed updating task title.");
                }
            }
            AppEvent::StatusSaved(result) => {
                if let Screen::TaskDetail(view) = &mut self.screen {
                    if let Some(selector) = view.status.as_mut() {
                        match &result {
                            Ok(()) => selector.confirm(),
                            Err(_) => selector.revert(),
                        }
                    }
                }
                if let Err(err) = result {
                    self.report(&err, "Cannot update task's status, try again in a few minutes.");
                }
            }
            AppEvent::ContentSaved(result) => {
                if let Screen::TaskDetail(view) = &mut self.screen {
                    match &result {
                        Ok(()) => view.editor = None,
                        Err(_) => {
                            if let Some(editor) = view.editor.as_mut() {
                                editor.saving = false;
                            }
                        }
                    }
                }
                match result {
                    Ok(()) => self.notify(ToastKind::Success, "Success updating task content."),
                    Err(err) => self.report(&err, "Failed updating task content."),
                }
            }
            AppEvent::LabelAdded(result) => match result {
                Ok(true) => self.notify(ToastKind::Success, "Added new label."),
                Ok(false) => self.notify(ToastKind::Success, "Label is already on this task."),
                Err(err) => {
                    self.report(&err, "Failed updating task's label, try again in a moment.")
                }
            },
            AppEvent::LabelRemoved(result) => match result {
                Ok(()) => self.notify(ToastKind::Success, "Success removing label."),
                Err(err) => self.report(&err, "Failed removing label, try again in a moment."),
            },
            AppEvent::LabelCreated(result) => match result {
                Ok(label) => {
                    if let Screen::TaskDetail(view) = &mut self.screen {
                        if let Some(selector) = view.selector.as_mut() {
                            selector.creator = None;
                        }
                    }
                    self.notify(ToastKind::Success, format!("Created label {}.", label.title));
                }
                Err(LabelError::EmptyTitle) => {
                    self.notify(ToastKind::Error, "Label title cannot be empty.")
                }
                Err(err) => self.report(&err, "Failed creating label, try again in a moment."),
            },
            AppEvent::LabelDeleted(result) => match result {
                Ok(()) => self.notify(ToastKind::Success, "Success deleting label."),
                Err(err) => self.report(&err, "Failed deleting label, try again in a moment."),
            },
            AppEvent::TaskDeleted(result) => match result {
                Ok(()) => {
                    self.notify(ToastKind::Success, "Success deleting task.");
                    self.navigate(Route::Home);
                }
                Err(err) => self.report(&err, "Failed deleting task, try again in a moment."),
            },
        }
    }

    /// Per-frame housekeeping.
    pub fn tick(&mut self) {
        if let Some(toast) = &self.toast {
            if toast.shown_at.elapsed() >= TOAST_TTL {
                self.toast = None;
            }
        }
        if let Screen::TaskDetail(view) = &mut self.screen {
            view.sync();
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{envelope, task_json};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        app: App,
        events: mpsc::UnboundedReceiver<ScreenEvent>,
        _dir: TempDir,
        store: SessionStore,
    }

    impl Harness {
        fn new(server: &MockServer, session: Option<Session>) -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let store = SessionStore::new(dir.path().join("session.toml"));
            let api = ApiClient::new(&server.uri()).unwrap();
            let (tx, rx) = mpsc::unbounded_channel();
            let app = App::new(api, store.clone(), session, tx, CancellationToken::new());
            Harness {
                app,
                events: rx,
                _dir: dir,
                store,
            }
        }

        /// Deliver the next background result to the app.
        async fn pump(&mut self) {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for an app event")
                .expect("event channel closed");
            self.app.handle_event(event);
        }

        fn press(&mut self, code: KeyCode) {
            self.app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
        }

        fn type_text(&mut self, text: &str) {
            for c in text.chars() {
                self.press(KeyCode::Char(c));
            }
        }
    }

    fn signed_in() -> Option<Session> {
        Some(Session {
            user_id: "u1".to_string(),
            token: Some("tok".to_string()),
        })
    }

    async fn mount_task(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(task_json("t1", "A"))))
            .mount(server)
            .await;
    }

    async fn mount_task_list(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(envelope(json!([task_json("t1", "A")]))),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_anonymous_start_lands_on_sign_in() {
        let server = MockServer::start().await;
        let harness = Harness::new(&server, None);
        assert_eq!(harness.app.route(), Route::SignIn);
    }

    #[tokio::test]
    async fn test_signed_in_user_cannot_open_sign_in() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        let mut harness = Harness::new(&server, signed_in());
        assert_eq!(harness.app.route(), Route::Home);

        harness.app.navigate(Route::SignIn);
        assert_eq!(harness.app.route(), Route::Home);
    }

    #[tokio::test]
    async fn test_valid_sign_in_stores_user_and_goes_home() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/sign-in"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {},
                "data": {"user_id": "u9", "token": "tok", "email": "me@x.io"}
            })))
            .mount(&server)
            .await;
        mount_task_list(&server).await;

        let mut harness = Harness::new(&server, None);
        harness.press(KeyCode::Enter);
        assert!(harness.events.try_recv().is_err(), "empty form must not submit");

        harness.type_text("me@x.io");
        harness.press(KeyCode::Tab);
        harness.type_text("pw");
        harness.press(KeyCode::Enter);
        harness.pump().await;

        assert_eq!(harness.app.route(), Route::Home);
        assert_eq!(harness.app.session().unwrap().user_id, "u9");
        assert_eq!(harness.store.load().unwrap().unwrap().user_id, "u9");
    }

    #[tokio::test]
    async fn test_invalid_sign_in_shows_error_and_stays() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/sign-in"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, None);
        harness.type_text("me@x.io");
        harness.press(KeyCode::Tab);
        harness.type_text("bad");
        harness.press(KeyCode::Enter);
        harness.pump().await;

        assert_eq!(harness.app.route(), Route::SignIn);
        assert!(harness.app.session().is_none());
        let toast = harness.app.toast.as_ref().unwrap();
        assert_eq!(toast.kind, ToastKind::Error);
        assert_eq!(
            toast.message,
            "Cannot log in, check your credentials and try again."
        );
        match &harness.app.screen {
            Screen::SignIn(view) => assert!(!view.submitting),
            _ => panic!("expected sign-in screen"),
        }
    }

    #[tokio::test]
    async fn test_failed_status_change_restores_selector() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        mount_task(&server).await;
        Mock::given(method("PUT"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        harness.pump().await; // task list
        harness.app.navigate(Route::Task("t1".to_string()));
        harness.pump().await; // task detail

        harness.press(KeyCode::Char('s'));
        let selected = |app: &App| match &app.screen {
            Screen::TaskDetail(view) => view.status.unwrap().selected(),
            _ => panic!("expected task detail"),
        };
        assert_eq!(selected(&harness.app), TaskStatus::InProgress);

        harness.pump().await;
        assert_eq!(selected(&harness.app), TaskStatus::Open);
        assert_eq!(harness.app.toast.as_ref().unwrap().kind, ToastKind::Error);
    }

    #[tokio::test]
    async fn test_missing_task_shows_not_found() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        Mock::given(method("GET"))
            .and(path("/tasks/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        harness.pump().await;
        harness.app.navigate(Route::Task("nope".to_string()));
        harness.pump().await;

        match &harness.app.screen {
            Screen::TaskDetail(view) => assert_eq!(view.load, LoadState::NotFound),
            _ => panic!("expected task detail"),
        }
    }

    #[tokio::test]
    async fn test_leaving_a_screen_cancels_its_load() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(envelope(task_json("t1", "A")))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        harness.pump().await;
        harness.app.navigate(Route::Task("t1".to_string()));
        harness.app.navigate(Route::Home);
        harness.pump().await; // the new list load

        let late = tokio::time::timeout(Duration::from_millis(600), harness.events.recv()).await;
        assert!(late.is_err(), "cancelled load must not report back");
        assert_eq!(harness.app.route(), Route::Home);
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;

        let mut harness = Harness::new(&server, signed_in());
        harness
            .store
            .save(harness.app.session().unwrap())
            .unwrap();
        harness.press(KeyCode::Char('x'));

        assert_eq!(harness.app.route(), Route::SignIn);
        assert!(harness.app.session().is_none());
        assert_eq!(harness.store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_label_selector_filters_as_you_type() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        mount_task(&server).await;
        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
                {"id": "1", "title": "Work", "color": "#ff0000"},
                {"id": "2", "title": "Home", "color": "#00ff00"}
            ]))))
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        harness.pump().await;
        harness.app.navigate(Route::Task("t1".to_string()));
        harness.pump().await;
        harness.press(KeyCode::Char('l'));
        harness.pump().await;
        harness.type_text("HO");

        match &harness.app.screen {
            Screen::TaskDetail(view) => {
                let shown = view.selector.as_ref().unwrap().displayed().unwrap();
                assert_eq!(shown.len(), 1);
                assert_eq!(shown[0].title, "Home");
            }
            _ => panic!("expected task detail"),
        }
    }

    fn detail(app: &App) -> &TaskDetailView {
        match &app.screen {
            Screen::TaskDetail(view) => view,
            _ => panic!("expected task detail"),
        }
    }

    async fn open_task(harness: &mut Harness) {
        harness.pump().await; // task list
        harness.app.navigate(Route::Task("t1".to_string()));
        harness.pump().await; // task detail
    }

    fn toast_of(app: &App) -> (ToastKind, String) {
        let toast = app.toast.as_ref().expect("a toast is shown");
        (toast.kind, toast.message.clone())
    }

    #[tokio::test]
    async fn test_deleted_task_returns_home_with_toast() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        mount_task(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        open_task(&mut harness).await;
        harness.press(KeyCode::Char('D'));
        harness.pump().await;

        assert_eq!(harness.app.route(), Route::Home);
        assert_eq!(
            toast_of(&harness.app),
            (ToastKind::Success, "Success deleting task.".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_delete_stays_on_task() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        mount_task(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        open_task(&mut harness).await;
        harness.press(KeyCode::Char('D'));
        harness.pump().await;

        assert_eq!(harness.app.route(), Route::Task("t1".to_string()));
        assert_eq!(
            toast_of(&harness.app),
            (
                ToastKind::Error,
                "Failed deleting task, try again in a moment.".to_string()
            )
        );
    }

    fn edit_content(harness: &mut Harness, text: &str) {
        harness.press(KeyCode::Char('c'));
        harness.press(KeyCode::Char('i'));
        harness.type_text(text);
        harness.press(KeyCode::Esc);
        harness.press(KeyCode::Enter);
    }

    #[tokio::test]
    async fn test_saved_content_closes_editor() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        mount_task(&server).await;
        Mock::given(method("PUT"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(task_json("t1", "A"))))
            .expect(1)
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        open_task(&mut harness).await;
        edit_content(&mut harness, " more");
        assert!(detail(&harness.app).editor.as_ref().unwrap().saving);
        harness.pump().await;

        assert!(detail(&harness.app).editor.is_none());
        assert_eq!(
            toast_of(&harness.app),
            (ToastKind::Success, "Success updating task content.".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_content_save_keeps_editor_open() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        mount_task(&server).await;
        Mock::given(method("PUT"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        open_task(&mut harness).await;
        edit_content(&mut harness, " more");
        harness.pump().await;

        let editor = detail(&harness.app).editor.as_ref().unwrap();
        assert!(!editor.saving);
        assert_eq!(editor.buffer, "notes more");
        assert_eq!(
            toast_of(&harness.app),
            (ToastKind::Error, "Failed updating task content.".to_string())
        );
    }

    #[tokio::test]
    async fn test_attaching_label_shows_toast() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        mount_task(&server).await;
        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
                {"id": "1", "title": "Work", "color": "#ff0000"}
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(task_json("t1", "A"))))
            .expect(1)
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        open_task(&mut harness).await;
        harness.press(KeyCode::Char('l'));
        harness.pump().await;
        harness.press(KeyCode::Enter);
        assert!(detail(&harness.app).selector.is_none());
        harness.pump().await;

        assert_eq!(
            toast_of(&harness.app),
            (ToastKind::Success, "Added new label.".to_string())
        );
    }

    #[tokio::test]
    async fn test_removing_label_shows_toast() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;
        let mut labelled = task_json("t1", "A");
        labelled["labels"] = json!([{"id": "1", "title": "Work", "color": "#ff0000"}]);
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(labelled)))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/tasks/t1"))
            .and(body_json(json!({"labels": []})))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(task_json("t1", "A"))))
            .expect(1)
            .mount(&server)
            .await;

        let mut harness = Harness::new(&server, signed_in());
        open_task(&mut harness).await;
        harness.press(KeyCode::Char('x'));
        harness.pump().await;

        assert_eq!(
            toast_of(&harness.app),
            (ToastKind::Success, "Success removing label.".to_string())
        );
    }

    #[tokio::test]
    async fn test_tokenless_session_hints_at_signing_in_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let restored = Some(Session {
            user_id: "u1".to_string(),
            token: None,
        });
        let mut harness = Harness::new(&server, restored);
        harness.pump().await;

        let (kind, message) = toast_of(&harness.app);
        assert_eq!(kind, ToastKind::Error);
        assert!(message.contains("press x to sign in again"));
    }
}
