use crate::app::{
    App, EditTarget, Editor, InputMode, LabelSelector, LoadState, Screen, ScreenEvent,
    SignInField, SignInView, TaskDetailView, TaskListView, ToastKind,
};
use crate::labels::label_colors;
use crate::models::{TaskLabel, TaskStatus};
use crate::tasks::describe_reminder;
use crossterm::event::{self, Event as CEvent, KeyEventKind};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;

fn centered_rect_absolute(width: u16, height: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length((r.height.saturating_sub(height)) / 2),
                Constraint::Length(height),
                Constraint::Length((r.height.saturating_sub(height) + 1) / 2),
            ]
            .as_ref(),
        )
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Length((r.width.saturating_sub(width)) / 2),
                Constraint::Length(width),
                Constraint::Length((r.width.saturating_sub(width) + 1) / 2),
            ]
            .as_ref(),
        )
        .split(popup_layout[1])[1]
}

/// `percent` of `total` columns, in u32 to avoid overflow.
fn percent_of(total: u16, percent: u32) -> u16 {
    (total as u32 * percent / 100) as u16
}

fn calculate_wrapped_lines(text: &str, max_width: u16) -> usize {
    let max_width = max_width.max(1) as usize;
    text.split('\n')
        .map(|line| line.chars().count().max(1).div_ceil(max_width))
        .sum()
}

fn legend_line(keys: &[(&'static str, &'static str)]) -> Line<'static> {
    let mut spans = Vec::with_capacity(keys.len() * 2);
    for (key, action) in keys {
        spans.push(Span::styled(
            format!(" {} ", key),
            Style::default().fg(Color::Red),
        ));
        spans.push(Span::raw(format!(": {} ", action)));
    }
    Line::from(spans)
}

fn get_legend(app: &App) -> Line<'static> {
    match &app.screen {
        Screen::SignIn(_) => legend_line(&[
            ("Tab", "Switch Field"),
            ("Enter", "Sign In"),
            ("Esc", "Quit"),
        ]),
        Screen::TaskList(_) => legend_line(&[
            ("q", "Quit"),
            ("j", "Down"),
            ("k", "Up"),
            ("t", "Toggle Completed"),
            ("Enter", "View Details"),
            ("r", "Refresh"),
            ("x", "Sign Out"),
        ]),
        Screen::TaskDetail(view) if view.selector.as_ref().is_some_and(|s| s.creator.is_some()) => {
            legend_line(&[("Enter", "Create"), ("Esc", "Cancel")])
        }
        Screen::TaskDetail(view) if view.selector.is_some() => legend_line(&[
            ("Up/Down", "Move"),
            ("Enter", "Attach"),
            ("Ctrl-n", "New Label"),
            ("Ctrl-d", "Delete Label"),
            ("Esc", "Close"),
        ]),
        Screen::TaskDetail(_) => match app.input_mode() {
            InputMode::Normal => legend_line(&[
                ("Esc", "Back"),
                ("e", "Edit Title"),
                ("c", "Edit Content"),
                ("s", "Next Status"),
                ("l", "Labels"),
                ("[ ]", "Pick Label"),
                ("x", "Remove Label"),
                ("D", "Delete Task"),
            ]),
            InputMode::Editing => legend_line(&[
                ("i", "Insert"),
                ("Enter", "Submit"),
                ("Esc", "Cancel"),
            ]),
            InputMode::Insert => legend_line(&[("Esc", "Stop Typing")]),
        },
    }
}

fn toast_line(app: &App) -> Line<'static> {
    match &app.toast {
        Some(toast) => {
            let color = match toast.kind {
                ToastKind::Success => Color::Green,
                ToastKind::Error => Color::Red,
            };
            Line::from(Span::styled(
                format!(" {}", toast.message),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ))
        }
        None => {
            let who = app
                .session()
                .map(|s| format!(" {} ", s.user_id))
                .unwrap_or_default();
            Line::from(Span::styled(
                format!("{} {}", who, app.route().path()),
                Style::default().fg(Color::DarkGray),
            ))
        }
    }
}

fn label_chips(labels: &[TaskLabel], cursor: Option<usize>) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" "));
        }
        let (bg, fg) = label_colors(&label.color);
        let mut style = Style::default().bg(bg).fg(fg);
        if cursor == Some(i) {
            style = style.add_modifier(Modifier::BOLD | Modifier::UNDERLINED);
        }
        spans.push(Span::styled(format!(" {} ", label.title), style));
    }
    Line::from(spans)
}

fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::Open => Style::default().fg(Color::Cyan),
        TaskStatus::InProgress => Style::default().fg(Color::Yellow),
        TaskStatus::Completed => Style::default().fg(Color::Green),
    }
}

pub fn draw(f: &mut Frame, app: &mut App) {
    let size = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(0)
        .constraints([Constraint::Min(0), Constraint::Length(2)].as_ref())
        .split(size);

    let body_chunk = chunks[0];
    let footer_chunk = chunks[1];

    let footer = Text::from(vec![toast_line(app), get_legend(app)]);

    match &mut app.screen {
        Screen::SignIn(view) => draw_sign_in(f, view, body_chunk),
        Screen::TaskList(view) => draw_task_list(f, view, body_chunk),
        Screen::TaskDetail(view) => draw_task_detail(f, view, body_chunk),
    }

    let legend = Paragraph::new(footer)
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Left);
    f.render_widget(legend, footer_chunk);
}

fn draw_sign_in(f: &mut Frame, view: &SignInView, area: Rect) {
    let popup_area = centered_rect_absolute(50, 11, area);
    let block = Block::default().title("Sign In").borders(Borders::ALL);
    let inner = block.inner(popup_area);
    f.render_widget(Clear, popup_area);
    f.render_widget(block, popup_area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(inner);

    let field = |title: &'static str, value: String, focused: bool| {
        let border = if focused {
            Style::default().fg(Color::Green)
        } else {
            Style::default()
        };
        Paragraph::new(value).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(border),
        )
    };

    f.render_widget(
        field("Email", view.email.clone(), view.focus == SignInField::Email),
        rows[0],
    );
    f.render_widget(
        field(
            "Password",
            "*".repeat(view.password.chars().count()),
            view.focus == SignInField::Password,
        ),
        rows[1],
    );

    let button = if view.submitting {
        Span::styled("Signing in...", Style::default().fg(Color::Yellow))
    } else if view.can_submit() {
        Span::styled(
            "[ Sign in ]",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled("[ Sign in ]", Style::default().fg(Color::DarkGray))
    };
    f.render_widget(
        Paragraph::new(Line::from(button)).alignment(Alignment::Center),
        rows[2],
    );
}

fn draw_task_list(f: &mut Frame, view: &mut TaskListView, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)].as_ref())
        .split(area);

    let task_title = if view.show_completed {
        "Tasks (All)"
    } else {
        "Tasks (Open)"
    };
    let tasks = view.visible();

    let tasks_widget = if !tasks.is_empty() {
        let items: Vec<ListItem> = tasks
            .iter()
            .map(|task| {
                let content = match task.status {
                    TaskStatus::Open => vec![Span::raw(task.title.clone())],
                    status => vec![
                        Span::styled(format!("{} ", status), status_style(status)),
                        Span::raw(task.title.clone()),
                    ],
                };
                ListItem::new(Line::from(content))
            })
            .collect();

        List::new(items)
            .block(Block::default().borders(Borders::ALL).title(task_title))
            .highlight_style(
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol(">> ")
    } else {
        let placeholder = if view.is_loading() {
            "Loading..."
        } else if view.load_error {
            "Error fetching tasks, press r to retry"
        } else {
            "No tasks available"
        };
        List::new(vec![ListItem::new(placeholder)])
            .block(Block::default().borders(Borders::ALL).title(task_title))
    };

    f.render_stateful_widget(tasks_widget, chunks[0], &mut view.state);

    let preview_block = Block::default().borders(Borders::ALL).title("Preview");
    let selected = view.state.selected().and_then(|i| tasks.get(i));
    let lines: Vec<Line<'static>> = match selected {
        Some(task) => {
            let mut lines = vec![Line::from(vec![
                Span::styled("Status: ", Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(task.status.to_string(), status_style(task.status)),
            ])];
            if let Some(labels) = task.labels.as_ref().filter(|l| !l.is_empty()) {
                lines.push(label_chips(labels, None));
            }
            lines.push(Line::default());
            match task.content.as_deref().filter(|c| !c.trim().is_empty()) {
                Some(content) => lines.extend(content.lines().map(|l| Line::from(l.to_string()))),
                None => lines.push(Line::from("No content")),
            }
            lines
        }
        None => vec![Line::from("Select a task to preview it")],
    };
    f.render_widget(
        Paragraph::new(lines)
            .block(preview_block)
            .wrap(Wrap { trim: true }),
        chunks[1],
    );
}

fn draw_task_detail(f: &mut Frame, view: &mut TaskDetailView, area: Rect) {
    let message = match view.load {
        LoadState::Loading => Some("Loading...".to_string()),
        LoadState::NotFound => Some(format!("Task with ID {} cannot be found.", view.task_id)),
        LoadState::Ready => None,
    };
    let entry = view.current();
    let task = match (message, entry) {
        (None, Some(entry)) => entry.data,
        (message, _) => {
            let text = message.unwrap_or_else(|| "Loading...".to_string());
            f.render_widget(
                Paragraph::new(text)
                    .alignment(Alignment::Center)
                    .block(Block::default().borders(Borders::ALL).title("Task")),
                area,
            );
            return;
        }
    };

    let labels = task.labels.clone().unwrap_or_default();
    let reminders = task.reminders.clone().unwrap_or_default();
    let reminder_height = (reminders.len().max(1) as u16) + 2;

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(reminder_height),
        ])
        .split(area);

    let status = view.status.map(|s| s.selected()).unwrap_or(task.status);
    let mut status_spans = vec![
        Span::styled("Status: ", Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(format!("[ {} ]", status), status_style(status)),
    ];
    if view.status.is_some_and(|s| s.is_pending()) {
        status_spans.push(Span::styled(" saving...", Style::default().fg(Color::DarkGray)));
    }
    let header = vec![
        Line::from(Span::styled(
            task.title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(status_spans),
    ];
    f.render_widget(
        Paragraph::new(header)
            .block(Block::default().borders(Borders::ALL).title("Task"))
            .wrap(Wrap { trim: true }),
        rows[0],
    );

    let label_line = if labels.is_empty() {
        Line::from("No labels")
    } else {
        label_chips(&labels, Some(view.label_cursor))
    };
    f.render_widget(
        Paragraph::new(label_line).block(Block::default().borders(Borders::ALL).title("Labels")),
        rows[1],
    );

    let content = match task.content.as_deref() {
        Some(content) if !content.trim().is_empty() => Text::from(content.to_string()),
        _ => Text::from("No content"),
    };
    f.render_widget(
        Paragraph::new(content)
            .block(Block::default().borders(Borders::ALL).title("Content"))
            .wrap(Wrap { trim: false }),
        rows[2],
    );

    let reminder_lines: Vec<Line<'static>> = if reminders.is_empty() {
        vec![Line::from("No reminders")]
    } else {
        reminders
            .iter()
            .map(|reminder| {
                let shown = describe_reminder(reminder);
                Line::from(vec![
                    Span::styled(shown.date, Style::default().add_modifier(Modifier::BOLD)),
                    Span::raw(" "),
                    Span::raw(shown.time),
                    Span::styled(
                        format!("  ({})", shown.repeat),
                        Style::default().fg(Color::DarkGray),
                    ),
                ])
            })
            .collect()
    };
    f.render_widget(
        Paragraph::new(reminder_lines)
            .block(Block::default().borders(Borders::ALL).title("Reminders")),
        rows[3],
    );

    if let Some(editor) = view.editor.as_ref() {
        draw_editor(f, editor, area);
    }
    if let Some(selector) = view.selector.as_mut() {
        draw_label_selector(f, selector, area);
    }
}

fn draw_editor(f: &mut Frame, editor: &Editor, area: Rect) {
    let popup_width = percent_of(area.width, 60).saturating_sub(2);
    let lines_required = calculate_wrapped_lines(&editor.buffer, popup_width);
    let min_required_height = match editor.target {
        EditTarget::Title => 1,
        EditTarget::Content => 6,
    };
    let required_height = std::cmp::max(lines_required as u16, min_required_height);
    let popup_height = std::cmp::min(required_height + 2, area.height.saturating_sub(2));
    let popup_area = centered_rect_absolute(popup_width + 2, popup_height, area);

    let name = match editor.target {
        EditTarget::Title => "Edit Title",
        EditTarget::Content => "Edit Content",
    };
    let title = if editor.saving {
        format!("{} (saving...)", name)
    } else {
        match editor.mode {
            InputMode::Insert => format!("{} (typing)", name),
            _ => format!("{} (i to type, Enter to submit)", name),
        }
    };
    let border = match editor.mode {
        InputMode::Insert => Color::Yellow,
        _ => Color::Green,
    };

    let popup_block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .style(Style::default().fg(border));

    let input = Paragraph::new(editor.buffer.as_str())
        .style(Style::default().fg(Color::White))
        .block(popup_block)
        .wrap(Wrap { trim: false });

    f.render_widget(Clear, popup_area);
    f.render_widget(input, popup_area);
}

fn draw_label_selector(f: &mut Frame, selector: &mut LabelSelector, area: Rect) {
    let popup_area = centered_rect_absolute(50, 18, area);
    let block = Block::default()
        .title("Labels")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Green));
    let inner = block.inner(popup_area);
    f.render_widget(Clear, popup_area);
    f.render_widget(block, popup_area);

    let creator_height = if selector.creator.is_some() { 3 } else { 0 };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(creator_height),
        ])
        .split(inner);

    f.render_widget(
        Paragraph::new(selector.search.clone())
            .style(Style::default().fg(Color::White))
            .block(Block::default().title("Search").borders(Borders::ALL)),
        rows[0],
    );

    match selector.displayed() {
        Some(labels) if !labels.is_empty() => {
            let items: Vec<ListItem> = labels
                .iter()
                .map(|label| {
                    let (bg, fg) = label_colors(&label.color);
                    ListItem::new(Line::from(Span::styled(
                        format!(" {} ", label.title),
                        Style::default().bg(bg).fg(fg),
                    )))
                })
                .collect();
            let list = List::new(items)
                .highlight_style(Style::default().add_modifier(Modifier::BOLD))
                .highlight_symbol(">> ");
            f.render_stateful_widget(list, rows[1], &mut selector.state);
        }
        shown => {
            let placeholder = if selector.load_error {
                "Error fetching labels, try again in a moment."
            } else if shown.is_none() {
                "Loading..."
            } else {
                "No labels found"
            };
            f.render_widget(
                Paragraph::new(placeholder).style(Style::default().fg(Color::White)),
                rows[1],
            );
        }
    }

    if let Some(input) = selector.creator.as_ref() {
        f.render_widget(
            Paragraph::new(input.clone())
                .style(Style::default().fg(Color::White))
                .block(
                    Block::default()
                        .title("New label (Title #rrggbb)")
                        .borders(Borders::ALL),
                ),
            rows[2],
        );
    }
}

/// Drive the UI until the user quits: apply finished background work, draw,
/// then wait briefly for a key.
pub fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    mut events: mpsc::UnboundedReceiver<ScreenEvent>,
) -> io::Result<()> {
    loop {
        while let Ok(event) = events.try_recv() {
            app.handle_event(event);
        }
        app.tick();

        terminal.draw(|f| draw(f, &mut app))?;

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key);
                }
            }
        }

        if app.should_quit {
            app.shutdown();
            return Ok(());
        }
    }
}
