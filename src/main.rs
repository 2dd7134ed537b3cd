mod api;
mod app;
mod cache;
mod config;
mod error;
mod labels;
mod logging;
mod models;
mod parser;
mod route;
mod session;
mod tasks;
#[cfg(test)]
mod test_support;
mod ui;

use crate::api::ApiClient;
use crate::app::App;
use crate::config::Config;
use crate::session::SessionStore;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use dotenv::dotenv;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::load()?;
    let _log_guard = logging::init_logging(&config.log_dir, &config.log_level);
    info!(api_url = %config.api_url, "starting");

    let api = ApiClient::new(&config.api_url)?;
    let store = SessionStore::new(config.session_file.clone());
    info!(session_file = %store.path().display(), "loading session");
    let session = match store.load() {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "ignoring unreadable session file");
            None
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let app = App::new(api, store, session, tx, shutdown.clone());

    // Setup terminal UI
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    terminal.hide_cursor()?;

    let res = ui::run_app(&mut terminal, app, rx);
    shutdown.cancel();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        error!(error = %err, "terminal error");
        eprintln!("Error: {:?}", err);
    }
    info!("bye");

    Ok(())
}
