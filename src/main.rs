use std::sync::Arc;

use anyhow::{Context, Result};

mod app;
mod backend;
mod config;
mod handler;
mod session;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

/// Diagnostics go to a file; the terminal belongs to ratatui.
fn init_logging() -> Result<()> {
    let dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("kbchat");
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::File::create(dir.join("kbchat.log"))?;

    tracing_subscriber::fmt()
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Best effort: a missing config dir shouldn't stop the app
    if let Err(e) = init_logging() {
        eprintln!("warning: logging disabled: {e:#}");
    }

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = EventHandler::new();
    let mut app = App::new(events.sender());

    // Fetch the session list up front
    handler::bootstrap(&mut app);

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(&mut app, event)?;
        }
    }

    tui::restore()?;
    Ok(())
}
