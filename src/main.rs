use anyhow::Result;

mod app;
mod config;
mod error;
mod gemini;
mod handler;
mod logging;
mod markdown;
mod preview;
mod render;
mod reply;
mod transcript;
mod tui;
mod ui;
mod voice;

use app::App;
use config::Config;
use tui::EventHandler;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let _log_guard = logging::configure_logging(&config)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting gemchat");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let result = run(&mut terminal, config).await;

    tui::restore()?;
    if let Err(e) = &result {
        tracing::error!("exiting with error: {e:#}");
    }
    result
}

async fn run(terminal: &mut tui::Tui, config: Config) -> Result<()> {
    let mut events = EventHandler::new();
    let mut app = App::new(config, events.sender());

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(&mut app, event).await?;
    }

    app.tts.cancel();
    Ok(())
}
