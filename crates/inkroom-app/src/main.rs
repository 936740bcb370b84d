//! Main application entry point.

mod app;
mod commands;

fn main() {
    env_logger::init();
    log::info!("Starting Inkroom");

    let room = std::env::args().nth(1);
    if let Err(e) = app::App::from_env().and_then(|app| app.run(room.as_deref())) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
