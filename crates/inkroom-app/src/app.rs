//! Console application state and the main poll loop.

use inkroom_core::session::Submitted;
use inkroom_core::{
    ApiError, ClientConfig, NativeWebSocket, PixelSurface, SessionError, Surface, SurfaceError,
    ThreadedDispatcher, Whiteboard, WhiteboardEvent, api::HttpRoomApi,
};
use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::commands::{Command, CommandHelp};

/// Delay between two polls of the board.
const POLL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

type Board = Whiteboard<PixelSurface, NativeWebSocket, ThreadedDispatcher>;

pub struct App {
    board: Board,
}

impl App {
    /// Build the board from `INKROOM_*` variables and log in.
    ///
    /// `INKROOM_USER` names the user (default `guest`); `INKROOM_TOKEN`
    /// defaults to the user name.
    pub fn from_env() -> Result<Self, AppError> {
        let config = ClientConfig::from_env();
        let api = HttpRoomApi::new(config.clone())?;
        let surface = PixelSurface::new(config.surface_width, config.surface_height);
        let mut board = Whiteboard::new(
            config,
            surface,
            NativeWebSocket::new(),
            ThreadedDispatcher::spawn(api),
        );

        let username = std::env::var("INKROOM_USER").unwrap_or_else(|_| "guest".to_string());
        let token = std::env::var("INKROOM_TOKEN").unwrap_or_else(|_| username.clone());
        board.login(&username, &token);
        Ok(Self { board })
    }

    /// Run until `quit` or end of input.
    pub fn run(mut self, room: Option<&str>) -> Result<(), AppError> {
        println!(
            "Inkroom client for {} (type 'help' for commands)",
            self.board.config().server_url
        );
        if let Some(room_id) = room {
            self.board.join_room(room_id, Instant::now())?;
        }

        let lines = spawn_stdin_reader();
        loop {
            let now = Instant::now();
            loop {
                match lines.try_recv() {
                    Ok(line) => {
                        if !self.handle_line(&line, now) {
                            self.board.leave_room();
                            return Ok(());
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.board.leave_room();
                        return Ok(());
                    }
                }
            }

            for event in self.board.poll(now) {
                report(&event);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Returns false when the user asked to quit.
    fn handle_line(&mut self, line: &str, now: Instant) -> bool {
        if line.trim().is_empty() {
            return true;
        }
        match Command::parse(line) {
            Ok(Command::Quit) => false,
            Ok(command) => {
                if let Err(e) = self.execute(command, now) {
                    eprintln!("error: {}", e);
                }
                true
            }
            Err(e) => {
                eprintln!("{}", e);
                true
            }
        }
    }

    fn execute(&mut self, command: Command, now: Instant) -> Result<(), AppError> {
        match command {
            Command::Draw(op) => match self.board.draw(op)? {
                Submitted::Sent => {}
                Submitted::Queued => println!("queued ({} pending)", self.board.pending_len()),
            },
            Command::Undo => {
                if !self.board.undo() {
                    println!("nothing to undo");
                }
            }
            Command::Redo => {
                if !self.board.redo() {
                    println!("nothing to redo");
                }
            }
            Command::Chat(content) => self.board.send_chat(&content)?,
            Command::Cursor(x, y) => self.board.move_cursor(x, y),
            Command::Save => {
                self.board.save_baseline()?;
            }
            Command::Rooms => {
                self.board.list_rooms()?;
            }
            Command::Create(name) => {
                self.board.create_room(&name)?;
            }
            Command::Join(room_id) => self.board.join_room(&room_id, now)?,
            Command::Leave => self.board.leave_room(),
            Command::Export(path) => {
                let png = self.board.surface().encode_png()?;
                std::fs::write(&path, png)?;
                println!("exported {}", path.display());
            }
            Command::Status => self.print_status(),
            Command::Help => CommandHelp::print_all(),
            Command::Quit => {}
        }
        Ok(())
    }

    fn print_status(&self) {
        let board = &self.board;
        println!("connection: {:?}", board.connection_state());
        match board.room_id() {
            Some(room_id) => {
                println!(
                    "room: {} ({})",
                    room_id,
                    if board.is_bootstrapped() { "ready" } else { "loading" }
                );
                let users: Vec<&str> = board.users().iter().map(|u| u.username.as_str()).collect();
                println!("users: {}", users.join(", "));
                println!("pending: {}", board.pending_len());
                if let Some(sequence) = board.applied_sequence() {
                    println!("sequence: {}", sequence);
                }
            }
            None => println!("room: none"),
        }
        println!(
            "history: {}/{}",
            board.history_cursor(),
            board.history().len().saturating_sub(1)
        );
    }
}

fn report(event: &WhiteboardEvent) {
    match event {
        WhiteboardEvent::ConnectionChanged(state) => println!("* connection {:?}", state),
        WhiteboardEvent::Joined { room_id } => println!("* joined {}", room_id),
        WhiteboardEvent::RoomCreated(room) => println!("* created {} ({})", room.name, room.room_id),
        WhiteboardEvent::RoomsListed(rooms) => {
            if rooms.is_empty() {
                println!("* no rooms");
            }
            for room in rooms {
                println!("  {}  {}", room.room_id, room.name);
            }
        }
        WhiteboardEvent::BootstrapComplete {
            room_id,
            replayed,
            skipped,
        } => println!(
            "* {} loaded: {} operation(s) replayed, {} skipped",
            room_id, replayed, skipped
        ),
        WhiteboardEvent::RemoteDraw { kind, origin } => log::debug!(
            "{:?} from {}",
            kind,
            origin.as_deref().unwrap_or("unknown")
        ),
        WhiteboardEvent::OperationSkipped(reason) => log::warn!("Skipped operation: {}", reason),
        WhiteboardEvent::ChatReceived(entry) => println!("<{}> {}", entry.username, entry.content),
        WhiteboardEvent::ChatHistoryLoaded(count) => println!("* {} chat message(s)", count),
        WhiteboardEvent::ChatFailed { content, error } => {
            eprintln!("! chat {:?} not sent: {}", content, error)
        }
        WhiteboardEvent::UsersChanged(users) => {
            let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
            println!("* users: {}", names.join(", "));
        }
        WhiteboardEvent::CursorMoved { username, x, y } => {
            log::debug!("{} cursor at ({}, {})", username, x, y)
        }
        WhiteboardEvent::BaselineSaved(message) => println!("* saved: {}", message),
        WhiteboardEvent::RequestFailed { request, error } => {
            eprintln!("! {} failed: {}", request, error)
        }
        WhiteboardEvent::ServerError(message) => eprintln!("! server: {}", message),
    }
}

/// Read stdin lines on a background thread.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
