//! Console command parsing and documentation.

use inkroom_core::operation::{
    CircleShape, DEFAULT_COLOR, DEFAULT_LINE_WIDTH, DrawOp, LineShape, RectShape, Stroke, TextLabel,
};
use kurbo::Point;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0} (try 'help')")]
    Unknown(String),
    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("Invalid number {value:?} for {argument}")]
    InvalidNumber {
        argument: &'static str,
        value: String,
    },
    #[error("Invalid point {0:?}, expected x,y")]
    InvalidPoint(String),
}

/// A console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Draw(DrawOp),
    Undo,
    Redo,
    Chat(String),
    Cursor(f64, f64),
    Save,
    Rooms,
    Create(String),
    Join(String),
    Leave,
    Export(PathBuf),
    Status,
    Help,
    Quit,
}

/// Whitespace tokens of one command line.
struct Args<'a> {
    command: &'static str,
    rest: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn required(&mut self, argument: &'static str) -> Result<&'a str, ParseError> {
        self.rest.next().ok_or(ParseError::MissingArgument {
            command: self.command,
            argument,
        })
    }

    fn number(&mut self, argument: &'static str) -> Result<f64, ParseError> {
        parse_number(argument, self.required(argument)?)
    }

    fn number_or(&mut self, argument: &'static str, default: f64) -> Result<f64, ParseError> {
        match self.rest.next() {
            Some(value) => parse_number(argument, value),
            None => Ok(default),
        }
    }

    fn color(&mut self) -> String {
        self.rest.next().unwrap_or(DEFAULT_COLOR).to_string()
    }

    fn points(&mut self) -> Result<Vec<Point>, ParseError> {
        let points = self.rest.by_ref().map(parse_point).collect::<Result<Vec<_>, _>>()?;
        if points.is_empty() {
            return Err(ParseError::MissingArgument {
                command: self.command,
                argument: "points",
            });
        }
        Ok(points)
    }
}

fn parse_number(argument: &'static str, value: &str) -> Result<f64, ParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber {
            argument,
            value: value.to_string(),
        })
}

fn parse_point(token: &str) -> Result<Point, ParseError> {
    let invalid = || ParseError::InvalidPoint(token.to_string());
    let (x, y) = token.split_once(',').ok_or_else(invalid)?;
    let coordinate = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(invalid)
    };
    Ok(Point::new(coordinate(x)?, coordinate(y)?))
}

/// Text after the command word, with inner spacing kept.
fn remainder(line: &str) -> &str {
    line.trim_start()
        .split_once(char::is_whitespace)
        .map_or("", |(_, rest)| rest.trim())
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let word = words.next().ok_or(ParseError::Empty)?;
        let command = match word.to_ascii_lowercase().as_str() {
            "pen" => "pen",
            "eraser" => "eraser",
            "rect" => "rect",
            "circle" => "circle",
            "line" => "line",
            "text" => "text",
            "clear" => return Ok(Command::Draw(DrawOp::Clear)),
            "undo" => return Ok(Command::Undo),
            "redo" => return Ok(Command::Redo),
            "save" => return Ok(Command::Save),
            "rooms" => return Ok(Command::Rooms),
            "leave" => return Ok(Command::Leave),
            "status" => return Ok(Command::Status),
            "help" | "?" => return Ok(Command::Help),
            "quit" | "exit" => return Ok(Command::Quit),
            "chat" | "say" => return non_empty("chat", "message", line).map(Command::Chat),
            "create" => return non_empty("create", "room name", line).map(Command::Create),
            "join" => return non_empty("join", "room id", line).map(Command::Join),
            "export" => {
                return non_empty("export", "path", line).map(|p| Command::Export(PathBuf::from(p)));
            }
            "cursor" => "cursor",
            _ => return Err(ParseError::Unknown(word.to_string())),
        };

        let mut args = Args {
            command,
            rest: words,
        };
        let op = match command {
            "cursor" => {
                let x = args.number("x")?;
                let y = args.number("y")?;
                return Ok(Command::Cursor(x, y));
            }
            "pen" => {
                let color = args.required("color")?.to_string();
                let line_width = args.number("width")?;
                DrawOp::Pen(Stroke {
                    points: args.points()?,
                    color,
                    line_width,
                })
            }
            "eraser" => {
                let line_width = args.number("width")?;
                DrawOp::Eraser(Stroke {
                    points: args.points()?,
                    color: DEFAULT_COLOR.to_string(),
                    line_width,
                })
            }
            "rect" => DrawOp::Rectangle(RectShape {
                x: args.number("x")?,
                y: args.number("y")?,
                width: args.number("width")?,
                height: args.number("height")?,
                color: args.color(),
                line_width: args.number_or("line width", DEFAULT_LINE_WIDTH)?,
            }),
            "circle" => DrawOp::Circle(CircleShape {
                x: args.number("x")?,
                y: args.number("y")?,
                radius: args.number("radius")?,
                color: args.color(),
                line_width: args.number_or("line width", DEFAULT_LINE_WIDTH)?,
            }),
            "line" => DrawOp::Line(LineShape {
                x1: args.number("x1")?,
                y1: args.number("y1")?,
                x2: args.number("x2")?,
                y2: args.number("y2")?,
                color: args.color(),
                line_width: args.number_or("line width", DEFAULT_LINE_WIDTH)?,
            }),
            _ => {
                let x = args.number("x")?;
                let y = args.number("y")?;
                let font_size = args.number("font size")?;
                let color = args.required("color")?.to_string();
                let text = args.rest.collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    return Err(ParseError::MissingArgument {
                        command: "text",
                        argument: "text",
                    });
                }
                DrawOp::Text(TextLabel {
                    x,
                    y,
                    text,
                    color,
                    font_size,
                })
            }
        };
        Ok(Command::Draw(op))
    }
}

fn non_empty(command: &'static str, argument: &'static str, line: &str) -> Result<String, ParseError> {
    let rest = remainder(line);
    if rest.is_empty() {
        Err(ParseError::MissingArgument { command, argument })
    } else {
        Ok(rest.to_string())
    }
}

/// One documented command.
#[derive(Debug, Clone)]
pub struct CommandHelp {
    pub usage: &'static str,
    pub description: &'static str,
}

impl CommandHelp {
    pub const fn new(usage: &'static str, description: &'static str) -> Self {
        Self { usage, description }
    }

    /// Every command, in display order.
    pub fn all() -> Vec<CommandHelp> {
        vec![
            Self::new("pen <color> <width> x,y ...", "Freehand stroke"),
            Self::new("eraser <width> x,y ...", "Erase along a path"),
            Self::new("rect x y w h [color] [width]", "Rectangle outline"),
            Self::new("circle x y r [color] [width]", "Circle outline"),
            Self::new("line x1 y1 x2 y2 [color] [width]", "Straight line"),
            Self::new("text x y <size> <color> <text>", "Text label"),
            Self::new("clear", "Clear the board"),
            Self::new("undo / redo", "Step through local history"),
            Self::new("chat <message>", "Send a chat message"),
            Self::new("cursor x y", "Share your cursor position"),
            Self::new("save", "Persist the board as the room baseline"),
            Self::new("rooms", "List rooms"),
            Self::new("create <name>", "Create a room"),
            Self::new("join <room id>", "Join a room"),
            Self::new("leave", "Leave the current room"),
            Self::new("export <path>", "Write the board to a PNG file"),
            Self::new("status", "Show connection and room state"),
            Self::new("quit", "Leave and exit"),
        ]
    }

    pub fn print_all() {
        println!("\n=== Commands ===");
        for help in Self::all() {
            println!("  {:34} {}", help.usage, help.description);
        }
        println!();
    }
}
