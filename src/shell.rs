//! Command parsing for the interactive client shell

use thiserror::Error;

pub const CMD_LIST: &str = "list";
pub const CMD_GET: &str = "get";
pub const CMD_STREAM: &str = "stream";
pub const CMD_STREAM_AND_GET: &str = "stream+";
pub const CMD_HELP: &str = "help";
pub const CMD_QUIT: &str = "quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    List,
    Get(u32),
    Stream(u32),
    StreamAndGet(u32),
    Help,
    Quit,
    Empty,
}

/// A line the shell could not turn into a command; the message is meant
/// for the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ShellError(pub String);

pub fn parse(line: &str) -> Result<ShellCommand, ShellError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(ShellCommand::Empty);
    };
    let mut index = || -> Result<u32, ShellError> {
        let usage = || ShellError(format!("Usage: {command} <file_index>"));
        let raw = words.next().ok_or_else(usage)?;
        raw.parse::<u32>()
            .map_err(|_| ShellError("Invalid file index".into()))
    };
    match command {
        CMD_LIST => Ok(ShellCommand::List),
        CMD_GET => Ok(ShellCommand::Get(index()?)),
        CMD_STREAM => Ok(ShellCommand::Stream(index()?)),
        CMD_STREAM_AND_GET => Ok(ShellCommand::StreamAndGet(index()?)),
        CMD_HELP => Ok(ShellCommand::Help),
        CMD_QUIT => Ok(ShellCommand::Quit),
        _ => Err(ShellError("Invalid command".into())),
    }
}

pub fn help_text() -> &'static str {
    "Commands:\n\
     \x20 list: List the files in the library\n\
     \x20 get <file_index>: Get a file from the library\n\
     \x20 stream <file_index>: Stream a file from the library (without saving it)\n\
     \x20 stream+ <file_index>: Stream a file from the library\n\
     \x20                       and save it to the local library\n\
     \x20 help: Display this help message\n\
     \x20 quit: Quit the client"
}
