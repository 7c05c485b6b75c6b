//! CLI utilities for talking to an acedb server interactively.
use std::io::{self, BufRead, Write};

use thiserror::Error;

const DATA_PREFIX: &str = ".data ";

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`, also produced at end of input.
    Exit,
    /// Command text sent to the server as is.
    Request(String),
    /// `.data <text>`, sent for the server to parse as data.
    Data(String),
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to access terminal: {0}")]
    Io(#[from] io::Error),
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),
}

/// Prompt user for the next command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CliError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    match s.trim_end() {
        ".exit" => Ok(Command::Exit),
        s if s.starts_with(DATA_PREFIX) => Ok(Command::Data(s[DATA_PREFIX.len()..].to_string())),
        s if !s.starts_with('.') => Ok(Command::Request(s.to_string())),
        s => Err(CliError::UnrecognizedCommand(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_requests() {
        let input = b"find sequence *\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Request(String::from("find sequence *")), res);
    }

    #[test]
    fn prompt_handles_data() {
        let input = b".data Sequence : \"x\"\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Data(String::from("Sequence : \"x\"")), res);
    }

    #[test]
    fn end_of_input_exits() {
        let mut output = Vec::new();

        let res = prompt(&b""[..], &mut output).unwrap();
        assert_eq!(Command::Exit, res);
    }

    #[test]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        let err = prompt(&input[..], &mut output).unwrap_err();
        assert_eq!(err.to_string(), "unrecognized command '.something_wrong'");
    }
}
