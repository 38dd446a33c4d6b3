// Chat command parsing into a closed set of variants.

use crate::error::CommandError;
use crate::window::WindowSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Full usage report for the window so far.
    Usage(WindowSpec),
    Top(WindowSpec),
    Help,
}

/// Parses a message that starts with `/`. `/cmd@botname` is accepted.
pub fn parse(text: &str) -> Result<Command, CommandError> {
    let mut parts = text.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let name = head
        .strip_prefix('/')
        .ok_or_else(|| CommandError::Unknown(head.to_string()))?;
    let name = name.split('@').next().unwrap_or_default().to_lowercase();

    match name.as_str() {
        "today" => Ok(Command::Usage(WindowSpec::Today)),
        "week" => Ok(Command::Usage(WindowSpec::ThisWeek)),
        "month" => Ok(Command::Usage(WindowSpec::ThisMonth)),
        "top" => match parts.next() {
            None => Ok(Command::Top(WindowSpec::Today)),
            Some(arg) => Ok(Command::Top(arg.parse()?)),
        },
        "help" | "start" => Ok(Command::Help),
        _ => Err(CommandError::Unknown(head.to_string())),
    }
}
