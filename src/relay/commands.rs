//! Bot commands and classification of inbound text.

use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "show usage")]
    Start,
    #[command(description = "ask Gemini a question")]
    Ge(String),
}

/// What an inbound text asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start,
    /// `/ge` with its argument, possibly empty.
    Question(String),
    /// Text that is not a command.
    Text,
    /// Unknown commands and commands addressed to other bots.
    Ignored,
}

/// Classify a message text. `bot_username` resolves `/ge@name` forms.
pub fn parse(text: &str, bot_username: &str) -> Request {
    match Command::parse(&normalize(text), bot_username) {
        Ok(Command::Start) => Request::Start,
        Ok(Command::Ge(question)) => Request::Question(question.trim().to_string()),
        Err(_) if text.starts_with('/') => Request::Ignored,
        Err(_) => Request::Text,
    }
}

/// Lowercase the command name and separate it from its argument with a
/// single space, so `/GE\nquestion` parses like `/ge question`.
fn normalize(text: &str) -> String {
    if !text.starts_with('/') {
        return text.to_string();
    }

    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, Some(rest)),
        None => (text, None),
    };
    let head = match head.split_once('@') {
        Some((name, bot)) => format!("{}@{bot}", name.to_lowercase()),
        None => head.to_lowercase(),
    };

    match rest {
        Some(rest) => format!("{head} {rest}"),
        None => head,
    }
}
