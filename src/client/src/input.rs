use uuid::Uuid;

/// A chat named on the command line: its 1-based list position or its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Index(usize),
    Id(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    New,
    List,
    Open(Target),
    Delete(Target),
    /// Reload the chat list and resubscribe the open chat.
    Retry,
    /// Send the last unsent draft again.
    Resend,
    Token(String),
    Logout,
    Help,
    Quit,
    Say(String),
}

pub const HELP: &str = "\
commands:
  /new              start a chat
  /list             show chats
  /open <n|id>      open a chat
  /delete <n|id>    delete a chat
  /retry            reload chats and messages
  /resend           send the last failed message again
  /token <token>    sign in with an access token
  /logout           sign out
  /quit             exit
anything else is sent to the open chat";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Ok(Some(Input::Say(line.to_string())));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("");
    let arg = parts.next().map(str::trim).unwrap_or("");

    let input = match name {
        "new" => Input::New,
        "list" | "ls" => Input::List,
        "open" => Input::Open(target(arg)?),
        "delete" | "rm" => Input::Delete(target(arg)?),
        "retry" => Input::Retry,
        "resend" => Input::Resend,
        "token" if !arg.is_empty() => Input::Token(arg.to_string()),
        "token" => return Err("usage: /token <token>".into()),
        "logout" => Input::Logout,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => return Err(format!("unknown command /{other}; try /help")),
    };
    Ok(Some(input))
}

fn target(arg: &str) -> Result<Target, String> {
    if arg.is_empty() {
        return Err("missing chat number or id".into());
    }
    if let Ok(n) = arg.parse::<usize>() {
        if n == 0 {
            return Err("chat numbers start at 1".into());
        }
        return Ok(Target::Index(n));
    }
    Uuid::parse_str(arg)
        .map(Target::Id)
        .map_err(|_| format!("not a chat number or id: {arg}"))
}
