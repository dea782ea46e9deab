//! Slash commands for interactive mode

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Show the context list
    Context,
    /// Toggle visibility of the n-th context entry (1-based)
    Hide(usize),
    Delete(usize),
    Edit(usize, String),
    /// Clear the conversation
    Reset,
    /// Set forgetful mode, or flip it when no value is given
    Forgetful(Option<bool>),
    Usage,
    UsageReset,
    /// Set the token cap, `None` to remove it
    Cap(Option<u64>),
    Quit,
    /// Known command with bad arguments; holds the usage line
    Invalid(&'static str),
    Unknown(String),
}

/// Parse a slash command. Returns `None` for plain text.
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };
    let command = command.to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => Command::Help,

        "context" | "ctx" => Command::Context,

        "hide" => parse_index(args)
            .map(Command::Hide)
            .unwrap_or(Command::Invalid("/hide <n>")),

        "delete" | "del" => parse_index(args)
            .map(Command::Delete)
            .unwrap_or(Command::Invalid("/delete <n>")),

        "edit" => {
            let (index, text) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
            match (parse_index(index), text.trim()) {
                (Some(index), text) if !text.is_empty() => Command::Edit(index, text.to_string()),
                _ => Command::Invalid("/edit <n> <text>"),
            }
        }

        "reset" | "clear" => Command::Reset,

        "forgetful" => match args.to_lowercase().as_str() {
            "" => Command::Forgetful(None),
            "on" | "true" => Command::Forgetful(Some(true)),
            "off" | "false" => Command::Forgetful(Some(false)),
            _ => Command::Invalid("/forgetful [on|off]"),
        },

        "usage" => match args {
            "" => Command::Usage,
            "reset" => Command::UsageReset,
            _ => Command::Invalid("/usage [reset]"),
        },

        "cap" => match args {
            "off" | "none" => Command::Cap(None),
            _ => args
                .parse()
                .map(|cap| Command::Cap(Some(cap)))
                .unwrap_or(Command::Invalid("/cap <n|off>")),
        },

        "quit" | "exit" | "q" => Command::Quit,

        _ => Command::Unknown(command),
    })
}

fn parse_index(arg: &str) -> Option<usize> {
    arg.trim().parse().ok().filter(|n| *n > 0)
}

pub fn help_message() -> &'static str {
    r#"Available commands:
  /help, /h, /?         Show this help message
  /context              List the entries sent to the model
  /hide <n>             Hide or show context entry n
  /delete <n>           Remove context entry n (history is kept)
  /edit <n> <text>      Rewrite context entry n
  /reset                Clear the conversation
  /forgetful [on|off]   Send only the latest message and never summarize
  /usage                Show token usage
  /usage reset          Reset the token counter
  /cap <n|off>          Warn once usage reaches n tokens
  /quit, /q             Exit

Ctrl-C stops the answer being streamed."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("  what does / mean"), None);
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("/help"), Some(Command::Help));
        assert_eq!(parse_command("/?"), Some(Command::Help));
        assert_eq!(parse_command(" /CONTEXT "), Some(Command::Context));
        assert_eq!(parse_command("/reset"), Some(Command::Reset));
        assert_eq!(parse_command("/q"), Some(Command::Quit));
        assert_eq!(
            parse_command("/bogus"),
            Some(Command::Unknown("bogus".into()))
        );
    }

    #[test]
    fn test_indexed_commands() {
        assert_eq!(parse_command("/hide 2"), Some(Command::Hide(2)));
        assert_eq!(parse_command("/delete 10"), Some(Command::Delete(10)));
        assert_eq!(
            parse_command("/hide 0"),
            Some(Command::Invalid("/hide <n>"))
        );
        assert_eq!(
            parse_command("/delete x"),
            Some(Command::Invalid("/delete <n>"))
        );
    }

    #[test]
    fn test_edit_keeps_text_spacing() {
        assert_eq!(
            parse_command("/edit 3 안녕하세요,  friend"),
            Some(Command::Edit(3, "안녕하세요,  friend".into()))
        );
        assert_eq!(
            parse_command("/edit 3"),
            Some(Command::Invalid("/edit <n> <text>"))
        );
    }

    #[test]
    fn test_forgetful_values() {
        assert_eq!(parse_command("/forgetful"), Some(Command::Forgetful(None)));
        assert_eq!(
            parse_command("/forgetful ON"),
            Some(Command::Forgetful(Some(true)))
        );
        assert_eq!(
            parse_command("/forgetful off"),
            Some(Command::Forgetful(Some(false)))
        );
        assert_eq!(
            parse_command("/forgetful maybe"),
            Some(Command::Invalid("/forgetful [on|off]"))
        );
    }

    #[test]
    fn test_usage_and_cap() {
        assert_eq!(parse_command("/usage"), Some(Command::Usage));
        assert_eq!(parse_command("/usage reset"), Some(Command::UsageReset));
        assert_eq!(parse_command("/cap 50000"), Some(Command::Cap(Some(50000))));
        assert_eq!(parse_command("/cap off"), Some(Command::Cap(None)));
        assert_eq!(
            parse_command("/cap -1"),
            Some(Command::Invalid("/cap <n|off>"))
        );
    }
}
