//! Operator commands typed at the monitor prompt.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start or resume logging. The prefix only matters when a new file has to be opened.
    Run { prefix: Option<String> },
    /// Pause logging; events are dropped until the next `run`.
    Wait,
    /// Start a fresh log file and begin logging into it.
    New { prefix: Option<String> },
    Stats,
    Metrics,
    Tabs,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return ControlCommand::Empty;
        };
        let prefix = words.next().map(str::to_string);
        match head.to_ascii_lowercase().as_str() {
            "run" | "start" => ControlCommand::Run { prefix },
            "wait" | "pause" => ControlCommand::Wait,
            "new" => ControlCommand::New { prefix },
            "stats" => ControlCommand::Stats,
            "metrics" => ControlCommand::Metrics,
            "tabs" => ControlCommand::Tabs,
            "help" | "?" => ControlCommand::Help,
            "quit" | "exit" | "q" => ControlCommand::Quit,
            _ => ControlCommand::Unknown(head.to_string()),
        }
    }
}

pub const HELP: &str = "\
Commands:
  run [prefix]   start or resume logging
  wait           pause logging (events are dropped, not buffered)
  new [prefix]   start a fresh log file and log into it
  stats          pipeline and writer counters
  metrics        prometheus metrics
  tabs           tracked tabs
  quit           stop and exit";

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn commands_take_an_optional_prefix() {
        assert_eq!(ControlCommand::parse("run"), ControlCommand::Run { prefix: None });
        assert_eq!(
            ControlCommand::parse("  new  checkout/ "),
            ControlCommand::New {
                prefix: Some("checkout/".into())
            }
        );
        assert_eq!(
            ControlCommand::parse("RUN ~/logs/login"),
            ControlCommand::Run {
                prefix: Some("~/logs/login".into())
            }
        );
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert_eq!(ControlCommand::parse("   "), ControlCommand::Empty);
        assert_eq!(ControlCommand::parse("q"), ControlCommand::Quit);
        assert_eq!(
            ControlCommand::parse("launch now"),
            ControlCommand::Unknown("launch".into())
        );
    }
}
