//! Operator command definitions and parsing.

use std::fmt;
use std::str::FromStr;

use crate::simulation::{NodeId, Position};

/// Usage text listing every command.
pub const HELP_TEXT: &str = "\
commands:
  create [x y z] [power]   add a node (random position without coordinates)
  move <id> <x> <y> <z>    relocate a node
  send <from> <to> <text>  route a message hop by hop
  broadcast                run one broadcast round now
  nodes                    list all nodes
  table <id>               show a node's routing table
  neighbors <id>           show nodes currently in range of a node
  los <a> <b>              check terrain line of sight between two nodes
  stats                    connectivity summary
  help                     this text
  quit                     stop the simulation";

/// Commands accepted by the interactive loop.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Add a node under the next unused id.
    Create {
        position: Option<Position>,
        transmit_power: Option<f64>,
    },
    Move { node_id: NodeId, position: Position },
    Send { from: NodeId, to: NodeId, payload: String },
    /// Run one broadcast round outside the periodic schedule.
    Broadcast,
    Nodes,
    Table(NodeId),
    Neighbors(NodeId),
    LineOfSight(NodeId, NodeId),
    Stats,
    Help,
    Quit,
}

/// Error type for a command line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    Empty,
    UnknownCommand(String),
    /// Wrong number of arguments; carries the expected usage.
    Usage(&'static str),
    InvalidNumber(String),
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandParseError::Empty => write!(f, "Empty command"),
            CommandParseError::UnknownCommand(name) => write!(f, "Unknown command '{}', try 'help'", name),
            CommandParseError::Usage(usage) => write!(f, "Usage: {}", usage),
            CommandParseError::InvalidNumber(value) => write!(f, "Invalid number '{}'", value),
        }
    }
}

impl std::error::Error for CommandParseError {}

fn number<T: FromStr>(value: &str) -> Result<T, CommandParseError> {
    value.parse().map_err(|_| CommandParseError::InvalidNumber(value.to_string()))
}

fn position(args: &[&str]) -> Result<Position, CommandParseError> {
    Ok(Position::new(number(args[0])?, number(args[1])?, number(args[2])?))
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandParseError::Empty)?;
        let args: Vec<&str> = words.collect();

        match name.to_ascii_lowercase().as_str() {
            "create" => match args.len() {
                0 => Ok(OperatorCommand::Create {
                    position: None,
                    transmit_power: None,
                }),
                3 | 4 => Ok(OperatorCommand::Create {
                    position: Some(position(&args[..3])?),
                    transmit_power: args.get(3).map(|p| number(p)).transpose()?,
                }),
                _ => Err(CommandParseError::Usage("create [x y z] [power]")),
            },
            "move" => match args.as_slice() {
                [id, rest @ ..] if rest.len() == 3 => Ok(OperatorCommand::Move {
                    node_id: number(id)?,
                    position: position(rest)?,
                }),
                _ => Err(CommandParseError::Usage("move <id> <x> <y> <z>")),
            },
            "send" => {
                if args.len() < 2 {
                    return Err(CommandParseError::Usage("send <from> <to> <text>"));
                }
                Ok(OperatorCommand::Send {
                    from: number(args[0])?,
                    to: number(args[1])?,
                    payload: args[2..].join(" "),
                })
            }
            "broadcast" => Ok(OperatorCommand::Broadcast),
            "nodes" => Ok(OperatorCommand::Nodes),
            "table" => match args.as_slice() {
                [id] => Ok(OperatorCommand::Table(number(id)?)),
                _ => Err(CommandParseError::Usage("table <id>")),
            },
            "neighbors" => match args.as_slice() {
                [id] => Ok(OperatorCommand::Neighbors(number(id)?)),
                _ => Err(CommandParseError::Usage("neighbors <id>")),
            },
            "los" => match args.as_slice() {
                [a, b] => Ok(OperatorCommand::LineOfSight(number(a)?, number(b)?)),
                _ => Err(CommandParseError::Usage("los <a> <b>")),
            },
            "stats" => Ok(OperatorCommand::Stats),
            "help" | "?" => Ok(OperatorCommand::Help),
            "quit" | "exit" => Ok(OperatorCommand::Quit),
            other => Err(CommandParseError::UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_variants() {
        assert_eq!(
            "create".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Create {
                position: None,
                transmit_power: None
            })
        );
        assert_eq!(
            "create 1 2 3".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Create {
                position: Some(Position::new(1, 2, 3)),
                transmit_power: None
            })
        );
        assert_eq!(
            "CREATE 1 2 3 150.5".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Create {
                position: Some(Position::new(1, 2, 3)),
                transmit_power: Some(150.5)
            })
        );
        assert_eq!("create 1 2".parse::<OperatorCommand>(), Err(CommandParseError::Usage("create [x y z] [power]")));
    }

    #[test]
    fn send_keeps_the_whole_message() {
        assert_eq!(
            "send 0 2   hello   mesh world".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Send {
                from: 0,
                to: 2,
                payload: "hello mesh world".to_string()
            })
        );
        assert_eq!(
            "send 0 2".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Send {
                from: 0,
                to: 2,
                payload: String::new()
            })
        );
    }

    #[test]
    fn parses_queries() {
        assert_eq!(
            "move 4 10 -3 7".parse::<OperatorCommand>(),
            Ok(OperatorCommand::Move {
                node_id: 4,
                position: Position::new(10, -3, 7)
            })
        );
        assert_eq!("table 3".parse::<OperatorCommand>(), Ok(OperatorCommand::Table(3)));
        assert_eq!("neighbors 1".parse::<OperatorCommand>(), Ok(OperatorCommand::Neighbors(1)));
        assert_eq!("los 1 2".parse::<OperatorCommand>(), Ok(OperatorCommand::LineOfSight(1, 2)));
        assert_eq!(" quit ".parse::<OperatorCommand>(), Ok(OperatorCommand::Quit));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!("".parse::<OperatorCommand>(), Err(CommandParseError::Empty));
        assert_eq!("fly 1".parse::<OperatorCommand>(), Err(CommandParseError::UnknownCommand("fly".to_string())));
        assert_eq!("table x".parse::<OperatorCommand>(), Err(CommandParseError::InvalidNumber("x".to_string())));
        assert_eq!("move 1 2 3".parse::<OperatorCommand>(), Err(CommandParseError::Usage("move <id> <x> <y> <z>")));
        assert_eq!("table -1".parse::<OperatorCommand>(), Err(CommandParseError::InvalidNumber("-1".to_string())));
    }
}
