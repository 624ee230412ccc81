//! Operator command execution and the interactive command loop.
//!
//! Every command runs under the network lock as one simulation step, so it
//! never interleaves with a broadcast round.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use crate::simulation::scheduler::{SharedNetwork, StopHandle, lock_network};
use crate::simulation::terrain::random_position;
use crate::simulation::{Network, NetworkError, NodeSnapshot};

use super::command::{HELP_TEXT, OperatorCommand};

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub reply: String,
    pub quit: bool,
}

impl CommandOutcome {
    fn reply(reply: String) -> Self {
        Self { reply, quit: false }
    }
}

/// Executes operator commands against a network.
pub struct CommandHandler {
    default_transmit_power: f64,
    random_altitude: i32,
    rng: StdRng,
}

impl CommandHandler {
    pub fn new(default_transmit_power: f64, random_altitude: i32) -> Self {
        Self::with_rng(default_transmit_power, random_altitude, StdRng::from_entropy())
    }

    pub fn with_rng(default_transmit_power: f64, random_altitude: i32, rng: StdRng) -> Self {
        Self {
            default_transmit_power,
            random_altitude,
            rng,
        }
    }

    /// Run one command. Failures become the reply; the caller keeps going.
    pub fn execute(&mut self, network: &mut Network, command: OperatorCommand) -> CommandOutcome {
        if command == OperatorCommand::Quit {
            return CommandOutcome {
                reply: "stopping simulation".to_string(),
                quit: true,
            };
        }
        match self.run(network, command) {
            Ok(reply) => CommandOutcome::reply(reply),
            Err(err) => CommandOutcome::reply(format!("error: {}", err)),
        }
    }

    fn run(&mut self, network: &mut Network, command: OperatorCommand) -> Result<String, NetworkError> {
        match command {
            OperatorCommand::Create { position, transmit_power } => {
                let position = match position {
                    Some(position) => position,
                    None => random_position(network.terrain(), self.random_altitude, &mut self.rng)?,
                };
                let power = transmit_power.unwrap_or(self.default_transmit_power);
                let node_id = network.create_node(position, power)?;
                Ok(format!("created node {} at {}", node_id, position))
            }
            OperatorCommand::Move { node_id, position } => {
                network.relocate(node_id, position)?;
                Ok(format!("moved node {} to {}", node_id, position))
            }
            OperatorCommand::Send { from, to, payload } => {
                let delivery = network.send_message(from, to, &payload)?;
                let path: Vec<String> = delivery.path.iter().map(|id| id.to_string()).collect();
                Ok(format!("delivered in {} hops: {}", delivery.hop_count(), path.join(" -> ")))
            }
            OperatorCommand::Broadcast => {
                let report = network.broadcast_round()?;
                Ok(format!(
                    "round complete: {} deliveries, {} route changes, {} refreshes",
                    report.deliveries, report.route_changes, report.refreshes
                ))
            }
            OperatorCommand::Nodes => {
                let mut reply = String::new();
                for snapshot in network.snapshot() {
                    let _ = writeln!(
                        reply,
                        "node {} at {} power {} range {:.1} routes {}",
                        snapshot.node_id,
                        snapshot.position,
                        snapshot.transmit_power,
                        snapshot.radio_range,
                        snapshot.routing_table.len()
                    );
                }
                Ok(reply.trim_end().to_string())
            }
            OperatorCommand::Table(node_id) => Ok(format_table(&network.node_snapshot(node_id)?)),
            OperatorCommand::Neighbors(node_id) => {
                let neighbors = network.compute_neighbors(node_id)?;
                let mut reply = format!("node {} neighbors:", node_id);
                for neighbor in neighbors {
                    let strength = network.direct_signal(node_id, neighbor)?;
                    let _ = write!(reply, " {} ({:.4})", neighbor, strength);
                }
                Ok(reply)
            }
            OperatorCommand::LineOfSight(a, b) => Ok(match network.line_of_sight(a, b)? {
                Some(point) => format!("line of sight {} -> {} blocked at {}", a, b, point),
                None => format!("line of sight {} -> {} clear", a, b),
            }),
            OperatorCommand::Stats => {
                let stats = network.statistics()?;
                Ok(format!(
                    "{} nodes, {} connected pairs, connectivity {:.3}, average signal {:.4}",
                    stats.node_count, stats.connected_pairs, stats.connectivity, stats.average_signal_strength
                ))
            }
            OperatorCommand::Help => Ok(HELP_TEXT.to_string()),
            OperatorCommand::Quit => Ok(String::new()),
        }
    }
}

fn format_table(snapshot: &NodeSnapshot) -> String {
    let mut reply = format!("routing table for node {} at {}:", snapshot.node_id, snapshot.position);
    for entry in snapshot.routing_table.values() {
        let (next_hop, metric) = entry.route();
        let _ = write!(
            reply,
            "\n  destination {} next hop {} signal {:.4} sequence {}",
            entry.destination, next_hop, metric, entry.sequence_number
        );
    }
    reply
}

/// Read commands from `input` until `quit`, end of input, or `stop`.
///
/// Reaching the end of input counts as `quit`. Either way the stop flag is
/// set on exit so the broadcast loop winds down too.
pub fn command_loop<R, W>(network: SharedNetwork, stop: StopHandle, mut handler: CommandHandler, input: R, mut output: W) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    log::info!("Command loop started");
    let mut lines = input.lines();
    while !stop.is_stopped() {
        write!(output, "> ")?;
        output.flush()?;
        let Some(line) = lines.next() else {
            log::info!("End of command input");
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match line.parse::<OperatorCommand>() {
            Ok(command) => {
                log::debug!("Executing {:?}", command);
                let mut network = lock_network(&network);
                handler.execute(&mut network, command)
            }
            Err(err) => CommandOutcome::reply(err.to_string()),
        };
        writeln!(output, "{}", outcome.reply)?;
        if outcome.quit {
            break;
        }
    }
    stop.stop();
    log::info!("Command loop stopped");
    Ok(())
}
