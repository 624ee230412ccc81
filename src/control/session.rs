//! Wires the network, the worker pool, and both simulation loops together.

use anyhow::{Context, bail};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

use crate::common::config::SimulatorConfig;
use crate::simulation::Network;
use crate::simulation::scheduler::{StopHandle, WorkerPool, broadcast_loop};

use super::handler::{CommandHandler, command_loop};

/// Run the simulation until the operator quits or the input ends.
///
/// The broadcast loop and the command loop each occupy one worker. Returns
/// the network in its final state once every worker has been joined.
pub fn run_session<R, W>(network: Network, config: &SimulatorConfig, input: R, output: W) -> anyhow::Result<Network>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let network = Arc::new(Mutex::new(network));
    let stop = StopHandle::new();
    let pool = WorkerPool::start(config.worker_threads).context("Failed to start worker pool")?;
    log::info!("Simulation started with {} workers", pool.size());

    {
        let network = Arc::clone(&network);
        let stop = stop.clone();
        let interval = config.broadcast_interval();
        pool.post(move || {
            broadcast_loop(network, stop, interval);
        });
    }

    let (result_tx, result_rx) = crossbeam_channel::bounded(1);
    {
        let network = Arc::clone(&network);
        let stop = stop.clone();
        let handler = CommandHandler::new(config.default_transmit_power, config.random_altitude);
        pool.post(move || {
            // Early exits and panics must end the broadcast loop too.
            let _guard = stop.stop_on_drop();
            let result = command_loop(network, stop.clone(), handler, input, output);
            let _ = result_tx.send(result);
        });
    }

    let panicked = pool.shutdown();
    if panicked > 0 {
        bail!("{} simulation worker(s) panicked", panicked);
    }
    if let Ok(result) = result_rx.try_recv() {
        result.context("Command input failed")?;
    }
    log::info!("Simulation stopped");

    let network = Arc::try_unwrap(network)
        .map_err(|_| anyhow::anyhow!("Network is still shared after shutdown"))?
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{HeightMap, ObstructionPolicy, Position, SignalModel};
    use std::io::{self, Cursor};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingOutput;

    impl Write for FailingOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            panic!("output closed");
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn line_network() -> Network {
        let mut network = Network::new(Box::new(HeightMap::flat(50, 50, 0)), SignalModel::default(), ObstructionPolicy::Strict);
        for (id, x) in [(0, 0), (1, 10), (2, 20)] {
            network.add_node(id, Position::new(x, 0, 0), 200.0).unwrap();
        }
        network
    }

    #[test]
    fn session_runs_commands_and_joins_workers_on_quit() {
        let output = SharedBuffer::default();
        let input = Cursor::new("broadcast\nbroadcast\nsend 0 2 hello\nquit\n");

        let network = run_session(line_network(), &SimulatorConfig::default(), input, output.clone()).unwrap();

        let text = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("delivered in 2 hops: 0 -> 1 -> 2"));
        assert!(text.contains("stopping simulation"));
        assert_eq!(network.node(0).unwrap().route_to(2).unwrap().next_hop, 1);
    }

    #[test]
    fn session_ends_with_the_input() {
        let network = run_session(line_network(), &SimulatorConfig::default(), Cursor::new(""), io::sink()).unwrap();
        assert_eq!(network.node_count(), 3);
    }

    #[test]
    fn panicking_command_worker_is_reported_instead_of_hanging() {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let result = run_session(line_network(), &SimulatorConfig::default(), Cursor::new("quit\n"), FailingOutput);
            let _ = done_tx.send(result.map(|_| ()).map_err(|err| err.to_string()));
        });

        let result = done_rx.recv_timeout(std::time::Duration::from_secs(20)).unwrap();
        assert_eq!(result, Err("1 simulation worker(s) panicked".to_string()));
    }
}
