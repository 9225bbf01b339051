//! Background training worker driven through a command channel.
//!
//! A supervisor thread owns the [`Network`] whenever the training loop is not
//! running. `Start`/`Resume` hand it to a freshly spawned loop thread;
//! `Pause`/`Stop` flip the shared status and join that thread before
//! answering, so at most one loop ever runs and a reply means the loop has
//! really exited.
use crate::error::{NetError, Result};
use crate::network::{self, Network};
use crate::progress::{Monitor, SharedProgress, Status};
use log::{debug, error, info};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Control messages accepted by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    /// Score this many shuffled test samples; only while not training.
    Evaluate(usize),
    Shutdown,
}

/// Acknowledgement of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    Status(Status),
    Accuracy(f32),
}

struct Request {
    command: Command,
    reply: Sender<Result<Reply>>,
}

enum Slot {
    Parked(Network),
    Running(JoinHandle<Network>),
    Lost,
}

struct Supervisor {
    slot: Slot,
    progress: SharedProgress,
}

impl Supervisor {
    fn run(mut self, requests: Receiver<Request>) -> Option<Network> {
        for Request { command, reply } in requests {
            debug!("trainer command: {command:?}");
            let result = self.handle(command);
            if let Err(e) = &result {
                debug!("trainer command {command:?} rejected: {e}");
            }
            // the requester may have given up waiting
            let _ = reply.send(result);
            if command == Command::Shutdown {
                break;
            }
        }
        self.halt();
        match self.slot {
            Slot::Parked(net) => Some(net),
            _ => None,
        }
    }

    fn status(&self) -> Status {
        self.progress.lock().status
    }

    fn handle(&mut self, command: Command) -> Result<Reply> {
        self.reap();
        match command {
            Command::Start => {
                let mut net = self.take_parked("start training")?;
                match net.start_training() {
                    Ok(()) => self.launch(net)?,
                    Err(e) => {
                        self.slot = Slot::Parked(net);
                        return Err(e);
                    }
                }
            }
            Command::Resume => {
                let net = self.take_parked("resume training")?;
                match net.resume_training() {
                    Ok(()) => self.launch(net)?,
                    Err(e) => {
                        self.slot = Slot::Parked(net);
                        return Err(e);
                    }
                }
            }
            Command::Pause => {
                network::pause(&self.progress)?;
                self.join()?;
            }
            Command::Stop => {
                network::stop(&self.progress)?;
                self.join()?;
            }
            Command::Evaluate(n) => {
                let status = self.status();
                return match &mut self.slot {
                    Slot::Parked(net) => net.test(n).map(Reply::Accuracy),
                    Slot::Running(_) => Err(NetError::InvalidState {
                        op: "evaluate",
                        status,
                    }),
                    Slot::Lost => Err(NetError::WorkerGone),
                };
            }
            Command::Shutdown => self.halt(),
        }
        Ok(Reply::Status(self.status()))
    }

    fn take_parked(&mut self, op: &'static str) -> Result<Network> {
        match std::mem::replace(&mut self.slot, Slot::Lost) {
            Slot::Parked(net) => Ok(net),
            Slot::Running(handle) => {
                self.slot = Slot::Running(handle);
                Err(NetError::InvalidState {
                    op,
                    status: self.status(),
                })
            }
            Slot::Lost => Err(NetError::WorkerGone),
        }
    }

    fn launch(&mut self, net: Network) -> Result<()> {
        let spawned = thread::Builder::new()
            .name("training-loop".into())
            .spawn(move || {
                let mut net = net;
                if let Err(e) = net.train() {
                    error!("training loop failed: {e}");
                }
                net
            });
        match spawned {
            Ok(handle) => {
                self.slot = Slot::Running(handle);
                Ok(())
            }
            Err(e) => Err(self.abandon_launch(e)),
        }
    }

    /// The network went down with the closure that failed to spawn.
    fn abandon_launch(&mut self, e: io::Error) -> NetError {
        error!("could not spawn training loop: {e}; network lost");
        self.slot = Slot::Lost;
        self.progress.lock().status = Status::Idle;
        NetError::Io(e)
    }

    /// Wait for the loop thread and take the network back.
    fn join(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.slot, Slot::Lost) {
            Slot::Running(handle) => match handle.join() {
                Ok(net) => {
                    self.slot = Slot::Parked(net);
                    Ok(())
                }
                Err(_) => {
                    error!("training loop panicked; network lost");
                    self.progress.lock().status = Status::Idle;
                    Err(NetError::WorkerGone)
                }
            },
            other => {
                self.slot = other;
                Ok(())
            }
        }
    }

    /// Collect a loop thread that ended on its own (after an error).
    fn reap(&mut self) {
        if matches!(&self.slot, Slot::Running(h) if h.is_finished()) {
            let _ = self.join();
        }
    }

    fn halt(&mut self) {
        if self.status() != Status::Idle {
            let _ = network::stop(&self.progress);
        }
        let _ = self.join();
    }
}

/// Handle to a network training in the background.
///
/// Control methods block until the worker has applied the command. Use
/// [`Trainer::monitor`] for polling from other threads.
pub struct Trainer {
    requests: Option<Sender<Request>>,
    supervisor: Option<JoinHandle<Option<Network>>>,
    monitor: Monitor,
}

impl Trainer {
    pub fn spawn(network: Network) -> Result<Self> {
        let monitor = network.monitor();
        let supervisor = Supervisor {
            progress: network.shared_progress(),
            slot: Slot::Parked(network),
        };
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("trainer".into())
            .spawn(move || supervisor.run(rx))?;
        info!("trainer ready");
        Ok(Self {
            requests: Some(tx),
            supervisor: Some(handle),
            monitor,
        })
    }

    pub fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }

    pub fn status(&self) -> Status {
        self.monitor.status()
    }

    /// Send a command and wait for its acknowledgement.
    pub fn command(&self, command: Command) -> Result<Reply> {
        let requests = self.requests.as_ref().ok_or(NetError::WorkerGone)?;
        let (reply, answer) = mpsc::channel();
        requests
            .send(Request { command, reply })
            .map_err(|_| NetError::WorkerGone)?;
        answer.recv().map_err(|_| NetError::WorkerGone)?
    }

    pub fn start(&self) -> Result<()> {
        self.command(Command::Start).map(drop)
    }

    pub fn pause(&self) -> Result<()> {
        self.command(Command::Pause).map(drop)
    }

    pub fn resume(&self) -> Result<()> {
        self.command(Command::Resume).map(drop)
    }

    pub fn stop(&self) -> Result<()> {
        self.command(Command::Stop).map(drop)
    }

    pub fn evaluate(&self, samples: usize) -> Result<f32> {
        match self.command(Command::Evaluate(samples))? {
            Reply::Accuracy(acc) => Ok(acc),
            Reply::Status(status) => Err(NetError::InvalidState {
                op: "evaluate",
                status,
            }),
        }
    }

    /// Stop any running loop, end the worker and hand back the network.
    pub fn shutdown(mut self) -> Result<Network> {
        let _ = self.command(Command::Shutdown);
        self.requests.take();
        let handle = self.supervisor.take().ok_or(NetError::WorkerGone)?;
        handle
            .join()
            .ok()
            .flatten()
            .ok_or(NetError::WorkerGone)
    }
}

impl Drop for Trainer {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            let _ = self.command(Command::Shutdown);
            self.requests.take();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Progress;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn failed_launch_falls_back_to_idle() {
        let progress: SharedProgress = Arc::new(Mutex::new(Progress::new(2, 1)));
        progress.lock().status = Status::Training;
        let mut supervisor = Supervisor {
            slot: Slot::Lost,
            progress: Arc::clone(&progress),
        };
        let err = supervisor.abandon_launch(io::Error::new(io::ErrorKind::Other, "no threads"));
        assert!(matches!(err, NetError::Io(_)));
        assert_eq!(progress.lock().status, Status::Idle);
        assert!(matches!(supervisor.handle(Command::Start), Err(NetError::WorkerGone)));
        assert!(matches!(
            supervisor.handle(Command::Evaluate(1)),
            Err(NetError::WorkerGone)
        ));
    }
}
