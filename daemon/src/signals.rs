use std::thread::{self, JoinHandle};

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::sync::oneshot;

use crate::error::Result;

const HANDLED: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Owns the signal-watching thread.
pub struct SignalManager {
    _handle: JoinHandle<()>,
}

/// Resolves once a termination signal has been received. The HTTP server
/// drains in-flight requests when it fires.
#[derive(Debug)]
pub struct ShutdownSignal {
    receiver: oneshot::Receiver<()>,
}

impl ShutdownSignal {
    pub async fn wait(self) {
        let _ = self.receiver.await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    Shutdown,
    Ignore,
}

fn action_for(signal: i32) -> SignalAction {
    match signal {
        SIGTERM | SIGINT | SIGQUIT => SignalAction::Shutdown,
        _ => SignalAction::Ignore,
    }
}

impl SignalManager {
    /// Pid-file cleanup is left to the process guard, which is dropped
    /// after the server has drained.
    pub fn install() -> Result<(Self, ShutdownSignal)> {
        let mut signals = Signals::new(HANDLED)?;
        let (tx, rx) = oneshot::channel();

        let handle = thread::spawn(move || {
            let mut tx = Some(tx);
            for sig in signals.forever() {
                match action_for(sig) {
                    SignalAction::Shutdown => {
                        log::info!("received signal {sig}; draining requests");
                        if let Some(sender) = tx.take() {
                            let _ = sender.send(());
                        }
                        break;
                    }
                    SignalAction::Ignore => log::info!("received signal {sig}; ignoring"),
                }
            }
        });

        Ok((Self { _handle: handle }, ShutdownSignal { receiver: rx }))
    }
}
