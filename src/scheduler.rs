//! Periodic drivers.
//!
//! Four independent tick drivers (one per frequency class) plus the
//! notifier driver, each an async task on its own timer with a command
//! channel for external control. A driver is spawned through its handle and
//! runs until a shutdown command arrives or its channel closes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, warn};

use crate::catalog::FrequencyClass;
use crate::dispatcher::{Dispatcher, TickOutcome};
use crate::notifier::{DrainOutcome, Notifier};

#[derive(Debug)]
pub enum DriverCommand {
    /// Run a tick immediately, outside the timer.
    TickNow {
        respond_to: oneshot::Sender<TickOutcome>,
    },
    Shutdown,
}

struct TickDriver {
    class: FrequencyClass,
    dispatcher: Arc<Dispatcher>,
    tick_interval: Duration,
    command_rx: mpsc::Receiver<DriverCommand>,
}

impl TickDriver {
    #[instrument(skip(self), fields(class = %self.class))]
    async fn run(mut self) {
        debug!("starting tick driver");

        let mut ticker = interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatcher.run_tick(self.class, Utc::now()).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        DriverCommand::TickNow { respond_to } => {
                            let outcome = self.dispatcher.run_tick(self.class, Utc::now()).await;
                            let _ = respond_to.send(outcome);
                        }
                        DriverCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("tick driver stopped");
    }
}

/// Handle for one class driver.
#[derive(Clone)]
pub struct DriverHandle {
    pub class: FrequencyClass,
    sender: mpsc::Sender<DriverCommand>,
}

impl DriverHandle {
    pub fn spawn(
        class: FrequencyClass,
        dispatcher: Arc<Dispatcher>,
        tick_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let driver = TickDriver {
            class,
            dispatcher,
            tick_interval,
            command_rx: cmd_rx,
        };
        tokio::spawn(driver.run());

        Self {
            class,
            sender: cmd_tx,
        }
    }

    /// Trigger a tick immediately and wait for its outcome.
    pub async fn tick_now(&self) -> Option<TickOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DriverCommand::TickNow { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(DriverCommand::Shutdown).await;
    }
}

#[derive(Debug)]
pub enum NotifierCommand {
    DrainNow {
        respond_to: oneshot::Sender<Option<DrainOutcome>>,
    },
    Shutdown,
}

struct NotifierDriver {
    notifier: Arc<Notifier>,
    drain_interval: Duration,
    command_rx: mpsc::Receiver<NotifierCommand>,
}

impl NotifierDriver {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting notifier driver");

        let mut ticker = interval(self.drain_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.notifier.drain().await {
                        warn!("notifier drain failed: {err}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        NotifierCommand::DrainNow { respond_to } => {
                            let outcome = match self.notifier.drain().await {
                                Ok(outcome) => Some(outcome),
                                Err(err) => {
                                    warn!("notifier drain failed: {err}");
                                    None
                                }
                            };
                            let _ = respond_to.send(outcome);
                        }
                        NotifierCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("notifier driver stopped");
    }
}

#[derive(Clone)]
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierCommand>,
}

impl NotifierHandle {
    /// The notifier polls at the critical cadence.
    pub fn spawn(notifier: Arc<Notifier>, drain_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let driver = NotifierDriver {
            notifier,
            drain_interval,
            command_rx: cmd_rx,
        };
        tokio::spawn(driver.run());

        Self { sender: cmd_tx }
    }

    pub async fn drain_now(&self) -> Option<DrainOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotifierCommand::DrainNow { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(NotifierCommand::Shutdown).await;
    }
}
