//! Session worker for async callers.
//!
//! The session does blocking serial I/O, so it lives on its own OS thread and is
//! driven through messages. Commands go over an mpsc channel; each carries a
//! oneshot sender for its reply.
//!
//! ```text
//! Caller (async)                      Session thread
//! --------------                      --------------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                     3. Receive command
//!                                     4. Run it on the session (blocking)
//!                                     5. Send reply
//! 6. Await oneshot receiver   <------
//! ```
//!
//! Incremental sweeps stream their points over an unbounded channel while the
//! sweep runs, so a plot can follow the acquisition live.

use crate::adapters::Transport;
use crate::error::{AnalyserError, AppResult};
use crate::hardware::state::{BaudRate, DataFormat, InstrumentState, Mode};
use crate::hardware::sweep::{AcquisitionMode, CancelToken, SweepResult, TracePoint};
use crate::hardware::te300x::Te300x;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 32;

/// Reply carrying the confirmed configuration after a setting changed.
pub type StateReply = oneshot::Sender<AppResult<InstrumentState>>;

/// Commands understood by the session thread.
#[derive(Debug)]
pub enum SessionCommand {
    /// Snapshot of the confirmed configuration.
    GetState {
        /// Reply channel.
        response: oneshot::Sender<InstrumentState>,
    },
    /// Set sweep range and point count.
    SetFrequencyRange {
        /// Start frequency in Hz.
        fmin: f64,
        /// Stop frequency in Hz.
        fmax: f64,
        /// Number of points.
        points: u32,
        /// Reply channel.
        response: StateReply,
    },
    /// Set the averaging factor.
    SetAveraging {
        /// Averaging factor.
        averaging: u32,
        /// Reply channel.
        response: StateReply,
    },
    /// Set the output level in percent.
    SetOutput {
        /// Output level.
        percent: f64,
        /// Reply channel.
        response: StateReply,
    },
    /// Set the reference impedance.
    SetZ0 {
        /// Reference impedance in Ohm.
        z0: f64,
        /// Reply channel.
        response: StateReply,
    },
    /// Select the measurement mode.
    SetMode {
        /// Mode.
        mode: Mode,
        /// Reply channel.
        response: StateReply,
    },
    /// Select the output data format.
    SetFormat {
        /// Format.
        format: DataFormat,
        /// Reply channel.
        response: StateReply,
    },
    /// Change the line speed.
    SetBaudRate {
        /// New rate.
        rate: BaudRate,
        /// Reply channel.
        response: StateReply,
    },
    /// Read the firmware version.
    ReadVersion {
        /// Reply channel.
        response: oneshot::Sender<AppResult<String>>,
    },
    /// Read the output data format.
    ReadFormat {
        /// Reply channel.
        response: oneshot::Sender<AppResult<String>>,
    },
    /// Measure at one frequency.
    ReadSingle {
        /// Frequency in Hz.
        frequency: f64,
        /// Reply channel.
        response: oneshot::Sender<AppResult<TracePoint>>,
    },
    /// Acquire one sweep.
    Sweep {
        /// Acquisition strategy.
        mode: AcquisitionMode,
        /// Receives every point of an incremental sweep as it arrives.
        progress: Option<mpsc::UnboundedSender<TracePoint>>,
        /// Cancels an incremental sweep.
        cancel: CancelToken,
        /// Reply channel.
        response: oneshot::Sender<AppResult<SweepResult>>,
    },
    /// Close the session and stop the thread.
    Shutdown {
        /// Signalled once the session is closed.
        response: oneshot::Sender<()>,
    },
}

/// Owner of the session thread.
pub struct AnalyserWorker;

impl AnalyserWorker {
    /// Move `session` onto a dedicated thread and return a handle to it.
    ///
    /// The thread exits after [`AnalyserHandle::shutdown`] or once every handle
    /// is dropped; the session is closed either way.
    pub fn spawn<T>(session: Te300x<T>) -> AppResult<AnalyserHandle>
    where
        T: Transport + 'static,
    {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let port = session.port().to_string();
        std::thread::Builder::new()
            .name(format!("te300x-{port}"))
            .spawn(move || run(session, rx))?;
        info!(port = %port, "Session worker started");
        Ok(AnalyserHandle { tx })
    }
}

fn run<T: Transport>(mut session: Te300x<T>, mut rx: mpsc::Receiver<SessionCommand>) {
    while let Some(command) = rx.blocking_recv() {
        debug!(?command, "Worker command");
        match command {
            SessionCommand::GetState { response } => {
                let _ = response.send(session.state().clone());
            }
            SessionCommand::SetFrequencyRange {
                fmin,
                fmax,
                points,
                response,
            } => {
                let result = session.set_frequency_range(fmin, fmax, points);
                let _ = response.send(result.map(|()| session.state().clone()));
            }
            SessionCommand::SetAveraging {
                averaging,
                response,
            } => {
                let result = session.set_averaging(averaging);
                let _ = response.send(result.map(|()| session.state().clone()));
            }
            SessionCommand::SetOutput { percent, response } => {
                let result = session.set_output(percent);
                let _ = response.send(result.map(|()| session.state().clone()));
            }
            SessionCommand::SetZ0 { z0, response } => {
                let result = session.set_z0(z0);
                let _ = response.send(result.map(|()| session.state().clone()));
            }
            SessionCommand::SetMode { mode, response } => {
                let result = session.set_mode(mode);
                let _ = response.send(result.map(|()| session.state().clone()));
            }
            SessionCommand::SetFormat { format, response } => {
                let result = session.set_format(format);
                let _ = response.send(result.map(|()| session.state().clone()));
            }
            SessionCommand::SetBaudRate { rate, response } => {
                let result = session.set_baudrate(rate);
                let _ = response.send(result.map(|()| session.state().clone()));
            }
            SessionCommand::ReadVersion { response } => {
                let _ = response.send(session.read_version());
            }
            SessionCommand::ReadFormat { response } => {
                let _ = response.send(session.read_format());
            }
            SessionCommand::ReadSingle {
                frequency,
                response,
            } => {
                let _ = response.send(session.read_single(frequency));
            }
            SessionCommand::Sweep {
                mode,
                progress,
                cancel,
                response,
            } => {
                let result = match progress {
                    Some(mut tx) => session.acquire(mode, &mut tx, &cancel),
                    None => session.acquire(mode, &mut |_: &[TracePoint]| {}, &cancel),
                };
                let _ = response.send(result);
            }
            SessionCommand::Shutdown { response } => {
                session.close();
                let _ = response.send(());
                break;
            }
        }
    }
    session.close();
    info!(port = %session.port(), "Session worker stopped");
}

/// Cloneable async handle to a session thread.
#[derive(Clone, Debug)]
pub struct AnalyserHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl AnalyserHandle {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> AppResult<R> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(build(response))
            .await
            .map_err(|_| AnalyserError::NotConnected)?;
        rx.await.map_err(|_| AnalyserError::NotConnected)
    }

    /// Whether the session thread is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Confirmed configuration.
    pub async fn state(&self) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::GetState { response })
            .await
    }

    /// See [`Te300x::set_frequency_range`].
    pub async fn set_frequency_range(
        &self,
        fmin: f64,
        fmax: f64,
        points: u32,
    ) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::SetFrequencyRange {
            fmin,
            fmax,
            points,
            response,
        })
        .await?
    }

    /// See [`Te300x::set_averaging`].
    pub async fn set_averaging(&self, averaging: u32) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::SetAveraging {
            averaging,
            response,
        })
        .await?
    }

    /// See [`Te300x::set_output`].
    pub async fn set_output(&self, percent: f64) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::SetOutput { percent, response })
            .await?
    }

    /// See [`Te300x::set_z0`].
    pub async fn set_z0(&self, z0: f64) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::SetZ0 { z0, response })
            .await?
    }

    /// See [`Te300x::set_mode`].
    pub async fn set_mode(&self, mode: Mode) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::SetMode { mode, response })
            .await?
    }

    /// See [`Te300x::set_format`].
    pub async fn set_format(&self, format: DataFormat) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::SetFormat { format, response })
            .await?
    }

    /// See [`Te300x::set_baudrate`].
    pub async fn set_baudrate(&self, rate: BaudRate) -> AppResult<InstrumentState> {
        self.request(|response| SessionCommand::SetBaudRate { rate, response })
            .await?
    }

    /// See [`Te300x::read_version`].
    pub async fn read_version(&self) -> AppResult<String> {
        self.request(|response| SessionCommand::ReadVersion { response })
            .await?
    }

    /// See [`Te300x::read_format`].
    pub async fn read_format(&self) -> AppResult<String> {
        self.request(|response| SessionCommand::ReadFormat { response })
            .await?
    }

    /// See [`Te300x::read_single`].
    pub async fn read_single(&self, frequency: f64) -> AppResult<TracePoint> {
        self.request(|response| SessionCommand::ReadSingle {
            frequency,
            response,
        })
        .await?
    }

    /// Acquire one sweep; incremental points go to `progress` as they arrive.
    pub async fn sweep(
        &self,
        mode: AcquisitionMode,
        progress: Option<mpsc::UnboundedSender<TracePoint>>,
        cancel: CancelToken,
    ) -> AppResult<SweepResult> {
        self.request(|response| SessionCommand::Sweep {
            mode,
            progress,
            cancel,
            response,
        })
        .await?
    }

    /// Sweep repeatedly until `cancel` fires or `results` is dropped.
    ///
    /// Every completed trace is sent over `results`. Returns the number of
    /// completed sweeps; a cancelled sweep ends the loop without error.
    pub async fn sweep_continuously(
        &self,
        mode: AcquisitionMode,
        results: mpsc::UnboundedSender<SweepResult>,
        cancel: CancelToken,
    ) -> AppResult<usize> {
        let mut completed = 0;
        while !cancel.is_cancelled() {
            match self.sweep(mode, None, cancel.clone()).await {
                Ok(trace) => {
                    completed += 1;
                    if results.send(trace).is_err() {
                        break;
                    }
                }
                Err(err) if matches!(err.root(), AnalyserError::Cancelled) => break,
                Err(err) => {
                    warn!(error = %err, completed, "Continuous acquisition stopped");
                    return Err(err);
                }
            }
        }
        info!(completed, "Continuous acquisition finished");
        Ok(completed)
    }

    /// Close the session and stop its thread.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(|response| SessionCommand::Shutdown { response })
            .await
    }
}
