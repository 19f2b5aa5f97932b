//! The lifecycle shared by all pipeline stages, and the thread that drives it.

use crate::error::{Error, Result};
use log::{error, info};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A worker in the pipeline. Each tick runs [receive](Self::receive),
/// [act](Self::act) and [send](Self::send) in that order.
pub trait PipelineStage: Send {
    /// A human readable name, used for the thread name and logging.
    fn name(&self) -> &str;

    /// Ingests the latest inputs. Should be cheap.
    fn receive(&mut self);

    /// Runs the stage's algorithm on the inputs.
    fn act(&mut self) -> Result<()>;

    /// Publishes the outputs to downstream stages.
    fn send(&mut self);
}

/// Runs a single tick of a stage.
///
/// An error from [PipelineStage::act] is logged and swallowed, and the
/// outputs are still sent, so a faulty tick cannot stop the pipeline.
pub fn run_tick(stage: &mut dyn PipelineStage) {
    stage.receive();
    if let Err(err) = stage.act() {
        error!("Stage `{}` failed a tick: {}", stage.name(), err);
    }
    stage.send();
}

/// A pipeline stage running on its own thread.
///
/// The stage is stopped and joined when the runner is dropped.
pub struct StageRunner {
    name: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StageRunner {
    /// Starts ticking the stage on a new thread, at most once per `cycle`.
    /// A zero `cycle` ticks as fast as possible.
    ///
    /// A tick that panics is logged and the stage keeps ticking.
    pub fn start<S: PipelineStage + 'static>(mut stage: S, cycle: Duration) -> Result<Self> {
        let name = stage.name().to_string();
        let running = Arc::new(AtomicBool::new(true));

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn({
                let running = running.clone();
                move || {
                    while running.load(Ordering::Acquire) {
                        let start = Instant::now();
                        if catch_unwind(AssertUnwindSafe(|| run_tick(&mut stage))).is_err() {
                            error!("Stage `{}` panicked during a tick", stage.name());
                        }
                        if let Some(rest) = cycle.checked_sub(start.elapsed()) {
                            std::thread::sleep(rest);
                        }
                    }
                }
            })
            .map_err(|source| Error::SpawnStage {
                stage: name.clone(),
                source,
            })?;

        info!("Started stage `{}`", name);
        Ok(Self {
            name,
            running,
            thread: Some(thread),
        })
    }

    /// The name of the stage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the stage's thread is still ticking.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Signals the stage to stop after its current tick, and waits for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Stage `{}` panicked", self.name);
            } else {
                info!("Stopped stage `{}`", self.name);
            }
        }
    }
}

impl Drop for StageRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
