//! Debounced query recording.
//!
//! Typing in the search box produces a stream of numbers. The recorder only
//! counts one as a query once input has been idle for the settle interval, so
//! `1`, `12`, `123` typed in quick succession records `123` once. The same
//! number is never recorded twice in a row.
//!
//! A background thread does the waiting; `submit` never blocks on the
//! statistics file.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::catalog::HymnNumber;
use crate::stats::StatisticsStore;

#[derive(Debug, Copy, Clone)]
pub struct RecorderConfig {
    pub settle_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            settle_interval_ms: 2_000,
        }
    }
}

pub struct QueryRecorder {
    tx: Option<Sender<HymnNumber>>,
    recorded: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl QueryRecorder {
    pub fn new(stats: Arc<StatisticsStore>, config: RecorderConfig) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<HymnNumber>();
        let recorded = Arc::new(AtomicUsize::new(0));
        let handle = spawn_recorder(rx, stats, config, Arc::clone(&recorded));

        Self {
            tx: Some(tx),
            recorded,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, number: HymnNumber) {
        if let Some(tx) = self.tx.as_ref()
            && tx.send(number).is_err()
        {
            debug!("Recorder already stopped; dropping #{number}");
        }
    }

    /// Queries actually written so far.
    pub fn recorded_count(&self) -> usize {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Stops the thread, recording whatever number was still settling.
    pub fn shutdown_and_flush(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for QueryRecorder {
    fn drop(&mut self) {
        self.shutdown_and_flush();
    }
}

fn spawn_recorder(
    rx: Receiver<HymnNumber>,
    stats: Arc<StatisticsStore>,
    config: RecorderConfig,
    recorded: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let settle = Duration::from_millis(config.settle_interval_ms);
        let mut pending: Option<HymnNumber> = None;
        let mut last_recorded: Option<HymnNumber> = None;

        loop {
            match rx.recv_timeout(settle) {
                Ok(number) => pending = Some(number),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(number) = pending.take() {
                        record(&stats, number, &mut last_recorded, &recorded);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(number) = pending.take() {
                        record(&stats, number, &mut last_recorded, &recorded);
                    }
                    break;
                }
            }
        }
    })
}

fn record(
    stats: &StatisticsStore,
    number: HymnNumber,
    last_recorded: &mut Option<HymnNumber>,
    recorded: &AtomicUsize,
) {
    if *last_recorded == Some(number) {
        debug!("Hymn #{number} was the last query; not recording again");
        return;
    }
    match stats.record_access(number, true, false) {
        Ok(_) => {
            debug!("Recorded query for hymn #{number}");
            *last_recorded = Some(number);
            recorded.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => warn!("{err}"),
    }
}
