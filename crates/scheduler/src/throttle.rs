//! CPU-pressure admission control
//!
//! A background sampler reads the current process's CPU utilization on a
//! fixed interval, normalizes it by core count, and publishes an open/closed
//! signal over a watch channel. The dispatch loop stops admitting new work
//! while the gate is closed; work already running is never interrupted.

use std::time::Duration;
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Admission gate fed by process CPU utilization samples
pub struct CpuGate {
    rx: watch::Receiver<bool>,
    // kept alive for the disabled gate, where no sampler holds the sender
    _tx: Option<watch::Sender<bool>>,
    sampler: Option<JoinHandle<()>>,
}

impl CpuGate {
    /// A gate that is always open (no sampler)
    pub fn disabled() -> Self {
        let (tx, rx) = watch::channel(true);
        Self {
            rx,
            _tx: Some(tx),
            sampler: None,
        }
    }

    /// A gate driven by an external sender instead of a sampler
    ///
    /// Starts closed; the caller opens and closes it over the returned
    /// channel. Dropping the sender freezes the gate at its last state.
    pub fn manual() -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let gate = Self {
            rx,
            _tx: None,
            sampler: None,
        };
        (gate, tx)
    }

    /// Start sampling, closing the gate while utilization exceeds the
    /// ceiling
    ///
    /// A ceiling of 100% or more disables the gate entirely. The gate starts
    /// open; the first meaningful sample arrives one interval in.
    pub fn start(ceiling_percent: f32, interval: Duration) -> Self {
        if ceiling_percent >= 100.0 {
            return Self::disabled();
        }
        let (tx, rx) = watch::channel(true);
        let sampler = tokio::spawn(sample_loop(tx, ceiling_percent, interval));
        Self {
            rx,
            _tx: None,
            sampler: Some(sampler),
        }
    }

    /// Whether new dispatch is currently admitted
    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next open/closed transition
    pub async fn wait_change(&mut self) {
        if self.rx.changed().await.is_err() {
            // sampler gone; the last observed value stands forever
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for CpuGate {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
    }
}

async fn sample_loop(tx: watch::Sender<bool>, ceiling_percent: f32, interval: Duration) {
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(e) => {
            warn!(error = %e, "cannot resolve current pid; admission gate stays open");
            return;
        }
    };
    let mut sys = System::new_all();
    loop {
        tokio::time::sleep(interval).await;
        sys.refresh_all();
        let cores = sys.cpus().len().max(1) as f32;
        let usage = sys
            .process(pid)
            .map(|p| p.cpu_usage() / cores)
            .unwrap_or(0.0);
        let open = usage < ceiling_percent;
        trace!(usage, ceiling = ceiling_percent, open, "cpu sample");
        if *tx.borrow() != open {
            debug!(usage, open, "admission gate transition");
        }
        if tx.send(open).is_err() {
            return;
        }
    }
}
