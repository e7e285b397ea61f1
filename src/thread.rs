//! Worker-thread plumbing for the cohort.
//!
//! Every pool worker runs on its own OS thread, pinned to the core matching
//! its worker id. The thread owns the cohort protocol: rendezvous at the
//! start barrier, run the workload mask, raise the shared failed flag on
//! error, and rendezvous again at the finish barrier so the coordinator
//! only reads the registry once the whole cohort has quiesced.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;

use crate::runner::SharedState;
use crate::worker::Worker;

/// Pins the calling thread to the core matching `worker_id`, wrapping
/// around when the cohort is larger than the machine. Best effort; failing
/// to pin only costs measurement stability.
pub fn pin_to_core(worker_id: usize) {
    if let Some(cores) = core_affinity::get_core_ids() {
        if !cores.is_empty() {
            core_affinity::set_for_current(cores[worker_id % cores.len()]);
        }
    }
}

/// Runs one pool worker through the whole cohort protocol on a fresh OS
/// thread.
///
/// The worker is dropped (detaching its histogram bucket and releasing its
/// driver handle) and the failed flag is raised before the finish barrier,
/// so by the time the coordinator passes that barrier the registry's active
/// count and the flag are settled.
pub fn spawn_worker(worker: Worker, shared: Arc<SharedState>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut worker = worker;
        let id = worker.id();
        pin_to_core(id);

        shared.start_barrier.wait();
        let rc = worker.fulfil();
        drop(worker);
        if let Err(err) = rc {
            debug!("worker.{id} failed: {err}");
            shared.failed.store(true, Ordering::Relaxed);
        }
        shared.finish_barrier.wait();
    })
}

/// Joins the whole pool. A worker thread that panicked takes the process
/// down here instead of being silently lost.
pub fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        assert!(handle.join().is_ok(), "worker thread panicked");
    }
}
