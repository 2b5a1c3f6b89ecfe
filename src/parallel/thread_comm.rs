// In-process multi-rank communicator.
//
// Each rank lives on its own thread and owns one slot of a shared table.
// Reductions publish the local buffer, wait on a barrier, sum all slots in
// rank order (so every rank obtains bitwise the same result) and wait again
// before any slot may be overwritten.
//
// A rank that leaves `ThreadComm::run`, by returning or by panicking, closes
// the group: ranks blocked in a collective wake up with a communication error
// instead of waiting for a partner that will never arrive.

use crate::error::BteError;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Generation barrier that can be closed.
struct Gate {
    arrived: usize,
    generation: u64,
    closed: bool,
}

struct Shared {
    gate: Mutex<Gate>,
    released: Condvar,
    slots: Mutex<Vec<Vec<f64>>>,
}

pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

/// Closes the group when a rank's closure ends, however it ends.
struct Departure<'c>(&'c ThreadComm);

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn closed_group(rank: usize) -> BteError {
    BteError::Communication(format!(
        "rank {rank} entered a collective after another rank left the group"
    ))
}

impl ThreadComm {
    /// Creates `size` connected communicators, one per rank.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "a communicator group needs at least one rank");
        let shared = Arc::new(Shared {
            gate: Mutex::new(Gate { arrived: 0, generation: 0, closed: false }),
            released: Condvar::new(),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| ThreadComm { rank, size, shared: Arc::clone(&shared) })
            .collect()
    }

    /// Runs `f` once per rank on scoped threads and returns the per-rank results
    /// ordered by rank.
    ///
    /// If any rank panics, the other ranks see their pending collectives fail
    /// and the first panic is resumed once every thread has finished.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&ThreadComm) -> R + Sync,
    {
        let comms = Self::group(size);
        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let _departure = Departure(&comm);
                        catch_unwind(AssertUnwindSafe(|| f(&comm)))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(Err))
                .collect()
        });
        let mut results = Vec::with_capacity(size);
        let mut first_panic = None;
        for outcome in outcomes {
            match outcome {
                Ok(r) => results.push(r),
                Err(payload) => {
                    first_panic.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
        results
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.gate().closed = true;
        self.shared.released.notify_all();
    }

    /// Blocks until every rank of the group has arrived, or fails once the
    /// group is closed.
    fn wait(&self) -> Result<(), BteError> {
        let mut gate = self.gate();
        if gate.closed {
            return Err(closed_group(self.rank));
        }
        let generation = gate.generation;
        gate.arrived += 1;
        if gate.arrived == self.size {
            gate.arrived = 0;
            gate.generation += 1;
            self.shared.released.notify_all();
            return Ok(());
        }
        while gate.generation == generation && !gate.closed {
            gate = self.shared.released.wait(gate).unwrap_or_else(PoisonError::into_inner);
        }
        if gate.generation == generation {
            Err(closed_group(self.rank))
        } else {
            Ok(())
        }
    }

    fn publish(&self, buf: &[f64]) -> Result<(), BteError> {
        let mut slots = self
            .shared
            .slots
            .lock()
            .map_err(|_| BteError::Communication("poisoned rank table".into()))?;
        slots[self.rank].clear();
        slots[self.rank].extend_from_slice(buf);
        Ok(())
    }
}

impl super::Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        // a closed group has nothing left to synchronize with
        let _ = self.wait();
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<(), BteError> {
        self.publish(buf)?;
        self.wait()?;
        let result = match self.shared.slots.lock() {
            Ok(slots) => {
                if slots.iter().any(|s| s.len() != buf.len()) {
                    Err(BteError::Communication(format!(
                        "rank {} reduced {} values but the group disagrees on length",
                        self.rank,
                        buf.len()
                    )))
                } else {
                    for (k, x) in buf.iter_mut().enumerate() {
                        *x = slots.iter().fold(0.0, |acc, s| acc + s[k]);
                    }
                    Ok(())
                }
            }
            Err(_) => Err(BteError::Communication("poisoned rank table".into())),
        };
        // every rank must pass the second barrier, even on error
        let released = self.wait();
        result.and(released)
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<(), BteError> {
        if root >= self.size {
            return Err(BteError::Communication(format!("broadcast root {root} out of range")));
        }
        if self.rank == root {
            self.publish(buf)?;
        }
        self.wait()?;
        let result = if self.rank == root {
            Ok(())
        } else {
            match self.shared.slots.lock() {
                Ok(slots) if slots[root].len() == buf.len() => {
                    buf.copy_from_slice(&slots[root]);
                    Ok(())
                }
                Ok(_) => Err(BteError::Communication("broadcast length mismatch".into())),
                Err(_) => Err(BteError::Communication("poisoned rank table".into())),
            }
        };
        let released = self.wait();
        result.and(released)
    }
}
