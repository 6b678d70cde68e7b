//! # Rank Reductions
//!
//! The hydro model runs domain-decomposed over several ranks. The coupler
//! only ever needs one thing from that substrate: a blocking, deterministic
//! reduction of a scalar across all ranks. Every call is a collective, so all
//! ranks must issue the same reductions in the same order.
//!
//! - [`SerialReducer`]: a single rank, reductions are the identity
//! - [`LocalCollective`]: ranks are threads of one process, synchronised with
//!   a barrier; used to exercise multi-rank coupling without an MPI runtime

use crate::CouplingError;
use std::fmt;
use std::sync::{Arc, Barrier, Mutex};

/// Contribution used by ranks that do not own a value in a max-reduction.
pub const MAX_SENTINEL: f64 = f64::NEG_INFINITY;

/// Contribution used by ranks that do not own a value in a min-reduction.
pub const MIN_SENTINEL: f64 = f64::INFINITY;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    fn identity(self) -> f64 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Max => MAX_SENTINEL,
            ReduceOp::Min => MIN_SENTINEL,
        }
    }

    fn combine(self, acc: f64, value: f64) -> f64 {
        match self {
            ReduceOp::Sum => acc + value,
            ReduceOp::Max => acc.max(value),
            ReduceOp::Min => acc.min(value),
        }
    }

    /// Fold contributions in rank order, so every rank gets the same bits.
    pub fn fold(self, values: impl IntoIterator<Item = f64>) -> f64 {
        values
            .into_iter()
            .fold(self.identity(), |acc, v| self.combine(acc, v))
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceOp::Sum => write!(f, "sum"),
            ReduceOp::Max => write!(f, "max"),
            ReduceOp::Min => write!(f, "min"),
        }
    }
}

/// Blocking all-reduce over the ranks of the hydro model's communicator.
pub trait Reducer {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Combine `value` from every rank. Blocks until all ranks have called.
    fn reduce(&self, value: f64, op: ReduceOp) -> Result<f64, CouplingError>;

    /// Rank 0 by convention runs the serial side of the coupling.
    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Single-rank reducer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialReducer;

impl Reducer for SerialReducer {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn reduce(&self, value: f64, op: ReduceOp) -> Result<f64, CouplingError> {
        Ok(op.fold([value]))
    }
}

struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Option<(ReduceOp, f64)>>>,
}

/// One rank of an in-process communicator.
///
/// Each reduction is two barrier phases: every rank deposits its
/// contribution, then every rank folds the full slot table in rank order and
/// waits again before the slots can be overwritten by the next collective.
/// Ranks that reach the same point with different operations all receive
/// [`CouplingError::CollectiveMismatch`].
pub struct LocalCollective {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl LocalCollective {
    /// Create the `size` ranks of one communicator.
    pub fn group(size: usize) -> Vec<LocalCollective> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![None; size]),
        });
        (0..size)
            .map(|rank| LocalCollective {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn poisoned(&self) -> CouplingError {
        CouplingError::CollectiveMismatch {
            rank: self.rank,
            detail: "another rank panicked inside a collective".to_string(),
        }
    }
}

impl Reducer for LocalCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reduce(&self, value: f64, op: ReduceOp) -> Result<f64, CouplingError> {
        {
            let mut slots = self.shared.slots.lock().map_err(|_| self.poisoned())?;
            slots[self.rank] = Some((op, value));
        }
        self.shared.barrier.wait();

        let outcome = {
            let slots = self.shared.slots.lock().map_err(|_| self.poisoned())?;
            let mut contributions = Vec::with_capacity(self.size);
            let mut mismatch = None;
            for (rank, slot) in slots.iter().enumerate() {
                match slot {
                    Some((other_op, v)) if *other_op == op => contributions.push(*v),
                    Some((other_op, _)) => {
                        mismatch = Some(format!("rank {rank} called {other_op}, this rank called {op}"));
                        break;
                    }
                    None => {
                        mismatch = Some(format!("rank {rank} did not contribute"));
                        break;
                    }
                }
            }
            match mismatch {
                Some(detail) => Err(CouplingError::CollectiveMismatch {
                    rank: self.rank,
                    detail,
                }),
                None => Ok(op.fold(contributions)),
            }
        };
        self.shared.barrier.wait();

        outcome
    }
}
