//! Data-parallel execution of independent tasks.
//!
//! Each task owns exactly one output slot. Failures (error results and
//! panics alike) stay inside their slot: they are logged with the task
//! index and reported as a [`TaskFailure`], never unwound across threads.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Worker count; `None` uses one worker per hardware thread
    pub num_threads: Option<usize>,
}

/// Why a task produced no output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub index: usize,
    pub message: String,
}

pub type TaskOutcome<T> = std::result::Result<T, TaskFailure>;

/// Runs batches of indexed tasks on a thread pool
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    pool: Option<Arc<ThreadPool>>,
}

impl TaskRunner {
    pub fn new(config: &ParallelConfig) -> Result<Self> {
        let pool = match config.num_threads {
            Some(n) => Some(Arc::new(ThreadPoolBuilder::new().num_threads(n).build()?)),
            None => None,
        };
        Ok(Self { pool })
    }

    /// Run `task(0..ntasks)` and return the outcomes in index order.
    ///
    /// Blocks until every task has finished. Execution order is unspecified.
    pub fn run<T, F>(&self, label: &str, ntasks: usize, task: F) -> Vec<TaskOutcome<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync + Send,
    {
        let start = Instant::now();
        let execute = || -> Vec<TaskOutcome<T>> {
            (0..ntasks)
                .into_par_iter()
                .map(|index| run_isolated(label, index, &task))
                .collect()
        };
        let outcomes = match &self.pool {
            Some(pool) => pool.install(execute),
            None => execute(),
        };

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        info!(
            "{}: {} tasks, {} failed, {:.1} ms",
            label,
            ntasks,
            failed,
            start.elapsed().as_secs_f64() * 1000.0
        );
        outcomes
    }
}

fn run_isolated<T, F>(label: &str, index: usize, task: &F) -> TaskOutcome<T>
where
    F: Fn(usize) -> Result<T>,
{
    let message = match catch_unwind(AssertUnwindSafe(|| task(index))) {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(error)) => error.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };
    warn!("{} task [{}]: {}", label, index, message);
    Err(TaskFailure { index, message })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-standard error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_outcomes_follow_index_order() {
        let runner = TaskRunner::default();
        let outcomes = runner.run("square", 64, |i| Ok(i * i));
        let values: Vec<usize> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, (0..64).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_failures_stay_in_their_slot() {
        let runner = TaskRunner::new(&ParallelConfig {
            num_threads: Some(2),
        })
        .unwrap();
        let outcomes = runner.run("mixed", 6, |i| match i {
            2 => Err(Error::Backend("bad sample".into())),
            4 => panic!("detector exploded"),
            _ => Ok(i),
        });

        assert_eq!(outcomes.len(), 6);
        assert_eq!(outcomes[2].as_ref().unwrap_err().index, 2);
        assert!(outcomes[2].as_ref().unwrap_err().message.contains("bad sample"));
        assert!(outcomes[4].as_ref().unwrap_err().message.contains("exploded"));
        for i in [0, 1, 3, 5] {
            assert_eq!(outcomes[i], Ok(i));
        }
    }

    #[test]
    fn test_empty_batch() {
        let outcomes: Vec<TaskOutcome<u8>> = TaskRunner::default().run("none", 0, |_| Ok(1));
        assert!(outcomes.is_empty());
    }
}
