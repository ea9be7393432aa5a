/// Bounded task pool for independent per-unit jobs.
///
/// Jobs are collected with `submit` and run by `join_all` on a dedicated
/// rayon pool of `threads * factor` workers. Every submitted job runs to
/// completion; failures are reported only after the whole batch finishes.
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

type Job<'a, T> = Box<dyn FnOnce() -> Result<T> + Send + 'a>;

pub struct TaskPool<'a, T> {
    label: String,
    size: usize,
    progress_every: usize,
    jobs: Vec<Job<'a, T>>,
}

impl<'a, T: Send> TaskPool<'a, T> {
    /// `label` names the batch in the error raised when any job fails
    /// (e.g. `A REGENIE step 2 thread failed`).
    pub fn new(label: impl Into<String>, threads: usize, factor: usize) -> Self {
        Self {
            label: label.into(),
            size: (threads * factor).max(1),
            progress_every: 10,
            jobs: Vec::new(),
        }
    }

    /// Log a progress line after every `n` completed jobs.
    pub fn progress_every(mut self, n: usize) -> Self {
        self.progress_every = n.max(1);
        self
    }

    pub fn submit<F>(&mut self, job: F)
    where
        F: FnOnce() -> Result<T> + Send + 'a,
    {
        self.jobs.push(Box::new(job));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every job and return their results in submission order, or the
    /// first failure (in submission order) tagged with the batch label.
    pub fn join_all(self) -> Result<Vec<T>> {
        let total = self.jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.size)
            .build()
            .with_context(|| format!("building a {}-thread pool", self.size))?;

        let done = AtomicUsize::new(0);
        let every = self.progress_every;
        let outcomes: Vec<Result<T>> = pool.install(|| {
            self.jobs
                .into_par_iter()
                .map(|job| {
                    let outcome = job();
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    if n % every == 0 || n == total {
                        log::info!("{} of {} jobs finished", n, total);
                    }
                    outcome
                })
                .collect()
        });

        let mut results = Vec::with_capacity(total);
        for outcome in outcomes {
            results.push(outcome.context(self.label.clone())?);
        }
        Ok(results)
    }
}
