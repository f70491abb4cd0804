use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use crate::error::{ParforError, Result};

use super::iteration::Task;
use super::partitioner::TaskPartitioner;
use super::queue::LocalTaskQueue;

/// Closes the queue when a worker unwinds, waking a producer blocked on a full queue.
struct CloseOnPanic<'a, T>(&'a LocalTaskQueue<T>);

impl<T> Drop for CloseOnPanic<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() && self.0.close_input() {
            log::warn!("local parfor: worker panicked, closing the task queue");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub tasks: usize,
    pub iterations: u64,
}

/// Runs a parallel loop in-process: one producer streams the partitioner's tasks through
/// a [`LocalTaskQueue`] drained by `workers` threads, each invoking `body` per task.
///
/// After the first body failure the remaining tasks are drained without running; that
/// error is returned. A panicking body closes the queue and the panic is re-raised.
pub fn execute_local<F>(
    partitioner: &dyn TaskPartitioner,
    workers: usize,
    queue_capacity: Option<usize>,
    body: F,
) -> Result<ExecutionSummary>
where
    F: Fn(&Task) -> Result<()> + Sync,
{
    let workers = workers.max(1);
    let queue = LocalTaskQueue::new(queue_capacity);
    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<ParforError>> = Mutex::new(None);
    let tasks = AtomicUsize::new(0);
    let iterations = AtomicU64::new(0);

    let produced = thread::scope(|scope| {
        let producer = scope.spawn(|| {
            let result = partitioner.create_tasks_into(&queue);
            if result.is_err() {
                queue.close_input();
            }
            result
        });

        for _ in 0..workers {
            scope.spawn(|| {
                let _guard = CloseOnPanic(&queue);
                while let Some(task) = queue.dequeue() {
                    if failed.load(Ordering::Acquire) {
                        continue;
                    }
                    match body(&task) {
                        Ok(()) => {
                            tasks.fetch_add(1, Ordering::Relaxed);
                            iterations.fetch_add(task.len(), Ordering::Relaxed);
                        }
                        Err(err) => {
                            failed.store(true, Ordering::Release);
                            let mut slot = first_error.lock().expect("worker error slot poisoned");
                            slot.get_or_insert(err);
                        }
                    }
                }
            });
        }

        match producer.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    });

    if let Some(err) = first_error
        .into_inner()
        .expect("worker error slot poisoned")
    {
        return Err(err);
    }
    let created = produced?;
    let summary = ExecutionSummary {
        tasks: tasks.into_inner(),
        iterations: iterations.into_inner(),
    };
    log::debug!(
        "local parfor: {} workers executed {}/{} tasks ({} iterations)",
        workers,
        summary.tasks,
        created,
        summary.iterations
    );
    Ok(summary)
}
