pub type TaskResult<R> = std::thread::Result<R>;

/// Spawn the given task within the given ThreadPool.
/// Use the provided Sender to send the result of the task execution.
///
/// The result will contain the effective result or the payload
/// of the panic that occurred.
pub fn spawn_task<F, R>(
    thread_pool: &threadpool::ThreadPool,
    task: F,
    tx: crossbeam_channel::Sender<TaskResult<R>>,
) where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    thread_pool.execute(move || {
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task()));
        let _ = tx.send(res);
    });
}

/// Blocks waiting for completion of `n` tasks spawned with [`spawn_task`] on the same channel.
///
/// Panics if a sender is dropped before its task completes.
///
/// Every task is awaited before the payload of the first panic, if any, is resumed, so no task
/// outlives this call.
pub fn join_tasks<R>(receiver: &crossbeam_channel::Receiver<TaskResult<R>>, n: usize) -> Vec<R>
where
    R: Send + 'static,
{
    let mut results = Vec::with_capacity(n);
    let mut panic = None;
    for _ in 0..n {
        // UNWRAP: The sender is not expected to be dropped by the spawned task.
        match receiver.recv().unwrap() {
            Ok(res) => results.push(res),
            Err(err_payload) => {
                panic.get_or_insert(err_payload);
            }
        }
    }

    if let Some(err_payload) = panic {
        std::panic::resume_unwind(err_payload);
    }
    results
}
