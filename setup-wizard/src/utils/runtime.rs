use anyhow::{Context, Result};
use std::future::Future;

fn current_thread_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

/// Drive an async operation to completion from synchronous code.
///
/// Uses a private current-thread runtime. When the caller is already inside a
/// tokio runtime the future is driven on a scoped helper thread, since a
/// runtime cannot block inside another one.
pub fn run_blocking<F>(fut: F) -> Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        return std::thread::scope(|s| {
            s.spawn(move || {
                let rt = current_thread_runtime()?;
                Ok(rt.block_on(fut))
            })
            .join()
            .map_err(|_| anyhow::anyhow!("Blocking helper thread panicked"))?
        });
    }

    let rt = current_thread_runtime()?;
    Ok(rt.block_on(fut))
}
