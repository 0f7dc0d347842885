use rayon::prelude::*;

/// Bounded worker pool used to re-derive history for renamed files.
#[derive(Debug)]
pub enum RenamedFilesPool {
    Rayon(rayon::ThreadPool),
    Inline,
}

impl RenamedFilesPool {
    pub fn new(threads: usize) -> Self {
        // Thread creation can fail under low process limits; shrink the pool and
        // finally run inline instead of failing.
        let mut threads = threads.max(1);
        loop {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|idx| format!("sift-history-renamed-{idx}"))
                .build()
            {
                Ok(pool) => return RenamedFilesPool::Rayon(pool),
                Err(err) if threads > 1 => {
                    tracing::debug!(
                        target = "sift.history",
                        threads,
                        error = %err,
                        "failed to build renamed-files pool; retrying with fewer threads"
                    );
                    threads = (threads / 2).max(1);
                }
                Err(err) => {
                    tracing::warn!(
                        target = "sift.history",
                        error = %err,
                        "failed to build renamed-files pool; running inline"
                    );
                    return RenamedFilesPool::Inline;
                }
            }
        }
    }

    pub fn threads(&self) -> usize {
        match self {
            RenamedFilesPool::Rayon(pool) => pool.current_num_threads(),
            RenamedFilesPool::Inline => 1,
        }
    }

    /// Run `f` for every item and return once all of them have finished.
    pub fn run_all<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match self {
            RenamedFilesPool::Rayon(pool) => pool.install(|| items.par_iter().map(&f).collect()),
            RenamedFilesPool::Inline => items.iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_all_waits_for_every_item() {
        let pool = RenamedFilesPool::new(3);
        let done = AtomicUsize::new(0);
        let items: Vec<usize> = (0..50).collect();

        let results = pool.run_all(&items, |i| {
            done.fetch_add(1, Ordering::SeqCst);
            i * 2
        });

        assert_eq!(done.load(Ordering::SeqCst), 50);
        assert_eq!(results, items.iter().map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn worker_threads_are_named() {
        let pool = RenamedFilesPool::new(2);
        let names = pool.run_all(&[()], |_| {
            std::thread::current().name().map(str::to_owned)
        });
        if let RenamedFilesPool::Rayon(_) = pool {
            let name = names[0].clone().unwrap_or_default();
            assert!(name.starts_with("sift-history-renamed-"), "{name}");
        }
    }
}
