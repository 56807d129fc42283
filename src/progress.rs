use tracing::info;

/// Counts finished items and reports `done/total` through tracing.
#[derive(Debug)]
pub struct Progress {
    message: String,
    total: usize,
    done: usize,
}

impl Progress {
    pub fn new(message: impl Into<String>, total: usize) -> Self {
        Self {
            message: message.into(),
            total,
            done: 0,
        }
    }

    pub fn iter_done(&mut self) {
        self.iters_done(1);
    }

    pub fn iters_done(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.done += count;
        info!(
            target = "upc_import.progress",
            task = %self.message,
            done = self.done,
            total = self.total,
            "progress"
        );
    }

    #[cfg(test)]
    pub fn done(&self) -> usize {
        self.done
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.total
    }
}
