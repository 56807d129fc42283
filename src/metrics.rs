use tracing::trace;

// Trace-level counters; no exporter is wired for a one-shot import.

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "upc_import.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn batch_uploaded(dataset_id: u64, images: usize) {
    trace!(
        target = "upc_import.metrics",
        dataset_id,
        images = images as u64,
        "batch_uploaded"
    );
}
