use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;

/// Default bounded-queue depth used by every pipeline in the crate, per the
/// concurrency model: a producer feeding a bounded queue consumed by a pool of
/// workers, with results draining into an unordered collector.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Worker count and queue depth shared by the cache codec and the portable
/// decoder (the `Analyzer` has its own `AnalyzerOptions`, since its tunables
/// are named explicitly: `analysis_parallelism`/`analysis_queue_depth`).
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub worker_count: usize,
    pub queue_depth: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Runs `work` over every item in `inputs` using a bounded queue of depth
/// `queue_depth` and `worker_count` OS threads, collecting whatever survives
/// into an unordered `Vec`.
///
/// `work` returning `None` drops that item without failing the whole batch —
/// used by callers that downgrade rather than abort on a recoverable error.
/// There is no ordering guarantee between `inputs` and the returned `Vec`;
/// downstream code must be order-insensitive, matching the scheduling model.
///
/// Closing the input side is the cooperative cancellation signal: once every
/// item has been sent, the channel closes and idle workers exit once drained.
pub fn run_unordered<In, Out, F>(
    inputs: Vec<In>,
    worker_count: usize,
    queue_depth: usize,
    work: F,
) -> Vec<Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Option<Out> + Send + Sync + 'static,
{
    let worker_count = worker_count.max(1);
    let (input_tx, input_rx) = bounded::<In>(queue_depth.max(1));
    let (output_tx, output_rx) = bounded::<Out>(queue_depth.max(1));
    let work = Arc::new(work);

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let input_rx = input_rx.clone();
            let output_tx = output_tx.clone();
            let work = Arc::clone(&work);
            scope.spawn(move || {
                while let Ok(item) = input_rx.recv() {
                    if let Some(out) = work(item) {
                        // The receiver only disconnects once every worker (and
                        // the producer below) has finished, so this can't fail.
                        let _ = output_tx.send(out);
                    }
                }
            });
        }
        drop(output_tx);

        scope.spawn(move || {
            for item in inputs {
                if input_tx.send(item).is_err() {
                    break;
                }
            }
        });

        output_rx.iter().collect()
    })
}
