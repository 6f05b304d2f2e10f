use anyhow::{anyhow, bail, Result};
use log::{error, info};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use funnel_core::error_bail;

use funnel_core::ordered_sink::{AppendOutput, OrderedSink};
use funnel_core::sequencer::Sequencer;

use crate::json_formatter::{format_chunk, format_footer};
use crate::record::Record;

/// `ChunkPipeline` is the host side of the ordered sink contract.
///
/// It splits a record stream into fixed-size chunks, takes the sequence
/// number for each chunk from the `Sequencer` before dispatching it, fans
/// the chunks out to `worker_num` concurrent workers over a channel, and
/// closes the sink exactly once when the input is exhausted. The workers
/// format independently and may finish in any order; the sink restores the
/// sequence order on the way to the file.
///
/// One `ChunkPipeline` instance drives one output file and is consumed by
/// one run.
pub struct ChunkPipeline<I, W: AppendOutput> {
    /// Record stream, already in output order.
    records: I,

    /// The shared sink. Exclusive owner of the output handle.
    sink: Arc<OrderedSink<W>>,

    /// Records per chunk. The interleaving defect shows up most readily
    /// with small chunks, since more fragments are in flight at once.
    chunk_size: usize,

    /// Number of concurrent formatting workers.
    worker_num: usize,
}

impl<I, W> ChunkPipeline<I, W>
where
    I: Iterator<Item = Record> + Send + 'static,
    W: AppendOutput + Send + 'static,
{
    pub fn new(records: I, sink: Arc<OrderedSink<W>>, chunk_size: usize, worker_num: usize) -> Self {
        Self {
            records,
            sink,
            chunk_size,
            worker_num,
        }
    }

    /// Run the pipeline under a shutdown-aware subsystem.
    ///
    /// A shutdown request aborts the sink, so workers parked in `submit`
    /// are released instead of hanging, and the run is reported as failed.
    /// A partial file is never a successful run.
    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        let sink = self.sink.clone();

        tokio::select! {
            res = self.drive() => res,
            _ = subsys.on_shutdown_requested() => {
                info!("chunk pipeline shutdown requested");
                sink.abort().await;
                Err(anyhow!("chunk pipeline aborted by shutdown"))
            }
        }
    }

    async fn drive(mut self) -> Result<()> {
        if self.chunk_size == 0 {
            error_bail!("chunk_size must be at least 1");
        }

        if self.worker_num == 0 {
            error_bail!("worker_num must be at least 1");
        }

        let (sender, receiver) = async_channel::bounded::<(u64, Vec<Record>)>(256);

        let sequencer = Sequencer::new();

        let mut workers = JoinSet::new();
        for i in 0..self.worker_num {
            let receiver = receiver.clone();
            let sink = self.sink.clone();

            info!("start chunk pipeline worker {}", i);

            workers.spawn(async move {
                while let Ok((seq, chunk)) = receiver.recv().await {
                    let fragment = format_chunk(seq, &chunk)?;
                    sink.submit(seq, fragment).await?;
                }

                Ok::<(), anyhow::Error>(())
            });
        }

        let mut count_chunks = 0u64;
        loop {
            let chunk: Vec<Record> = self.records.by_ref().take(self.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }

            // The sequence number is taken when the chunk is accepted,
            // before any worker touches it. This is the only ordering key
            // in the whole pipeline.
            let seq = sequencer.next();
            count_chunks += 1;

            sender
                .send((seq, chunk))
                .await
                .map_err(|_| anyhow!("send chunk to worker failed, seq: {}", seq))?;
        }

        sender.close();

        // Workers are joined in completion order. A worker that fails, or
        // panics, exits without submitting its sequence number, which would
        // leave the workers parked behind that gap waiting forever; aborting
        // the sink on the first failure releases them so the drain here
        // terminates.
        let mut first_err: Option<anyhow::Error> = None;
        while let Some(res) = workers.join_next().await {
            let err = match res {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(anyhow!("chunk worker panicked: {}", e)),
            };

            if let Some(e) = err {
                if first_err.is_none() {
                    error!("chunk worker failed, aborting sink, error: {}", e);
                    self.sink.abort().await;
                    first_err = Some(e);
                }
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        // The footer takes the last sequence number, so it lands after every
        // record fragment.
        let footer_seq = sequencer.next();
        self.sink
            .submit(footer_seq, format_footer(footer_seq == 0))
            .await?;

        self.sink.close().await?;

        info!("chunk pipeline done, chunks: {}", count_chunks);

        Ok(())
    }
}

impl<I> ChunkPipeline<I, File>
where
    I: Iterator<Item = Record> + Send + 'static,
{
    /// Run one complete pipeline over a fresh file at `path`.
    pub async fn start_local_run(
        path: &str,
        records: I,
        chunk_size: usize,
        worker_num: usize,
    ) -> Result<()> {
        let file = File::create(path)?;
        let sink = Arc::new(OrderedSink::new(file));

        let pipeline = ChunkPipeline::new(records, sink, chunk_size, worker_num);

        Toplevel::new(|s| async move {
            s.start(SubsystemBuilder::new("chunk_pipeline", |h| pipeline.run(h)));
        })
        .catch_signals()
        .handle_shutdown_requests(Duration::from_millis(1000))
        .await
        .map_err(|e| anyhow!("chunk pipeline failed: {}", e))
    }
}
