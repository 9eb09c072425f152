//! Pipeline topology construction and the run loop

use std::sync::Arc;

use anyhow::{Context, Result};
use commerce_events::{CategorySales, DailySales, IngestedTransaction, MonthlySales};
use event_source::TransactionSource;
use index_sink::IndexSink;
use keyed_aggregator::{EventDeduper, KeyedAggregator};
use sink_router::{progress_reporters, spawn_watermark_monitor, SinkFailure, SinkRouter};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{error, info, warn};
use upsert_sink::{
    init_schema, BatchedUpsertSink, CategorySalesWriter, DailySalesWriter, MonthlySalesWriter,
    TransactionsWriter,
};

use crate::config::PipelineConfig;
use crate::sinks::{AggregatingSink, DocumentSink, RawTransactionSink};

const SINK_COUNT: usize = 5;

/// A fully wired pipeline ready to run.
///
/// Construction connects the database, prepares the schema, and registers
/// the five sink pipelines; `run` drives events from the source through
/// dedupe and fan-out until shutdown is requested or ingress fails. Each
/// sink acknowledges flushed sequences; the source commits log offsets only
/// up to the watermark all five agree on.
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<TransactionSource>,
    router: SinkRouter<IngestedTransaction>,
    deduper: EventDeduper,
    failures: mpsc::UnboundedReceiver<SinkFailure>,
    acks: mpsc::UnboundedReceiver<(usize, u64)>,
}

impl Pipeline {
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.store.max_connections)
            .connect(&config.store.url)
            .await
            .context("failed to connect to the transaction store")?;
        init_schema(&pool).await.context("failed to initialize store schema")?;

        let source = Arc::new(
            TransactionSource::new(&config.source).context("failed to create event source")?,
        );

        let batch = config.batching.to_batch_config();
        let shards = config.service.aggregator_shards;
        let capacity = config.service.channel_capacity;

        let (failure_tx, failures) = mpsc::unbounded_channel();
        let mut router = SinkRouter::new(failure_tx);
        let (reporters, acks) = progress_reporters(SINK_COUNT);
        let mut reporters = reporters.into_iter();

        router.register(
            "transactions",
            capacity,
            Box::new(RawTransactionSink::new(
                BatchedUpsertSink::new(TransactionsWriter::new(pool.clone()), batch.clone()),
                reporters.next().context("missing progress reporter")?,
            )),
        );
        router.register(
            "sales_per_category",
            capacity,
            Box::new(AggregatingSink::new(
                KeyedAggregator::with_shards(shards, CategorySales::key, CategorySales::combine),
                BatchedUpsertSink::new(CategorySalesWriter::new(pool.clone()), batch.clone()),
                reporters.next().context("missing progress reporter")?,
            )),
        );
        router.register(
            "sales_per_day",
            capacity,
            Box::new(AggregatingSink::new(
                KeyedAggregator::with_shards(shards, DailySales::key, DailySales::combine),
                BatchedUpsertSink::new(DailySalesWriter::new(pool.clone()), batch.clone()),
                reporters.next().context("missing progress reporter")?,
            )),
        );
        router.register(
            "sales_per_month",
            capacity,
            Box::new(AggregatingSink::new(
                KeyedAggregator::with_shards(shards, MonthlySales::key, MonthlySales::combine),
                BatchedUpsertSink::new(MonthlySalesWriter::new(pool), batch),
                reporters.next().context("missing progress reporter")?,
            )),
        );
        router.register(
            "search_index",
            capacity,
            Box::new(DocumentSink::new(
                IndexSink::new(config.index.clone()).context("failed to create index sink")?,
                reporters.next().context("missing progress reporter")?,
            )),
        );

        Ok(Self { config, source, router, deduper: EventDeduper::new(), failures, acks })
    }

    /// Run until `shutdown` fires or the source terminates.
    pub async fn run(mut self, shutdown: oneshot::Receiver<()>) -> Result<()> {
        info!(
            topic = %self.config.source.topic,
            brokers = %self.config.source.brokers,
            "starting commerce pipeline"
        );

        let (events_tx, mut events_rx) =
            mpsc::channel::<IngestedTransaction>(self.config.service.channel_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (watermark_tx, watermark_rx) = watch::channel(0u64);

        // Translate the one-shot shutdown signal into the source's stop flag.
        let stop_on_signal = stop_tx.clone();
        tokio::spawn(async move {
            let _ = shutdown.await;
            let _ = stop_on_signal.send(true);
        });

        let watermark_monitor = spawn_watermark_monitor(SINK_COUNT, self.acks, watermark_tx);

        let source = self.source;
        let source_metrics = source.metrics();
        let run_source = source.clone();
        let source_handle =
            tokio::spawn(async move { run_source.run(events_tx, stop_rx, watermark_rx).await });

        // Surface per-sink failures without interrupting the flow.
        let mut failures = self.failures;
        let failure_observer = tokio::spawn(async move {
            let mut count: u64 = 0;
            while let Some(failure) = failures.recv().await {
                count += 1;
                error!(sink = %failure.sink, error = %failure.error, "sink pipeline failure");
            }
            count
        });

        // Main loop: dedupe, then fan out. Ends when the source drops its
        // sender, either after a clean stop or a fatal ingress error.
        let mut duplicates: u64 = 0;
        while let Some(event) = events_rx.recv().await {
            if !self.deduper.first_sight(&event.transaction.transaction_id) {
                duplicates += 1;
                continue;
            }
            if let Err(e) = self.router.route(event).await {
                let _ = stop_tx.send(true);
                return Err(e).context("all sink pipelines are unavailable");
            }
        }

        info!("ingress closed, draining sinks");
        let router_metrics = self.router.metrics();
        let drained = timeout(self.config.shutdown_timeout(), self.router.shutdown()).await.is_ok();
        if drained {
            info!("sink pipelines drained");
        } else {
            warn!("sink pipelines did not drain within timeout, forcing shutdown");
        }

        match source_handle.await {
            Ok(Ok(())) => info!("event source stopped gracefully"),
            Ok(Err(e)) => return Err(e).context("event source failed"),
            Err(e) => error!("event source task failed: {}", e),
        }

        // Once the workers have exited every acknowledgement is in flight or
        // delivered; the monitor's final minimum bounds the last commit. A
        // cut-short drain skips the commit and replays on restart instead.
        if drained {
            if let Ok(acknowledged) = watermark_monitor.await {
                source.commit_final(acknowledged);
            }
        } else {
            watermark_monitor.abort();
        }

        // Error channel senders are gone once the workers have exited; if
        // the drain was cut short the workers still hold theirs, so do not
        // wait on the observer in that case.
        let failure_count = if drained {
            failure_observer.await.unwrap_or(0)
        } else {
            failure_observer.abort();
            0
        };
        info!(
            delivered = source_metrics.delivered(),
            malformed = source_metrics.malformed(),
            committed = source_metrics.committed(),
            routed = router_metrics.routed,
            duplicates,
            sink_failures = failure_count,
            "pipeline stopped"
        );
        Ok(())
    }
}
