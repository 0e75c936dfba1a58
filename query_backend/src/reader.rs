//! The query fan-out.

use std::{
    collections::HashSet,
    sync::Arc,
};

use prometheus::{IntCounter, Registry};
use tokio::task::JoinSet;
use tracing::{error, warn};

use block::{BlockMeta, BlockObject, Dataset};
use data_types::{parse_selector, Matcher};
use objstore::Bucket;

use crate::{aggregator::Aggregators, InvokeRequest, InvokeResponse, QueryError};

/// Metrics of the block reader.
#[derive(Debug, Clone)]
pub struct ReaderMetrics {
    pub(crate) tenant_isolation_failures: IntCounter,
}

impl ReaderMetrics {
    pub fn new(registry: Option<&Registry>) -> Self {
        let tenant_isolation_failures = IntCounter::new(
            "query_backend_dataset_tenant_isolation_failures_total",
            "Datasets dropped because their tenant was not in the query tenant set",
        )
        .expect("valid metric definition");
        if let Some(registry) = registry {
            let _ = registry.register(Box::new(tenant_isolation_failures.clone()));
        }
        Self {
            tenant_isolation_failures,
        }
    }

    /// Number of datasets dropped by tenant-isolation enforcement.
    pub fn isolation_failures(&self) -> u64 {
        self.tenant_isolation_failures.get()
    }
}

/// Reads blocks from object storage and evaluates queries over their
/// datasets.
#[derive(Debug)]
pub struct BlockReader {
    bucket: Arc<dyn Bucket>,
    metrics: ReaderMetrics,
}

struct ValidatedRequest {
    matchers: Vec<Matcher>,
    start_ms: i64,
    end_ms: i64,
}

impl BlockReader {
    pub fn new(bucket: Arc<dyn Bucket>, registry: Option<&Registry>) -> Self {
        Self {
            bucket,
            metrics: ReaderMetrics::new(registry),
        }
    }

    pub fn metrics(&self) -> &ReaderMetrics {
        &self.metrics
    }

    /// Execute a query over the blocks in the request's plan.
    ///
    /// Work fans out per `(block, dataset)`; the first fatal error aborts the
    /// remaining workers. Datasets owned by tenants outside the request's
    /// tenant set are dropped and counted, and the query proceeds with the
    /// remainder. Dropping the returned future aborts all workers.
    pub async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, QueryError> {
        let validated = validate_request(&request)?;

        let tenants: HashSet<&str> = request.tenants.iter().map(String::as_str).collect();
        let aggregators = Arc::new(Aggregators::new(&request.query));
        let context = Arc::new(WorkerContext {
            matchers: validated.matchers,
            start_ms: validated.start_ms,
            end_ms: validated.end_ms,
            aggregators: Arc::clone(&aggregators),
        });

        let mut workers: JoinSet<Result<(), QueryError>> = JoinSet::new();
        for meta in &request.query_plan {
            let datasets = self.filter_owned_datasets(meta, &tenants);
            if datasets.is_empty() {
                continue;
            }
            let bucket = Arc::clone(&self.bucket);
            // The worker sees only the datasets the caller owns.
            let mut meta = meta.clone();
            meta.datasets = datasets;
            let context = Arc::clone(&context);
            workers.spawn(async move {
                // One fetch per block; its datasets are processed
                // concurrently against the shared aggregators.
                let object = BlockObject::open(&*bucket, meta).await?;
                let object = Arc::new(object);
                let mut units: JoinSet<Result<(), QueryError>> = JoinSet::new();
                for ds in object.meta().datasets.clone() {
                    let object = Arc::clone(&object);
                    let context = Arc::clone(&context);
                    units.spawn(async move {
                        let reader = object.dataset(&ds)?;
                        context.aggregators.consume_dataset(
                            &reader,
                            &context.matchers,
                            context.start_ms,
                            context.end_ms,
                        )
                    });
                }
                join_all(units).await
            });
        }

        join_all(workers).await?;
        drop(context);

        let aggregators = Arc::try_unwrap(aggregators)
            .map_err(|_| QueryError::Internal("aggregator still shared after join".into()))?;
        Ok(InvokeResponse {
            reports: aggregators.finalize(),
        })
    }

    /// Drop datasets whose tenant is not in the query's tenant set. Each
    /// dropped dataset is logged and counted; the query proceeds.
    fn filter_owned_datasets(&self, meta: &BlockMeta, tenants: &HashSet<&str>) -> Vec<Dataset> {
        let mut owned = Vec::with_capacity(meta.datasets.len());
        for ds in &meta.datasets {
            let tenant = meta.dataset_tenant(ds);
            if tenants.contains(tenant) {
                owned.push(ds.clone());
            } else {
                self.metrics.tenant_isolation_failures.inc();
                error!(
                    block = %meta.id,
                    dataset_tenant = tenant,
                    "dropping dataset of tenant outside the query tenant set"
                );
            }
        }
        owned
    }
}

struct WorkerContext {
    matchers: Vec<Matcher>,
    start_ms: i64,
    end_ms: i64,
    aggregators: Arc<Aggregators>,
}

fn validate_request(request: &InvokeRequest) -> Result<ValidatedRequest, QueryError> {
    if request.query.is_empty() {
        return Err(QueryError::InvalidArgument("no query provided".into()));
    }
    if request.query_plan.is_empty() {
        return Err(QueryError::InvalidArgument("no blocks to query".into()));
    }
    if request.tenants.is_empty() {
        return Err(QueryError::InvalidArgument("no tenant provided".into()));
    }
    let matchers = parse_selector(&request.label_selector)
        .map_err(|e| QueryError::InvalidArgument(format!("label selection is invalid: {e}")))?;
    Ok(ValidatedRequest {
        matchers,
        start_ms: request.start_time,
        end_ms: request.end_time,
    })
}

/// Await every worker; the first fatal error (or panic) aborts the rest.
async fn join_all(mut workers: JoinSet<Result<(), QueryError>>) -> Result<(), QueryError> {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                workers.abort_all();
                return Err(e);
            }
            Err(join_error) => {
                workers.abort_all();
                if join_error.is_panic() {
                    warn!("query worker panicked");
                    return Err(QueryError::Internal("query worker panicked".into()));
                }
                // Abort of a sibling; only reachable after an error that has
                // already been returned.
                return Err(QueryError::Internal("query worker cancelled".into()));
            }
        }
    }
    Ok(())
}
