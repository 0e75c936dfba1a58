//! An in-memory [`IndexService`] for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use block::{meta::decode_label_runs, BlockMeta};
use data_types::{matcher::matches_labels, parse_selector, Labels};
use parking_lot::Mutex;

use crate::{IndexError, IndexService, QueryMetadataRequest};

/// A thread-safe in-memory metadata index.
///
/// Blocks are keyed by id. Re-registration with identical content succeeds
/// (the idempotence `add_recovered_block` relies on); re-registration with
/// different content is rejected, since blocks are immutable.
#[derive(Debug, Default)]
pub struct MemIndexService {
    blocks: Mutex<BTreeMap<String, BlockMeta>>,
}

impl MemIndexService {
    pub fn new() -> Self {
        Self::default()
    }

    /// All registered blocks, in id (creation-time) order.
    pub fn blocks(&self) -> Vec<BlockMeta> {
        self.blocks.lock().values().cloned().collect()
    }

    fn insert(&self, meta: BlockMeta) -> Result<(), IndexError> {
        if meta.id.is_empty() {
            return Err(IndexError::InvalidArgument("block id is empty".into()));
        }
        let mut blocks = self.blocks.lock();
        match blocks.get(&meta.id) {
            None => {
                blocks.insert(meta.id.clone(), meta);
                Ok(())
            }
            Some(existing) if *existing == meta => Ok(()),
            Some(_) => Err(IndexError::InvalidArgument(format!(
                "block {} already registered with different content",
                meta.id
            ))),
        }
    }
}

#[async_trait]
impl IndexService for MemIndexService {
    async fn add_block(&self, meta: BlockMeta) -> Result<(), IndexError> {
        self.insert(meta)
    }

    async fn add_recovered_block(&self, meta: BlockMeta) -> Result<(), IndexError> {
        self.insert(meta)
    }

    async fn query_metadata(
        &self,
        request: QueryMetadataRequest,
    ) -> Result<Vec<BlockMeta>, IndexError> {
        if request.tenants.is_empty() {
            return Err(IndexError::InvalidArgument("no tenant provided".into()));
        }
        let matchers = parse_selector(&request.query)
            .map_err(|e| IndexError::InvalidArgument(format!("bad selector: {e}")))?;

        let blocks = self.blocks.lock();
        let mut out = Vec::new();
        for meta in blocks.values() {
            if meta.max_time < request.start_time || meta.min_time > request.end_time {
                continue;
            }
            let owned = meta.datasets.iter().any(|ds| {
                if !request
                    .tenants
                    .iter()
                    .any(|t| t.as_str() == meta.dataset_tenant(ds))
                {
                    return false;
                }
                if ds.max_time < request.start_time || ds.min_time > request.end_time {
                    return false;
                }
                let Ok(runs) = decode_label_runs(&meta.string_table, &ds.labels) else {
                    return false;
                };
                runs.iter()
                    .any(|run| matches_labels(&matchers, &Labels::from_pairs(run.clone())))
            });
            if owned {
                out.push(meta.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use block::{meta::encode_label_runs, Dataset, StringTable};

    fn test_meta(id: &str, tenant: &str, service: &str, min: i64, max: i64) -> BlockMeta {
        let mut st = StringTable::new();
        let tenant_idx = st.put(tenant);
        let service_idx = st.put(service);
        let labels = encode_label_runs(
            &mut st,
            &[vec![("service_name".to_string(), service.to_string())]],
        );
        BlockMeta {
            id: id.to_string(),
            shard: 1,
            min_time: min,
            max_time: max,
            size: 0,
            datasets: vec![Dataset {
                tenant: tenant_idx,
                name: service_idx,
                min_time: min,
                max_time: max,
                table_of_contents: vec![0, 1, 2],
                size: 3,
                labels,
            }],
            string_table: st.into_vec(),
        }
    }

    #[tokio::test]
    async fn add_is_idempotent_for_identical_content() {
        let index = MemIndexService::new();
        let meta = test_meta("b1", "t1", "svc1", 10, 20);
        index.add_block(meta.clone()).await.unwrap();
        index.add_recovered_block(meta.clone()).await.unwrap();
        assert_eq!(index.blocks().len(), 1);

        let mut changed = meta;
        changed.max_time = 999;
        assert_matches!(
            index.add_block(changed).await,
            Err(IndexError::InvalidArgument(_))
        );
    }

    #[tokio::test]
    async fn query_filters_by_tenant_time_and_selector() {
        let index = MemIndexService::new();
        index
            .add_block(test_meta("b1", "t1", "svc1", 10, 20))
            .await
            .unwrap();
        index
            .add_block(test_meta("b2", "t2", "svc2", 10, 20))
            .await
            .unwrap();
        index
            .add_block(test_meta("b3", "t1", "svc1", 100, 200))
            .await
            .unwrap();

        let found = index
            .query_metadata(QueryMetadataRequest {
                tenants: vec!["t1".into()],
                start_time: 0,
                end_time: 50,
                query: r#"{service_name=~"svc1"}"#.into(),
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b1");

        // Wrong service.
        let found = index
            .query_metadata(QueryMetadataRequest {
                tenants: vec!["t1".into()],
                start_time: 0,
                end_time: 500,
                query: r#"{service_name="svc2"}"#.into(),
            })
            .await
            .unwrap();
        assert!(found.is_empty());

        // Bad selector surfaces as InvalidArgument.
        assert_matches!(
            index
                .query_metadata(QueryMetadataRequest {
                    tenants: vec!["t1".into()],
                    start_time: 0,
                    end_time: 500,
                    query: "{oops=}".into(),
                })
                .await,
            Err(IndexError::InvalidArgument(_))
        );
    }
}
