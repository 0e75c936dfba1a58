//! Block reader tests over blocks produced by the real write path.

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;

use block::BlockMeta;
use data_types::{ProfileType, Shard};
use metastore::MemIndexService;
use objstore::{Bucket, InMemBucket};
use pprof::{builder::cpu_profile, ProfileBuilder};
use query_backend::{
    BlockReader, BlocksQuerier, InvokeRequest, ProfileQuerier, Query, QueryError, Report,
    SelectProfilesRequest,
};
use segment_writer::{Config, SegmentsWriter};

struct Fixture {
    bucket: Arc<InMemBucket>,
    metas: Vec<BlockMeta>,
    inputs: Vec<(&'static str, ProfileBuilder)>,
}

/// Ingest a fixed data set through the segment writer and return the
/// registered blocks.
async fn flush_fixture() -> Fixture {
    let inputs: Vec<(&'static str, ProfileBuilder)> = vec![
        ("tb", cpu_profile(42, 239, "svc1", &["kek", "foo", "bar"])),
        ("tb", cpu_profile(13, 420, "svc1", &["qwe1", "foo", "bar"])),
        ("tb", cpu_profile(17, 420, "svc2", &["qwe3", "foo", "bar"])),
        ("tb", cpu_profile(13, 421, "svc2", &["qwe", "foo", "bar"])),
        ("ta", cpu_profile(13, 10, "svc1", &["vbn", "foo", "bar"])),
        ("ta", cpu_profile(13, 1337, "svc1", &["vbn", "foo", "bar"])),
    ];

    let bucket = Arc::new(InMemBucket::new());
    let index = Arc::new(MemIndexService::new());
    let writer = SegmentsWriter::new(
        Config {
            segment_duration: Duration::from_millis(50),
            ..Default::default()
        },
        None,
        Arc::clone(&bucket) as Arc<dyn Bucket>,
        Arc::clone(&index) as _,
    );

    let waiter = writer.ingest(Shard::new(1), |seg| {
        for (tenant, p) in &inputs {
            seg.ingest(tenant, p.sample_profile(), p.id(), p.labels(), p.annotations())
                .unwrap();
        }
    });
    waiter.wait_flushed().await.expect("flush");
    writer.stop().await;

    Fixture {
        bucket,
        metas: index.blocks(),
        inputs,
    }
}

fn cpu_type() -> ProfileType {
    ProfileType::parse("process_cpu:cpu:nanoseconds:cpu:nanoseconds").unwrap()
}

#[tokio::test]
async fn invoke_validates_requests() {
    let bucket = Arc::new(InMemBucket::new());
    let reader = BlockReader::new(Arc::clone(&bucket) as _, None);

    let valid = InvokeRequest {
        tenants: vec!["t1".into()],
        start_time: 0,
        end_time: 1_000,
        label_selector: "{}".into(),
        query: vec![Query::LabelNames],
        query_plan: vec![BlockMeta::default()],
    };

    let r = reader
        .invoke(InvokeRequest {
            query: vec![],
            ..valid.clone()
        })
        .await;
    assert_matches!(r, Err(QueryError::InvalidArgument(_)));

    let r = reader
        .invoke(InvokeRequest {
            query_plan: vec![],
            ..valid.clone()
        })
        .await;
    assert_matches!(r, Err(QueryError::InvalidArgument(_)));

    let r = reader
        .invoke(InvokeRequest {
            tenants: vec![],
            ..valid.clone()
        })
        .await;
    assert_matches!(r, Err(QueryError::InvalidArgument(_)));

    let r = reader
        .invoke(InvokeRequest {
            label_selector: "{oops=}".into(),
            ..valid
        })
        .await;
    assert_matches!(r, Err(QueryError::InvalidArgument(_)));
}

#[tokio::test]
async fn invoke_enforces_tenant_isolation() {
    let f = flush_fixture().await;
    let reader = BlockReader::new(Arc::clone(&f.bucket) as _, None);

    // The plan includes ta's datasets, but the caller is only authorised for
    // tb: ta's datasets are dropped, counted, and the query proceeds.
    let response = reader
        .invoke(InvokeRequest {
            tenants: vec!["tb".into()],
            start_time: 0,
            end_time: 2_000,
            label_selector: "{}".into(),
            query: vec![Query::LabelValues {
                name: "service_name".into(),
            }],
            query_plan: f.metas.clone(),
        })
        .await
        .unwrap();

    assert_eq!(reader.metrics().isolation_failures(), 1);
    assert_eq!(
        response.reports,
        vec![Report::LabelValues(vec!["svc1".into(), "svc2".into()])]
    );

    // A tb-scoped query never sees ta's series: svc1 values under ta only
    // exist at timestamps 10 and 1337.
    let response = reader
        .invoke(InvokeRequest {
            tenants: vec!["tb".into()],
            start_time: 0,
            end_time: 2_000,
            label_selector: r#"{service_name="svc1"}"#.into(),
            query: vec![Query::Pprof {
                profile_type: cpu_type(),
            }],
            query_plan: f.metas.clone(),
        })
        .await
        .unwrap();
    let Report::Pprof(encoded) = &response.reports[0] else {
        panic!("want pprof report");
    };
    let merged = pprof::decode_profile(encoded).unwrap();
    let expected: Vec<pprof::Profile> = f
        .inputs
        .iter()
        .filter(|(tenant, _)| *tenant == "tb")
        .filter(|(_, p)| p.labels().get("service_name") == Some("svc1"))
        .map(|(_, p)| p.sample_profile())
        .collect();
    assert_eq!(
        pprof::stack_collapse(&merged, 0),
        pprof::stack_collapse_many(expected.iter(), 0),
    );
}

#[tokio::test]
async fn invoke_evaluates_all_query_kinds() {
    let f = flush_fixture().await;
    let reader = BlockReader::new(Arc::clone(&f.bucket) as _, None);

    let response = reader
        .invoke(InvokeRequest {
            tenants: vec!["ta".into(), "tb".into()],
            start_time: 0,
            end_time: 2_000,
            label_selector: r#"{service_name=~"svc[12]"}"#.into(),
            query: vec![
                Query::LabelNames,
                Query::LabelValues {
                    name: "service_name".into(),
                },
                Query::SeriesLabels,
                Query::Pprof {
                    profile_type: cpu_type(),
                },
            ],
            query_plan: f.metas.clone(),
        })
        .await
        .unwrap();

    let Report::LabelNames(names) = &response.reports[0] else {
        panic!("want label names");
    };
    for expected in ["__profile_type__", "__type__", "__unit__", "service_name"] {
        assert!(names.contains(&expected.to_string()), "missing {expected}");
    }

    assert_eq!(
        response.reports[1],
        Report::LabelValues(vec!["svc1".into(), "svc2".into()])
    );

    let Report::SeriesLabels(series) = &response.reports[2] else {
        panic!("want series labels");
    };
    // One cpu series per (service): svc1 and svc2 under tb, svc1 under ta
    // has identical labels to tb's svc1 series (same fingerprint).
    assert!(!series.is_empty());
    for labels in series {
        assert!(matches!(labels.get("service_name"), Some("svc1" | "svc2")));
    }

    let Report::Pprof(encoded) = &response.reports[3] else {
        panic!("want pprof");
    };
    let merged = pprof::decode_profile(encoded).unwrap();
    let expected: Vec<pprof::Profile> =
        f.inputs.iter().map(|(_, p)| p.sample_profile()).collect();
    assert_eq!(
        pprof::stack_collapse(&merged, 0),
        pprof::stack_collapse_many(expected.iter(), 0),
    );
}

/// The time range bounds the merge: `[239, 420]` selects exactly the first
/// three tb profiles.
#[tokio::test]
async fn pprof_merge_respects_time_range() {
    let f = flush_fixture().await;
    let reader = BlockReader::new(Arc::clone(&f.bucket) as _, None);

    let response = reader
        .invoke(InvokeRequest {
            tenants: vec!["tb".into()],
            start_time: 239,
            end_time: 420,
            label_selector: r#"{service_name=~"svc[12]"}"#.into(),
            query: vec![Query::Pprof {
                profile_type: cpu_type(),
            }],
            query_plan: f.metas.clone(),
        })
        .await
        .unwrap();

    let Report::Pprof(encoded) = &response.reports[0] else {
        panic!("want pprof");
    };
    let merged = pprof::decode_profile(encoded).unwrap();
    let expected: Vec<pprof::Profile> = f.inputs[0..3]
        .iter()
        .map(|(_, p)| p.sample_profile())
        .collect();
    assert_eq!(
        pprof::stack_collapse(&merged, 0),
        pprof::stack_collapse_many(expected.iter(), 0),
    );
}

/// The blocks querier drives the same selection/merge as the reader's pprof
/// kind, through the select-then-merge capability.
#[tokio::test]
async fn blocks_querier_select_then_merge() {
    let f = flush_fixture().await;
    let querier = BlocksQuerier::new(Arc::clone(&f.bucket) as _, "tb", f.metas.clone());

    let request = SelectProfilesRequest {
        label_selector: r#"{service_name=~"svc[12]"}"#.into(),
        profile_type: cpu_type(),
        start: 239,
        end: 420,
    };
    let candidates = querier.select_profiles(&request).await.unwrap();
    assert!(!candidates.fingerprints.is_empty());
    assert_eq!(candidates.profiles.len(), 3);

    let merged = querier
        .merge_pprof(&request, &candidates.profiles)
        .await
        .unwrap();
    let expected: Vec<pprof::Profile> = f.inputs[0..3]
        .iter()
        .map(|(_, p)| p.sample_profile())
        .collect();
    assert_eq!(
        pprof::stack_collapse(&merged, 0),
        pprof::stack_collapse_many(expected.iter(), 0),
    );

    // Selecting a subset merges a subset.
    let merged = querier
        .merge_pprof(&request, &candidates.profiles[0..1])
        .await
        .unwrap();
    assert_eq!(
        pprof::stack_collapse(&merged, 0),
        pprof::stack_collapse(&f.inputs[0].1.sample_profile(), 0),
    );
}
