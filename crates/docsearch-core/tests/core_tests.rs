use std::fs;

use tempfile::TempDir;

use docsearch_core::config::{resolve_with_base, Config, Settings, MAX_BACKOFF_MS};
use docsearch_core::{
    normalize_query, Error, FusionWeights, RetrievalOptions, RetrievalQuery, StageReport,
    StageStatus,
};

#[test]
fn settings_defaults_without_files() {
    let tmp = TempDir::new().expect("tempdir");
    let config = Config::load_from(tmp.path(), "test").expect("load");
    let settings = config.settings().expect("settings");

    assert_eq!(settings.retrieval.k, 5);
    assert_eq!(settings.retrieval.candidate_pool_size, 20);
    assert!((settings.retrieval.rank_constant - 60.0).abs() < f64::EPSILON);
    assert_eq!(settings.dependencies.generation.max_retries, 0);
    assert!(settings.cache.capacity > 0);
}

#[test]
fn env_overlay_overrides_base_file() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(
        tmp.path().join("config.toml"),
        "[retrieval]\nk = 3\ncandidate_pool_size = 12\n\n[cache]\ncapacity = 64\n",
    )
    .expect("write base");
    fs::write(
        tmp.path().join("config.test.toml"),
        "[retrieval]\nk = 4\n\n[dependencies.rerank]\ntimeout_ms = 250\n",
    )
    .expect("write overlay");

    let settings = Config::load_from(tmp.path(), "test")
        .expect("load")
        .settings()
        .expect("settings");

    assert_eq!(settings.retrieval.k, 4, "overlay wins");
    assert_eq!(settings.retrieval.candidate_pool_size, 12, "base kept");
    assert_eq!(settings.cache.capacity, 64);
    assert_eq!(settings.dependencies.rerank.timeout_ms, 250);
    assert_eq!(settings.dependencies.rerank.max_retries, 2, "partial table keeps defaults");

    let options = settings.retrieval.default_options();
    assert_eq!(options.k, 4);
    assert_eq!(options.candidate_pool_size, 12);
}

#[test]
fn invalid_settings_are_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(
        tmp.path().join("config.toml"),
        "[retrieval]\nk = 10\ncandidate_pool_size = 5\n",
    )
    .expect("write");

    let err = Config::load_from(tmp.path(), "prod")
        .expect("load")
        .settings()
        .expect_err("pool smaller than k");
    assert!(err.to_string().contains("candidate_pool_size"), "{err}");
}

#[test]
fn options_validation() {
    assert!(RetrievalOptions::default().validate().is_ok());

    let zero_k = RetrievalOptions {
        k: 0,
        ..RetrievalOptions::default()
    };
    assert!(matches!(zero_k.validate(), Err(Error::InvalidConfig(_))));

    let small_pool = RetrievalOptions {
        k: 6,
        candidate_pool_size: 5,
        ..RetrievalOptions::default()
    };
    assert!(matches!(small_pool.validate(), Err(Error::InvalidConfig(_))));

    let no_weight = RetrievalOptions {
        weights: FusionWeights {
            lexical: 0.0,
            semantic: 0.0,
        },
        ..RetrievalOptions::default()
    };
    assert!(no_weight.validate().is_err());

    let nan_weight = RetrievalOptions {
        weights: FusionWeights {
            lexical: f64::NAN,
            semantic: 1.0,
        },
        ..RetrievalOptions::default()
    };
    assert!(nan_weight.validate().is_err());
}

#[test]
fn fingerprint_tracks_ranking_fields() {
    let base = RetrievalOptions::default();
    let reranked = RetrievalOptions {
        use_reranking: false,
        ..base.clone()
    };
    let weighted = RetrievalOptions {
        weights: FusionWeights {
            lexical: 0.5,
            semantic: 1.0,
        },
        ..base.clone()
    };
    assert_eq!(base.fingerprint(), RetrievalOptions::default().fingerprint());
    assert_ne!(base.fingerprint(), reranked.fingerprint());
    assert_ne!(base.fingerprint(), weighted.fingerprint());
}

#[test]
fn query_rejects_blank_text_and_normalizes() {
    let err = RetrievalQuery::new("c", "   ", RetrievalOptions::default()).expect_err("blank");
    assert!(err.is_config());

    let q = RetrievalQuery::new("c", "  What  WAS\tRevenue ", RetrievalOptions::default())
        .expect("query");
    assert_eq!(q.normalized_text(), "what was revenue");
    assert_eq!(normalize_query("A  b"), "a b");
}

#[test]
fn stage_report_degradation_flag() {
    let mut report = StageReport::default();
    assert!(!report.degraded());
    report.lexical = StageStatus::Ran;
    report.semantic = StageStatus::Ran;
    assert!(!report.degraded());
    report.rerank = StageStatus::Unavailable("no rerank model configured".into());
    assert!(report.degraded());
    assert!(report.cacheable(), "a missing model is stable");
    report.rerank = StageStatus::Degraded("model offline".into());
    assert!(report.degraded());
    assert!(!report.cacheable());
    report.rerank = StageStatus::Ran;
    report.integrity_warning = true;
    assert!(!report.cacheable());
    report.rerank = StageStatus::Degraded("model offline".into());

    let json = serde_json::to_value(&report.rerank).expect("serialize");
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["reason"], "model offline");
}

#[test]
fn error_classification() {
    assert!(Error::EmbeddingService("x".into()).is_transient());
    assert!(Error::EmptyIndex.is_degradable());
    assert!(!Error::EmptyIndex.is_transient());
    assert!(Error::UnknownCollection("c".into()).is_config());
    assert!(!Error::UnknownCollection("c".into()).is_degradable());
}

#[test]
fn dependency_bounds_are_validated() {
    let mut settings = Settings::default();
    assert!(settings.validate().is_ok());
    assert_eq!(settings.cache.ttl_secs, 86_400);

    settings.dependencies.rerank.timeout_ms = 0;
    let err = settings.validate().expect_err("zero timeout");
    assert!(err.to_string().contains("rerank.timeout_ms"), "{err}");

    settings.dependencies.rerank.timeout_ms = 500;
    settings.dependencies.embedding.backoff_ms = MAX_BACKOFF_MS + 1;
    let err = settings.validate().expect_err("huge backoff");
    assert!(err.is_config());
    assert!(err.to_string().contains("embedding.backoff_ms"), "{err}");
}

#[test]
fn relative_paths_resolve_against_base() {
    let base = std::path::Path::new("/opt/models");
    assert_eq!(
        resolve_with_base(base, "bge-m3"),
        std::path::PathBuf::from("/opt/models/bge-m3")
    );
    assert_eq!(
        resolve_with_base(base, "/abs/dir"),
        std::path::PathBuf::from("/abs/dir")
    );
}
