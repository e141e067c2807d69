use docsearch_core::config::ModelSettings;
use docsearch_core::traits::{Embedder, PairScorer};
use docsearch_embed::{
    get_default_embedder, get_default_scorer, resolve_model_dir, FakeEmbedder, TokenOverlapScorer,
};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn fake_embedder_shapes_and_determinism() {
    let models = ModelSettings {
        use_fake_models: true,
        ..ModelSettings::default()
    };
    let embedder = get_default_embedder(&models).expect("embedder");
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");

    assert_eq!(embs[0].len(), embedder.dim());
    let norm: f32 = embs[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    for (a, b) in embs[0].iter().zip(&embs[1]) {
        assert!((a - b).abs() <= 1e-6);
    }
}

#[test]
fn fake_embedder_ignores_case_and_punctuation() {
    let embedder = FakeEmbedder::new(256);
    let embs = embedder
        .embed_batch(&[
            "Revenue grew.".to_string(),
            "revenue grew".to_string(),
            "sunny weather".to_string(),
        ])
        .expect("embed");
    assert!((cosine(&embs[0], &embs[1]) - 1.0).abs() < 1e-5);
    assert!(cosine(&embs[0], &embs[2]) < 0.999);
    assert!(embedder.model_id().contains("256"));
}

#[test]
fn overlap_scorer_prefers_covering_passages() {
    let scorer = TokenOverlapScorer;
    let scores = scorer
        .score_pairs(
            "quarterly revenue",
            &[
                "The weather was sunny".to_string(),
                "Revenue grew".to_string(),
                "Quarterly revenue was $10M".to_string(),
            ],
        )
        .expect("score");
    assert_eq!(scores.len(), 3);
    assert!(scores[2] > scores[1]);
    assert!(scores[1] > scores[0]);
    assert!(scores[0].abs() < f32::EPSILON);
}

#[test]
fn fake_scorer_selected_by_settings() {
    let models = ModelSettings {
        use_fake_models: true,
        ..ModelSettings::default()
    };
    let scorer = get_default_scorer(&models).expect("scorer");
    assert_eq!(scorer.expect("some scorer").model_id(), "token-overlap");
}

#[test]
fn model_dir_resolution_prefers_configured_path() {
    let tmp = tempfile::TempDir::new().expect("tempdir");
    let configured = tmp.path().to_string_lossy().to_string();
    let dir = resolve_model_dir(Some(&configured), &[], &[]).expect("resolve");
    assert_eq!(dir, tmp.path());

    let missing = resolve_model_dir(Some("/definitely/not/here"), &[], &[]);
    assert!(missing.is_err());
}
