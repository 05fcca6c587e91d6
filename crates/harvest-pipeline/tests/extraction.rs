mod common;

use chrono::Utc;
use common::{extractor_with, harvest, SpyModel, StubScraper};
use harvest_core::{
    ExtractedOpportunity, OpportunityType, PolishSource, RawOpportunityContent, Section,
};
use harvest_pipeline::{ResolveError, SectionExtractor};
use harvest_storage::OpportunityStore;

fn raw_posting() -> RawOpportunityContent {
    RawOpportunityContent {
        description: Some(
            "We use cookies to improve your experience.\nLead nutrition surveys in the north.".into(),
        ),
        requirements: Some("Degree in nutrition\nFacebook".into()),
        ..Default::default()
    }
}

const MODEL_REPLY: &str = r#"{
    "overview": "Lead nutrition surveys in the north.",
    "responsibilities": "",
    "requirements": "Degree in nutrition",
    "howToApply": "Send a CV to jobs@relief.example.org",
    "extra": "Deadline 15 April 2026"
}"#;

#[tokio::test]
async fn model_sections_are_used_when_valid() {
    let model = SpyModel::replying(MODEL_REPLY);
    let extractor = extractor_with(&model);
    let extraction = extractor.extract_detailed(&raw_posting()).await;

    assert_eq!(model.calls(), 1);
    assert_eq!(extraction.source, PolishSource::Model("spy-model".into()));
    assert_eq!(extraction.content.get(Section::Responsibilities), None);
    assert_eq!(
        extraction.content.get(Section::HowToApply),
        Some("Send a CV to jobs@relief.example.org")
    );
    assert!(extraction.content.combined_plain_text().ends_with("Deadline 15 April 2026"));
}

#[tokio::test]
async fn any_model_failure_falls_back_to_rules() {
    let local = SectionExtractor::rule_based().polish_locally(&raw_posting());
    assert_eq!(
        local.combined_plain_text(),
        "Lead nutrition surveys in the north.\n\nDegree in nutrition"
    );

    for model in [
        SpyModel::failing(),
        SpyModel::replying("definitely not json"),
        SpyModel::replying(r#"["overview"]"#),
        SpyModel::replying(r#"{"overview": 42}"#),
        SpyModel::replying(r#"{"overview": "   ", "extra": ""}"#),
    ] {
        let extraction = extractor_with(&model)
            .extract_detailed(&raw_posting())
            .await;
        assert_eq!(model.calls(), 1);
        assert_eq!(extraction.source, PolishSource::RuleBased);
        assert_eq!(extraction.content, local);
    }
}

#[tokio::test]
async fn empty_input_never_reaches_the_model() {
    let model = SpyModel::replying(MODEL_REPLY);
    let raw = RawOpportunityContent {
        description: Some("Toggle navigation\nLinkedIn".into()),
        ..Default::default()
    };
    let cleaned = extractor_with(&model).extract(&raw).await;
    assert!(cleaned.is_empty());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn polished_records_are_never_sent_to_the_model_again() {
    let model = SpyModel::replying(MODEL_REPLY);
    let fx = harvest(StubScraper::new(), Some(model.clone()), true);

    let mut record = ExtractedOpportunity::pending(
        "Nutrition Officer",
        "https://careers.relief.example.org/jobs/7",
        OpportunityType::Job,
        Utc::now(),
    );
    record.description = raw_posting().description;
    record.requirements = raw_posting().requirements;
    let record = fx.store.insert(record).await.expect("insert");

    let first = fx.harvest.resolver.polish(record.id).await.expect("polish");
    assert!(first.newly_polished);
    assert_eq!(model.calls(), 1);
    assert_eq!(
        first.record.polish.polished_by(),
        Some(&PolishSource::Model("spy-model".into()))
    );
    assert_eq!(first.record.raw_content.as_deref(), Some(first.content.combined_plain_text()));

    let stored = fx.store.get(record.id).await.expect("get").expect("present");
    for _ in 0..3 {
        let again = fx.harvest.resolver.resolve_content(&stored).await;
        assert_eq!(again, first.content);
    }
    let second = fx.harvest.resolver.polish(record.id).await.expect("second polish");
    assert!(!second.newly_polished);
    assert_eq!(second.record.updated_at, stored.updated_at);
    assert_eq!(model.calls(), 1);

    let err = fx
        .harvest
        .resolver
        .commit(record.id, &first.content, PolishSource::RuleBased)
        .await
        .expect_err("second commit");
    assert!(matches!(err, ResolveError::AlreadyPolished(id) if id == record.id));
}

#[tokio::test]
async fn polished_record_without_sections_surfaces_raw_content() {
    let fx = harvest(StubScraper::new(), None, true);
    let mut record = ExtractedOpportunity::pending(
        "Grant",
        "https://grants.example.org/9",
        OpportunityType::Funding,
        Utc::now(),
    );
    record.raw_content = Some("Cookie policy text stays as stored.".into());
    record.polish = harvest_core::PolishState::Polished {
        at: Utc::now(),
        by: PolishSource::RuleBased,
    };
    let content = fx.harvest.resolver.resolve_content(&record).await;
    assert_eq!(content.get(Section::Extra), Some("Cookie policy text stays as stored."));
}

#[tokio::test]
async fn unknown_record_is_not_found() {
    let fx = harvest(StubScraper::new(), None, true);
    let id = uuid::Uuid::new_v4();
    let err = fx.harvest.resolver.polish(id).await.expect_err("missing");
    assert!(matches!(err, ResolveError::NotFound(missing) if missing == id));
}
