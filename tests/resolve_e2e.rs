use unify::{
    DependentKind, Disposition, FetchError, IdentifierDraft, IdentifierSource, IncomingRecord,
    RecordFetcher, SyncRequest, TenantId, UnifyEngine, UnifyError,
};

fn erp_customer(external_id: &str, email: &str, first: &str, last: &str) -> IncomingRecord {
    IncomingRecord {
        external_id: Some(external_id.to_string()),
        email: Some(email.to_string()),
        first_name: Some(first.to_string()),
        last_name: Some(last.to_string()),
        ..Default::default()
    }
}

#[test]
fn erp_reingest_is_idempotent() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();

    // 1. First ingest creates the profile and attaches the identifier.
    let record = erp_customer("C100", "ann@example.com", "Ann", "Lee");
    let first = engine
        .resolve_record(tenant, IdentifierSource::Erp, "customer", &record)
        .unwrap();
    assert_eq!(first.disposition, Disposition::Created);
    assert_eq!(first.profile.display_name, "Ann Lee");

    // 2. The same row syncs again (nightly job re-runs); nothing new is
    // created and the identifier is not duplicated.
    let second = engine
        .resolve_record(tenant, IdentifierSource::Erp, "customer", &record)
        .unwrap();
    assert_eq!(second.disposition, Disposition::MatchedByIdentifier);
    assert_eq!(second.profile.id, first.profile.id);

    let identifiers = engine.identifiers_of(tenant, first.profile.id).unwrap();
    assert_eq!(identifiers.len(), 1);
    assert!(identifiers[0].is_active);
    assert!(identifiers[0].is_primary);

    let stats = engine.statistics(tenant).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.active, 1);
}

#[test]
fn line_follower_joins_profile_through_email() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();

    let erp = engine
        .resolve_and_upsert(
            tenant,
            IdentifierSource::Erp,
            "customer",
            &erp_customer("C100", "ann@example.com", "Ann", "Lee"),
        )
        .unwrap();

    // A LINE follower with the same email (different case) arrives.
    let line = IncomingRecord {
        external_id: Some("U4af4980629".to_string()),
        email: Some("ANN@Example.com".to_string()),
        display_name: Some("ann.l".to_string()),
        tags: vec!["line-follower".to_string()],
        ..Default::default()
    };
    let outcome = engine
        .resolve_record(tenant, IdentifierSource::Line, "user", &line)
        .unwrap();

    assert_eq!(outcome.disposition, Disposition::MatchedByEmail);
    assert_eq!(outcome.profile.id, erp.id);
    assert!(outcome.profile.tags.contains("line-follower"));
    // The LINE display name overwrote the ERP one: last write wins.
    assert_eq!(outcome.profile.display_name, "ann.l");

    // The profile now carries identifiers from both systems.
    let sources: Vec<IdentifierSource> = engine
        .identifiers_of(tenant, erp.id)
        .unwrap()
        .iter()
        .map(|i| i.source)
        .collect();
    assert!(sources.contains(&IdentifierSource::Erp));
    assert!(sources.contains(&IdentifierSource::Line));
    assert_eq!(engine.statistics(tenant).unwrap().total, 1);
}

#[test]
fn phone_match_after_email_miss() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();

    let first = IncomingRecord {
        phone: Some("+66 (0)81-111 2222".to_string()),
        first_name: Some("Somchai".to_string()),
        ..Default::default()
    };
    let p = engine
        .resolve_and_upsert(tenant, IdentifierSource::Crm, "contact", &first)
        .unwrap();

    // Different email, same phone in another format.
    let second = IncomingRecord {
        email: Some("somchai@work.example".to_string()),
        phone: Some("+66081 1112222".to_string()),
        ..Default::default()
    };
    let outcome = engine
        .resolve_record(tenant, IdentifierSource::Website, "form", &second)
        .unwrap();
    assert_eq!(outcome.disposition, Disposition::MatchedByPhone);
    assert_eq!(outcome.profile.id, p.id);
    assert_eq!(outcome.profile.email.as_deref(), Some("somchai@work.example"));
}

#[test]
fn detached_identifier_frees_its_key() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();

    let p1 = engine
        .resolve_and_upsert(
            tenant,
            IdentifierSource::Erp,
            "customer",
            &erp_customer("C100", "ann@example.com", "Ann", "Lee"),
        )
        .unwrap();
    let identifier = engine.identifiers_of(tenant, p1.id).unwrap().remove(0);

    engine.detach_identifier(tenant, p1.id, identifier.id).unwrap();

    // The key no longer resolves; a record carrying only the external id
    // creates a fresh profile.
    let orphan = IncomingRecord {
        external_id: Some("C100".to_string()),
        display_name: Some("Ann (new)".to_string()),
        ..Default::default()
    };
    let outcome = engine
        .resolve_record(tenant, IdentifierSource::Erp, "customer", &orphan)
        .unwrap();
    assert_eq!(outcome.disposition, Disposition::Created);
    assert_ne!(outcome.profile.id, p1.id);

    // The detached row survives for audit.
    let rows = engine.identifiers_of(tenant, p1.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_active);
}

#[test]
fn identifier_conflict_is_surfaced() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();

    let p1 = engine
        .resolve_and_upsert(
            tenant,
            IdentifierSource::Erp,
            "customer",
            &erp_customer("C1", "a@x.com", "A", "One"),
        )
        .unwrap();
    let p2 = engine
        .resolve_and_upsert(
            tenant,
            IdentifierSource::Erp,
            "customer",
            &erp_customer("C2", "b@x.com", "B", "Two"),
        )
        .unwrap();

    let draft = IdentifierDraft {
        source: IdentifierSource::Erp,
        source_type: "customer".to_string(),
        external_id: "C1".to_string(),
        external_ref: None,
        match_quality: None,
        is_primary: false,
    };
    let err = engine.attach_identifier(tenant, p2.id, &draft).unwrap_err();
    match err {
        UnifyError::IdentifierConflict { held_by, .. } => assert_eq!(held_by, p1.id),
        other => panic!("expected IdentifierConflict, got {other}"),
    }
}

struct StubFetcher {
    records: Vec<IncomingRecord>,
}

impl RecordFetcher for StubFetcher {
    fn fetch(&self, _api_url: &str, _api_key: &str) -> Result<Vec<IncomingRecord>, FetchError> {
        Ok(self.records.clone())
    }
}

struct FailingFetcher;

impl RecordFetcher for FailingFetcher {
    fn fetch(&self, _api_url: &str, _api_key: &str) -> Result<Vec<IncomingRecord>, FetchError> {
        Err(FetchError::Status {
            status: 503,
            message: "service unavailable".to_string(),
        })
    }
}

#[test]
fn api_sync_imports_fetched_records() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();
    let request = SyncRequest {
        api_url: "https://erp.example/api/customers".to_string(),
        api_key: "k".to_string(),
        sync_frequency: Some("daily".to_string()),
    };

    let fetcher = StubFetcher {
        records: vec![
            erp_customer("C1", "a@x.com", "A", "One"),
            erp_customer("C2", "b@x.com", "B", "Two"),
            IncomingRecord::new(), // rejected, does not abort the batch
        ],
    };
    let report = engine
        .sync_from_api(tenant, IdentifierSource::Erp, "customer", &fetcher, &request)
        .unwrap();
    assert_eq!(report.total_fetched, 3);
    assert_eq!(report.batch.success, 2);
    assert_eq!(report.batch.failed, 1);
    assert_eq!(engine.statistics(tenant).unwrap().total, 2);

    // Re-running the same sync is a no-op on profile count.
    let report = engine
        .sync_from_api(tenant, IdentifierSource::Erp, "customer", &fetcher, &request)
        .unwrap();
    assert_eq!(report.batch.skipped, 2);
    assert_eq!(engine.statistics(tenant).unwrap().total, 2);
}

#[test]
fn api_sync_failure_is_retryable_and_imports_nothing() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();
    let request = SyncRequest {
        api_url: "https://erp.example/api/customers".to_string(),
        api_key: "k".to_string(),
        sync_frequency: None,
    };

    let err = engine
        .sync_from_api(tenant, IdentifierSource::Erp, "customer", &FailingFetcher, &request)
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(engine.statistics(tenant).unwrap().total, 0);
}

#[test]
fn completion_score_grows_as_sources_fill_the_profile() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();

    let sparse = IncomingRecord {
        external_id: Some("C1".to_string()),
        email: Some("a@x.com".to_string()),
        ..Default::default()
    };
    let profile = engine
        .resolve_and_upsert(tenant, IdentifierSource::Erp, "customer", &sparse)
        .unwrap();
    let before = engine.completion_score(tenant, profile.id).unwrap();

    let richer = IncomingRecord {
        external_id: Some("C1".to_string()),
        phone: Some("+66811112222".to_string()),
        first_name: Some("Ann".to_string()),
        last_name: Some("Lee".to_string()),
        tags: vec!["vip".to_string()],
        ..Default::default()
    };
    engine
        .resolve_and_upsert(tenant, IdentifierSource::Erp, "customer", &richer)
        .unwrap();
    let after = engine.completion_score(tenant, profile.id).unwrap();
    assert!(after > before);
}

#[test]
fn dependents_accumulate_under_their_profile() {
    let engine = UnifyEngine::in_memory();
    let tenant = TenantId::new();
    let profile = engine
        .resolve_and_upsert(
            tenant,
            IdentifierSource::Crm,
            "contact",
            &erp_customer("C1", "a@x.com", "A", "One"),
        )
        .unwrap();

    engine
        .add_dependent(tenant, profile.id, DependentKind::Deal, serde_json::json!({"amount": 1200}))
        .unwrap();
    engine
        .add_dependent(tenant, profile.id, DependentKind::Event, serde_json::json!({"page": "/pricing"}))
        .unwrap();

    let dependents = engine.dependents_of(tenant, profile.id).unwrap();
    assert_eq!(dependents.len(), 2);
}
