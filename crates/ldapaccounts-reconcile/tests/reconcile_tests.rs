//! Reconciliation runs against an in-memory store and a scripted directory.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ldapaccounts_connector::async_trait;
use ldapaccounts_connector::prelude::*;
use ldapaccounts_reconcile::{
    DirectoryStatus, MutationIntent, ReconcileConfig, ReconciliationError, ReconciliationRow,
    Reconciler, RunStatus,
};

/// Record store over a vector of users; flag updates change the vector.
struct MemoryStore {
    schema: RecordSchema,
    records: Mutex<Vec<Record>>,
    flag_calls: AtomicUsize,
    /// Ids another writer flags between the page read and the update.
    flagged_elsewhere: Mutex<Vec<i64>>,
}

impl MemoryStore {
    fn new(records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            schema: RecordSchema::new("mdl_user", "id")
                .with_column("email", ColumnType::Text)
                .with_column("firstname", ColumnType::Text)
                .with_column("lastname", ColumnType::Text)
                .with_column("deleted", ColumnType::Integer)
                .with_column("suspended", ColumnType::Integer)
                .with_column("emailstop", ColumnType::Integer),
            records: Mutex::new(records),
            flag_calls: AtomicUsize::new(0),
            flagged_elsewhere: Mutex::new(Vec::new()),
        })
    }

    fn flag_of(&self, id: i64, flag: &str) -> i64 {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.get_integer("id") == Some(id))
            .and_then(|r| r.get_integer(flag))
            .unwrap_or(-1)
    }

    fn matching(&self, plan: &QueryPlan) -> Vec<Record> {
        let mut matching: Vec<Record> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| plan.filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.get_integer(&plan.order_by));
        matching
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn schema(&self) -> ConnectorResult<RecordSchema> {
        Ok(self.schema.clone())
    }

    async fn count(&self, plan: &QueryPlan) -> ConnectorResult<u64> {
        Ok(self.matching(plan).len() as u64)
    }

    async fn select(&self, plan: &QueryPlan) -> ConnectorResult<Vec<Record>> {
        Ok(self
            .matching(plan)
            .into_iter()
            .skip(plan.offset as usize)
            .take(plan.limit as usize)
            .collect())
    }

    async fn flag_records(&self, flag: &str, ids: &[i64]) -> ConnectorResult<Vec<i64>> {
        self.flag_calls.fetch_add(1, Ordering::SeqCst);
        let elsewhere = std::mem::take(&mut *self.flagged_elsewhere.lock().unwrap());
        let mut updated = Vec::new();
        for record in self.records.lock().unwrap().iter_mut() {
            let Some(id) = record.get_integer("id") else {
                continue;
            };
            if elsewhere.contains(&id) {
                record.set(flag, 1i64);
            }
            if ids.contains(&id) && !record.is_flag_set(flag) {
                record.set(flag, 1i64);
                updated.push(id);
            }
        }
        updated.sort_unstable();
        Ok(updated)
    }
}

/// Directory that knows a fixed set of mail addresses.
#[derive(Default)]
struct ScriptedDirectory {
    mails: Vec<String>,
    /// Fail the n-th search (1-based).
    fail_on_search: Option<usize>,
    requests: Vec<SearchRequest>,
    close_calls: usize,
}

impl ScriptedDirectory {
    fn with_mails(mails: &[&str]) -> Self {
        Self {
            mails: mails.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl DirectoryLookup for ScriptedDirectory {
    async fn search(&mut self, request: &SearchRequest) -> ConnectorResult<DirectorySearchResult> {
        self.requests.push(request.clone());
        if self.fail_on_search == Some(self.requests.len()) {
            return Err(ConnectorError::search_failed("Server is busy"));
        }
        let entries = self
            .mails
            .iter()
            .filter(|mail| {
                request
                    .values
                    .iter()
                    .any(|value| value.eq_ignore_ascii_case(mail))
            })
            .map(|mail| {
                let mut entry = BTreeMap::new();
                entry.insert("mail".to_string(), mail.clone());
                entry
            })
            .collect();
        Ok(DirectorySearchResult::from_entries(entries))
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.close_calls += 1;
        Ok(())
    }
}

fn user(id: i64, email: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("email", email)
        .with("firstname", format!("First{id}"))
        .with("lastname", format!("Last{id}"))
        .with("deleted", 0i64)
        .with("suspended", 0i64)
        .with("emailstop", 0i64)
}

async fn query_over(store: &Arc<MemoryStore>, page_size: u64) -> RecordQuery {
    let mut query = RecordQuery::open(store.clone()).await.unwrap();
    query
        .set_selected_fields(&["email", "firstname", "lastname"])
        .unwrap();
    query.set_page_size(page_size).unwrap();
    query
}

fn row_ids(rows: &[ReconciliationRow]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.id("id")).collect()
}

#[tokio::test]
async fn test_absent_user_is_suspended_once() {
    let store = MemoryStore::new(vec![user(1, "a@x.org"), user(2, "b@x.org")]);
    let mut query = query_over(&store, 100).await;
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Suspend));
    let mut reconciler = Reconciler::new(ScriptedDirectory::with_mails(&["a@x.org"]), config);

    let mut rows = Vec::new();
    let report = reconciler.run(&mut query, &mut rows).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(row_ids(&rows), vec![2]);
    assert_eq!(rows[0].directory_status, DirectoryStatus::Absent);
    assert_eq!(rows[0].applied, Some(MutationIntent::Suspend));
    assert_eq!(rows[0].record.get_integer("suspended"), Some(1));
    assert_eq!(rows[0].timestamp, report.started_at);

    assert_eq!(store.flag_of(1, "suspended"), 0);
    assert_eq!(store.flag_of(2, "suspended"), 1);
    assert_eq!(store.flag_calls.load(Ordering::SeqCst), 1);

    assert_eq!(report.statistics.present, 1);
    assert_eq!(report.statistics.absent, 1);
    assert_eq!(report.statistics.mutated, 1);
    assert_eq!(report.statistics.rows_emitted, 1);
    assert_eq!(reconciler.directory().close_calls, 1);
}

#[tokio::test]
async fn test_second_run_applies_nothing() {
    let store = MemoryStore::new(vec![user(1, "a@x.org"), user(2, "b@x.org")]);
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Suspend));

    let mut first = Reconciler::new(ScriptedDirectory::with_mails(&["a@x.org"]), config.clone());
    let mut rows = Vec::new();
    first
        .run(&mut query_over(&store, 100).await, &mut rows)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let mut second = Reconciler::new(ScriptedDirectory::with_mails(&["a@x.org"]), config);
    let mut rows = Vec::new();
    let report = second
        .run(&mut query_over(&store, 100).await, &mut rows)
        .await
        .unwrap();

    assert!(rows.is_empty());
    assert_eq!(report.statistics.mutated, 0);
    assert_eq!(report.statistics.absent, 1);
    // Nothing left to flag, so no second update statement.
    assert_eq!(store.flag_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_report_without_mutation_emits_every_row() {
    let store = MemoryStore::new(vec![
        user(3, "c@x.org"),
        user(1, "a@x.org"),
        user(2, "b@x.org"),
    ]);
    let mut query = query_over(&store, 2).await;
    let mut reconciler = Reconciler::new(
        ScriptedDirectory::with_mails(&["b@x.org"]),
        ReconcileConfig::default(),
    );

    let mut rows = Vec::new();
    let report = reconciler.run(&mut query, &mut rows).await.unwrap();

    assert_eq!(row_ids(&rows), vec![1, 2, 3]);
    let statuses: Vec<u8> = rows.iter().map(|r| r.directory_status.as_u8()).collect();
    assert_eq!(statuses, vec![0, 1, 0]);
    assert!(rows.iter().all(|r| r.applied.is_none()));
    assert_eq!(report.statistics.pages_processed, 2);
    assert_eq!(report.statistics.records_total, 3);
    assert_eq!(store.flag_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_status_filter_drops_rows() {
    let store = MemoryStore::new(vec![user(1, "a@x.org"), user(2, "b@x.org")]);
    let mut query = query_over(&store, 100).await;
    let config = ReconcileConfig::default().with_status_filter(Some(DirectoryStatus::Present));
    let mut reconciler = Reconciler::new(ScriptedDirectory::with_mails(&["a@x.org"]), config);

    let mut rows = Vec::new();
    reconciler.run(&mut query, &mut rows).await.unwrap();

    assert_eq!(row_ids(&rows), vec![1]);
}

#[tokio::test]
async fn test_directory_failure_on_second_page() {
    let store = MemoryStore::new((1..=6).map(|id| user(id, &format!("u{id}@x.org"))).collect());
    let mut query = query_over(&store, 2).await;
    let directory = ScriptedDirectory {
        fail_on_search: Some(2),
        ..Default::default()
    };
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Suspend));
    let mut reconciler = Reconciler::new(directory, config);

    let mut rows = Vec::new();
    let err = reconciler.run(&mut query, &mut rows).await.unwrap_err();

    assert!(matches!(err, ReconciliationError::Directory(_)));
    assert_eq!(err.to_string(), "Error searching in LDAP: Server is busy");
    assert_eq!(reconciler.status(), RunStatus::Failed);

    // Page 1 stays committed; nothing from pages 2 and 3.
    assert_eq!(row_ids(&rows), vec![1, 2]);
    let suspended: Vec<i64> = (1..=6).map(|id| store.flag_of(id, "suspended")).collect();
    assert_eq!(suspended, vec![1, 1, 0, 0, 0, 0]);

    assert_eq!(reconciler.directory().requests.len(), 2);
    assert_eq!(reconciler.directory().close_calls, 1);
    assert_eq!(reconciler.statistics().pages_processed, 1);
}

#[tokio::test]
async fn test_page_without_join_keys_sends_no_search() {
    let store = MemoryStore::new(vec![user(1, ""), user(2, "   ")]);
    let mut query = query_over(&store, 100).await;
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::EmailStop));
    let mut reconciler = Reconciler::new(ScriptedDirectory::default(), config);

    let mut rows = Vec::new();
    reconciler.run(&mut query, &mut rows).await.unwrap();

    assert!(reconciler.directory().requests.is_empty());
    // Empty join keys are always absent.
    assert_eq!(row_ids(&rows), vec![1, 2]);
    assert_eq!(store.flag_of(1, "emailstop"), 1);
}

#[tokio::test]
async fn test_duplicate_and_mixed_case_keys_share_status() {
    let store = MemoryStore::new(vec![
        user(1, "Dup@X.org"),
        user(2, "dup@x.org"),
        user(3, "other@x.org"),
        user(4, ""),
    ]);
    let mut query = query_over(&store, 100).await;
    let config = ReconcileConfig::default()
        .with_query_prefix(Some("objectClass=person".to_string()));
    let mut reconciler = Reconciler::new(ScriptedDirectory::with_mails(&["DUP@x.org"]), config);

    let mut rows = Vec::new();
    reconciler.run(&mut query, &mut rows).await.unwrap();

    let statuses: Vec<DirectoryStatus> = rows.iter().map(|r| r.directory_status).collect();
    assert_eq!(
        statuses,
        vec![
            DirectoryStatus::Present,
            DirectoryStatus::Present,
            DirectoryStatus::Absent,
            DirectoryStatus::Absent,
        ]
    );

    let requests = &reconciler.directory().requests;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].join_field, "mail");
    assert_eq!(requests[0].values, vec!["Dup@X.org", "other@x.org"]);
    assert_eq!(
        requests[0].query_prefix.as_deref(),
        Some("objectClass=person")
    );
}

#[tokio::test]
async fn test_already_flagged_records_are_skipped() {
    let mut deleted = user(2, "b@x.org");
    deleted.set("deleted", 1i64);
    let store = MemoryStore::new(vec![user(1, "a@x.org"), deleted]);
    let mut query = query_over(&store, 100).await;
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Delete));
    let mut reconciler = Reconciler::new(ScriptedDirectory::default(), config);

    let mut rows = Vec::new();
    let report = reconciler.run(&mut query, &mut rows).await.unwrap();

    assert_eq!(row_ids(&rows), vec![1]);
    assert_eq!(report.statistics.mutated, 1);
}

#[tokio::test]
async fn test_filtered_run_starting_at_later_page() {
    let store = MemoryStore::new((1..=5).map(|id| user(id, &format!("u{id}@x.org"))).collect());
    let mut query = query_over(&store, 2).await;
    query
        .set_filter(filter::decode(r#"{"email":"u*@x.org","deleted":0}"#).unwrap())
        .unwrap();
    let config = ReconcileConfig::default().with_start_page(2);
    let mut reconciler = Reconciler::new(ScriptedDirectory::default(), config);

    let mut rows = Vec::new();
    reconciler.run(&mut query, &mut rows).await.unwrap();

    assert_eq!(row_ids(&rows), vec![3, 4, 5]);
}

#[tokio::test]
async fn test_invalid_start_page_fails_and_closes() {
    let store = MemoryStore::new(vec![user(1, "a@x.org")]);
    let mut query = query_over(&store, 10).await;
    let config = ReconcileConfig::default().with_start_page(0);
    let mut reconciler = Reconciler::new(ScriptedDirectory::default(), config);

    let mut rows = Vec::new();
    let err = reconciler.run(&mut query, &mut rows).await.unwrap_err();

    assert!(matches!(err, ReconciliationError::Store(ConnectorError::InvalidArgument { .. })));
    assert_eq!(reconciler.directory().close_calls, 1);
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_mutation_over_filter_on_its_own_flag_visits_every_record() {
    let store = MemoryStore::new((1..=4).map(|id| user(id, &format!("u{id}@x.org"))).collect());
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Suspend));
    let filter = filter::decode(r#"{"suspended":0}"#).unwrap();

    let mut mutated = Vec::new();
    let mut emitted = Vec::new();
    for _ in 0..2 {
        let mut query = query_over(&store, 2).await;
        query.set_filter(filter.clone()).unwrap();
        let mut reconciler = Reconciler::new(ScriptedDirectory::default(), config.clone());
        let mut rows = Vec::new();
        let report = reconciler.run(&mut query, &mut rows).await.unwrap();
        mutated.push(report.statistics.mutated);
        emitted.push(row_ids(&rows));
    }

    // Flagged rows drop out of the filter; later pages must not shift past
    // unvisited records.
    assert_eq!(mutated, vec![4, 0]);
    assert_eq!(emitted, vec![vec![1, 2, 3, 4], vec![]]);
    let suspended: Vec<i64> = (1..=4).map(|id| store.flag_of(id, "suspended")).collect();
    assert_eq!(suspended, vec![1, 1, 1, 1]);
}

#[tokio::test]
async fn test_delete_filtered_on_deleted_pages_by_key() {
    let store = MemoryStore::new((1..=5).map(|id| user(id, &format!("u{id}@x.org"))).collect());
    let mut query = query_over(&store, 2).await;
    query
        .set_filter(filter::decode(r#"{"deleted":0}"#).unwrap())
        .unwrap();
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Delete));
    let mut reconciler =
        Reconciler::new(ScriptedDirectory::with_mails(&["u2@x.org", "u5@x.org"]), config);

    let mut rows = Vec::new();
    let report = reconciler.run(&mut query, &mut rows).await.unwrap();

    assert_eq!(row_ids(&rows), vec![1, 3, 4]);
    assert_eq!(report.statistics.present, 2);
    assert_eq!(report.statistics.absent, 3);
    assert_eq!(report.statistics.records_processed, 5);
    assert_eq!(query.after_key(), Some(5));
}

#[tokio::test]
async fn test_flag_set_by_another_writer_is_not_reported() {
    let store = MemoryStore::new(vec![
        user(1, "a@x.org"),
        user(2, "b@x.org"),
        user(3, "c@x.org"),
    ]);
    store.flagged_elsewhere.lock().unwrap().push(2);
    let mut query = query_over(&store, 100).await;
    let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Suspend));
    let mut reconciler = Reconciler::new(ScriptedDirectory::default(), config);

    let mut rows = Vec::new();
    let report = reconciler.run(&mut query, &mut rows).await.unwrap();

    assert_eq!(row_ids(&rows), vec![1, 3]);
    assert_eq!(report.statistics.mutated, 2);
    assert_eq!(report.statistics.rows_emitted, 2);
    assert_eq!(store.flag_of(2, "suspended"), 1);
}
