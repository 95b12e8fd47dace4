use std::sync::Arc;

use userstore_uow::backend::database::PooledDataSources;
use userstore_uow::error::AppError;
use userstore_uow::store::UserStore;
use userstore_uow::transaction::{ExecutionScope, Finalization};

mod common;

use common::TestDatabaseType;

// Macro to run the same test with different database types
macro_rules! matrix_test {
    ($test_name:ident, $test_fn:ident) => {
        paste::paste! {
            #[tokio::test]
            async fn [<$test_name _sqlite>]() {
                $test_fn(TestDatabaseType::Sqlite).await;
            }

            #[tokio::test]
            #[ignore = "requires docker"]
            async fn [<$test_name _postgres>]() {
                $test_fn(TestDatabaseType::Postgres).await;
            }
        }
    };
}

struct Counts {
    users: i64,
    audit: i64,
}

async fn counts(store: &UserStore, sources: &Arc<PooledDataSources>) -> Counts {
    let mut scope = ExecutionScope::new(sources.clone());
    let result = {
        let mut uow = scope.begin().unwrap();
        let users = store.count_users(&mut uow).await.unwrap();
        let audit = store.count_audit_entries(&mut uow).await.unwrap();
        uow.rollback().await.unwrap();
        Counts { users, audit }
    };
    scope.close().await;
    result
}

async fn roles(store: &UserStore, sources: &Arc<PooledDataSources>, user_name: &str) -> Vec<String> {
    let mut scope = ExecutionScope::new(sources.clone());
    let result = {
        let mut uow = scope.begin().unwrap();
        let roles = store.roles_of(&mut uow, user_name).await.unwrap();
        uow.commit().await.unwrap();
        roles
    };
    scope.close().await;
    result
}

async fn setup(db_type: TestDatabaseType) -> (common::TestDatabase, UserStore) {
    let test_db = common::setup_test_sources(db_type).await.unwrap();
    let store = UserStore::new("users", "audit");
    let mut scope = ExecutionScope::new(test_db.sources.clone());
    store.init_schema(&mut scope).await.unwrap();
    (test_db, store)
}

async fn add_user_commit_test(db_type: TestDatabaseType) {
    let (test_db, store) = setup(db_type).await;
    let mut scope = ExecutionScope::new(test_db.sources.clone());

    {
        let mut uow = scope.begin().unwrap();
        let id = store.add_user(&mut uow, "alice", &["admin", "dev"]).await.unwrap();
        assert!(!id.is_empty());
        // Still one open scope: nothing durable yet
        assert_eq!(uow.depth(), 1);
        assert_eq!(uow.commit().await.unwrap(), Finalization::Committed);
    }
    scope.close().await;

    let after = counts(&store, &test_db.sources).await;
    assert_eq!(after.users, 1);
    assert_eq!(after.audit, 1);
    assert_eq!(roles(&store, &test_db.sources, "alice").await, vec!["admin", "dev"]);
}

async fn duplicate_user_rolls_back_both_stores_test(db_type: TestDatabaseType) {
    let (test_db, store) = setup(db_type).await;
    let mut scope = ExecutionScope::new(test_db.sources.clone());

    {
        let mut uow = scope.begin().unwrap();
        store.add_user(&mut uow, "alice", &["admin"]).await.unwrap();
        uow.commit().await.unwrap();
    }
    scope.close().await;

    {
        let mut uow = scope.begin().unwrap();
        store.add_user(&mut uow, "bob", &["dev"]).await.unwrap();

        let err = store.add_user(&mut uow, "alice", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "User already exists"));
        assert!(uow.context().unwrap().is_failed());

        // The failed nested scope vetoes bob as well
        assert_eq!(uow.commit().await.unwrap(), Finalization::RolledBack);
    }
    scope.close().await;

    let after = counts(&store, &test_db.sources).await;
    assert_eq!(after.users, 1);
    assert_eq!(after.audit, 1);
    assert!(roles(&store, &test_db.sources, "bob").await.is_empty());
}

async fn outer_rollback_discards_audit_entry_test(db_type: TestDatabaseType) {
    let (test_db, store) = setup(db_type).await;
    let mut scope = ExecutionScope::new(test_db.sources.clone());

    {
        let mut uow = scope.begin().unwrap();
        store.add_user(&mut uow, "carol", &["ops"]).await.unwrap();
        assert_eq!(uow.rollback().await.unwrap(), Finalization::RolledBack);
    }
    scope.close().await;

    let after = counts(&store, &test_db.sources).await;
    assert_eq!(after.users, 0);
    assert_eq!(after.audit, 0);
}

async fn dropped_unit_of_work_is_not_committed_test(db_type: TestDatabaseType) {
    let (test_db, store) = setup(db_type).await;
    let mut scope = ExecutionScope::new(test_db.sources.clone());

    {
        let mut uow = scope.begin().unwrap();
        store.add_user(&mut uow, "dave", &[]).await.unwrap();
        // dropped without commit
    }
    scope.close().await;

    let after = counts(&store, &test_db.sources).await;
    assert_eq!(after.users, 0);
    assert_eq!(after.audit, 0);
}

async fn empty_user_name_test(db_type: TestDatabaseType) {
    let (test_db, store) = setup(db_type).await;
    let mut scope = ExecutionScope::new(test_db.sources.clone());

    {
        let mut uow = scope.begin().unwrap();
        let err = store.add_user(&mut uow, "  ", &["admin"]).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        // Rejected before any scope was opened
        assert!(!uow.context().unwrap().is_failed());
        assert_eq!(uow.commit().await.unwrap(), Finalization::Committed);
    }
    scope.close().await;

    assert_eq!(counts(&store, &test_db.sources).await.users, 0);
}

matrix_test!(test_add_user_commit, add_user_commit_test);
matrix_test!(
    test_duplicate_user_rolls_back_both_stores,
    duplicate_user_rolls_back_both_stores_test
);
matrix_test!(
    test_outer_rollback_discards_audit_entry,
    outer_rollback_discards_audit_entry_test
);
matrix_test!(
    test_dropped_unit_of_work_is_not_committed,
    dropped_unit_of_work_is_not_committed_test
);
matrix_test!(test_empty_user_name, empty_user_name_test);
