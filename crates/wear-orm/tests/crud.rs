//! Integration tests for the CRUD adapter against in-memory SQLite.

mod common;

use std::collections::HashMap;

use common::{at, test_db, user, Note, Payment, Profile, User};
use wear_orm::{Changes, Criteria, DynRecord, Json, Order, OrmError, Value, Q, LIMIT_INSERT};

#[tokio::test]
async fn test_insert_assigns_int_pk_and_get_reads_back() {
    let mut db = test_db().await;

    let payment = Payment {
        amount: 12.5,
        status: "pending".into(),
        created: at(1),
        ..Payment::default()
    };
    let res = db.insert(&[&payment]).await.unwrap();
    assert_eq!(res.rows_affected, 1);
    assert_eq!(res.last_insert_id, Some(1));

    let mut found = Payment {
        id: 1,
        ..Payment::default()
    };
    assert!(db.get(&mut found, &Criteria::new()).await.unwrap());
    assert_eq!(
        found,
        Payment {
            id: 1,
            note: None,
            ..payment
        }
    );

    let mut missing = Payment {
        id: 42,
        ..Payment::default()
    };
    assert!(!db.get(&mut missing, &Criteria::new()).await.unwrap());
    assert_eq!(missing.status, "");
}

#[tokio::test]
async fn test_json_columns_round_trip() {
    let mut db = test_db().await;

    let mut attrs = HashMap::new();
    attrs.insert("lang".to_string(), "en".to_string());
    let alice = User {
        tags: vec!["admin".into(), "beta".into()],
        attrs,
        profile: Json(Profile {
            bio: "hello".into(),
            links: vec!["https://example.org".into()],
        }),
        verified: true,
        ..user("u1", "Alice", 30)
    };
    db.insert(&[&alice]).await.unwrap();

    let mut found = User {
        id: "u1".into(),
        ..User::default()
    };
    assert!(db.must_get(&mut found, &Criteria::new()).await);
    assert_eq!(found, alice);
    assert_eq!(found.profile.bio, "hello");
}

#[tokio::test]
async fn test_update_then_get() {
    let mut db = test_db().await;
    db.insert(&[&user("u1", "Alice", 30)]).await.unwrap();

    let mut alice = user("u1", "Alicia", 31);
    alice.tags = vec!["renamed".into()];
    db.update(&alice).await.unwrap();

    let mut found = user("u1", "", 0);
    db.get(&mut found, &Criteria::new()).await.unwrap();
    assert_eq!(found.name, "Alicia");
    assert_eq!(found.age, 31);
    assert_eq!(found.tags, ["renamed"]);
}

#[tokio::test]
async fn test_get_with_filter_and_columns() {
    let mut db = test_db().await;
    db.insert(&[&user("u1", "Alice", 30), &user("u2", "Bob", 40)])
        .await
        .unwrap();

    let mut found = User {
        age: 99,
        ..User::default()
    };
    let criteria = Criteria::new()
        .filter(Q::eq("name", "Bob"))
        .columns(&["name"]);
    assert!(db.get(&mut found, &criteria).await.unwrap());
    assert_eq!(found.id, "u2");
    assert_eq!(found.name, "Bob");
    // not selected, left as it was
    assert_eq!(found.age, 99);
}

#[tokio::test]
async fn test_get_with_only_columns_uses_the_key() {
    let mut db = test_db().await;
    db.insert(&[&user("u1", "Alice", 30), &user("u2", "Bob", 40)])
        .await
        .unwrap();

    let mut found = User {
        id: "u2".into(),
        age: 99,
        ..User::default()
    };
    let criteria = Criteria::new().columns(&["name"]);
    assert!(db.get(&mut found, &criteria).await.unwrap());
    assert_eq!(found.id, "u2");
    assert_eq!(found.name, "Bob");
    assert_eq!(found.age, 99);

    let mut missing = User {
        id: "u9".into(),
        ..User::default()
    };
    assert!(!db.get(&mut missing, &criteria).await.unwrap());
    assert_eq!(missing.name, "");
}

#[tokio::test]
async fn test_select_filters_and_orders() {
    let mut db = test_db().await;
    let users = [
        user("u1", "Alice", 30),
        user("u2", "Bob", 17),
        user("u3", "Carol", 45),
        User {
            verified: true,
            ..user("u4", "Dave", 16)
        },
    ];
    db.insert_slice(&users).await.unwrap();

    let adults_or_verified: Vec<User> = db
        .select(
            &Criteria::new()
                .filter(Q::gte("age", 18).or(Q::eq("verified", true)))
                .order_by("age", Order::Desc),
        )
        .await
        .unwrap();
    let names: Vec<_> = adults_or_verified.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["Carol", "Alice", "Dave"]);

    let mut page = vec![user("stale", "Stale", 0)];
    db.select_into(
        &mut page,
        &Criteria::new()
            .order_by("name", Order::Asc)
            .limit(2)
            .offset(1),
    )
    .await
    .unwrap();
    let names: Vec<_> = page.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["Bob", "Carol"]);

    let picked: Vec<User> = db
        .select(&Criteria::new().filter(Q::is_in("id", ["u1", "u3"])))
        .await
        .unwrap();
    assert_eq!(picked.len(), 2);

    let none: Vec<User> = db
        .select(&Criteria::new().filter(Q::is_in("id", Vec::<String>::new())))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_select_unknown_column() {
    let mut db = test_db().await;
    let err = db
        .select::<User>(&Criteria::new().columns(&["nope"]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidField(c) if c == "nope"));
}

#[tokio::test]
async fn test_count() {
    let mut db = test_db().await;
    let payments: Vec<Payment> = [3.0, 8.0, 15.0]
        .into_iter()
        .map(|amount| Payment {
            amount,
            created: at(2),
            ..Payment::default()
        })
        .collect();
    db.insert_slice(&payments).await.unwrap();

    assert_eq!(db.count::<Payment>(&Criteria::new()).await.unwrap(), 3);
    assert_eq!(
        db.must_count::<Payment>(&Criteria::new().filter(Q::gt("amount", 5.0)))
            .await,
        2
    );
}

#[tokio::test]
async fn test_delete() {
    let mut db = test_db().await;
    db.insert(&[&user("u1", "Alice", 30)]).await.unwrap();

    let err = db.delete(&User::default()).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));

    db.delete(&user("u1", "", 0)).await.unwrap();
    assert_eq!(db.count::<User>(&Criteria::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_bulk_mutations_need_where_or_match_all() {
    let mut db = test_db().await;
    db.insert(&[&user("u1", "Alice", 30), &user("u2", "Bob", 40)])
        .await
        .unwrap();

    let mut changes = Changes::new();
    changes.insert("verified".into(), Value::Bool(true));

    let err = db
        .update_rows::<User>(&changes, &Criteria::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    let err = db
        .update_rows::<User>(&changes, &Criteria::new().limit(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    let err = db.delete_rows::<User>(&Criteria::new()).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    assert_eq!(db.count::<User>(&Criteria::new()).await.unwrap(), 2);

    let updated = db
        .update_rows::<User>(&changes, &Criteria::new().filter(Q::eq("id", "u1")))
        .await
        .unwrap();
    assert_eq!(updated, 1);
    let updated = db
        .must_update_rows::<User>(&changes, &Criteria::new().all())
        .await;
    assert_eq!(updated, 2);

    let deleted = db
        .delete_rows::<User>(&Criteria::new().filter(Q::eq("name", "Bob")))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    let deleted = db.delete_rows::<User>(&Criteria::new().all()).await.unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn test_empty_filter_group_does_not_open_bulk_mutations() {
    let mut db = test_db().await;
    db.insert(&[&user("u1", "Alice", 30), &user("u2", "Bob", 40)])
        .await
        .unwrap();

    let mut changes = Changes::new();
    changes.insert("verified".into(), Value::Bool(true));
    let unrestricted = Criteria::new().filter(Q::and_all(Vec::new()));

    let err = db
        .update_rows::<User>(&changes, &unrestricted)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    let nested = Criteria::new().filter(Q::and_all([Q::and_all(Vec::new())]));
    let err = db.delete_rows::<User>(&nested).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    let err = db.delete_rows::<User>(&unrestricted).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));

    let verified = db
        .count::<User>(&Criteria::new().filter(Q::eq("verified", true)))
        .await
        .unwrap();
    assert_eq!(verified, 0);
    assert_eq!(db.count::<User>(&Criteria::new()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_update_rows_rejects_bad_columns() {
    let mut db = test_db().await;
    let all = Criteria::new().all();

    let err = db
        .update_rows::<User>(&Changes::new(), &all)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));

    let mut changes = Changes::new();
    changes.insert("nope".into(), Value::Int(1));
    let err = db.update_rows::<User>(&changes, &all).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidField(c) if c == "nope"));

    let mut changes = Changes::new();
    changes.insert("id".into(), Value::Text("u9".into()));
    let err = db.update_rows::<User>(&changes, &all).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
}

#[tokio::test]
async fn test_insert_limits() {
    let mut db = test_db().await;

    let err = db.insert(&[]).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));

    let notes: Vec<Note> = (0..=LIMIT_INSERT)
        .map(|i| Note {
            slug: format!("n{i}"),
            body: "x".into(),
        })
        .collect();
    let err = db.insert_slice(&notes).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    assert_eq!(db.count::<Note>(&Criteria::new()).await.unwrap(), 0);

    let res = db.insert_slice(&notes[..LIMIT_INSERT]).await.unwrap();
    assert_eq!(res.rows_affected, LIMIT_INSERT as u64);
    assert_eq!(
        db.count::<Note>(&Criteria::new()).await.unwrap(),
        LIMIT_INSERT as i64
    );
}

#[tokio::test]
async fn test_insert_rejects_mixed_tables() {
    let mut db = test_db().await;
    let alice = user("u1", "Alice", 30);
    let payment = Payment::default();
    let records: [&dyn DynRecord; 2] = [&alice, &payment];
    let err = db.insert(&records).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    assert_eq!(db.count::<User>(&Criteria::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_key_is_unique_violation() {
    let mut db = test_db().await;
    let note = Note {
        slug: "intro".into(),
        body: "first".into(),
    };
    db.insert(&[&note]).await.unwrap();
    let err = db.insert(&[&note]).await.unwrap_err();
    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn test_create_table_twice() {
    let mut db = test_db().await;
    let err = db.create_table::<Payment>().await.unwrap_err();
    assert!(err.is_table_exists());
}

#[tokio::test]
async fn test_exec_script_and_file() {
    let mut db = test_db().await;
    db.exec_script(
        "INSERT INTO `note` (`slug`, `body`) VALUES ('a', 'x');
         INSERT INTO `note` (`slug`, `body`) VALUES ('b', 'y');",
    )
    .await
    .unwrap();
    assert_eq!(db.count::<Note>(&Criteria::new()).await.unwrap(), 2);

    let err = db.exec_file("/definitely/not/here.sql").await.unwrap_err();
    assert!(matches!(err, OrmError::Io(_)));

    let err = db
        .exec_script("SELECT * FROM `missing_table`;")
        .await
        .unwrap_err();
    assert!(err.is_table_missing());
}

#[tokio::test]
async fn test_adapter_inside_transaction() {
    let pool = common::create_test_pool().await;
    let mut db = wear_orm::Adapter::new(pool.clone());
    db.must_create_table::<Note>().await;

    let mut tx = pool.begin().await.unwrap();
    {
        let mut in_tx = wear_orm::Adapter::new(&mut tx);
        in_tx
            .insert(&[&Note {
                slug: "t".into(),
                body: "tx".into(),
            }])
            .await
            .unwrap();
        assert_eq!(in_tx.count::<Note>(&Criteria::new()).await.unwrap(), 1);
    }
    tx.rollback().await.unwrap();

    assert_eq!(db.count::<Note>(&Criteria::new()).await.unwrap(), 0);
}
