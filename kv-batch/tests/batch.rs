mod common;

use std::time::Duration;

use common::{Event, Post, ProfileV1, ProfileV2, User, client, client_with, unique_name};
use kv_batch::{
    BatchLimits, CallLog, ClientConfig, Entity, EntityMeta, Error, Key, Query, ServiceError,
    is_not_found,
};

#[test]
fn put_and_get_named_entity() {
    let (client, store) = client();
    let mut amy = User::new("amy", 31, "Oslo");

    let key = client.put(&mut amy).unwrap();
    assert_eq!(key, Key::named("User", "amy"));
    assert_eq!(store.len(), 1);

    let mut loaded = User::new("amy", 0, "");
    client.get(&mut loaded).unwrap();
    assert_eq!(loaded, amy);
}

#[test]
fn incomplete_key_gets_generated_id() {
    let (client, _) = client();
    let author = Key::named("User", "amy");
    let mut post = Post {
        id: 0,
        author: Some(author.clone()),
        title: "hello".into(),
    };

    let key = client.put(&mut post).unwrap();
    assert!(key.is_complete());
    assert_eq!(key.parent_key(), Some(&author));
    assert_eq!(post.id, key.id);

    let mut loaded = Post {
        id: post.id,
        author: Some(author),
        ..Default::default()
    };
    client.get(&mut loaded).unwrap();
    assert_eq!(loaded.title, "hello");
}

#[test]
fn empty_string_identity_never_reaches_the_store() {
    let (client, store) = client();
    let mut users = vec![User::new("amy", 1, ""), User::default()];

    let err = client.put_all(&mut users).unwrap_err();
    assert!(err.keys.is_empty());
    assert_eq!(
        err.source,
        Error::EmptyStringIdentity {
            index: 1,
            kind: "User".into()
        }
    );
    assert!(store.calls().put.is_empty());
    assert!(store.is_empty());
}

#[test]
fn partial_put_still_returns_generated_keys() {
    let limits = BatchLimits {
        put: 1,
        ..BatchLimits::default()
    };
    let (client, store) = client_with(ClientConfig::default().with_limits(limits));
    store.fail_next_call(ServiceError::Unavailable("down".into()));

    let mut events = vec![
        Event { body: "a".into() },
        Event { body: "b".into() },
    ];
    let err = client.put_all(&mut events).unwrap_err();
    assert_eq!(err.keys.len(), 2);
    assert_eq!(store.len(), 1);

    // Which chunk hit the failure depends on scheduling.
    let written = err.keys.iter().position(Key::is_complete).unwrap();
    let failed = 1 - written;
    assert!(!err.keys[failed].is_complete());
    assert_eq!(err.source.item(written), None);
    assert_eq!(
        err.source.item(failed),
        Some(&ServiceError::Unavailable("down".into()))
    );

    let stored = client
        .get_all_by_query::<Event>(&Query::new("Event"), None)
        .unwrap();
    assert_eq!(stored, [err.keys[written].clone()]);
}

#[test]
fn get_without_identity_is_rejected() {
    let (client, store) = client();
    let mut posts = vec![Post::default()];
    let err = client.get_all(&mut posts).unwrap_err();
    assert!(matches!(err, Error::MissingIdentity { index: 0, .. }));
    assert!(store.calls().get.is_empty());
}

#[test]
fn missing_entities_are_itemized() {
    let (client, _) = client();
    client.put(&mut User::new("amy", 3, "")).unwrap();

    let mut users = vec![User::new("ghost", 0, ""), User::new("amy", 0, "")];
    let err = client.get_all(&mut users).unwrap_err();
    assert!(is_not_found(&err, 0));
    assert!(!is_not_found(&err, 1));
    assert_eq!(users[1].age, 3);

    // Every element missing is still reported per element.
    let mut users = vec![User::new("ghost", 0, ""), User::new("nobody", 0, "")];
    let err = client.get_all(&mut users).unwrap_err();
    assert!(is_not_found(&err, 0) && is_not_found(&err, 1));

    let err = client.get(&mut User::new("ghost", 0, "")).unwrap_err();
    assert_eq!(err, Error::Service(ServiceError::NoSuchEntity));
}

#[test]
fn uniform_failure_collapses_to_one_error() {
    let (client, store) = client();
    let bad = ServiceError::InvalidKey("rejected".into());
    store.fail_key(Key::named("User", "a"), bad.clone());
    store.fail_key(Key::named("User", "b"), bad.clone());

    let mut users = vec![User::new("a", 0, ""), User::new("b", 0, "")];
    assert_eq!(client.get_all(&mut users).unwrap_err(), Error::Service(bad));

    store.fail_next_call(ServiceError::Unavailable("down".into()));
    let mut users = vec![User::new("c", 0, ""), User::new("d", 0, "")];
    assert_eq!(
        client.get_all(&mut users).unwrap_err(),
        Error::Service(ServiceError::Unavailable("down".into()))
    );
}

#[test]
fn schema_drift_is_tolerated_by_default() {
    let (client, _) = client();
    client
        .put(&mut ProfileV1 {
            handle: "amy".into(),
            bio: "likes rust".into(),
        })
        .unwrap();

    let mut profile = ProfileV2 {
        handle: "amy".into(),
    };
    client.get(&mut profile).unwrap();
    assert_eq!(profile.handle, "amy");

    let strict = client.with_ignore_field_mismatch(false);
    let mut profile = ProfileV2 {
        handle: "amy".into(),
    };
    let err = strict.get(&mut profile).unwrap_err();
    assert!(matches!(err, Error::Service(ServiceError::FieldMismatch { .. })));
    assert_eq!(profile.handle, "amy");

    let mut v1 = ProfileV1 {
        handle: "amy".into(),
        ..Default::default()
    };
    strict.get(&mut v1).unwrap();
    assert_eq!(v1.bio, "likes rust");
}

#[test]
fn large_batches_are_chunked_and_run_in_parallel() {
    let limits = BatchLimits {
        put: 2000,
        ..BatchLimits::default()
    };
    let (client, store) = client_with(ClientConfig::default().with_limits(limits));
    let mut users: Vec<User> = (0..1200)
        .map(|i| User::new(&format!("user-{i:04}"), i, ""))
        .collect();
    client.put_all(&mut users).unwrap();
    assert_eq!(store.calls().put, vec![1200]);

    store.set_latency(Some(Duration::from_millis(100)));
    let mut loaded: Vec<User> = users.iter().map(|u| User::new(&u.name, 0, "")).collect();
    client.get_all(&mut loaded).unwrap();

    let mut sizes = store.calls().get;
    sizes.sort();
    assert_eq!(sizes, vec![200, 1000]);
    assert_eq!(store.max_concurrent_calls(), 2);
    assert_eq!(loaded, users);
}

#[test]
fn put_chunks_follow_limits() {
    let (client, store) = client();
    let mut users: Vec<User> = (0..1200)
        .map(|i| User::new(&unique_name("bulk"), i, ""))
        .collect();
    let keys = client.put_all(&mut users).unwrap();
    assert_eq!(keys.len(), 1200);
    assert_eq!(store.len(), 1200);

    let mut sizes = store.calls().put;
    sizes.sort();
    assert_eq!(sizes, vec![200, 500, 500]);

    client.delete_all(&keys).unwrap();
    assert!(store.is_empty());
    let mut sizes = store.calls().delete;
    sizes.sort();
    assert_eq!(sizes, vec![200, 500, 500]);
}

#[test]
fn failed_chunk_fails_only_its_elements() {
    let (client, store) = client();
    let mut users: Vec<User> = (0..1200)
        .map(|i| User::new(&format!("user-{i:04}"), i, ""))
        .collect();
    client.put_all(&mut users).unwrap();

    store.fail_next_call(ServiceError::Unavailable("flaky".into()));
    let err = client.get_all(&mut users).unwrap_err();
    let Error::Multi(items) = err else {
        panic!("expected itemized error, got {err:?}");
    };
    assert_eq!(items.len(), 1200);
    let failed = items.iter().flatten().count();
    assert!(failed == 1000 || failed == 200, "{failed} elements failed");
    assert!(
        items
            .iter()
            .flatten()
            .all(|e| *e == ServiceError::Unavailable("flaky".into()))
    );
}

#[test]
fn delete_removes_entities() {
    let (client, store) = client();
    let key = client.put(&mut User::new("amy", 1, "Oslo")).unwrap();
    client.delete(&key).unwrap();
    assert!(store.is_empty());
    assert!(is_not_found(
        &client.get_all(&mut [User::new("amy", 0, "")]).unwrap_err(),
        0
    ));
}

#[test]
fn empty_batches_do_nothing() {
    let (client, store) = client();
    let mut none: Vec<User> = Vec::new();
    assert!(client.put_all(&mut none).unwrap().is_empty());
    client.get_all(&mut none).unwrap();
    client.delete_all(&[]).unwrap();
    assert_eq!(store.calls(), CallLog::default());
}

#[test]
fn kind_resolution() {
    fn lowercase(meta: &EntityMeta) -> String {
        meta.type_name.to_lowercase()
    }

    let (client, store) = client();
    assert_eq!(client.kind::<User>(), "User");
    assert_eq!(client.kind::<Post>(), "Post");
    assert_eq!(client.kind::<ProfileV2>(), "Profile");
    assert_eq!(ProfileV1::meta().kind, Some("Profile"));

    let kinds = client.registered_kinds();
    for kind in ["Post", "Profile", "User"] {
        assert!(kinds.contains(&kind.to_string()), "{kind} missing from {kinds:?}");
    }

    let lower = kv_batch::Client::with_config(
        store.clone(),
        ClientConfig::default().with_kind_resolver(lowercase),
    );
    let key = lower.put(&mut User::new("amy", 1, "")).unwrap();
    assert_eq!(key.kind, "user");
    assert!(client.get(&mut User::new("amy", 0, "")).is_err());
}

#[test]
fn keys_of_entities() {
    let (client, _) = client();
    assert_eq!(
        client.key(&User::new("amy", 0, "")),
        Some(Key::named("User", "amy"))
    );
    assert_eq!(client.key(&Post::default()), None);
    assert_eq!(
        client.key_error(&Post::default()).unwrap(),
        Key::incomplete("Post")
    );
}
