use asupersync::runtime::RuntimeBuilder;
use docmodel::prelude::*;
use docmodel::{IndexSpec, MappingRegistry, QueryKind, Store, UsageErrorKind};
use docmodel_core::{Collection, Cursor, WriteModel};
use docmodel_mapping::{IdentityKind, ReadContext, WriteContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn unwrap_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got: {other:?}"),
    }
}

fn mappings(config: &MappingConfig) -> Result<MappingRegistry> {
    MappingBuilder::new(config.clone())
        .add(
            ClassDef::embeddable("Address")
                .property(PropertyDef::new("street", TypeRef::String))
                .property(PropertyDef::new("city", TypeRef::String)),
        )
        .add(
            ClassDef::entity("Person")
                .collection("people")
                .property(PropertyDef::new("name", TypeRef::String))
                .property(PropertyDef::new("age", TypeRef::Number))
                .property(PropertyDef::new("tags", TypeRef::array(TypeRef::String)))
                .property(PropertyDef::new("address", TypeRef::class("Address")))
                .property(
                    PropertyDef::new("parents", TypeRef::array(TypeRef::class("Person")))
                        .cascade(PropertyFlags::CASCADE_SAVE),
                )
                .property(
                    PropertyDef::new("children", TypeRef::array(TypeRef::class("Person")))
                        .inverse_of("parents"),
                )
                .property(
                    PropertyDef::new("pet", TypeRef::class("Animal"))
                        .cascade(PropertyFlags::CASCADE_ALL),
                ),
        )
        .add(
            ClassDef::entity("Animal")
                .collection("animals")
                .property(PropertyDef::new("name", TypeRef::String)),
        )
        .add(
            ClassDef::entity("Dog")
                .extends("Animal")
                .property(PropertyDef::new("breed", TypeRef::String)),
        )
        .add(ClassDef::entity("Cat").extends("Animal").discriminator("cat"))
        .add(
            ClassDef::entity("Account")
                .collection("accounts")
                .index(IndexSpec {
                    unique: true,
                    ..IndexSpec::new(vec![("email".to_string(), SortDirection::Ascending)])
                })
                .property(PropertyDef::new("email", TypeRef::String)),
        )
        .build()
}

fn factory() -> SessionFactory<MemoryStore> {
    let configuration = Configuration {
        identity: IdentityKind::Sequential,
        ..Configuration::default()
    };
    SessionFactory::new(MemoryStore::new(), &configuration, &mappings).expect("factory")
}

fn run<F: std::future::Future>(f: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f)
}

fn name_of(entity: &ObjectRef) -> Option<String> {
    entity
        .get("name")
        .and_then(|value| value.as_str().map(str::to_string))
}

/// Bob (40) with parent Alice (65); both flushed.
async fn seed_family(session: &mut Session<MemoryStore>, cx: &Cx) -> (ObjectRef, ObjectRef) {
    let alice = ObjectRef::new("Person").with("name", "Alice").with("age", 65);
    let bob = ObjectRef::new("Person")
        .with("name", "Bob")
        .with("age", 40)
        .with("parents", ObjectValue::Array(vec![ObjectValue::Object(alice.clone())]));
    session.save(&bob).expect("save");
    unwrap_outcome(session.flush(cx).await);
    (alice, bob)
}

#[test]
fn find_all_chain_produces_the_expected_definition() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        seed_family(&mut session, &cx).await;

        let mut query = session
            .query("Person")
            .expect("query")
            .find_all(doc! { "name" => "Bob" })
            .limit(10)
            .skip(22)
            .batch_size(10000)
            .sort([("name", 1)])
            .fetch("children");
        let def = query.definition();
        assert_eq!(def.kind, Some(QueryKind::FindAll));
        assert_eq!(def.criteria, doc! { "name" => "Bob" });
        assert_eq!(def.limit_count, Some(10));
        assert_eq!(def.skip_count, Some(22));
        assert_eq!(def.batch_size, Some(10000));
        assert_eq!(def.sort_by, vec![("name".to_string(), SortDirection::Ascending)]);
        assert_eq!(def.fetch_paths, vec!["children".to_string()]);

        let skipped = unwrap_outcome(query.execute(&cx).await)
            .into_entities()
            .expect("entities");
        assert!(skipped.is_empty());
    });
}

#[test]
fn find_one_and_update_then_fetch_reports_already_executed() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        let young = ObjectRef::new("Person").with("name", "Young").with("age", 21);
        session.save(&young).expect("save");
        unwrap_outcome(session.flush(&cx).await);

        let mut query = session.query("Person").expect("query").find_one_and_update(
            doc! { "age" => 21 },
            doc! { "$set" => doc! { "arg" => 22 } },
        );
        let found = unwrap_outcome(query.execute(&cx).await)
            .into_entity()
            .expect("matched");
        assert!(found.ptr_eq(&young));

        let mut query = query.fetch("parents");
        let err = unwrap_err(query.execute(&cx).await);
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::AlreadyExecuted));
        assert_eq!(err.to_string(), "Query already executed.");

        let stored = unwrap_outcome(
            session
                .store()
                .collection("people")
                .find(doc! { "arg" => 22 })
                .to_array(&cx)
                .await,
        );
        assert_eq!(stored.len(), 1);
    });
}

#[test]
fn identity_map_keeps_one_instance_per_id() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut writer = factory.create_session();
    let mut reader = factory.create_session();

    run(async {
        let (_, bob) = seed_family(&mut writer, &cx).await;
        let id = bob.id().expect("id");

        let first = unwrap_outcome(reader.find(&cx, "Person", id.clone()).await).expect("found");
        let second = unwrap_outcome(reader.find(&cx, "Person", id.clone()).await).expect("found");
        assert!(first.ptr_eq(&second));
        assert!(!first.ptr_eq(&bob));

        let mut query = reader.query("Person").expect("query").find_all(None);
        let all = unwrap_outcome(query.execute(&cx).await)
            .into_entities()
            .expect("entities");
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|entity| entity.ptr_eq(&first)));
        assert_eq!(reader.tracked_count(), 2);
    });
}

#[test]
fn flushing_without_changes_writes_nothing() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        let (alice, bob) = seed_family(&mut session, &cx).await;
        assert!(session.pending_counts().expect("counts").is_empty());
        unwrap_outcome(session.flush(&cx).await);
        unwrap_outcome(session.flush(&cx).await);

        let stored = unwrap_outcome(
            session
                .store()
                .collection("people")
                .find(Document::new())
                .to_array(&cx)
                .await,
        );
        assert!(stored.iter().all(|doc| doc.get("__v") == Some(&Value::Int(1))));

        bob.set("age", 41);
        assert_eq!(session.pending_counts().expect("counts").dirty, 1);
        assert!(!session.is_dirty(&alice).expect("tracked"));
    });
}

#[test]
fn written_entities_read_back_equal() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        let address = ObjectRef::new("Address")
            .with("street", "1 Main St")
            .with("city", "Springfield");
        let carol = ObjectRef::new("Person")
            .with("name", "Carol")
            .with("age", 33)
            .with("tags", ObjectValue::Array(vec!["a".into(), "b".into()]))
            .with("address", address);
        session.save(&carol).expect("save");
        unwrap_outcome(session.flush(&cx).await);
        session.clear();

        let registry = Arc::clone(factory.registry());
        let person = registry.entity_by_class("Person").expect("mapped");
        let mut ctx = WriteContext::new(&registry);
        let written = registry.write_document(&mut ctx, person, &carol);
        let written = ctx.finish(written).expect("write").expect("document");

        let loaded = unwrap_outcome(session.find(&cx, "Person", carol.id().expect("id")).await)
            .expect("found");
        let mut ctx = WriteContext::new(&registry);
        let rewritten = registry.write_document(&mut ctx, person, &loaded);
        let rewritten = ctx.finish(rewritten).expect("write").expect("document");
        assert!(registry.are_documents_equal(person, &written, &rewritten));

        let mut ctx = ReadContext::new(&registry);
        let read = registry.read_document(&mut ctx, person, &written);
        let read = ctx.finish(read).expect("read").expect("object");
        assert_eq!(name_of(&read).as_deref(), Some("Carol"));
    });
}

#[test]
fn omitted_criteria_matches_everything() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        seed_family(&mut session, &cx).await;

        let mut omitted = session.query("Person").expect("query").count(None);
        let omitted = unwrap_outcome(omitted.execute(&cx).await).count();
        let mut empty = session.query("Person").expect("query").count(doc! {});
        let empty = unwrap_outcome(empty.execute(&cx).await).count();
        assert_eq!(omitted, Some(2));
        assert_eq!(omitted, empty);

        let mut names = session.query("Person").expect("query").distinct("name", None);
        let names = unwrap_outcome(names.execute(&cx).await)
            .into_values()
            .expect("values");
        assert_eq!(names.len(), 2);
    });
}

#[test]
fn sort_and_fetch_accumulate_across_calls() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        let (alice, _) = seed_family(&mut session, &cx).await;
        session.clear();

        let mut query = session
            .query("Person")
            .expect("query")
            .find_all(None)
            .sort(("age", -1))
            .sort(vec![("name", 1)])
            .fetch("parents")
            .fetch(["parents.children"]);
        assert_eq!(
            query.definition().sort_by,
            vec![
                ("age".to_string(), SortDirection::Descending),
                ("name".to_string(), SortDirection::Ascending),
            ]
        );
        assert_eq!(query.definition().fetch_paths, vec!["parents", "parents.children"]);

        let people = unwrap_outcome(query.execute(&cx).await)
            .into_entities()
            .expect("entities");
        let names: Vec<_> = people.iter().filter_map(name_of).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);

        let bob = &people[1];
        let parents = bob.get("parents").expect("parents");
        let parent = parents
            .as_array()
            .and_then(|items| items.first())
            .and_then(ObjectValue::as_object)
            .expect("resolved parent");
        assert!(parent.ptr_eq(&people[0]));
        assert_eq!(parent.id(), alice.id());
        let children = parent.get("children").expect("children");
        assert!(
            children
                .as_array()
                .is_some_and(|items| items.iter().any(|c| c.as_object().is_some_and(|c| c.ptr_eq(bob))))
        );
    });
}

#[test]
fn polymorphic_queries_scope_by_discriminator() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        let rex = ObjectRef::new("Dog").with("name", "Rex").with("breed", "collie");
        let tom = ObjectRef::new("Cat").with("name", "Tom");
        let generic = ObjectRef::new("Animal").with("name", "Thing");
        for animal in [&rex, &tom, &generic] {
            session.save(animal).expect("save");
        }
        unwrap_outcome(session.flush(&cx).await);
        session.clear();

        let mut all = session.query("Animal").expect("query").count(None);
        assert_eq!(unwrap_outcome(all.execute(&cx).await).count(), Some(3));

        let mut cats = session.query("Cat").expect("query").find_all(None);
        let cats = unwrap_outcome(cats.execute(&cx).await)
            .into_entities()
            .expect("entities");
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].class().as_deref(), Some("Cat"));

        let dog = unwrap_outcome(session.find(&cx, "Animal", rex.id().expect("id")).await)
            .expect("found");
        assert_eq!(dog.class().as_deref(), Some("Dog"));
        assert!(unwrap_outcome(session.find(&cx, "Cat", rex.id().expect("id")).await).is_none());
    });
}

#[test]
fn unknown_discriminator_surfaces_a_mapping_error() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        let animals = session.store().collection("animals");
        unwrap_outcome(
            animals
                .bulk_write(
                    &cx,
                    vec![WriteModel::InsertOne {
                        document: doc! { "_id" => 9, "__t" => "Bird", "name" => "Tweety", "__v" => 1 },
                    }],
                )
                .await,
        );
        let err = unwrap_err(session.find(&cx, "Animal", 9).await);
        assert!(
            err.mapping_issues()
                .iter()
                .any(|issue| issue.message == "Unrecognized discriminator value 'Bird'.")
        );
        assert_eq!(session.tracked_count(), 0);
    });
}

#[test]
fn each_visits_every_entity() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        for i in 0..7 {
            session
                .save(&ObjectRef::new("Person").with("name", format!("p{i}")).with("age", i))
                .expect("save");
        }
        unwrap_outcome(session.flush(&cx).await);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut query = session.query("Person").expect("query").batch_size(3).each(
            None,
            EachIterator::new(move |_entity| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        assert!(matches!(unwrap_outcome(query.execute(&cx).await), QueryResult::Done));
        assert_eq!(seen.load(Ordering::SeqCst), 7);

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        let mut query = session
            .query("Person")
            .expect("query")
            .sort(("age", 1))
            .each_series(
                doc! { "age" => doc! { "$lt" => 3 } },
                EachIterator::new(move |entity: ObjectRef| {
                    let sink = Arc::clone(&sink);
                    async move {
                        if let Ok(mut names) = sink.lock() {
                            names.extend(name_of(&entity));
                        }
                        Ok(())
                    }
                }),
            );
        unwrap_outcome(query.execute(&cx).await);
        assert_eq!(*order.lock().expect("lock"), vec!["p0", "p1", "p2"]);
    });
}

#[test]
fn each_stops_at_the_first_callback_error() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        for i in 0..4 {
            session
                .save(&ObjectRef::new("Person").with("name", format!("p{i}")).with("age", i))
                .expect("save");
        }
        unwrap_outcome(session.flush(&cx).await);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut query = session.query("Person").expect("query").sort(("age", 1)).each_series(
            None,
            EachIterator::new(move |_entity| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                        return Err(Error::Custom("stop".to_string()));
                    }
                    Ok(())
                }
            }),
        );
        let err = unwrap_err(query.execute(&cx).await);
        assert_eq!(err.to_string(), "stop");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    });
}

#[test]
fn unique_indexes_reject_duplicate_writes() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut session = factory.create_session();

    run(async {
        let names = unwrap_outcome(factory.create_indexes(&cx).await);
        assert_eq!(names, vec!["email_1".to_string()]);

        session
            .save(&ObjectRef::new("Account").with("email", "a@example.com"))
            .expect("save");
        unwrap_outcome(session.flush(&cx).await);

        let twin = ObjectRef::new("Account").with("email", "a@example.com");
        let other = ObjectRef::new("Account").with("email", "b@example.com");
        session.save(&twin).expect("save");
        session.save(&other).expect("save");
        let err = unwrap_err(session.flush(&cx).await);
        assert!(err.to_string().contains("E11000"));
        assert_eq!(session.state(&twin), EntityState::New);
        assert_eq!(session.state(&other), EntityState::Managed);

        twin.set("email", "c@example.com");
        unwrap_outcome(session.flush(&cx).await);
        assert_eq!(session.state(&twin), EntityState::Managed);
        let mut count = session.query("Account").expect("query").count(None);
        assert_eq!(unwrap_outcome(count.execute(&cx).await).count(), Some(3));
    });
}

#[test]
fn stale_sessions_get_a_conflict() {
    let factory = factory();
    let cx = Cx::for_testing();
    let mut first = factory.create_session();
    let mut second = factory.create_session();

    run(async {
        let (_, bob) = seed_family(&mut first, &cx).await;
        let id = bob.id().expect("id");
        let other = unwrap_outcome(second.find(&cx, "Person", id.clone()).await).expect("found");

        other.set("age", 50);
        unwrap_outcome(second.flush(&cx).await);

        bob.set("age", 45);
        let err = unwrap_err(first.flush(&cx).await);
        match err {
            Error::Conflict(conflict) => {
                assert_eq!(conflict.collection, "people");
                assert_eq!(conflict.ids, vec![id.to_string()]);
            }
            other => panic!("expected a conflict, got {other}"),
        }

        unwrap_outcome(first.refresh(&cx, &bob).await);
        assert_eq!(bob.get("age").and_then(|age| age.as_i64()), Some(50));
        bob.set("age", 45);
        unwrap_outcome(first.flush(&cx).await);
    });
}
