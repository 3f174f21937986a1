mod common;

use common::{MockExecution, people};
use serde::Deserialize;
use steppe::bson::{Bson, Document, doc};
use steppe::{Builder, Error, OperationKind, Outcome, types::Hint};

#[test]
fn find_passes_filter_and_projection() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.field("city").equals("Ulaanbaatar").unwrap();
    qb.select(["name"]);

    let rows = qb.get_query(&mock).to_vec().unwrap();

    assert_eq!(rows.len(), 3);
    let call = mock.last_call();
    assert_eq!(call.method, "find");
    assert_eq!(
        call.args,
        doc! { "filter": { "city": "Ulaanbaatar" }, "projection": { "name": 1 } }
    );
}

#[test]
fn cursor_shaping_runs_in_order() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.hint("city_1")
        .snapshot(true)
        .slave_okay(true)
        .immortal(true)
        .sort("name", "asc")
        .skip(2)
        .limit(10)
        .hint(doc! { "name": 1 });

    qb.get_query(&mock).execute().unwrap();

    assert_eq!(
        mock.cursor_log(),
        vec![
            "limit 10".to_owned(),
            "skip 2".to_owned(),
            format!("sort {}", doc! { "name": 1 }),
            "immortal true".to_owned(),
            "slave_okay true".to_owned(),
            "snapshot".to_owned(),
            format!("hint {}", Bson::from(Hint::from("city_1"))),
            format!("hint {}", Bson::from(Hint::from(doc! { "name": 1 }))),
        ]
    );
}

#[test]
fn unset_cursor_options_are_not_applied() {
    let mock = MockExecution::with_rows(people());

    Builder::new().get_query(&mock).execute().unwrap();

    assert!(mock.cursor_log().is_empty());
}

#[test]
fn eager_cursor_fetches_everything_up_front() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.eager_cursor(true);

    let mut query = qb.get_query(&mock);
    let first = query.iter().unwrap().next().unwrap().unwrap();

    assert_eq!(first, Bson::Document(people()[0].clone()));
    assert_eq!(mock.fetches(), 3);
}

#[test]
fn lazy_cursor_fetches_on_demand() {
    let mock = MockExecution::with_rows(people());

    let mut query = Builder::new().get_query(&mock);
    query.iter().unwrap().next().unwrap().unwrap();

    assert_eq!(mock.fetches(), 1);
}

#[test]
fn result_is_memoized() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.insert().field("name").set("alice", true).unwrap();

    let mut query = qb.get_query(&mock);
    query.result().unwrap();
    query.result().unwrap();
    assert_eq!(mock.calls().len(), 1);

    query.execute().unwrap();
    assert_eq!(mock.calls().len(), 2);
}

#[test]
fn query_is_a_snapshot_of_the_builder() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.field("a").equals(1).unwrap();

    let query = qb.get_query(&mock);
    qb.field("b").equals(2).unwrap();
    query.execute().unwrap();

    assert_eq!(mock.last_call().args.get_document("filter").unwrap(), &doc! { "a": 1 });
}

#[test]
fn non_iterable_result_is_a_postcondition_failure() {
    let mock = MockExecution::answering_scalars();

    let find = Builder::new();
    let mut distinct = Builder::new();
    distinct.distinct("city");
    let mut geo_near = Builder::new();
    geo_near.geo_near((1.0, 2.0));
    let mut map_reduce = Builder::new();
    map_reduce.map("function () { emit(this.city, 1); }");

    for qb in [find, distinct, geo_near, map_reduce] {
        let kind = qb.kind();
        let error = qb.get_query(&mock).execute().unwrap_err();

        assert!(
            matches!(error, Error::Postcondition { operation, found: "a count", .. } if operation == kind),
            "{kind}: {error}"
        );
    }
}

#[test]
fn find_must_return_a_cursor() {
    let mock = MockExecution::answering_lists(people());

    let error = Builder::new().get_query(&mock).iter().err();
    assert!(matches!(
        error,
        Some(Error::Postcondition {
            operation: OperationKind::Find,
            found: "a result list",
            expected: "a cursor",
        })
    ));
    assert_eq!(
        error.map(|error| error.to_string()).as_deref(),
        Some("find query returned a result list where a cursor was expected")
    );

    let mut qb = Builder::new();
    qb.group(doc! { "city": 1 }, doc! { "n": 0 }, Some("r"), Document::new());
    assert_eq!(qb.get_query(&mock).to_vec().unwrap().len(), 3);
}

#[test]
fn writes_are_not_checked_for_iterability() {
    let mock = MockExecution::answering_scalars();
    let mut qb = Builder::new();
    qb.remove();

    assert!(matches!(qb.get_query(&mock).execute(), Ok(Outcome::Count(0))));
}

#[test]
fn collaborator_errors_pass_through() {
    let mock = MockExecution::failing("connection reset");
    let mut qb = Builder::new();
    qb.remove().field("name").equals("alice").unwrap();

    let error = qb.get_query(&mock).execute().unwrap_err();

    let Error::Execution { operation, source } = error else {
        panic!("expected an execution error");
    };
    assert_eq!(operation, OperationKind::Remove);
    assert_eq!(source.to_string(), "connection reset");
}

#[test]
fn iter_is_unsupported_for_writes() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.count();

    let mut query = qb.get_query(&mock);
    assert!(matches!(
        query.iter(),
        Err(Error::UnsupportedOperation { method: "iter", operation: OperationKind::Count, .. })
    ));
    assert!(mock.calls().is_empty());
}

#[test]
fn find_and_update_maps_options() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.find_and_update()
        .return_new(true)
        .upsert(true)
        .sort("name", -1)
        .select(["name"]);
    qb.field("name").equals("alice").unwrap();
    qb.field("visits").inc(1).unwrap();

    let document = qb.get_query(&mock).execute().unwrap().into_document();

    assert_eq!(document, Some(people()[0].clone()));
    assert_eq!(
        mock.last_call().args,
        doc! {
            "filter": { "name": "alice" },
            "update": { "$inc": { "visits": 1 } },
            "options": {
                "new": true,
                "upsert": true,
                "sort": { "name": -1 },
                "fields": { "name": 1 },
            },
        }
    );
}

#[test]
fn find_and_remove_maps_options() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.find_and_remove().field("city").equals("Erdenet").unwrap();

    qb.get_query(&mock).execute().unwrap();

    assert_eq!(
        mock.last_call().args,
        doc! { "filter": { "city": "Erdenet" }, "options": {} }
    );
}

#[test]
fn insert_sends_the_new_object() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.insert()
        .field("name")
        .set("alice", true)
        .unwrap()
        .field("address.city")
        .set("Darkhan", true)
        .unwrap();

    let write = qb.get_query(&mock).execute().unwrap().into_write().unwrap();

    assert_eq!(write.inserted_id, Some(Bson::Int32(1)));
    assert_eq!(
        mock.last_call().args.get_document("document").unwrap(),
        &doc! { "name": "alice", "address": { "city": "Darkhan" } }
    );
}

#[test]
fn update_scenario_upserts_one_document() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.field("username").equals("alice").unwrap();
    qb.update().field("hits").inc(1).unwrap().upsert(true);

    assert_eq!(qb.query_array(), &doc! { "username": "alice" });
    assert_eq!(qb.new_obj(), &doc! { "$inc": { "hits": 1 } });

    let write = qb.get_query(&mock).execute().unwrap().into_write().unwrap();

    assert_eq!(write.matched, 1);
    assert_eq!(
        mock.last_call().args,
        doc! {
            "filter": { "username": "alice" },
            "update": { "$inc": { "hits": 1 } },
            "options": { "upsert": true, "multiple": false },
        }
    );
}

#[test]
fn update_many_sets_multiple() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.update_many().field("active").set(false, true).unwrap();

    qb.get_query(&mock).execute().unwrap();

    let options = mock.last_call().args.get_document("options").unwrap().clone();
    assert_eq!(options, doc! { "upsert": false, "multiple": true });
}

#[test]
fn execution_options_are_merged_under_query_keys() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.update().upsert(true).field("n").inc(1).unwrap();

    qb.get_query_with_options(&mock, doc! { "w": "majority", "upsert": false })
        .execute()
        .unwrap();

    let options = mock.last_call().args.get_document("options").unwrap().clone();
    assert_eq!(options, doc! { "w": "majority", "upsert": true, "multiple": false });
}

#[test]
fn remove_reports_deleted_count() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.remove();

    let write = qb.get_query(&mock).execute().unwrap().into_write().unwrap();

    assert_eq!(write.deleted, 3);
    assert_eq!(mock.last_call().method, "remove");
}

#[test]
fn group_merges_filter_as_condition() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.group(
        doc! { "city": 1 },
        doc! { "count": 0 },
        Some("function (obj, prev) { prev.count++; }"),
        Document::new(),
    )
    .finalize("function (out) { out.total = out.count; }")
    .unwrap()
    .field("name")
    .not_equal("bayar");

    let rows = qb.get_query(&mock).to_vec().unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(
        mock.last_call().args,
        doc! {
            "keys": { "city": 1 },
            "initial": { "count": 0 },
            "reduce": Bson::JavaScriptCode("function (obj, prev) { prev.count++; }".into()),
            "options": {
                "finalize": Bson::JavaScriptCode("function (out) { out.total = out.count; }".into()),
                "cond": { "name": { "$ne": "bayar" } },
            },
        }
    );
}

#[test]
fn group_without_filter_has_no_condition() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.group(doc! { "city": 1 }, doc! { "count": 0 }, None, Document::new());

    qb.get_query(&mock).execute().unwrap();

    let args = mock.last_call().args;
    assert_eq!(args.get_document("options").unwrap(), &Document::new());
    assert_eq!(args.get("reduce"), Some(&Bson::Null));
}

#[test]
fn inline_map_reduce_returns_results_unshaped() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.map("function () { emit(this.city, 1); }")
        .reduce("function (k, v) { return Array.sum(v); }")
        .unwrap();
    qb.field("city").exists(true).limit(2);

    let rows = qb.get_query(&mock).to_vec().unwrap();

    assert_eq!(rows.len(), 3);
    assert!(mock.cursor_log().is_empty());
    let args = mock.last_call().args;
    assert_eq!(args.get_document("out").unwrap(), &doc! { "inline": true });
    assert_eq!(args.get_document("filter").unwrap(), &doc! { "city": { "$exists": true } });
    assert_eq!(args.get_document("options").unwrap(), &doc! { "limit": 2_i64 });
}

#[test]
fn map_reduce_into_a_collection_is_shaped() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.map_reduce("m", "r", Some("city_counts".into()), doc! { "verbose": true })
        .limit(1);

    let rows = qb.get_query(&mock).to_vec().unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(mock.cursor_log().first().map(String::as_str), Some("limit 1"));
    assert_eq!(
        mock.last_call().args.get_document("out").unwrap(),
        &doc! { "replace": "city_counts" }
    );
}

#[test]
fn distinct_returns_values() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.distinct("city");

    let values = qb.get_query(&mock).to_vec().unwrap();

    assert_eq!(values, vec![Bson::from("Ulaanbaatar"), "Erdenet".into(), "Ulaanbaatar".into()]);
    assert_eq!(mock.last_call().args.get_str("field").unwrap(), "city");
}

#[test]
fn geo_near_scenario_passes_num() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.geo_near((10.0, 20.0))
        .max_distance(5.0)
        .unwrap()
        .spherical(true)
        .unwrap()
        .field("type")
        .equals("cafe")
        .unwrap()
        .limit(3);

    assert_eq!(qb.query_array(), &doc! { "type": "cafe" });
    assert_eq!(
        qb.debug().get_document("geoNear").unwrap(),
        &doc! { "near": [10.0, 20.0], "spherical": true, "maxDistance": 5.0 }
    );

    qb.get_query(&mock).to_vec().unwrap();

    assert_eq!(
        mock.last_call().args,
        doc! {
            "near": [10.0, 20.0],
            "filter": { "type": "cafe" },
            "options": { "spherical": true, "maxDistance": 5.0, "num": 3_i64 },
        }
    );
}

#[test]
fn count_passes_limit_and_skip() {
    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.count().limit(10).skip(5);

    let count = qb.get_query(&mock).execute().unwrap().into_count();

    assert_eq!(count, Some(3));
    assert_eq!(
        mock.last_call().args.get_document("options").unwrap(),
        &doc! { "limit": 10_i64, "skip": 5_i64 }
    );
}

#[test]
fn single_result_limits_a_fresh_find() {
    let mock = MockExecution::with_rows(people());
    let mut query = Builder::new().get_query(&mock);

    let first = query.single_result().unwrap();

    assert_eq!(first, Some(Bson::Document(people()[0].clone())));
    assert_eq!(mock.cursor_log().first().map(String::as_str), Some("limit 1"));
    assert_eq!(mock.fetches(), 1);
}

#[test]
fn single_result_deserializes() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        name: String,
        city: String,
    }

    let mock = MockExecution::with_rows(people());
    let mut qb = Builder::new();
    qb.find_and_remove().field("name").equals("alice").unwrap();

    let person: Option<Person> = qb.get_query(&mock).single_result_as().unwrap();

    assert_eq!(
        person,
        Some(Person {
            name: "alice".into(),
            city: "Ulaanbaatar".into(),
        })
    );
}

#[test]
fn single_result_is_unsupported_for_counts() {
    let mock = MockExecution::new();
    let mut qb = Builder::new();
    qb.count();

    assert!(matches!(
        qb.get_query(&mock).single_result(),
        Err(Error::UnsupportedOperation { method: "single_result", .. })
    ));
}

#[test]
fn outcome_debug_hides_cursors() {
    let mock = MockExecution::new();
    let outcome = Builder::new().get_query(&mock).execute().unwrap();

    assert!(matches!(outcome, Outcome::Cursor(_)));
    assert_eq!(format!("{outcome:?}"), "Cursor(..)");
}
