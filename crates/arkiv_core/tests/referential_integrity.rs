//! End-to-end referential-integrity scenarios over an in-memory store.
//!
//! The schema models a small performance archive: top-level `Genre` and
//! `Location` rows, with `Event` identified by its date within a `Location`
//! and optionally classified under a `Genre`.

use arkiv_core::{
    EntityKey, EntityType, ModelError, SchemaRegistry, Session, TypeDef,
};
use arkiv_store::InMemoryBackend;
use std::sync::Arc;

const GENRE: EntityType = EntityType::new("Genre");
const LOCATION: EntityType = EntityType::new("Location");
const EVENT: EntityType = EntityType::new("Event");

fn session() -> Session {
    let schema = Arc::new(
        SchemaRegistry::builder()
            .entity(TypeDef::new(GENRE))
            .entity(TypeDef::new(LOCATION))
            .entity(TypeDef::new(EVENT).identifying_parent(LOCATION))
            .relation(GENRE, EVENT, false)
            .build()
            .expect("static schema must build"),
    );
    Session::new(schema, Box::new(InMemoryBackend::new()))
}

fn persisted(session: &mut Session, ty: EntityType, key: &str) -> arkiv_core::EntityId {
    let id = session.create(ty);
    session.set_simple_key(id, key).unwrap();
    session.update(|s| s.persist(id)).unwrap();
    id
}

fn event_at(
    session: &mut Session,
    venue: arkiv_core::EntityId,
    date: &str,
) -> arkiv_core::EntityId {
    let event = session.create(EVENT);
    session.set_simple_key(event, date).unwrap();
    session.set_identifying_parent(event, venue).unwrap();
    session.update(|s| s.persist(event)).unwrap();
    event
}

#[test]
fn event_without_identifying_parent_cannot_persist() {
    let mut session = session();
    let event = session.create(EVENT);
    session.set_simple_key(event, "2013/04/11").unwrap();

    let err = session.update(|s| s.persist(event)).unwrap_err();
    assert!(matches!(
        err,
        ModelError::PropertyConstraintViolation { property, .. } if property == "identifyingParent"
    ));
    assert!(!session.is_persistent(event).unwrap());
}

#[test]
fn top_level_duplicate_is_rejected_case_insensitively() {
    let mut session = session();
    persisted(&mut session, LOCATION, "Fred's");

    let clone = session.create(LOCATION);
    session.set_simple_key(clone, "FRED'S").unwrap();
    let err = session.update(|s| s.persist(clone)).unwrap_err();
    assert!(matches!(err, ModelError::DuplicateKey { .. }));
    assert!(!session.is_persistent(clone).unwrap());
}

#[test]
fn renaming_into_a_sibling_key_is_rejected_without_side_effects() {
    let mut session = session();
    let venue = persisted(&mut session, LOCATION, "Fred's");
    event_at(&mut session, venue, "2013/04/11");
    let second = event_at(&mut session, venue, "2013/04/12");

    let err = session
        .update(|s| s.set_simple_key(second, "2013/04/11"))
        .unwrap_err();
    assert!(matches!(err, ModelError::DuplicateKey { .. }));

    // The failed rename left both entries where they were.
    assert_eq!(session.simple_key(second).unwrap(), "2013/04/12");
    assert_eq!(session.child_count(venue, EVENT).unwrap(), 2);
}

#[test]
fn cascade_rename_colliding_through_a_shared_genre_is_rejected() {
    let mut session = session();
    let genre = session.create(GENRE);
    session.set_simple_key(genre, "Jazz").unwrap();

    // Two transient venues, each with a same-dated event, both events filed
    // under the one genre: renaming one venue onto the other's name would
    // make the cascaded event keys collide in the genre's collection.
    let fred = session.create(LOCATION);
    session.set_simple_key(fred, "Fred's").unwrap();
    let joe = session.create(LOCATION);
    session.set_simple_key(joe, "Joe's").unwrap();
    for venue in [fred, joe] {
        let event = session.create(EVENT);
        session.set_simple_key(event, "2013/04/11").unwrap();
        session.set_identifying_parent(event, venue).unwrap();
        session.set_parent(event, GENRE, Some(genre)).unwrap();
    }

    let err = session.set_simple_key(fred, "JOE'S").unwrap_err();
    assert!(matches!(err, ModelError::DuplicateKey { .. }));
    assert_eq!(session.simple_key(fred).unwrap(), "Fred's");
    assert_eq!(session.child_count(genre, EVENT).unwrap(), 2);

    // A non-colliding rename still cascades cleanly.
    session.set_simple_key(fred, "Frederick's").unwrap();
    let dates: Vec<String> = session
        .children(genre, EVENT)
        .unwrap()
        .into_iter()
        .map(|e| session.key(e).unwrap().to_string())
        .collect();
    assert_eq!(
        dates,
        vec!["2013/04/11 | Frederick's", "2013/04/11 | Joe's"]
    );
}

#[test]
fn same_date_at_different_locations_is_allowed() {
    let mut session = session();
    let fred = persisted(&mut session, LOCATION, "Fred's");
    let joe = persisted(&mut session, LOCATION, "Joe's");

    event_at(&mut session, fred, "2013/04/11");
    event_at(&mut session, joe, "2013/04/11");

    assert_eq!(session.child_count(fred, EVENT).unwrap(), 1);
    assert_eq!(session.child_count(joe, EVENT).unwrap(), 1);
}

#[test]
fn same_date_at_the_same_location_is_rejected() {
    let mut session = session();
    let venue = persisted(&mut session, LOCATION, "Fred's");
    event_at(&mut session, venue, "2013/04/11");

    let dup = session.create(EVENT);
    session.set_simple_key(dup, "2013/04/11").unwrap();
    let err = session.set_identifying_parent(dup, venue).unwrap_err();
    assert!(matches!(err, ModelError::DuplicateKey { .. }));
    assert!(session.identifying_parent(dup).unwrap().is_none());
}

#[test]
fn unpersist_with_children_is_blocked_with_a_counting_diagnostic() {
    let mut session = session();
    let venue = persisted(&mut session, LOCATION, "Fred's");
    event_at(&mut session, venue, "2013/04/11");
    event_at(&mut session, venue, "2013/04/12");

    let err = session.update(|s| s.unpersist(venue)).unwrap_err();
    let ModelError::ConstraintViolation { message } = err else {
        panic!("expected a constraint violation, got {err}");
    };
    assert!(message.contains("Event"), "message was: {message}");
    assert!(message.contains('2'), "message was: {message}");
    assert!(session.is_persistent(venue).unwrap());
}

#[test]
fn unpersist_succeeds_once_children_are_gone() {
    let mut session = session();
    let venue = persisted(&mut session, LOCATION, "Fred's");
    let event = event_at(&mut session, venue, "2013/04/11");

    session.update(|s| s.unpersist(event)).unwrap();
    assert_eq!(session.child_count(venue, EVENT).unwrap(), 0);

    session.update(|s| s.unpersist(venue)).unwrap();
    assert!(!session.is_persistent(venue).unwrap());

    session.refresh().unwrap();
    session.begin_read().unwrap();
    let err = session.finder().read(LOCATION, "Fred's", None).unwrap_err();
    assert!(matches!(err, ModelError::NotFound { .. }));
    session.commit().unwrap();
}

#[test]
fn unpersisting_an_event_also_detaches_its_genre() {
    let mut session = session();
    let genre = persisted(&mut session, GENRE, "Jazz");
    let venue = persisted(&mut session, LOCATION, "Fred's");
    let event = event_at(&mut session, venue, "2013/04/11");
    session
        .update(|s| s.set_parent(event, GENRE, Some(genre)))
        .unwrap();
    assert_eq!(session.child_count(genre, EVENT).unwrap(), 1);

    session.update(|s| s.unpersist(event)).unwrap();
    assert_eq!(session.child_count(genre, EVENT).unwrap(), 0);
    assert_eq!(session.child_count(venue, EVENT).unwrap(), 0);
}

#[test]
fn clearing_an_optional_parent_removes_the_collection_entry() {
    let mut session = session();
    let genre = persisted(&mut session, GENRE, "Jazz");
    let venue = persisted(&mut session, LOCATION, "Fred's");
    let event = event_at(&mut session, venue, "2013/04/11");

    session
        .update(|s| s.set_parent(event, GENRE, Some(genre)))
        .unwrap();
    session.update(|s| s.set_parent(event, GENRE, None)).unwrap();
    assert!(session.parent(event, GENRE).unwrap().is_none());
    assert_eq!(session.child_count(genre, EVENT).unwrap(), 0);
}

#[test]
fn clearing_a_mandatory_parent_is_rejected() {
    let schema = Arc::new(
        SchemaRegistry::builder()
            .entity(TypeDef::new(GENRE))
            .entity(TypeDef::new(LOCATION))
            .relation(GENRE, LOCATION, true)
            .build()
            .unwrap(),
    );
    let mut session = Session::new(schema, Box::new(InMemoryBackend::new()));
    let genre = persisted(&mut session, GENRE, "Jazz");
    let venue = session.create(LOCATION);
    session.set_simple_key(venue, "Fred's").unwrap();
    session.set_parent(venue, GENRE, Some(genre)).unwrap();
    session.update(|s| s.persist(venue)).unwrap();

    let err = session
        .update(|s| s.set_parent(venue, GENRE, None))
        .unwrap_err();
    assert!(matches!(err, ModelError::ConstraintViolation { .. }));
    assert_eq!(session.parent(venue, GENRE).unwrap(), Some(genre));
}

#[test]
fn whole_graph_survives_a_refresh() {
    let mut session = session();
    let genre = persisted(&mut session, GENRE, "Jazz");
    let venue = persisted(&mut session, LOCATION, "Fred's");
    let event = event_at(&mut session, venue, "2013/04/11");
    session
        .update(|s| s.set_parent(event, GENRE, Some(genre)))
        .unwrap();
    event_at(&mut session, venue, "2013/04/10");

    session.refresh().unwrap();
    session.begin_read().unwrap();
    let finder = session.finder();
    let venue = finder.read(LOCATION, "Fred's", None).unwrap();
    let genre = finder.read(GENRE, "Jazz", None).unwrap();
    let event = finder.read(EVENT, "2013/04/11", Some(venue)).unwrap();
    session.commit().unwrap();

    assert_eq!(session.identifying_parent(event).unwrap(), Some(venue));
    assert_eq!(session.parent(event, GENRE).unwrap(), Some(genre));
    assert_eq!(
        session.key(event).unwrap(),
        EntityKey::new("2013/04/11", Some(EntityKey::top_level("Fred's")))
    );

    // Children come back in ascending key order.
    let dates: Vec<String> = session
        .children(venue, EVENT)
        .unwrap()
        .into_iter()
        .map(|e| session.simple_key(e).unwrap().to_string())
        .collect();
    assert_eq!(dates, vec!["2013/04/10", "2013/04/11"]);
}

#[test]
fn renaming_a_persistent_location_cascades_to_stored_event_keys() {
    let mut session = session();
    let venue = persisted(&mut session, LOCATION, "Fred's");
    event_at(&mut session, venue, "2013/04/11");

    session.begin_update().unwrap();
    session.set_simple_key(venue, "Freddy's").unwrap();
    session.commit().unwrap();

    session.refresh().unwrap();
    session.begin_read().unwrap();
    let venue = session.finder().read(LOCATION, "Freddy's", None).unwrap();
    let event = session
        .finder()
        .read(EVENT, "2013/04/11", Some(venue))
        .unwrap();
    session.commit().unwrap();
    assert_eq!(session.key(event).unwrap().to_string(), "2013/04/11 | Freddy's");
}

#[test]
fn persistent_top_level_rename_checks_the_whole_population() {
    let mut session = session();
    let fred = persisted(&mut session, LOCATION, "Fred's");
    persisted(&mut session, LOCATION, "Joe's");

    // A persistent entity cannot be renamed outside an update transaction.
    let err = session.set_simple_key(fred, "Joe's").unwrap_err();
    assert!(matches!(err, ModelError::InvalidState { .. }));

    session.begin_update().unwrap();
    let err = session.set_simple_key(fred, "JOE'S").unwrap_err();
    assert!(matches!(err, ModelError::DuplicateKey { .. }));

    // Renaming to itself with different casing is not a collision.
    session.set_simple_key(fred, "FRED'S").unwrap();
    session.commit().unwrap();
    assert_eq!(session.simple_key(fred).unwrap(), "FRED'S");
}

#[test]
fn moving_an_event_between_locations_rewrites_its_key() {
    let mut session = session();
    let fred = persisted(&mut session, LOCATION, "Fred's");
    let joe = persisted(&mut session, LOCATION, "Joe's");
    let event = event_at(&mut session, fred, "2013/04/11");

    session.begin_update().unwrap();
    session.set_identifying_parent(event, joe).unwrap();
    session.commit().unwrap();

    assert_eq!(session.key(event).unwrap().to_string(), "2013/04/11 | Joe's");
    assert_eq!(session.child_count(fred, EVENT).unwrap(), 0);
    assert_eq!(session.child_count(joe, EVENT).unwrap(), 1);

    session.refresh().unwrap();
    session.begin_read().unwrap();
    let joe = session.finder().read(LOCATION, "Joe's", None).unwrap();
    let fred = session.finder().read(LOCATION, "Fred's", None).unwrap();
    session.commit().unwrap();
    assert_eq!(session.child_count(joe, EVENT).unwrap(), 1);
    assert_eq!(session.child_count(fred, EVENT).unwrap(), 0);
}
