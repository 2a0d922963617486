mod support;

use dispatch_core::review::ReviewSubmission;
use dispatch_core::trust::TrustEvent;
use dispatch_core::{DispatchError, RideId, UserId};
use support::engine::TestEngine;

fn review(ride_id: RideId, reviewer: u64, target: u64, rating: u8) -> ReviewSubmission {
    ReviewSubmission {
        ride_id,
        reviewer: UserId(reviewer),
        target: UserId(target),
        rating,
        comment: None,
    }
}

#[test]
fn duplicate_review_is_rejected_and_trust_moves_once() {
    let engine = TestEngine::new();
    let (id, _) = engine.completed_ride(1, 100);
    assert_eq!(engine.dispatcher.trust_score(UserId(100)), 51.0);

    engine.dispatcher.submit_review(review(id, 1, 100, 5)).expect("review");
    assert_eq!(engine.dispatcher.trust_score(UserId(100)), 55.0);

    let err = engine.dispatcher.submit_review(review(id, 1, 100, 1)).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::DuplicateReview { ride, reviewer } if ride == id && reviewer == UserId(1)
    ));
    assert_eq!(engine.dispatcher.trust_score(UserId(100)), 55.0);
    assert_eq!(engine.dispatcher.reviews_for_ride(id).len(), 1);
}

#[test]
fn rider_and_captain_may_review_each_other() {
    let engine = TestEngine::new();
    let (id, _) = engine.completed_ride(1, 100);

    engine.dispatcher.submit_review(review(id, 1, 100, 4)).expect("rider review");
    engine.dispatcher.submit_review(review(id, 100, 1, 2)).expect("captain review");

    let reviews = engine.dispatcher.reviews_for_ride(id);
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0].reviewer, UserId(1));
    assert_eq!(reviews[1].reviewer, UserId(100));
    // Completion +1, then (rating - 3) * 2.
    assert_eq!(engine.dispatcher.trust_score(UserId(100)), 53.0);
    assert_eq!(engine.dispatcher.trust_score(UserId(1)), 49.0);

    let audit = engine.dispatcher.trust_audit();
    let reviews_applied = audit
        .iter()
        .filter(|entry| matches!(entry.event, TrustEvent::Reviewed { .. }))
        .count();
    assert_eq!(reviews_applied, 2);
}

#[test]
fn unfinished_rides_cannot_be_reviewed() {
    let engine = TestEngine::new();
    let id = engine.ongoing_ride(1, 100);
    let err = engine.dispatcher.submit_review(review(id, 1, 100, 5)).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert!(engine.dispatcher.reviews_for_ride(id).is_empty());
    assert!(engine.dispatcher.trust_record(UserId(100)).is_none());
}

#[test]
fn only_ride_participants_can_review() {
    let engine = TestEngine::new();
    let (id, _) = engine.completed_ride(1, 100);

    for (reviewer, target) in [(7, 100), (1, 7), (1, 1)] {
        let err = engine
            .dispatcher
            .submit_review(review(id, reviewer, target, 3))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }
    let err = engine.dispatcher.submit_review(review(id, 1, 100, 6)).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    let err = engine
        .dispatcher
        .submit_review(review(RideId(404), 1, 100, 3))
        .unwrap_err();
    assert!(matches!(err, DispatchError::RideNotFound(_)));
    assert!(engine.dispatcher.reviews_for_ride(id).is_empty());
}

#[test]
fn repeated_bad_reviews_never_push_trust_below_zero() {
    let engine = TestEngine::new();
    for rider in 1..=20 {
        engine.add_captain(100, dispatch_core::VehicleClass::Mini, 1.0);
        let created = engine.request_ride(rider, "mini");
        engine.dispatcher.match_ride(created.ride.id).expect("match");
        engine
            .dispatcher
            .verify_pickup(created.ride.id, created.pickup_code.expose())
            .expect("pickup");
        engine
            .dispatcher
            .complete_ride(created.ride.id, dispatch_core::TripMetrics::new(2.0, 6.0))
            .expect("complete");
        engine
            .dispatcher
            .submit_review(review(created.ride.id, rider, 100, 1))
            .expect("review");
    }
    let score = engine.dispatcher.trust_score(UserId(100));
    assert_eq!(score, 0.0);
    assert!(engine
        .dispatcher
        .trust_audit()
        .iter()
        .all(|entry| (0.0..=100.0).contains(&entry.after)));
}
