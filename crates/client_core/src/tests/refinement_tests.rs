use super::*;
use serde_json::json;
use shared::domain::{RefinementKind, UseCase};

fn request(id: &str) -> RefinementRequest {
    RefinementRequest::new(UseCaseId::new(id), RefinementKind::MoreSubFlows)
}

#[test]
fn ticket_walks_through_every_phase() {
    let coordinator = RefinementCoordinator::new();
    let id = UseCaseId::new("uc-1");
    assert_eq!(coordinator.phase(&id), RefinementPhase::Idle);

    let ticket = coordinator.begin(request("uc-1")).expect("slot free");
    assert_eq!(coordinator.phase(&id), RefinementPhase::Requesting);
    assert_eq!(ticket.advance(), RefinementPhase::Settling);
    assert_eq!(coordinator.phase(&id), RefinementPhase::Settling);
    assert_eq!(ticket.advance(), RefinementPhase::Reloading);
    assert_eq!(ticket.advance(), RefinementPhase::Reloading);
    assert_eq!(ticket.phase(), RefinementPhase::Reloading);

    drop(ticket);
    assert_eq!(coordinator.phase(&id), RefinementPhase::Idle);
    assert!(!coordinator.is_busy());
}

#[test]
fn only_one_refinement_may_be_in_flight() {
    let coordinator = RefinementCoordinator::new();
    let _ticket = coordinator.begin(request("uc-1")).expect("slot free");

    let same = coordinator.begin(request("uc-1")).expect_err("busy");
    assert!(matches!(same, RefinementError::InFlight { .. }));

    match coordinator.begin(request("uc-2")).expect_err("busy") {
        RefinementError::InFlight {
            requested,
            in_flight,
        } => {
            assert_eq!(requested, UseCaseId::new("uc-2"));
            assert_eq!(in_flight, UseCaseId::new("uc-1"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(
        coordinator.current().map(|active| active.request),
        Some(request("uc-1"))
    );
    assert_eq!(
        coordinator.phase(&UseCaseId::new("uc-2")),
        RefinementPhase::Idle
    );
}

#[test]
fn slot_is_free_again_after_the_ticket_drops() {
    let coordinator = RefinementCoordinator::new();
    drop(coordinator.begin(request("uc-1")).expect("slot free"));
    assert!(coordinator.begin(request("uc-2")).is_ok());
}

#[tokio::test]
async fn subscribers_see_phase_changes() {
    let coordinator = RefinementCoordinator::new();
    let mut rx = coordinator.subscribe();

    let ticket = coordinator.begin(request("uc-1")).expect("slot free");
    rx.changed().await.expect("changed");
    assert_eq!(
        rx.borrow_and_update().as_ref().map(|active| active.phase),
        Some(RefinementPhase::Requesting)
    );

    ticket.advance();
    rx.changed().await.expect("changed");
    assert_eq!(
        rx.borrow_and_update().as_ref().map(|active| active.phase),
        Some(RefinementPhase::Settling)
    );

    drop(ticket);
    rx.changed().await.expect("changed");
    assert!(rx.borrow().is_none());
}

#[test]
fn patch_transcript_updates_every_copy_of_the_use_case() {
    let target = UseCase {
        id: Some(UseCaseId::new("uc-1")),
        title: "Order".to_string(),
        ..UseCase::untitled()
    };
    let other = UseCase {
        id: Some(UseCaseId::new("uc-2")),
        title: "Pay".to_string(),
        ..UseCase::untitled()
    };
    let messages = vec![
        Message::user("prompt"),
        Message::assistant("first").with_results(vec![target.clone(), other.clone()], Vec::new()),
        Message::assistant("again").with_results(vec![target.clone()], Vec::new()),
    ];

    let patched = patch_transcript(
        &messages,
        &UseCaseId::new("uc-1"),
        &json!({ "sub_flows": ["retry payment"] }),
    );

    assert_eq!(patched[0], messages[0]);
    let first = patched[1].use_case_refs.as_ref().expect("refs");
    assert_eq!(first[0].sub_flows, vec!["retry payment"]);
    assert!(first[0].refined);
    assert_eq!(first[0].id, target.id);
    assert_eq!(first[1], other);
    let second = patched[2].use_case_refs.as_ref().expect("refs");
    assert!(second[0].refined);
}
