//! End-to-end freshness rounds over TCP.

use std::time::Duration;

use replset_election::{AbortReason, OpTime, SufficiencyPolicy};

use crate::helpers::{CheckOptions, Peer, TestSet};

const UP3: [Peer; 3] = [Peer::Up, Peer::Up, Peer::Up];

#[tokio::test]
async fn freshest_when_every_peer_is_behind() {
    let set = TestSet::start(&UP3, OpTime::new(100, 0)).await;
    let (results, log) = set.check(0, OpTime::new(100, 5)).await;

    assert!(results.freshest);
    assert!(!results.tied);
    assert_eq!(results.abort_reason(), None);
    assert!(log.lines().is_empty(), "unexpected diagnostics: {:?}", log.lines());
}

#[tokio::test]
async fn tied_with_a_peer_at_the_same_optime() {
    let set = TestSet::start(&UP3, OpTime::new(100, 0)).await;
    set.member(2).set_last_applied(OpTime::new(100, 5));
    let (results, _) = set.check(0, OpTime::new(100, 5)).await;

    assert!(results.freshest);
    assert!(results.tied);
    assert_eq!(results.abort_reason(), Some(AbortReason::FreshnessTie));
}

#[tokio::test]
async fn fresher_peer_disqualifies() {
    let set = TestSet::start(&UP3, OpTime::new(100, 0)).await;
    set.member(1).set_last_applied(OpTime::new(200, 0));
    let (results, log) = set.check(0, OpTime::new(150, 0)).await;

    assert!(!results.freshest);
    assert_eq!(results.abort_reason(), Some(AbortReason::FresherNodeFound));
    assert_eq!(log.count_containing("not electing self, we are not freshest"), 1);
    assert_eq!(log.count_containing(&set.host(1).to_string()), 1);
}

#[tokio::test]
async fn primary_peer_vetoes() {
    let set = TestSet::start(&UP3, OpTime::new(100, 0)).await;
    set.member(1).set_primary(Some(2));
    let (results, log) = set.check(0, OpTime::new(150, 0)).await;

    assert!(!results.freshest);
    let expected = format!(
        "not electing self, {} would veto with 'I am already primary, {} can try again once I've stepped down'",
        set.host(1),
        set.host(0)
    );
    assert_eq!(log.count_containing(&expected), 1, "lines: {:?}", log.lines());
}

#[tokio::test]
async fn unreachable_peer_does_not_disqualify() {
    let set = TestSet::start(&[Peer::Up, Peer::Down, Peer::Up], OpTime::new(100, 0)).await;
    let (results, log) = set.check(0, OpTime::new(100, 1)).await;

    assert!(results.freshest);
    assert!(!results.tied);
    assert!(log.lines().is_empty());
}

#[tokio::test]
async fn silent_peer_times_out() {
    let set = TestSet::start(&[Peer::Up, Peer::Silent, Peer::Up], OpTime::new(100, 0)).await;
    let (results, _) = set
        .check_with(CheckOptions {
            position: OpTime::new(100, 0),
            timeout: Duration::from_millis(200),
            ..CheckOptions::default()
        })
        .await;

    // member 2 ties, member 1 never answers
    assert!(results.freshest);
    assert!(results.tied);
}

#[tokio::test]
async fn wrong_set_name_replies_are_failures() {
    let set = TestSet::start(&UP3, OpTime::new(100, 0)).await;
    let mut elsewhere = set.config.clone();
    elsewhere.name = "other".into();
    let (results, log) = set
        .check_with(CheckOptions {
            position: OpTime::new(1, 0),
            config: Some(elsewhere),
            ..CheckOptions::default()
        })
        .await;

    assert!(results.freshest);
    assert!(log.lines().is_empty());
}

#[tokio::test]
async fn stale_config_counts_as_not_freshest() {
    let set = TestSet::start(&UP3, OpTime::new(100, 0)).await;
    let mut newer = set.config.clone();
    newer.version = 2;
    for i in 0..3 {
        set.member(i).set_config(newer.clone(), i).unwrap();
    }

    // the candidate still runs with version 1
    let (results, log) = set.check(0, OpTime::new(500, 0)).await;
    assert!(!results.freshest);
    assert_eq!(log.count_containing("reports itself fresher"), 2);
}

#[tokio::test]
async fn stop_on_disqualify_skips_a_silent_peer() {
    let set = TestSet::start(
        &[Peer::Up, Peer::Up, Peer::Silent, Peer::Up, Peer::Up],
        OpTime::new(100, 0),
    )
    .await;
    set.member(1).set_last_applied(OpTime::new(300, 0));

    let started = tokio::time::Instant::now();
    let (results, log) = set
        .check_with(CheckOptions {
            position: OpTime::new(200, 0),
            policy: SufficiencyPolicy::StopOnDisqualify,
            timeout: Duration::from_secs(30),
            ..CheckOptions::default()
        })
        .await;

    assert!(!results.freshest);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(log.count_containing("we are not freshest"), 1);
}

#[tokio::test]
async fn every_member_can_run_a_check() {
    let set = TestSet::start(&[Peer::Up; 4], OpTime::new(10, 0)).await;
    set.member(3).set_last_applied(OpTime::new(20, 0));

    for i in 0..3 {
        let position = set.member(i).last_applied();
        let (results, _) = set.check(i, position).await;
        assert!(!results.freshest, "member {i} should see member 3 ahead");
    }
    let (results, _) = set.check(3, OpTime::new(20, 0)).await;
    assert!(results.freshest);
    assert!(!results.tied);
}
