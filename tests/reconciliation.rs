//! Reconciliation sweeps against the scripted oracle.

mod common;

use common::TestExchange;
use pointex::oracle::Subscription;
use pointex::services::{Reconciler, SweepReport};
use pointex::state::UserId;
use std::sync::Arc;

fn reconciler(t: &TestExchange) -> Reconciler {
    Reconciler::new(Arc::clone(&t.exchange), 4)
}

#[tokio::test]
async fn oracle_abstention_changes_nothing() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 5).await;
    t.join("u", &ch, "j").await;
    t.oracle.set(&UserId::new("u"), "news", Subscription::Unknown);
    let writes_before = t.backend.write_count();

    let report = reconciler(&t).sweep().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            checked: 1,
            abstained: 1,
            ..SweepReport::default()
        }
    );
    assert_eq!(t.balance("u").await, 3);
    assert_eq!(t.channel_state(&ch).await.current, 1);
    assert_eq!(t.backend.write_count(), writes_before);
}

#[tokio::test]
async fn departed_users_are_penalized_once() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 5).await;
    t.join("stays", &ch, "1").await;
    t.join("goes", &ch, "2").await;
    t.oracle.set(&UserId::new("goes"), "news", Subscription::NotMember);

    let report = reconciler(&t).sweep().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.still_member, 1);
    assert_eq!(report.penalized, 1);
    assert_eq!(t.balance("goes").await, 3 - 5);
    assert_eq!(t.channel_state(&ch).await.current, 1);

    // The left membership is no longer tracked.
    let report = reconciler(&t).sweep().await.unwrap();
    assert_eq!((report.checked, report.penalized), (1, 0));
    assert_eq!(t.balance("goes").await, -2);
    assert_eq!(t.system().await.stats.total_penalties, 1);
}

#[tokio::test]
async fn leaving_completed_round_is_not_penalized() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 1).await;
    t.join("u", &ch, "1").await;
    t.oracle.set(&UserId::new("u"), "news", Subscription::NotMember);

    let report = reconciler(&t).sweep().await.unwrap();
    assert_eq!(report.left_completed, 1);
    assert_eq!(t.balance("u").await, 3);
    let state = t.channel_state(&ch).await;
    assert_eq!((state.current, state.completed), (1, true));
}

#[tokio::test]
async fn memberships_of_deleted_channels_are_dropped() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 5).await;
    t.join("u", &ch, "1").await;

    // Remove the channel behind the registry's back.
    t.exchange
        .store()
        .update::<pointex::state::SystemDocument, _, pointex::ExchangeError, _>(|doc| {
            doc.channels.remove(&ch);
            Ok(())
        })
        .await
        .unwrap();

    let report = reconciler(&t).sweep().await.unwrap();
    assert_eq!(report.removed_stale, 1);
    assert!(t.users().await.membership(&UserId::new("u"), &ch).is_none());
    assert_eq!(t.balance("u").await, 3);
}

#[tokio::test]
async fn mixed_answers_in_one_sweep() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 10).await;
    for name in ["a", "b", "c", "d"] {
        t.join(name, &ch, name).await;
    }
    t.oracle.set(&UserId::new("b"), "news", Subscription::NotMember);
    t.oracle.set(&UserId::new("c"), "news", Subscription::Unknown);
    t.oracle.set(&UserId::new("d"), "news", Subscription::NotMember);

    let report = reconciler(&t).sweep().await.unwrap();
    assert_eq!(report.checked, 4);
    assert_eq!(report.still_member, 1);
    assert_eq!(report.abstained, 1);
    assert_eq!(report.penalized, 2);
    assert_eq!(t.channel_state(&ch).await.current, 2);
}
