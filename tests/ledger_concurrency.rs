//! Exactly-once point mutation under retries and concurrency.

mod common;

use common::{TestExchange, test_config};
use pointex::config::CooldownConfig;
use pointex::error::ExchangeError;
use pointex::oracle::Subscription;
use pointex::state::{TxId, UserId};
use std::sync::Arc;

#[tokio::test]
async fn duplicate_transaction_scenario() {
    let t = TestExchange::new();
    let u = UserId::new("u");
    let tx = TxId::new("tx1");

    assert_eq!(t.exchange.ledger().credit(&u, 5, "reward", &tx).await.unwrap(), 5);
    assert!(matches!(
        t.exchange.ledger().credit(&u, 5, "reward", &tx).await,
        Err(ExchangeError::DuplicateTransaction(_))
    ));
    assert_eq!(t.balance("u").await, 5);
}

#[tokio::test]
async fn admin_adjustment_is_idempotent_in_both_directions() {
    let t = TestExchange::new();
    t.exchange.bootstrap().await.unwrap();
    let admin = UserId::new("admin");
    let u = UserId::new("u");

    assert_eq!(t.exchange.admin_adjust_points(&admin, &u, 10, "grant", &TxId::new("g")).await.unwrap(), 10);
    assert_eq!(t.exchange.admin_adjust_points(&admin, &u, -4, "fine", &TxId::new("f")).await.unwrap(), 6);
    assert!(matches!(
        t.exchange.admin_adjust_points(&admin, &u, -4, "fine", &TxId::new("f")).await,
        Err(ExchangeError::DuplicateTransaction(_))
    ));
    assert!(matches!(
        t.exchange.admin_adjust_points(&admin, &u, 0, "noop", &TxId::new("z")).await,
        Err(ExchangeError::InvalidAmount(0))
    ));
    assert!(matches!(
        t.exchange.admin_adjust_points(&u, &u, 50, "self", &TxId::new("s")).await,
        Err(ExchangeError::NotPermitted)
    ));
    assert_eq!(t.balance("u").await, 6);

    // A refused id stays usable.
    t.exchange.admin_adjust_points(&admin, &u, 1, "retry", &TxId::new("s")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_credits_lose_no_updates() {
    let t = TestExchange::new();
    let mut handles = Vec::new();
    for i in 0..50 {
        let exchange = Arc::clone(&t.exchange);
        handles.push(tokio::spawn(async move {
            let user = UserId::new(if i % 2 == 0 { "even" } else { "odd" });
            exchange
                .ledger()
                .credit(&user, 2, "parallel", &TxId::new(format!("p{i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(t.balance("even").await, 50);
    assert_eq!(t.balance("odd").await, 50);
    assert_eq!(t.system().await.stats.total_points, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replays_apply_once() {
    let t = TestExchange::new();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let exchange = Arc::clone(&t.exchange);
        handles.push(tokio::spawn(async move {
            exchange
                .ledger()
                .credit(&UserId::new("u"), 7, "retry", &TxId::new("same"))
                .await
        }));
    }
    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(ExchangeError::DuplicateTransaction(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(t.balance("u").await, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn double_clicked_verify_credits_once() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 10).await;
    let u = UserId::new("u");
    t.oracle.set(&u, "news", Subscription::Member);

    let mut handles = Vec::new();
    for i in 0..8 {
        let exchange = Arc::clone(&t.exchange);
        let (u, ch) = (u.clone(), ch.clone());
        handles.push(tokio::spawn(async move {
            exchange.verify_join(&u, &ch, &TxId::new(format!("click{i}"))).await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(ExchangeError::AlreadyMember) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(t.balance("u").await, 3);
    assert_eq!(t.channel_state(&ch).await.current, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_users_joining_reach_target_exactly_once() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 10).await;
    let mut events = t.exchange.subscribe();

    let mut handles = Vec::new();
    for i in 0..20 {
        let user = UserId::new(format!("u{i}"));
        t.oracle.set(&user, "news", Subscription::Member);
        let exchange = Arc::clone(&t.exchange);
        let ch = ch.clone();
        handles.push(tokio::spawn(async move {
            exchange.verify_join(&user, &ch, &TxId::new(format!("j{i}"))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = t.channel_state(&ch).await;
    assert_eq!(state.current, 20);
    assert!(state.completed);
    let mut completions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, pointex::ExchangeEvent::ChannelCompleted { .. }) {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn persistence_failure_is_surfaced_then_retry_succeeds() {
    let t = TestExchange::new();
    let ch = t.channel("owner", "news", 5).await;
    let u = UserId::new("u");
    t.oracle.set(&u, "news", Subscription::Member);

    t.backend.fail_writes(true);
    let err = t
        .exchange
        .verify_join(&u, &ch, &TxId::new("j"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::PersistenceFailure(_)));
    assert!(err.is_transient());
    t.backend.fail_writes(false);

    assert_eq!(t.balance("u").await, 0);
    assert_eq!(t.channel_state(&ch).await.current, 0);

    // The id was released at the gate, so the same request can be retried.
    let receipt = t.exchange.verify_join(&u, &ch, &TxId::new("j")).await.unwrap();
    assert_eq!((receipt.balance, receipt.count), (3, 1));
}

#[tokio::test]
async fn cooldown_gate_limits_repeat_actions() {
    let mut config = test_config();
    config.cooldowns = CooldownConfig {
        admin: 60.0,
        ..CooldownConfig::disabled()
    };
    config.admin.admins.push("second".to_string());
    let t = TestExchange::with_config(config);
    t.exchange.bootstrap().await.unwrap();
    let (admin, second) = (UserId::new("admin"), UserId::new("second"));
    let u = UserId::new("u");

    t.exchange.admin_adjust_points(&admin, &u, 1, "a", &TxId::new("1")).await.unwrap();
    assert!(matches!(
        t.exchange.admin_adjust_points(&admin, &u, 1, "b", &TxId::new("2")).await,
        Err(ExchangeError::RateLimited(_))
    ));
    // The cooldown belongs to the acting admin, not the target.
    t.exchange.admin_adjust_points(&second, &u, 1, "c", &TxId::new("3")).await.unwrap();
    assert_eq!(t.balance("u").await, 2);
}
