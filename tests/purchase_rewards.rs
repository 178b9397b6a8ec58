//! Purchases, daily gift, gift codes and administration.

mod common;

use chrono::{Duration, Utc};
use common::TestExchange;
use pointex::error::ExchangeError;
use pointex::exchange::AdminChange;
use pointex::services::run_once;
use pointex::state::{TxId, UserId};
use pointex::store::Freshness;

#[tokio::test]
async fn purchase_debits_and_creates_channel() {
    let t = TestExchange::new();
    let owner = UserId::new("owner");
    t.grant("owner", 20).await;
    t.oracle.set_bot_admin("mychan", true);

    let receipt = t
        .exchange
        .purchase_channel(&owner, "@MyChan", 5, &TxId::new("p1"))
        .await
        .unwrap();
    assert_eq!((receipt.price, receipt.balance, receipt.round), (10, 10, 0));
    assert!(!receipt.reactivated);
    assert_eq!(receipt.channel_ref, "mychan");

    let state = t.channel_state(&receipt.channel).await;
    assert_eq!((state.required, state.current), (5, 0));
    assert_eq!(state.owner, owner);

    let users = t.users().await;
    assert_eq!(users.get(&owner).unwrap().orders.len(), 1);
    assert_eq!(t.system().await.stats.total_purchases, 1);

    assert!(matches!(
        t.exchange
            .purchase_channel(&owner, "mychan", 3, &TxId::new("p2"))
            .await,
        Err(ExchangeError::ChannelAlreadyActive(_))
    ));
    assert_eq!(t.balance("owner").await, 10);
}

#[tokio::test]
async fn purchase_requires_funds_and_bot_admin() {
    let t = TestExchange::new();
    let owner = UserId::new("owner");
    t.grant("owner", 3).await;

    assert!(matches!(
        t.exchange.purchase_channel(&owner, "news", 5, &TxId::new("p")).await,
        Err(ExchangeError::OracleUnknown)
    ));
    t.oracle.set_bot_admin("news", false);
    assert!(matches!(
        t.exchange.purchase_channel(&owner, "news", 5, &TxId::new("p")).await,
        Err(ExchangeError::BotNotAdmin(_))
    ));
    t.oracle.set_bot_admin("news", true);
    assert!(matches!(
        t.exchange.purchase_channel(&owner, "news", 5, &TxId::new("p")).await,
        Err(ExchangeError::InsufficientBalance { needed: 10, available: 3 })
    ));
    assert!(matches!(
        t.exchange.purchase_channel(&owner, "x", 5, &TxId::new("p")).await,
        Err(ExchangeError::InvalidChannelRef(_))
    ));
    assert_eq!(t.balance("owner").await, 3);

    // Nothing took effect, so the same id goes through once funded.
    t.grant("owner", 7).await;
    let receipt = t
        .exchange
        .purchase_channel(&owner, "news", 5, &TxId::new("p"))
        .await
        .unwrap();
    assert_eq!(receipt.balance, 0);
}

#[tokio::test]
async fn purchase_reuses_completed_channel() {
    let t = TestExchange::new();
    let owner = UserId::new("owner");
    t.grant("owner", 100).await;
    t.oracle.set_bot_admin("news", true);

    let first = t
        .exchange
        .purchase_channel(&owner, "news", 1, &TxId::new("p1"))
        .await
        .unwrap();
    t.join("u", &first.channel, "j1").await;
    assert!(t.channel_state(&first.channel).await.completed);

    let second = t
        .exchange
        .purchase_channel(&owner, "news", 2, &TxId::new("p2"))
        .await
        .unwrap();
    assert!(second.reactivated);
    assert_eq!(second.channel, first.channel);
    assert_eq!(second.round, 1);

    let state = t.channel_state(&first.channel).await;
    assert_eq!((state.round, state.required, state.completed), (1, 2, false));
    let stats = t.system().await.stats.clone();
    assert_eq!((stats.total_purchases, stats.total_reactivations), (2, 1));
}

#[tokio::test]
async fn daily_gift_streaks() {
    let t = TestExchange::new();
    let u = UserId::new("u");
    let t0 = Utc::now();

    let r = t.exchange.claim_daily_gift_at(&u, t0).await.unwrap();
    assert_eq!((r.amount, r.streak, r.balance), (3, 1, 3));

    assert!(matches!(
        t.exchange.claim_daily_gift_at(&u, t0 + Duration::hours(1)).await,
        Err(ExchangeError::DailyGiftNotReady(_))
    ));

    let t1 = t0 + Duration::hours(25);
    assert_eq!(t.exchange.claim_daily_gift_at(&u, t1).await.unwrap().streak, 2);

    let t2 = t1 + Duration::hours(50);
    let r = t.exchange.claim_daily_gift_at(&u, t2).await.unwrap();
    assert_eq!((r.streak, r.balance), (1, 9));
    assert_eq!(t.system().await.stats.total_daily_gifts, 3);
}

#[tokio::test]
async fn gift_codes_are_bounded() {
    let t = TestExchange::new();
    t.exchange.bootstrap().await.unwrap();
    let admin = UserId::new("admin");

    assert!(matches!(
        t.exchange.create_code(&UserId::new("a"), "welcome", 10, 2).await,
        Err(ExchangeError::NotPermitted)
    ));
    assert_eq!(t.exchange.create_code(&admin, "welcome", 10, 2).await.unwrap(), "WELCOME");
    assert!(matches!(
        t.exchange.create_code(&admin, "Welcome", 5, 1).await,
        Err(ExchangeError::CodeExists(_))
    ));

    let r = t.exchange.redeem_code(&UserId::new("a"), "welcome").await.unwrap();
    assert_eq!((r.points, r.balance, r.remaining), (10, 10, 1));
    assert!(matches!(
        t.exchange.redeem_code(&UserId::new("a"), "WELCOME").await,
        Err(ExchangeError::CodeAlreadyRedeemed(_))
    ));
    assert_eq!(t.exchange.redeem_code(&UserId::new("b"), "welcome").await.unwrap().remaining, 0);
    assert!(matches!(
        t.exchange.redeem_code(&UserId::new("c"), "welcome").await,
        Err(ExchangeError::CodeExhausted(_))
    ));
    assert!(matches!(
        t.exchange.redeem_code(&UserId::new("c"), "nope").await,
        Err(ExchangeError::CodeNotFound(_))
    ));
    assert_eq!(t.balance("c").await, 0);
}

#[tokio::test]
async fn banned_users_cannot_join() {
    let t = TestExchange::new();
    t.exchange.bootstrap().await.unwrap();
    let admin = UserId::new("admin");
    let ch = t.channel("owner", "news", 5).await;
    let u = UserId::new("u");

    assert!(matches!(
        t.exchange.admin_change(&u, &admin, AdminChange::Ban).await,
        Err(ExchangeError::NotPermitted)
    ));
    assert!(t.exchange.admin_change(&admin, &u, AdminChange::Ban).await.unwrap());
    assert!(matches!(
        t.exchange.request_join(&u, &ch).await,
        Err(ExchangeError::UserBanned)
    ));
    t.oracle.set(&u, "news", pointex::oracle::Subscription::Member);
    assert!(matches!(
        t.exchange.verify_join(&u, &ch, &TxId::new("j")).await,
        Err(ExchangeError::UserBanned)
    ));

    assert!(t.exchange.admin_change(&admin, &u, AdminChange::Unban).await.unwrap());
    t.exchange.verify_join(&u, &ch, &TxId::new("j")).await.unwrap();
}

#[tokio::test]
async fn admin_delete_purges_memberships_and_reports_stats() {
    let t = TestExchange::new();
    t.exchange.bootstrap().await.unwrap();
    let ch = t.channel("owner", "news", 4).await;
    t.join("a", &ch, "1").await;
    t.join("b", &ch, "2").await;

    let stats = t.exchange.channel_stats(&ch).await.unwrap();
    assert_eq!((stats.current, stats.required, stats.joins), (2, 4, 2));
    assert!((stats.percent - 50.0).abs() < f64::EPSILON);

    assert!(matches!(
        t.exchange.delete_channel(&UserId::new("a"), &ch, "spam").await,
        Err(ExchangeError::NotPermitted)
    ));
    let deletion = t
        .exchange
        .delete_channel(&UserId::new("admin"), &ch, "spam")
        .await
        .unwrap();
    assert_eq!(deletion.memberships_purged, 2);
    assert!(t.users().await.membership(&UserId::new("a"), &ch).is_none());
    assert_eq!(t.system().await.deleted_channels.len(), 1);
}

#[tokio::test]
async fn referrer_is_credited_once_per_invited_user() {
    let t = TestExchange::new();
    let a = UserId::new("a");
    let b = UserId::new("b");

    let first = t.exchange.register_user(&a, None).await.unwrap();
    assert!(first.new_user);
    assert!(first.referral.is_none());

    let invited = t.exchange.register_user(&b, Some(&a)).await.unwrap();
    assert!(invited.new_user);
    let referral = invited.referral.unwrap();
    assert_eq!(referral.referrer, a);
    assert_eq!((referral.amount, referral.balance, referral.invites), (4, 4, 1));

    // Coming back through the same link pays nothing.
    let again = t.exchange.register_user(&b, Some(&a)).await.unwrap();
    assert!(!again.new_user);
    assert!(again.referral.is_none());

    // Known users, self-invites and unknown referrers are not referrals.
    let known = t.exchange.register_user(&a, Some(&b)).await.unwrap();
    assert!(known.referral.is_none());
    let own = UserId::new("c");
    assert!(t.exchange.register_user(&own, Some(&own)).await.unwrap().referral.is_none());
    let stray = UserId::new("d");
    assert!(
        t.exchange
            .register_user(&stray, Some(&UserId::new("ghost")))
            .await
            .unwrap()
            .referral
            .is_none()
    );

    assert_eq!(t.balance("a").await, 4);
    assert_eq!(t.balance("b").await, 0);
    let users = t.users().await;
    assert_eq!(users.get(&b).unwrap().referred_by, Some(a.clone()));
    assert!(users.get(&own).unwrap().referred_by.is_none());
    assert!(users.get(&a).unwrap().invited_users.contains(&b));
    let system = t.system().await;
    assert_eq!((system.stats.total_invites, system.stats.total_points), (1, 4));
}

#[tokio::test]
async fn channels_without_bot_admin_are_removed_and_refunded() {
    let t = TestExchange::new();
    let owner = UserId::new("owner");
    t.grant("owner", 20).await;
    t.oracle.set_bot_admin("paid", true);
    let paid = t
        .exchange
        .purchase_channel(&owner, "paid", 5, &TxId::new("p1"))
        .await
        .unwrap()
        .channel;
    assert_eq!(t.balance("owner").await, 10);

    let granted = t.channel("admin", "granted", 3).await;
    let quiet = t.channel("owner", "quiet", 2).await;
    let done = t.channel("owner", "done", 1).await;
    t.join("u", &done, "j1").await;
    assert!(t.channel_state(&done).await.completed);

    t.oracle.set_bot_admin("paid", false);
    t.oracle.set_bot_admin("granted", false);
    t.oracle.set_bot_admin("done", false);

    let report = run_once(&t.exchange).await.unwrap();
    assert_eq!(report.unmanaged_removed, 2);

    let registry = t.exchange.registry();
    for gone in [&paid, &granted] {
        assert!(matches!(
            registry.get(gone, Freshness::Force).await,
            Err(ExchangeError::ChannelNotFound(_))
        ));
    }
    registry.get(&quiet, Freshness::Force).await.unwrap();
    registry.get(&done, Freshness::Force).await.unwrap();

    // Only the purchased round had an order to refund.
    assert_eq!(t.balance("owner").await, 20);
    assert!(t.users().await.get(&owner).unwrap().orders.is_empty());
    let system = t.system().await;
    assert_eq!(system.stats.total_refunds, 1);
    assert_eq!(system.deleted_channels.len(), 2);

    // An unknown answer never deletes.
    let sweep = t.exchange.remove_unmanaged_channels().await.unwrap();
    assert_eq!((sweep.checked, sweep.abstained, sweep.removed), (1, 1, 0));
}

#[tokio::test]
async fn unmanaged_removal_can_be_switched_off() {
    let mut config = common::test_config();
    config.channels.remove_when_bot_not_admin = false;
    let t = TestExchange::with_config(config);
    let ch = t.channel("owner", "news", 3).await;
    t.oracle.set_bot_admin("news", false);

    let report = run_once(&t.exchange).await.unwrap();
    assert_eq!(report.unmanaged_removed, 0);
    t.exchange.registry().get(&ch, Freshness::Force).await.unwrap();
}
