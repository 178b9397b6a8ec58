//! Integration test common infrastructure.
//!
//! Builds an [`Exchange`] over the in-memory backend with cooldowns off and
//! a scriptable oracle, plus helpers for seeding users and channels.

#![allow(dead_code)]

use chrono::Utc;
use pointex::config::{Config, CooldownConfig};
use pointex::exchange::Exchange;
use pointex::oracle::{StaticOracle, Subscription};
use pointex::state::{Channel, ChannelId, SystemDocument, TxId, UserId, UsersDocument};
use pointex::store::{Freshness, MemoryBackend, Store};
use std::sync::Arc;

pub struct TestExchange {
    pub exchange: Arc<Exchange>,
    pub oracle: Arc<StaticOracle>,
    pub backend: Arc<MemoryBackend>,
}

impl TestExchange {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let (store, backend) = Store::in_memory();
        let oracle = Arc::new(StaticOracle::new());
        let exchange = Exchange::new(config, Arc::new(store), oracle.clone());
        Self {
            exchange: Arc::new(exchange),
            oracle,
            backend,
        }
    }

    /// Create an active channel owned by `owner`.
    pub async fn channel(&self, owner: &str, channel_ref: &str, required: u32) -> ChannelId {
        let id = ChannelId::generate();
        self.exchange
            .registry()
            .create(Channel::new(
                id.clone(),
                UserId::new(owner),
                channel_ref,
                required,
                Utc::now(),
            ))
            .await
            .expect("create channel");
        id
    }

    /// Mark `user` as subscribed and verify a join.
    pub async fn join(&self, user: &str, channel: &ChannelId, tx: &str) {
        let user = UserId::new(user);
        let channel_ref = self.channel_state(channel).await.channel_ref;
        self.oracle.set(&user, &channel_ref, Subscription::Member);
        self.exchange
            .verify_join(&user, channel, &TxId::new(tx))
            .await
            .expect("verify join");
    }

    pub async fn grant(&self, user: &str, amount: i64) {
        self.exchange
            .ledger()
            .credit(&UserId::new(user), amount, "seed", &TxId::generate())
            .await
            .expect("seed balance");
    }

    pub async fn balance(&self, user: &str) -> i64 {
        self.exchange
            .balance(&UserId::new(user))
            .await
            .expect("balance")
    }

    pub async fn channel_state(&self, channel: &ChannelId) -> Channel {
        self.exchange
            .registry()
            .get(channel, Freshness::Force)
            .await
            .expect("channel")
    }

    pub async fn users(&self) -> Arc<UsersDocument> {
        self.exchange
            .store()
            .load::<UsersDocument>(Freshness::Force)
            .await
            .expect("users document")
    }

    pub async fn system(&self) -> Arc<SystemDocument> {
        self.exchange
            .store()
            .load::<SystemDocument>(Freshness::Force)
            .await
            .expect("system document")
    }
}

pub fn test_config() -> Config {
    let mut config = Config {
        cooldowns: CooldownConfig::disabled(),
        ..Config::default()
    };
    config.admin.admins = vec!["admin".to_string()];
    config
}
