//! First-contact registration and referral rewards.
//!
//! A user who arrives through another user's invite is recorded with that
//! referrer. The referrer is credited once per invited user; the credit is
//! keyed `invite:{referrer}:{invited}` and also guarded by the referrer's
//! `invited_users` set, so a repeated registration never pays twice.

use super::Exchange;
use super::events::ExchangeEvent;
use super::ledger;
use crate::error::{ExchangeError, ExchangeResult};
use crate::metrics;
use crate::security::ActionKind;
use crate::state::{SystemDocument, TxId, TxKind, UserId, UsersDocument};
use crate::store::Freshness;
use chrono::Utc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct ReferralReceipt {
    pub referrer: UserId,
    pub amount: i64,
    pub balance: i64,
    /// Users the referrer has brought in so far.
    pub invites: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// No record existed for the user before this call.
    pub new_user: bool,
    pub referral: Option<ReferralReceipt>,
}

impl Exchange {
    /// Record a user's first contact, optionally through `referrer`.
    ///
    /// Only a brand-new user can be referred, and only by an existing user
    /// other than themselves. A referral that was recorded but not yet paid
    /// is paid on the next call.
    pub async fn register_user(
        &self,
        user: &UserId,
        referrer: Option<&UserId>,
    ) -> ExchangeResult<Registration> {
        self.gate(user, ActionKind::General, None)?;
        let result = self.register_inner(user, referrer).await;
        super::observe("register_user", result)
    }

    async fn register_inner(
        &self,
        user: &UserId,
        referrer: Option<&UserId>,
    ) -> ExchangeResult<Registration> {
        let cached = self.store.load::<UsersDocument>(Freshness::Cached).await?;
        let known = cached.get(user).map(|r| r.referred_by.clone());
        drop(cached);

        let (new_user, referred_by) = match known {
            Some(referred_by) => (false, referred_by),
            None => {
                let guard = self.locks.lock_user(user).await;
                let now = Utc::now();
                let registered = self
                    .store
                    .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                        if let Some(existing) = doc.get(user) {
                            return Ok((false, existing.referred_by.clone()));
                        }
                        let referred_by = referrer
                            .filter(|r| *r != user && doc.get(r).is_some())
                            .cloned();
                        doc.entry(user, now).referred_by = referred_by.clone();
                        Ok((true, referred_by))
                    })
                    .await?;
                drop(guard);
                if registered.0 {
                    info!(user = %user, referred_by = ?registered.1, "user registered");
                }
                registered
            }
        };

        let referral = match referred_by {
            Some(referrer) => self.credit_referral(&referrer, user).await?,
            None => None,
        };
        Ok(Registration { new_user, referral })
    }

    async fn credit_referral(
        &self,
        referrer: &UserId,
        invited: &UserId,
    ) -> ExchangeResult<Option<ReferralReceipt>> {
        let cached = self.store.load::<UsersDocument>(Freshness::Cached).await?;
        if cached
            .get(referrer)
            .is_some_and(|r| r.invited_users.contains(invited))
        {
            return Ok(None);
        }
        drop(cached);

        let system = self.store.load::<SystemDocument>(Freshness::Cached).await?;
        if system.is_banned(referrer) {
            debug!(referrer = %referrer, invited = %invited, "banned referrer not credited");
            return Ok(None);
        }
        drop(system);

        let amount = self.config.rewards.invite_reward;
        let max_log = self.ledger.max_log();
        let tx = TxId::new(format!("invite:{referrer}:{invited}"));

        let guard = self.locks.lock_user(referrer).await;
        let credited = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let now = Utc::now();
                let record = doc.entry(referrer, now);
                if record.invited_users.contains(invited) {
                    return Err(ExchangeError::DuplicateTransaction(tx.clone()));
                }
                let balance = ledger::post(record, &tx, TxKind::Credit, amount, "invite", now, max_log)?;
                record.invited_users.insert(invited.clone());
                Ok((balance, record.invited_users.len()))
            })
            .await;
        drop(guard);
        let (balance, invites) = match credited {
            Ok(credited) => credited,
            Err(ExchangeError::DuplicateTransaction(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        self.ledger
            .fold_into_stats(|stats| {
                stats.total_points += amount;
                stats.total_invites += 1;
            })
            .await;
        metrics::record_referral();
        info!(referrer = %referrer, invited = %invited, amount, balance, invites, "referral credited");
        self.events.publish(ExchangeEvent::ReferralCredited {
            referrer: referrer.clone(),
            invited: invited.clone(),
            amount,
        });

        Ok(Some(ReferralReceipt {
            referrer: referrer.clone(),
            amount,
            balance,
            invites,
        }))
    }
}
