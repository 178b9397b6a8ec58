//! Daily gift and gift codes.

use super::Exchange;
use super::ledger;
use crate::error::{ExchangeError, ExchangeResult};
use crate::security::ActionKind;
use crate::state::{GiftCode, SystemDocument, TxId, TxKind, UserId, UsersDocument};
use crate::store::Freshness;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

const GIFT_INTERVAL_HOURS: i64 = 24;
const STREAK_WINDOW_HOURS: i64 = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct DailyGiftReceipt {
    pub amount: i64,
    pub streak: u32,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedeemReceipt {
    pub code: String,
    pub points: i64,
    pub balance: i64,
    pub remaining: u32,
}

fn code_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

impl Exchange {
    pub async fn claim_daily_gift(&self, user: &UserId) -> ExchangeResult<DailyGiftReceipt> {
        self.claim_daily_gift_at(user, Utc::now()).await
    }

    /// Claim as of `now`. At most one claim per 24 hours; the streak grows
    /// while claims stay under 48 hours apart.
    pub async fn claim_daily_gift_at(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> ExchangeResult<DailyGiftReceipt> {
        self.gate(user, ActionKind::DailyGift, None)?;
        let result = self.claim_inner(user, now).await;
        super::observe("claim_daily_gift", result)
    }

    async fn claim_inner(&self, user: &UserId, now: DateTime<Utc>) -> ExchangeResult<DailyGiftReceipt> {
        let system = self.store.load::<SystemDocument>(Freshness::Cached).await?;
        if system.is_banned(user) {
            return Err(ExchangeError::UserBanned);
        }
        drop(system);

        let amount = self.config.rewards.daily_gift;
        let max_log = self.ledger.max_log();
        let tx = TxId::new(format!("daily:{user}:{}", now.format("%Y-%m-%d")));

        let guard = self.locks.lock_user(user).await;
        let (balance, streak) = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let record = doc.entry(user, now);
                let gift = &record.daily_gift;
                if let Some(last) = gift.last_claimed {
                    let next = last + Duration::hours(GIFT_INTERVAL_HOURS);
                    if now < next {
                        let remaining = (next - now).to_std().unwrap_or_default();
                        return Err(ExchangeError::DailyGiftNotReady(remaining));
                    }
                }
                let streak = match gift.last_claimed {
                    Some(last) if now - last < Duration::hours(STREAK_WINDOW_HOURS) => gift.streak + 1,
                    _ => 1,
                };

                let balance = ledger::post(record, &tx, TxKind::Credit, amount, "daily_gift", now, max_log)?;
                record.daily_gift.last_claimed = Some(now);
                record.daily_gift.streak = streak;
                record.daily_gift.total_claimed += amount;
                Ok((balance, streak))
            })
            .await?;
        drop(guard);

        self.ledger
            .fold_into_stats(|stats| {
                stats.total_points += amount;
                stats.total_daily_gifts += 1;
            })
            .await;
        info!(user = %user, amount, streak, balance, "daily gift claimed");
        Ok(DailyGiftReceipt {
            amount,
            streak,
            balance,
        })
    }

    pub async fn create_code(
        &self,
        admin: &UserId,
        name: &str,
        points: i64,
        max_uses: u32,
    ) -> ExchangeResult<String> {
        self.gate(admin, ActionKind::Admin, None)?;
        if points <= 0 {
            return Err(ExchangeError::InvalidAmount(points));
        }
        if max_uses == 0 {
            return Err(ExchangeError::InvalidAmount(0));
        }
        let code = code_name(name);
        if code.is_empty() {
            return Err(ExchangeError::CodeNotFound(code));
        }

        let result = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                if !doc.admins.contains(admin) {
                    return Err(ExchangeError::NotPermitted);
                }
                if doc.codes.contains_key(&code) {
                    return Err(ExchangeError::CodeExists(code.clone()));
                }
                doc.codes.insert(
                    code.clone(),
                    GiftCode {
                        points,
                        max_uses,
                        used_by: Default::default(),
                        created_by: admin.clone(),
                        created_at: Utc::now(),
                    },
                );
                Ok(())
            })
            .await;
        if result.is_ok() {
            info!(admin = %admin, code = %code, points, max_uses, "gift code created");
        }
        super::observe("create_code", result.map(|()| code))
    }

    pub async fn redeem_code(&self, user: &UserId, name: &str) -> ExchangeResult<RedeemReceipt> {
        self.gate(user, ActionKind::General, None)?;
        let result = self.redeem_inner(user, &code_name(name)).await;
        super::observe("redeem_code", result)
    }

    async fn redeem_inner(&self, user: &UserId, code: &str) -> ExchangeResult<RedeemReceipt> {
        let guard = self.locks.lock_user(user).await;

        // Reserve a use first so concurrent redeemers cannot overdraw it.
        let (points, remaining) = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                if doc.is_banned(user) {
                    return Err(ExchangeError::UserBanned);
                }
                let gift = doc
                    .codes
                    .get_mut(code)
                    .ok_or_else(|| ExchangeError::CodeNotFound(code.to_string()))?;
                if gift.used_by.contains(user) {
                    return Err(ExchangeError::CodeAlreadyRedeemed(code.to_string()));
                }
                if gift.remaining() == 0 {
                    return Err(ExchangeError::CodeExhausted(code.to_string()));
                }
                gift.used_by.insert(user.clone());
                Ok((gift.points, gift.remaining()))
            })
            .await?;

        let tx = TxId::new(format!("code:{code}:{user}"));
        let reason = format!("code:{code}");
        let balance = match self
            .ledger
            .apply_held(&guard, user, TxKind::Credit, points, &reason, &tx)
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                self.release_code(user, code).await;
                return Err(e);
            }
        };
        drop(guard);

        self.ledger
            .fold_into_stats(|stats| stats.total_codes_redeemed += 1)
            .await;
        info!(user = %user, code = %code, points, balance, remaining, "gift code redeemed");
        Ok(RedeemReceipt {
            code: code.to_string(),
            points,
            balance,
            remaining,
        })
    }

    async fn release_code(&self, user: &UserId, code: &str) {
        let result = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                if let Some(gift) = doc.codes.get_mut(code) {
                    gift.used_by.remove(user);
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!(user = %user, code = %code, error = %e, "failed to release gift code reservation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_names_are_case_insensitive() {
        assert_eq!(code_name(" welcome10 "), "WELCOME10");
    }
}
