use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use closet_core::UserId;

/// Per-user daily token allowance.
///
/// `tokens_used_today` belongs to `usage_day`; reading it on a later day
/// yields zero, so the counter resets lazily without a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuota {
    pub user_id: UserId,
    pub daily_token_budget: u64,
    pub tokens_used_today: u64,
    pub usage_day: NaiveDate,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("daily token budget exhausted ({tokens_used_today}/{daily_token_budget})")]
pub struct QuotaExceeded {
    pub tokens_used_today: u64,
    pub daily_token_budget: u64,
}

impl UserQuota {
    pub fn new(user_id: UserId, daily_token_budget: u64, today: NaiveDate) -> Self {
        Self {
            user_id,
            daily_token_budget,
            tokens_used_today: 0,
            usage_day: today,
        }
    }

    /// Tokens charged on `day`.
    pub fn used_on(&self, day: NaiveDate) -> u64 {
        if self.usage_day == day {
            self.tokens_used_today
        } else {
            0
        }
    }

    pub fn remaining(&self, day: NaiveDate) -> u64 {
        self.daily_token_budget.saturating_sub(self.used_on(day))
    }

    /// Admission check run on every submission, before reuse is considered.
    pub fn admit(&self, day: NaiveDate) -> Result<(), QuotaExceeded> {
        let used = self.used_on(day);
        if used >= self.daily_token_budget {
            return Err(QuotaExceeded {
                tokens_used_today: used,
                daily_token_budget: self.daily_token_budget,
            });
        }
        Ok(())
    }

    /// Add completed usage, rolling the counter over when `day` is new.
    pub fn charge(&mut self, tokens: u64, day: NaiveDate) {
        if self.usage_day != day {
            self.usage_day = day;
            self.tokens_used_today = 0;
        }
        self.tokens_used_today = self.tokens_used_today.saturating_add(tokens);
    }

    /// The quota as it reads on `day`.
    pub fn as_of(&self, day: NaiveDate) -> Self {
        Self {
            tokens_used_today: self.used_on(day),
            usage_day: day,
            ..self.clone()
        }
    }
}
