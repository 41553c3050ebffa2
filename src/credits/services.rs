use std::sync::Arc;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::{credits::repo_types::StudentCredit, error::AppError, store::CredentialStore};

/// Fractional digits a balance column stores.
pub const AMOUNT_SCALE: u32 = 2;

/// Magnitudes must stay below 10^17 to fit `NUMERIC(19,2)`.
fn amount_limit() -> Decimal {
    Decimal::new(100_000_000_000_000_000, 0)
}

/// Rejects amounts the balance column cannot hold exactly.
pub fn check_amount(amount: Decimal) -> Result<(), AppError> {
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(AppError::validation(format!(
            "Amount must have at most {AMOUNT_SCALE} decimal places"
        )));
    }
    if amount.abs() >= amount_limit() {
        return Err(AppError::validation("Amount is out of range"));
    }
    Ok(())
}

/// Per-user credit balances that never go negative.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CredentialStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    async fn ensure_user(&self, user_id: i64) -> Result<(), AppError> {
        match self.store.find_user_by_id(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::UserNotFound),
        }
    }

    /// Returns the row, creating a zero balance on first access.
    #[instrument(skip(self))]
    pub async fn initialize_account(&self, user_id: i64) -> Result<StudentCredit, AppError> {
        if let Some(row) = self.store.find_credit(user_id).await? {
            return Ok(row);
        }
        debug!("creating ledger row");
        self.store
            .create_credit(user_id, OffsetDateTime::now_utc())
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_balance(&self, user_id: i64) -> Result<StudentCredit, AppError> {
        self.ensure_user(user_id).await?;
        self.initialize_account(user_id).await
    }

    /// Applies a signed delta. A result below zero fails and leaves the
    /// stored balance untouched.
    #[instrument(skip(self))]
    pub async fn update_balance(
        &self,
        user_id: i64,
        delta: Decimal,
    ) -> Result<StudentCredit, AppError> {
        check_amount(delta)?;
        self.ensure_user(user_id).await?;
        self.initialize_account(user_id).await?;

        let row = self
            .store
            .update_balance(
                user_id,
                OffsetDateTime::now_utc(),
                Box::new(move |balance| {
                    let next = balance
                        .checked_add(delta)
                        .filter(|n| *n < amount_limit())
                        .ok_or_else(|| AppError::validation("Balance limit exceeded"))?;
                    if next < Decimal::ZERO {
                        return Err(AppError::InsufficientBalance);
                    }
                    Ok(next)
                }),
            )
            .await
            .map_err(|e| {
                if matches!(e, AppError::InsufficientBalance) {
                    warn!(%delta, "debit exceeds balance");
                }
                e
            })?;

        info!(%delta, balance = %row.balance, "balance updated");
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::auth::services::Registration;
    use crate::notify::testing::RecordingSink;
    use crate::state::testing::{test_state, TestState};

    async fn student(state: &crate::state::AppState) -> i64 {
        state
            .auth
            .register(Registration {
                email: "sam@x.com".into(),
                password: "hunter2hunter2".into(),
                first_name: "Sam".into(),
                last_name: "Student".into(),
                role: None,
            })
            .await
            .unwrap()
            .user
            .id
    }

    #[tokio::test]
    async fn new_user_starts_at_zero_without_initialization() {
        let TestState { state, store, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        assert_eq!(store.credit_rows(), 0);

        let row = state.credits.get_balance(id).await.unwrap();
        assert_eq!(row.balance, Decimal::ZERO);
        assert_eq!(row.user_id, id);
        assert_eq!(store.credit_rows(), 1);
    }

    #[tokio::test]
    async fn overdraft_is_rejected_and_balance_kept() {
        let TestState { state, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        state.credits.update_balance(id, dec!(30)).await.unwrap();

        let err = state.credits.update_balance(id, dec!(-50)).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance));
        assert_eq!(state.credits.get_balance(id).await.unwrap().balance, dec!(30));
    }

    #[tokio::test]
    async fn debit_to_exactly_zero_is_allowed() {
        let TestState { state, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        state.credits.update_balance(id, dec!(12.50)).await.unwrap();
        let row = state.credits.update_balance(id, dec!(-12.50)).await.unwrap();
        assert!(row.balance.is_zero());
    }

    #[tokio::test]
    async fn credits_and_debits_accumulate() {
        let TestState { state, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        state.credits.update_balance(id, dec!(100)).await.unwrap();
        state.credits.update_balance(id, dec!(-25.75)).await.unwrap();
        let row = state.credits.update_balance(id, dec!(5)).await.unwrap();
        assert_eq!(row.balance, dec!(79.25));
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let TestState { state, store, .. } = test_state(RecordingSink::default());
        let err = state.credits.get_balance(404).await.unwrap_err();
        assert!(matches!(err, AppError::UserNotFound));
        let err = state.credits.update_balance(404, dec!(10)).await.unwrap_err();
        assert!(matches!(err, AppError::UserNotFound));
        assert_eq!(store.credit_rows(), 0);
    }

    #[tokio::test]
    async fn initialize_account_is_idempotent() {
        let TestState { state, store, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        state.credits.update_balance(id, dec!(7)).await.unwrap();

        let row = state.credits.initialize_account(id).await.unwrap();
        assert_eq!(row.balance, dec!(7));
        state.credits.initialize_account(id).await.unwrap();
        assert_eq!(store.credit_rows(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_reads_create_one_row() {
        let TestState { state, store, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = state.credits.clone();
                tokio::spawn(async move { ledger.get_balance(id).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().unwrap().balance.is_zero());
        }
        assert_eq!(store.credit_rows(), 1);
    }

    #[tokio::test]
    async fn oversized_amounts_are_rejected_without_poisoning_the_store() {
        let TestState { state, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        state.credits.update_balance(id, dec!(1)).await.unwrap();

        let err = state.credits.update_balance(id, Decimal::MAX).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // storable on its own, but not on top of the existing balance
        let ceiling = dec!(99999999999999999.99);
        let err = state.credits.update_balance(id, ceiling).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(state.credits.get_balance(id).await.unwrap().balance, dec!(1));
        state.credits.update_balance(id, dec!(2)).await.unwrap();
        assert_eq!(state.credits.get_balance(id).await.unwrap().balance, dec!(3));
    }

    #[tokio::test]
    async fn sub_cent_amounts_are_rejected() {
        let TestState { state, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        state.credits.update_balance(id, dec!(0.01)).await.unwrap();

        let err = state.credits.update_balance(id, dec!(-0.005)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = state.credits.update_balance(id, dec!(0.004)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(state.credits.get_balance(id).await.unwrap().balance, dec!(0.01));

        let row = state.credits.update_balance(id, dec!(0.990)).await.unwrap();
        assert_eq!(row.balance, dec!(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let TestState { state, .. } = test_state(RecordingSink::default());
        let id = student(&state).await;
        state.credits.update_balance(id, dec!(100)).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = state.credits.clone();
                tokio::spawn(async move { ledger.update_balance(id, dec!(-30)).await })
            })
            .collect();

        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(row) => {
                    assert!(row.balance >= Decimal::ZERO);
                    ok += 1;
                }
                Err(e) => assert!(matches!(e, AppError::InsufficientBalance)),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(state.credits.get_balance(id).await.unwrap().balance, dec!(10));
    }
}
