use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    credits::{repo_types::StudentCredit, services::check_amount},
    error::AppError,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    pub user_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl From<StudentCredit> for CreditBalance {
    fn from(row: StudentCredit) -> Self {
        Self {
            user_id: row.user_id,
            balance: row.balance,
            last_updated: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCreditsRequest {
    pub student_id: i64,
    pub amount: Decimal,
}

impl UpdateCreditsRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.amount.is_zero() {
            return Err(AppError::validation("Amount must not be zero"));
        }
        check_amount(self.amount)
    }
}
