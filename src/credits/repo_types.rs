use rust_decimal::Decimal;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Ledger row, one per user.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StudentCredit {
    pub user_id: i64,
    pub balance: Decimal,
    pub updated_at: OffsetDateTime,
}
