use rust_decimal::Decimal;
use serde::Serialize;

/// Which of the two breakdown queries produced a row. Tagged at construction
/// so rendering never has to re-derive membership later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowClass {
    /// Aggregated per organization via the join query.
    Grouped,
    /// Individual cashbox rows matched by status code.
    Direct,
}

/// One row of the grouped-plus-direct cashbox breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownRow {
    pub name: String,
    pub balance: Decimal,
    pub class: RowClass,
}

/// One row of the regional duty-fee reference table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DutyFeeCount {
    pub region: String,
    pub count: i64,
}
