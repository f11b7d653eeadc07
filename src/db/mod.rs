use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection, Row};

mod models;

pub use models::{BreakdownRow, DutyFeeCount, RowClass};

use crate::settings::DbSettings;

/// Read-only source of cashbox aggregates. Implementations degrade to
/// zero/empty on failure instead of propagating errors; the ingestion path
/// must never die because the store is unreachable.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Running balance over all non-disabled cashboxes, 0 on any failure.
    async fn fetch_scalar_balance(&self) -> Decimal;
    /// Grouped-then-direct breakdown rows, empty on any failure.
    async fn fetch_breakdown(&self) -> Vec<BreakdownRow>;
    /// Regional duty-fee counts for the reference table, empty on any failure.
    async fn fetch_duty_fee_counts(&self) -> Vec<DutyFeeCount>;
}

/// MySQL-backed [`BalanceSource`]. Opens one scoped connection per logical
/// operation; the connection is dropped (and released) on every exit path.
#[derive(Clone)]
pub struct Database {
    options: MySqlConnectOptions,
}

impl Database {
    pub fn new(settings: &DbSettings) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name)
            .charset(&settings.charset);
        Self { options }
    }

    async fn connect(&self) -> Result<MySqlConnection> {
        MySqlConnection::connect_with(&self.options)
            .await
            .context("failed to connect to cashbox database")
    }

    async fn scalar_balance(&self) -> Result<Decimal> {
        let mut conn = self.connect().await?;
        let row = sqlx::query(
            r#"
            SELECT SUM(afoc.balance) AS total
            FROM algon_finance_online_cashbox afoc
            WHERE afoc.type <> 'disabled'
            "#,
        )
        .fetch_one(&mut conn)
        .await
        .context("scalar balance query failed")?;

        // SUM over zero rows comes back NULL
        let total: Option<Decimal> = row.try_get("total")?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    async fn breakdown(&self) -> Result<Vec<BreakdownRow>> {
        let mut conn = self.connect().await?;

        let grouped = sqlx::query(
            r#"
            SELECT o.name AS name, SUM(afoc.balance) AS balance
            FROM algon_finance_online_cashbox afoc
            INNER JOIN oto o ON o.id = afoc.oto_id
            WHERE afoc.type <> 'disabled'
              AND afoc.balance <> 0
              AND afoc.oto_id IS NOT NULL
            GROUP BY o.name
            ORDER BY balance DESC
            "#,
        )
        .fetch_all(&mut conn)
        .await
        .context("grouped breakdown query failed")?;

        let direct = sqlx::query(
            r#"
            SELECT afoc.name AS name, afoc.balance AS balance
            FROM algon_finance_online_cashbox afoc
            WHERE afoc.type IN ('reg', 'manage_company')
              AND afoc.balance <> 0
            ORDER BY balance DESC
            "#,
        )
        .fetch_all(&mut conn)
        .await
        .context("direct breakdown query failed")?;

        let mut rows = Vec::with_capacity(grouped.len() + direct.len());
        for row in grouped {
            rows.push(breakdown_row(&row, RowClass::Grouped)?);
        }
        for row in direct {
            rows.push(breakdown_row(&row, RowClass::Direct)?);
        }
        // Both queries already filter zero balances; keep the guard anyway.
        rows.retain(|r| r.balance != Decimal::ZERO);
        Ok(rows)
    }

    async fn duty_fee_counts(&self) -> Result<Vec<DutyFeeCount>> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT r.name AS region, COUNT(adf.id) AS cnt
            FROM algon_duty_fee adf
            INNER JOIN region r ON r.id = adf.region_id
            GROUP BY r.name
            ORDER BY cnt DESC
            "#,
        )
        .fetch_all(&mut conn)
        .await
        .context("duty fee count query failed")?;

        rows.into_iter()
            .map(|row| {
                Ok(DutyFeeCount {
                    region: row.try_get::<String, _>("region")?.trim().to_string(),
                    count: row.try_get("cnt")?,
                })
            })
            .collect()
    }
}

fn breakdown_row(row: &MySqlRow, class: RowClass) -> Result<BreakdownRow> {
    Ok(BreakdownRow {
        name: row.try_get::<String, _>("name")?.trim().to_string(),
        balance: row.try_get("balance")?,
        class,
    })
}

#[async_trait]
impl BalanceSource for Database {
    async fn fetch_scalar_balance(&self) -> Decimal {
        match self.scalar_balance().await {
            Ok(total) => total,
            Err(err) => {
                warn!("scalar balance unavailable, degrading to 0: {err:#}");
                Decimal::ZERO
            }
        }
    }

    async fn fetch_breakdown(&self) -> Vec<BreakdownRow> {
        match self.breakdown().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("breakdown unavailable, degrading to empty: {err:#}");
                Vec::new()
            }
        }
    }

    async fn fetch_duty_fee_counts(&self) -> Vec<DutyFeeCount> {
        match self.duty_fee_counts().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("duty fee counts unavailable, degrading to empty: {err:#}");
                Vec::new()
            }
        }
    }
}
