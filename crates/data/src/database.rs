//! PostgreSQL [`DataStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use btc_predictor_core::signal::MarketContext;
use btc_predictor_core::{
    Candle, DailyStats, Direction, FeaturesUsed, PredictionSignal, SimulatedTrade, TradeRecord,
    TradeResult,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{loss_streak, ActualDirection, DataStore, StoredSignal, LOSS_STREAK_LOOKBACK};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS ohlcv (
        symbol      TEXT NOT NULL,
        interval    TEXT NOT NULL,
        open_time   TIMESTAMPTZ NOT NULL,
        open        DOUBLE PRECISION NOT NULL,
        high        DOUBLE PRECISION NOT NULL,
        low         DOUBLE PRECISION NOT NULL,
        close       DOUBLE PRECISION NOT NULL,
        volume      DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (symbol, interval, open_time)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS simulated_trades (
        id                  UUID PRIMARY KEY,
        strategy_name       TEXT NOT NULL,
        direction           TEXT NOT NULL,
        confidence          DOUBLE PRECISION NOT NULL,
        timeframe_minutes   INTEGER NOT NULL,
        bet_amount          NUMERIC NOT NULL,
        open_time           TIMESTAMPTZ NOT NULL,
        open_price          DOUBLE PRECISION NOT NULL,
        expiry_time         TIMESTAMPTZ NOT NULL,
        close_price         DOUBLE PRECISION,
        result              TEXT,
        pnl                 NUMERIC
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_trades_strategy_time
        ON simulated_trades (strategy_name, open_time)
    ",
    r"
    CREATE TABLE IF NOT EXISTS prediction_signals (
        id                  UUID PRIMARY KEY,
        strategy_name       TEXT NOT NULL,
        timestamp           TIMESTAMPTZ NOT NULL,
        timeframe_minutes   INTEGER NOT NULL,
        direction           TEXT NOT NULL,
        confidence          DOUBLE PRECISION NOT NULL,
        current_price       DOUBLE PRECISION NOT NULL,
        expiry_time         TIMESTAMPTZ NOT NULL,
        features_used       JSONB NOT NULL,
        market_id           TEXT,
        market_probability  DOUBLE PRECISION,
        actual_direction    TEXT,
        close_price         DOUBLE PRECISION,
        is_correct          BOOLEAN
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_signals_unsettled
        ON prediction_signals (expiry_time) WHERE actual_direction IS NULL
    ",
];

#[derive(Debug, sqlx::FromRow)]
struct CandleRow {
    open_time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl From<CandleRow> for Candle {
    fn from(row: CandleRow) -> Self {
        Candle::new(row.open_time, row.open, row.high, row.low, row.close, row.volume)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TradeRow {
    id: Uuid,
    strategy_name: String,
    direction: String,
    confidence: f64,
    timeframe_minutes: i32,
    bet_amount: Decimal,
    open_time: DateTime<Utc>,
    open_price: f64,
    expiry_time: DateTime<Utc>,
    close_price: Option<f64>,
    result: Option<String>,
    pnl: Option<Decimal>,
}

impl TryFrom<TradeRow> for SimulatedTrade {
    type Error = anyhow::Error;

    fn try_from(row: TradeRow) -> Result<Self> {
        let record = TradeRecord {
            id: row.id,
            strategy_name: row.strategy_name,
            direction: row.direction.parse()?,
            confidence: row.confidence,
            timeframe_minutes: u32::try_from(row.timeframe_minutes)
                .with_context(|| format!("negative timeframe on trade {}", row.id))?,
            bet_amount: row.bet_amount,
            open_time: row.open_time,
            open_price: row.open_price,
            expiry_time: row.expiry_time,
            close_price: row.close_price,
            result: row.result.as_deref().map(str::parse).transpose()?,
            pnl: row.pnl,
        };
        Ok(SimulatedTrade::try_from(record)?)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SignalRow {
    id: Uuid,
    strategy_name: String,
    timestamp: DateTime<Utc>,
    timeframe_minutes: i32,
    direction: String,
    confidence: f64,
    current_price: f64,
    expiry_time: DateTime<Utc>,
    features_used: Json<FeaturesUsed>,
    market_id: Option<String>,
    market_probability: Option<f64>,
    actual_direction: Option<String>,
    close_price: Option<f64>,
    is_correct: Option<bool>,
}

impl TryFrom<SignalRow> for StoredSignal {
    type Error = anyhow::Error;

    fn try_from(row: SignalRow) -> Result<Self> {
        let market = match (row.market_id, row.market_probability) {
            (Some(market_id), Some(market_probability)) => Some(MarketContext {
                market_id,
                market_probability,
            }),
            _ => None,
        };
        let signal = PredictionSignal {
            id: row.id,
            strategy_name: row.strategy_name,
            timestamp: row.timestamp,
            timeframe_minutes: u32::try_from(row.timeframe_minutes)
                .with_context(|| format!("negative timeframe on signal {}", row.id))?,
            direction: row.direction.parse::<Direction>()?,
            confidence: row.confidence,
            current_price: row.current_price,
            features_used: row.features_used.0,
            market,
        };
        Ok(StoredSignal {
            signal,
            expiry_time: row.expiry_time,
            actual_direction: row.actual_direction.as_deref().map(str::parse).transpose()?,
            close_price: row.close_price,
            is_correct: row.is_correct,
        })
    }
}

/// [`DataStore`] over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to `database_url` with at most `max_connections` pooled
    /// connections.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables and indexes if they do not exist.
    ///
    /// # Errors
    /// Returns an error if any DDL statement fails.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create schema")?;
        }
        tracing::debug!("database schema ready");
        Ok(())
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn get_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let limit = limit.map(i64::try_from).transpose()?;
        let rows = sqlx::query_as::<_, CandleRow>(
            r"
            SELECT open_time, open, high, low, close, volume
            FROM ohlcv
            WHERE symbol = $1 AND interval = $2
              AND ($3::timestamptz IS NULL OR open_time >= $3)
              AND ($4::timestamptz IS NULL OR open_time <= $4)
            ORDER BY open_time ASC
            LIMIT $5
            ",
        )
        .bind(symbol)
        .bind(interval)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query OHLCV")?;

        Ok(rows.into_iter().map(Candle::from).collect())
    }

    async fn save_ohlcv(&self, symbol: &str, interval: &str, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        let mut written = 0u64;

        for chunk in candles.chunks(500) {
            for candle in chunk {
                let result = sqlx::query(
                    r"
                    INSERT INTO ohlcv (symbol, interval, open_time, open, high, low, close, volume)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (symbol, interval, open_time) DO UPDATE
                    SET open = EXCLUDED.open,
                        high = EXCLUDED.high,
                        low = EXCLUDED.low,
                        close = EXCLUDED.close,
                        volume = EXCLUDED.volume
                    ",
                )
                .bind(symbol)
                .bind(interval)
                .bind(candle.timestamp)
                .bind(candle.open)
                .bind(candle.high)
                .bind(candle.low)
                .bind(candle.close)
                .bind(candle.volume)
                .execute(&mut *tx)
                .await
                .context("Failed to upsert OHLCV row")?;

                written += result.rows_affected();
            }
        }

        tx.commit().await.context("Failed to commit transaction")?;
        tracing::debug!(symbol, interval, written, "saved OHLCV");
        Ok(written)
    }

    async fn save_simulated_trade(&self, trade: &SimulatedTrade) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO simulated_trades
                (id, strategy_name, direction, confidence, timeframe_minutes, bet_amount,
                 open_time, open_price, expiry_time, close_price, result, pnl)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(trade.id())
        .bind(trade.strategy_name())
        .bind(trade.direction().as_str())
        .bind(trade.confidence())
        .bind(i32::try_from(trade.timeframe_minutes())?)
        .bind(trade.bet_amount())
        .bind(trade.open_time())
        .bind(trade.open_price())
        .bind(trade.expiry_time())
        .bind(trade.close_price())
        .bind(trade.result().map(TradeResult::as_str))
        .bind(trade.pnl())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert trade {}", trade.id()))?;

        Ok(())
    }

    async fn check_trade_exists(
        &self,
        strategy_name: &str,
        timeframe_minutes: u32,
        open_time: DateTime<Utc>,
    ) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r"
            SELECT EXISTS (
                SELECT 1 FROM simulated_trades
                WHERE strategy_name = $1 AND timeframe_minutes = $2 AND open_time = $3
            )
            ",
        )
        .bind(strategy_name)
        .bind(i32::try_from(timeframe_minutes)?)
        .bind(open_time)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn update_simulated_trade(
        &self,
        id: Uuid,
        close_price: f64,
        result: TradeResult,
        pnl: Decimal,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r"
            UPDATE simulated_trades
            SET close_price = $2, result = $3, pnl = $4
            WHERE id = $1 AND close_price IS NULL
            ",
        )
        .bind(id)
        .bind(close_price)
        .bind(result.as_str())
        .bind(pnl)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to settle trade {id}"))?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn get_pending_trades(&self) -> Result<Vec<SimulatedTrade>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r"
            SELECT id, strategy_name, direction, confidence, timeframe_minutes, bet_amount,
                   open_time, open_price, expiry_time, close_price, result, pnl
            FROM simulated_trades
            WHERE close_price IS NULL
            ORDER BY expiry_time ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SimulatedTrade::try_from).collect()
    }

    async fn get_daily_stats(&self, strategy_name: &str, date: NaiveDate) -> Result<DailyStats> {
        let day_start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);

        let (daily_loss, daily_trades): (Decimal, i64) = sqlx::query_as(
            r"
            SELECT COALESCE(SUM(CASE WHEN pnl < 0 THEN -pnl ELSE 0 END), 0),
                   COUNT(*)
            FROM simulated_trades
            WHERE strategy_name = $1 AND open_time >= $2 AND open_time < $3
            ",
        )
        .bind(strategy_name)
        .bind(day_start)
        .bind(day_end)
        .fetch_one(&self.pool)
        .await
        .context("Failed to query daily stats")?;

        let recent: Vec<(Option<String>,)> = sqlx::query_as(
            r"
            SELECT result FROM simulated_trades
            WHERE strategy_name = $1
            ORDER BY open_time DESC
            LIMIT $2
            ",
        )
        .bind(strategy_name)
        .bind(i64::try_from(LOSS_STREAK_LOOKBACK)?)
        .fetch_all(&self.pool)
        .await?;

        let results = recent
            .into_iter()
            .map(|(r,)| r.as_deref().map(str::parse::<TradeResult>).transpose())
            .collect::<Result<Vec<_>>>()?;

        Ok(DailyStats {
            daily_loss,
            daily_trades: u32::try_from(daily_trades)?,
            consecutive_losses: loss_streak(results),
        })
    }

    async fn save_prediction_signal(&self, signal: &PredictionSignal) -> Result<Uuid> {
        let stored = StoredSignal::new(signal.clone());
        sqlx::query(
            r"
            INSERT INTO prediction_signals
                (id, strategy_name, timestamp, timeframe_minutes, direction, confidence,
                 current_price, expiry_time, features_used, market_id, market_probability)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(signal.id)
        .bind(&signal.strategy_name)
        .bind(signal.timestamp)
        .bind(i32::try_from(signal.timeframe_minutes)?)
        .bind(signal.direction.as_str())
        .bind(signal.confidence)
        .bind(signal.current_price)
        .bind(stored.expiry_time)
        .bind(Json(&signal.features_used))
        .bind(signal.market.as_ref().map(|m| m.market_id.as_str()))
        .bind(signal.market.as_ref().map(|m| m.market_probability))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert signal {}", signal.id))?;

        Ok(signal.id)
    }

    async fn get_unsettled_signals(&self) -> Result<Vec<StoredSignal>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            r"
            SELECT id, strategy_name, timestamp, timeframe_minutes, direction, confidence,
                   current_price, expiry_time, features_used, market_id, market_probability,
                   actual_direction, close_price, is_correct
            FROM prediction_signals
            WHERE actual_direction IS NULL
            ORDER BY expiry_time ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredSignal::try_from).collect()
    }

    async fn get_settled_signals(
        &self,
        strategy_name: Option<&str>,
        timeframe_minutes: Option<u32>,
    ) -> Result<Vec<StoredSignal>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            r"
            SELECT id, strategy_name, timestamp, timeframe_minutes, direction, confidence,
                   current_price, expiry_time, features_used, market_id, market_probability,
                   actual_direction, close_price, is_correct
            FROM prediction_signals
            WHERE actual_direction IS NOT NULL
              AND ($1::text IS NULL OR strategy_name = $1)
              AND ($2::int IS NULL OR timeframe_minutes = $2)
            ORDER BY timestamp ASC
            ",
        )
        .bind(strategy_name)
        .bind(timeframe_minutes.map(i32::try_from).transpose()?)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch settled signals")?;

        rows.into_iter().map(StoredSignal::try_from).collect()
    }

    async fn settle_signal(
        &self,
        id: Uuid,
        actual_direction: ActualDirection,
        close_price: f64,
        is_correct: bool,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r"
            UPDATE prediction_signals
            SET actual_direction = $2, close_price = $3, is_correct = $4
            WHERE id = $1 AND actual_direction IS NULL
            ",
        )
        .bind(id)
        .bind(actual_direction.as_str())
        .bind(close_price)
        .bind(is_correct)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to settle signal {id}"))?;

        Ok(outcome.rows_affected() > 0)
    }
}
