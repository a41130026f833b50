//! Candle engine scenarios
//!
//! Drives the engine through buffer / generate cycles and checks the stored
//! candles:
//! - Buckets spanning several buffers
//! - Flat zero-volume candles for quiet periods
//! - Open/close carried from previous buffers
//! - Bucket rounding for every interval

use market_store::{
    ignore_critical_errors, rounded_timestamps, CandleEngine, CandleTransport, QueryContext, StoreConfig,
    StoreError,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use types::candle::{Candle, Interval};
use types::ids::{MarketId, PartyId, TradeId};
use types::trade::{Trade, TradeType};

const SECOND: i64 = 1_000_000_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;

const MARKET: &str = "testMarket";

fn open(dir: &TempDir) -> CandleEngine {
    CandleEngine::open(&StoreConfig::new(dir.path()), ignore_critical_errors()).unwrap()
}

fn market() -> MarketId {
    MarketId::new(MARKET)
}

fn trade(id: &str, price: u64, size: u64, timestamp: i64) -> Trade {
    Trade {
        id: TradeId::new(id),
        market: market(),
        price,
        size,
        buyer: PartyId::new("buyer"),
        seller: PartyId::new("seller"),
        timestamp,
        trade_type: TradeType::Default,
        ..Default::default()
    }
}

fn candles(engine: &CandleEngine, since: i64, interval: Interval) -> Vec<Candle> {
    engine
        .get_candles(&QueryContext::background(), &market(), since, interval)
        .unwrap()
}

fn ohlcv(candle: &Candle) -> (u64, u64, u64, u64, u64) {
    (candle.open, candle.high, candle.low, candle.close, candle.volume)
}

/// Feed `prices` (size 100 each) as trades at `start + offsets[i]`.
fn feed(engine: &CandleEngine, tag: &str, start: i64, prices: &[u64], offsets: &[i64]) {
    for (i, (price, offset)) in prices.iter().zip(offsets).enumerate() {
        engine
            .add_trade_to_buffer(&trade(&format!("{tag}-{i}"), *price, 100, start + offset))
            .unwrap();
    }
}

#[test]
fn test_generate_candles() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    // 2018-11-13T11:01:14Z
    let t0: i64 = 1_542_106_874_000_000_000;

    engine.start_new_buffer(&market(), t0).unwrap();
    feed(
        &engine,
        "a",
        t0,
        &[100, 100, 100, 100],
        &[0, 20 * SECOND, MINUTE, MINUTE + 20 * SECOND],
    );
    engine.generate_candles_from_buffer(&market()).unwrap();

    let minutes = candles(&engine, t0, Interval::I1M);
    assert_eq!(minutes.len(), 2);
    assert_eq!(minutes[0].timestamp, 1_542_106_860_000_000_000);
    assert_eq!(ohlcv(&minutes[0]), (100, 100, 100, 100, 200));
    assert_eq!(minutes[1].timestamp, 1_542_106_920_000_000_000);
    assert_eq!(ohlcv(&minutes[1]), (100, 100, 100, 100, 200));

    let minutes = candles(&engine, t0 + MINUTE, Interval::I1M);
    assert_eq!(minutes.len(), 1);
    assert_eq!(minutes[0].timestamp, 1_542_106_920_000_000_000);

    let fives = candles(&engine, t0 + MINUTE, Interval::I5M);
    assert_eq!(fives.len(), 1);
    assert_eq!(fives[0].timestamp, 1_542_106_800_000_000_000);
    assert_eq!(ohlcv(&fives[0]), (100, 100, 100, 100, 400));

    // A quiet minute still produces a flat candle at the last close
    engine.start_new_buffer(&market(), t0 + 2 * MINUTE).unwrap();
    engine.generate_candles_from_buffer(&market()).unwrap();

    let minutes = candles(&engine, t0, Interval::I1M);
    assert_eq!(minutes.len(), 3);
    assert_eq!(minutes[2].timestamp, 1_542_106_980_000_000_000);
    assert_eq!(ohlcv(&minutes[2]), (100, 100, 100, 100, 0));

    let fives = candles(&engine, t0, Interval::I5M);
    assert_eq!(fives.len(), 1);
    assert_eq!(fives[0].volume, 400);

    let fifteens = candles(&engine, t0 + 2 * MINUTE, Interval::I15M);
    assert_eq!(fifteens.len(), 1);
    assert_eq!(fifteens[0].timestamp, 1_542_106_800_000_000_000);
    assert_eq!(fifteens[0].volume, 400);

    // Nothing stored yet for the next 15 minute bucket
    assert!(candles(&engine, t0 + 17 * MINUTE, Interval::I15M).is_empty());

    engine.start_new_buffer(&market(), t0 + 17 * MINUTE).unwrap();
    engine.generate_candles_from_buffer(&market()).unwrap();

    let fifteens = candles(&engine, t0 + 17 * MINUTE, Interval::I15M);
    assert_eq!(fifteens.len(), 1);
    assert_eq!(fifteens[0].timestamp, 1_542_107_700_000_000_000);
    assert_eq!(ohlcv(&fifteens[0]), (100, 100, 100, 100, 0));
}

#[test]
fn test_previous_candle_derived_values() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    // 2018-11-13T11:00:00Z
    let t0: i64 = 1_542_106_800_000_000_000;
    let pattern = [100, 99, 108, 105];
    let next_pattern = [110, 112, 113, 109];

    engine.start_new_buffer(&market(), t0).unwrap();
    let first_minute = [0, 10 * SECOND, 20 * SECOND, 30 * SECOND];
    feed(&engine, "a", t0, &pattern, &first_minute);
    feed(&engine, "b", t0 + MINUTE, &next_pattern, &first_minute);
    engine.generate_candles_from_buffer(&market()).unwrap();

    let minutes = candles(&engine, t0, Interval::I1M);
    assert_eq!(minutes.len(), 2);
    assert_eq!(minutes[0].timestamp, t0);
    assert_eq!(ohlcv(&minutes[0]), (100, 108, 99, 105, 400));
    assert_eq!(minutes[1].timestamp, t0 + MINUTE);
    assert_eq!(ohlcv(&minutes[1]), (110, 113, 109, 109, 400));

    let fives = candles(&engine, t0, Interval::I5M);
    assert_eq!(fives.len(), 1);
    assert_eq!(ohlcv(&fives[0]), (100, 113, 99, 109, 800));

    // Second buffer: the seeded bucket carries the previous close, and the
    // first trade replaces it as open
    let later = [10 * SECOND, 20 * SECOND, 30 * SECOND, 40 * SECOND];
    engine.start_new_buffer(&market(), t0 + 2 * MINUTE).unwrap();
    feed(&engine, "c", t0 + 2 * MINUTE, &pattern, &later);
    feed(&engine, "d", t0 + 3 * MINUTE, &next_pattern, &later);
    engine.generate_candles_from_buffer(&market()).unwrap();

    let minutes = candles(&engine, t0 + 2 * MINUTE, Interval::I1M);
    assert_eq!(minutes.len(), 2);
    assert_eq!(minutes[0].timestamp, t0 + 2 * MINUTE);
    assert_eq!(ohlcv(&minutes[0]), (100, 108, 99, 105, 400));
    assert_eq!(minutes[1].timestamp, t0 + 3 * MINUTE);
    assert_eq!(ohlcv(&minutes[1]), (110, 113, 109, 109, 400));

    engine.start_new_buffer(&market(), t0 + 4 * MINUTE).unwrap();
    feed(&engine, "e", t0 + 4 * MINUTE, &[95, 80, 120, 105], &later);
    feed(&engine, "f", t0 + 5 * MINUTE, &[103, 101, 101, 101], &later);
    engine.generate_candles_from_buffer(&market()).unwrap();

    let minutes = candles(&engine, t0 + 4 * MINUTE, Interval::I1M);
    assert_eq!(minutes.len(), 2);
    assert_eq!(minutes[0].timestamp, t0 + 4 * MINUTE);
    assert_eq!(ohlcv(&minutes[0]), (95, 120, 80, 105, 400));
    assert_eq!(minutes[1].timestamp, t0 + 5 * MINUTE);
    assert_eq!(ohlcv(&minutes[1]), (103, 103, 101, 101, 400));

    // The whole history is still there
    assert_eq!(candles(&engine, t0, Interval::I1M).len(), 6);
}

#[test]
fn test_stored_bucket_is_merged_across_buffers() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    let t0: i64 = 1_542_106_800_000_000_000;

    engine.start_new_buffer(&market(), t0).unwrap();
    feed(&engine, "a", t0, &[100, 120], &[SECOND, 2 * SECOND]);
    engine.generate_candles_from_buffer(&market()).unwrap();

    // Same 5 minute bucket, new buffer
    engine.start_new_buffer(&market(), t0 + MINUTE).unwrap();
    feed(&engine, "b", t0 + MINUTE, &[90, 110], &[SECOND, 2 * SECOND]);
    engine.generate_candles_from_buffer(&market()).unwrap();

    let fives = candles(&engine, t0, Interval::I5M);
    assert_eq!(fives.len(), 1);
    // stored open kept, extremes widened, last close wins
    assert_eq!(ohlcv(&fives[0]), (100, 120, 90, 110, 400));
    assert_eq!(
        engine.fetch_last_candle(&market(), Interval::I5M).unwrap(),
        fives[0]
    );
}

#[test]
fn test_quiet_bucket_continues_from_previous_close() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    let t0: i64 = 1_542_106_800_000_000_000;

    engine.start_new_buffer(&market(), t0).unwrap();
    feed(
        &engine,
        "a",
        t0,
        &[100, 150, 90, 120],
        &[SECOND, 2 * SECOND, 3 * SECOND, 4 * SECOND],
    );
    engine.generate_candles_from_buffer(&market()).unwrap();

    // no trades in the next minute
    engine.start_new_buffer(&market(), t0 + MINUTE).unwrap();
    engine.generate_candles_from_buffer(&market()).unwrap();

    let minutes = candles(&engine, t0, Interval::I1M);
    assert_eq!(minutes.len(), 2);
    assert_eq!(ohlcv(&minutes[0]), (100, 150, 90, 120, 400));
    assert_eq!(minutes[1].timestamp, t0 + MINUTE);
    assert_eq!(ohlcv(&minutes[1]), (120, 120, 120, 120, 0));

    // the 5 minute bucket already holds the trades and is left alone
    let fives = candles(&engine, t0, Interval::I5M);
    assert_eq!(fives.len(), 1);
    assert_eq!(ohlcv(&fives[0]), (100, 150, 90, 120, 400));
}

#[test]
fn test_since_with_fewer_digits_than_stored_buckets() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        candle_min_since: 0,
        ..StoreConfig::new(dir.path())
    };
    let engine = CandleEngine::open(&config, ignore_critical_errors()).unwrap();
    let t0: i64 = 1_542_106_800_000_000_000;

    engine.start_new_buffer(&market(), t0).unwrap();
    feed(&engine, "a", t0, &[100], &[SECOND]);
    engine.generate_candles_from_buffer(&market()).unwrap();

    // rounds to 999999960000000000, one digit shorter than t0
    assert_eq!(candles(&engine, 1_000_000_000_000_000_000, Interval::I1M).len(), 1);
    assert_eq!(candles(&engine, MINUTE, Interval::I1M).len(), 1);
    assert_eq!(candles(&engine, 0, Interval::I1M).len(), 1);
    assert!(candles(&engine, t0 + MINUTE, Interval::I1M).is_empty());
}

#[test]
fn test_default_horizon_is_2018_in_nanoseconds() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    // 2020-09-13 in milliseconds: 1970 when read as nanoseconds
    let err = engine
        .get_candles(&QueryContext::background(), &market(), 1_600_000_000_000, Interval::I1M)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidSince { .. }));

    // 2018-01-01T00:00:01Z
    let horizon: i64 = 1_514_764_801_000_000_000;
    assert!(candles(&engine, horizon, Interval::I1M).is_empty());
}

#[test]
fn test_generate_from_explicit_buffer() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    let t0: i64 = 1_542_106_800_000_000_000;

    engine.start_new_buffer(&market(), t0).unwrap();
    feed(&engine, "a", t0, &[100], &[SECOND]);
    let buffer = engine.buffer(&market()).unwrap();

    let other = MarketId::new("otherMarket");
    engine.generate_candles(&other, &buffer).unwrap();

    let stored = engine
        .get_candles(&QueryContext::background(), &other, t0, Interval::I1H)
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].volume, 100);
    assert!(candles(&engine, t0, Interval::I1H).is_empty());
}

#[test]
fn test_rounded_timestamps() {
    // 2018-11-13T11:01:14Z
    let t: i64 = 1_542_106_874_000_000_000;
    let rounded = rounded_timestamps(t);

    assert_eq!(rounded[&Interval::I1M], t - 14 * SECOND);
    assert_eq!(rounded[&Interval::I5M], t - MINUTE - 14 * SECOND);
    assert_eq!(rounded[&Interval::I15M], t - MINUTE - 14 * SECOND);
    assert_eq!(rounded[&Interval::I1H], t - MINUTE - 14 * SECOND);
    assert_eq!(rounded[&Interval::I6H], t - 5 * HOUR - MINUTE - 14 * SECOND);
    assert_eq!(rounded[&Interval::I1D], t - 11 * HOUR - MINUTE - 14 * SECOND);
}

#[test]
fn test_subscribe_unsubscribe() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let (tx1, _rx1) = mpsc::channel(1);
    let (tx2, _rx2) = mpsc::channel(1);
    let first = engine.subscribe(CandleTransport::new(market(), Interval::I1M, tx1));
    let second = engine.subscribe(CandleTransport::new(market(), Interval::I1M, tx2));
    assert_eq!((first, second), (1, 2));

    engine.unsubscribe(first).unwrap();
    let err = engine.unsubscribe(first).unwrap_err();
    assert!(matches!(err, StoreError::SubscriberNotFound(1)));
    assert_eq!(err.to_string(), "Subscriber does not exist with id: 1");

    engine.unsubscribe(second).unwrap();
    // nothing left to remove
    engine.unsubscribe(second).unwrap();
    assert_eq!(engine.subscriber_count(), 0);
}

#[tokio::test]
async fn test_subscriber_receives_generated_candles() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    let t0: i64 = 1_542_106_800_000_000_000;

    let config = StoreConfig {
        channel_capacity: 8,
        ..StoreConfig::new(dir.path())
    };
    let (tx, mut rx) = config.channel();
    engine.subscribe(CandleTransport::new(market(), Interval::I1M, tx));

    engine.start_new_buffer(&market(), t0).unwrap();
    feed(&engine, "a", t0, &[100, 101], &[SECOND, MINUTE + SECOND]);
    engine.generate_candles_from_buffer(&market()).unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!((first.interval, first.timestamp), (Interval::I1M, t0));
    assert_eq!((second.interval, second.timestamp), (Interval::I1M, t0 + MINUTE));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_cancelled_query_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    let t0: i64 = 1_542_106_800_000_000_000;

    engine.start_new_buffer(&market(), t0).unwrap();
    engine.generate_candles_from_buffer(&market()).unwrap();

    let ctx = QueryContext::background();
    ctx.cancel();
    let result = engine.get_candles(&ctx, &market(), t0, Interval::I1M).unwrap();
    assert!(result.is_empty());
}
