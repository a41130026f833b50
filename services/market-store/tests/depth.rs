//! Market depth scenarios driven through the order store
//!
//! Depth only moves when a batch is committed, so every scenario saves
//! orders and reads `get_market_depth` back, cumulative volume included.

use market_store::{ignore_critical_errors, DepthSnapshot, OrderStore, PriceLevel, QueryContext, StoreConfig};
use tempfile::TempDir;
use types::ids::{MarketId, OrderId, PartyId};
use types::order::{Order, OrderStatus, Side};

const MARKET: &str = "testMarket";

fn open(dir: &TempDir) -> OrderStore {
    OrderStore::open(&StoreConfig::new(dir.path()), ignore_critical_errors()).unwrap()
}

fn order(id: &str, side: Side, price: u64, remaining: u64) -> Order {
    Order::new(
        OrderId::new(id),
        MarketId::new(MARKET),
        PartyId::new("partyA"),
        side,
        price,
        remaining,
        1_000,
    )
}

/// Next version of `order` with a new remaining quantity.
fn update(order: &mut Order, remaining: u64) -> Order {
    *order = order.amended(order.updated_at + 1);
    order.remaining = remaining;
    order.clone()
}

fn depth(store: &OrderStore) -> DepthSnapshot {
    store
        .get_market_depth(&QueryContext::background(), &MarketId::new(MARKET), 0)
        .unwrap()
}

/// (price, volume, orders, cumulative)
fn levels(side: &[PriceLevel]) -> Vec<(u64, u64, u64, u64)> {
    side.iter()
        .map(|l| (l.price, l.volume, l.number_of_orders, l.cumulative_volume))
        .collect()
}

#[test]
fn test_market_depth_hard() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut first = vec![
        order("01", Side::BUY, 111, 100),
        order("02", Side::BUY, 112, 100),
        order("03", Side::BUY, 112, 100),
        order("04", Side::BUY, 113, 100),
    ];
    store.save_batch(first.clone()).unwrap();

    assert_eq!(
        levels(&depth(&store).buy),
        vec![(113, 100, 1, 100), (112, 200, 2, 300), (111, 100, 1, 400)]
    );

    let mut second = vec![
        order("05", Side::BUY, 111, 100),
        order("06", Side::BUY, 112, 100),
        order("07", Side::BUY, 112, 100),
        order("08", Side::BUY, 113, 100),
    ];
    store.save_batch(second.clone()).unwrap();

    assert_eq!(
        levels(&depth(&store).buy),
        vec![(113, 200, 2, 200), (112, 400, 4, 600), (111, 200, 2, 800)]
    );

    // Reduce the first batch
    let batch = vec![
        update(&mut first[0], 0),
        update(&mut first[1], 50),
        update(&mut first[2], 20),
        update(&mut first[3], 0),
    ];
    store.save_batch(batch).unwrap();

    assert_eq!(
        levels(&depth(&store).buy),
        vec![(113, 100, 1, 100), (112, 270, 4, 370), (111, 100, 1, 470)]
    );

    // Drain the first batch completely
    let batch = vec![update(&mut first[1], 0), update(&mut first[2], 0)];
    store.save_batch(batch).unwrap();

    assert_eq!(
        levels(&depth(&store).buy),
        vec![(113, 100, 1, 100), (112, 200, 2, 300), (111, 100, 1, 400)]
    );

    // Remove the second batch through fills and terminal statuses
    let mut batch = vec![update(&mut second[0], 0), update(&mut second[1], 0)];
    let mut cancelled = update(&mut second[2], 100);
    cancelled.status = OrderStatus::Cancelled;
    let mut expired = update(&mut second[3], 100);
    expired.status = OrderStatus::Expired;
    batch.extend([cancelled, expired]);
    store.save_batch(batch).unwrap();

    let snapshot = depth(&store);
    assert!(snapshot.buy.is_empty());
    assert!(snapshot.sell.is_empty());
}

#[test]
fn test_depth_buy_side() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut orders = vec![
        order("11", Side::BUY, 111, 100),
        order("12", Side::BUY, 112, 100),
        order("13", Side::BUY, 112, 100),
        order("14", Side::BUY, 113, 100),
    ];
    store.save_batch(orders.clone()).unwrap();

    let mut expired = update(&mut orders[3], 80);
    expired.status = OrderStatus::Expired;
    store
        .save_batch(vec![update(&mut orders[0], 50), update(&mut orders[2], 50), expired])
        .unwrap();

    // 113 is removed
    assert_eq!(
        levels(&depth(&store).buy),
        vec![(112, 150, 2, 150), (111, 50, 1, 200)]
    );
}

#[test]
fn test_depth_sell_side() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut orders = vec![
        order("21", Side::SELL, 111, 100),
        order("22", Side::SELL, 112, 100),
        order("23", Side::SELL, 112, 100),
        order("24", Side::SELL, 113, 100),
    ];
    store.save_batch(orders.clone()).unwrap();

    assert_eq!(
        levels(&depth(&store).sell),
        vec![(111, 100, 1, 100), (112, 200, 2, 300), (113, 100, 1, 400)]
    );

    let mut expired = update(&mut orders[3], 80);
    expired.status = OrderStatus::Expired;
    store
        .save_batch(vec![update(&mut orders[0], 50), update(&mut orders[2], 50), expired])
        .unwrap();

    assert_eq!(
        levels(&depth(&store).sell),
        vec![(111, 50, 1, 50), (112, 150, 2, 200)]
    );

    // Orders that never had anything remaining do not create levels
    store
        .save_batch(vec![order("25", Side::SELL, 1337, 0), order("26", Side::BUY, 1337, 0)])
        .unwrap();
    let snapshot = depth(&store);
    assert_eq!(snapshot.sell.len(), 2);
    assert!(snapshot.buy.is_empty());
}

#[test]
fn test_stopped_order_leaves_the_book() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut sell = order("31", Side::SELL, 113, 100);
    store.save_batch(vec![sell.clone()]).unwrap();
    assert_eq!(levels(&depth(&store).sell), vec![(113, 100, 1, 100)]);

    let mut stopped = update(&mut sell, 100);
    stopped.status = OrderStatus::Stopped;
    store.save_batch(vec![stopped]).unwrap();
    assert!(depth(&store).sell.is_empty());
}

#[test]
fn test_partially_filled_order_leaves_the_book() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut sell = order("41", Side::SELL, 113, 100);
    store.save_batch(vec![sell.clone()]).unwrap();

    store.save_batch(vec![update(&mut sell, 80)]).unwrap();
    assert_eq!(levels(&depth(&store).sell), vec![(113, 80, 1, 80)]);

    let mut done = update(&mut sell, 80);
    done.status = OrderStatus::PartiallyFilled;
    store.save_batch(vec![done]).unwrap();
    assert!(depth(&store).sell.is_empty());
}

#[test]
fn test_depth_limit_keeps_best_levels() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .save_batch(vec![
            order("51", Side::BUY, 100, 10),
            order("52", Side::BUY, 101, 10),
            order("53", Side::BUY, 102, 10),
            order("54", Side::SELL, 103, 10),
            order("55", Side::SELL, 104, 10),
        ])
        .unwrap();

    let snapshot = store
        .get_market_depth(&QueryContext::background(), &MarketId::new(MARKET), 1)
        .unwrap();
    assert_eq!(levels(&snapshot.buy), vec![(102, 10, 1, 10)]);
    assert_eq!(levels(&snapshot.sell), vec![(103, 10, 1, 10)]);
}

#[test]
fn test_cancelled_depth_query_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.save_batch(vec![order("61", Side::BUY, 100, 10)]).unwrap();

    let ctx = QueryContext::background();
    ctx.cancel();
    let snapshot = store
        .get_market_depth(&ctx, &MarketId::new(MARKET), 0)
        .unwrap();
    assert!(snapshot.buy.is_empty());
    assert!(snapshot.sell.is_empty());
}
