//! Control/event channel between the engine core and an external consumer
//! (C14, §4.11). In-process and subprocess modes are mutually exclusive
//! (§9): one `EngineBridge` is always exactly one of the two.

use crate::error::{AdapterError, BridgeError};
use crate::model::{ExecutionReport, OrderRecord, OrderRequest, OrderStatus, Position, Side, SymbolId, Venue};
use crate::order_store::{OrderStore, OrderStoreError};
use crate::position::PositionBook;
use crate::queue::LockFreeQueue;
use crate::router::{ExchangeAdapter, OrderRouter};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub last_price: f64,
    pub ts_ns: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub balances: HashMap<String, f64>,
}

/// Read-mostly view kept current by decoding each outbound event, owned by
/// the bridge for the engine's lifetime.
#[derive(Default)]
pub struct CachedReadModel {
    pub orders: HashMap<String, OrderRecord>,
    pub markets: HashMap<SymbolId, MarketSnapshot>,
    pub account: AccountState,
}

impl CachedReadModel {
    /// Applies one decoded NDJSON event per the table in §6.2. Order events
    /// upsert: the first `order_received` for a `client_order_id` has no
    /// prior record to update, so one is constructed from the event's own
    /// request fields before the status/fill fields are layered on.
    fn apply_event(&mut self, event: &Value) {
        let Some(kind) = event.get("type").and_then(Value::as_str) else { return };
        match kind {
            "order_received" | "order_state" | "order_update" => {
                if let Some(id) = event.get("client_order_id").and_then(Value::as_str) {
                    let record = self.orders.entry(id.to_string()).or_insert_with(|| {
                        OrderRecord::new(
                            OrderRequest {
                                symbol: event
                                    .get("symbol")
                                    .and_then(Value::as_str)
                                    .map(SymbolId::new)
                                    .unwrap_or_else(|| SymbolId::new("")),
                                side: event
                                    .get("side")
                                    .and_then(Value::as_str)
                                    .and_then(parse_side)
                                    .unwrap_or(Side::Buy),
                                order_type: crate::model::OrderType::Limit,
                                qty: event.get("qty").and_then(Value::as_f64).unwrap_or(0.0),
                                price: event.get("price").and_then(Value::as_f64),
                                tif: crate::model::TimeInForce::Gtc,
                                client_order_id: id.to_string(),
                            },
                            event.get("ts_ns").and_then(Value::as_i64).unwrap_or(0),
                        )
                    });
                    if let Some(status) = event.get("status").and_then(Value::as_str) {
                        record.status = parse_status(status).unwrap_or(record.status);
                    }
                    if let Some(q) = event.get("executed_qty").and_then(Value::as_f64) {
                        record.cum_qty = q;
                    }
                    if let Some(p) = event.get("avg_price").and_then(Value::as_f64) {
                        record.avg_price = p;
                    }
                    if let Some(v) = event.get("venue_order_id").and_then(Value::as_str) {
                        record.venue_order_id = Some(v.to_string());
                    }
                    if let Some(r) = event.get("reason").and_then(Value::as_str) {
                        record.reason = Some(r.to_string());
                    }
                }
            }
            "market" | "trade" | "book_top" => {
                if let Some(symbol) = event.get("symbol").and_then(Value::as_str) {
                    if let Some(price) = event.get("price").and_then(Value::as_f64) {
                        let ts_ns = event.get("ts_ns").and_then(Value::as_i64).unwrap_or(0);
                        self.markets.insert(SymbolId::new(symbol), MarketSnapshot { last_price: price, ts_ns });
                    }
                }
            }
            "account" => {
                if let Some(balances) = event.get("balances").and_then(Value::as_array) {
                    let mut map = HashMap::new();
                    for entry in balances {
                        if let (Some(asset), Some(amount)) = (
                            entry.get("asset").and_then(Value::as_str),
                            entry.get("amount").and_then(Value::as_f64),
                        ) {
                            map.insert(asset.to_string(), amount);
                        }
                    }
                    self.account.balances = map;
                }
            }
            _ => {}
        }
    }
}

fn parse_side(s: &str) -> Option<Side> {
    match s {
        "BUY" => Some(Side::Buy),
        "SELL" => Some(Side::Sell),
        _ => None,
    }
}

fn parse_status(s: &str) -> Option<OrderStatus> {
    Some(match s {
        "New" => OrderStatus::New,
        "Accepted" => OrderStatus::Accepted,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Canceled" => OrderStatus::Canceled,
        "Rejected" => OrderStatus::Rejected,
        "Expired" => OrderStatus::Expired,
        _ => return None,
    })
}

struct Subscriber {
    filter: Option<String>,
    callback: Arc<dyn Fn(Value) + Send + Sync>,
}

struct Dispatch {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_sub_id: AtomicU64,
    max_subscriptions: usize,
    queue: LockFreeQueue<Value>,
    read_model: Mutex<CachedReadModel>,
}

impl Dispatch {
    fn new(queue_capacity: usize, max_subscriptions: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
            max_subscriptions,
            queue: LockFreeQueue::new(queue_capacity),
            read_model: Mutex::new(CachedReadModel::default()),
        }
    }

    fn ingest(&self, event: Value) {
        self.read_model.lock().apply_event(&event);
        self.queue.push(event);
        self.drain();
    }

    /// Collects the matching callbacks under the subscriber lock, then
    /// drops the lock before invoking any of them: per §9, no lock may be
    /// held across a user callback.
    fn drain(&self) {
        while let Some(event) = self.queue.pop() {
            let kind = event.get("type").and_then(Value::as_str).map(str::to_string);
            let matching: Vec<Arc<dyn Fn(Value) + Send + Sync>> = {
                let subs = self.subscribers.lock();
                subs.values()
                    .filter(|sub| match (&sub.filter, &kind) {
                        (None, _) => true,
                        (Some(f), Some(k)) => f == k,
                        (Some(_), None) => false,
                    })
                    .map(|sub| Arc::clone(&sub.callback))
                    .collect()
            };
            for callback in matching {
                callback(event.clone());
            }
        }
    }
}

enum Mode {
    InProcess {
        router: Mutex<OrderRouter>,
        store: Mutex<OrderStore>,
        positions: Mutex<PositionBook>,
    },
    Subprocess {
        child: Mutex<Child>,
        reader: Mutex<Option<JoinHandle<()>>>,
    },
}

/// Owns either an in-process call path into C11/C9, or a subprocess speaking
/// the line protocol of §6.2 over its stdin/stdout.
pub struct EngineBridge {
    mode: Mode,
    dispatch: Arc<Dispatch>,
    running: AtomicBool,
}

impl EngineBridge {
    pub fn in_process(queue_capacity: usize, max_subscriptions: usize) -> Self {
        Self {
            mode: Mode::InProcess {
                router: Mutex::new(OrderRouter::new()),
                store: Mutex::new(OrderStore::new()),
                positions: Mutex::new(PositionBook::new()),
            },
            dispatch: Arc::new(Dispatch::new(queue_capacity, max_subscriptions)),
            running: AtomicBool::new(false),
        }
    }

    /// Spawns `program` with `args`, wiring its stdin/stdout to the bridge's
    /// command/event streams.
    pub fn spawn_subprocess(
        program: &str,
        args: &[String],
        queue_capacity: usize,
        max_subscriptions: usize,
    ) -> std::io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("subprocess stdout was piped");
        let dispatch = Arc::new(Dispatch::new(queue_capacity, max_subscriptions));
        let reader_dispatch = Arc::clone(&dispatch);

        let reader = std::thread::spawn(move || {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(Ok(line)) = lines.next() {
                if let Ok(value) = serde_json::from_str::<Value>(&line) {
                    reader_dispatch.ingest(value);
                }
            }
        });

        Ok(Self {
            mode: Mode::Subprocess { child: Mutex::new(child), reader: Mutex::new(Some(reader)) },
            dispatch,
            running: AtomicBool::new(false),
        })
    }

    /// Registers a venue adapter with the bridge's own router. Only
    /// meaningful in-process — a subprocess bridge routes orders by writing
    /// to the child's stdin instead.
    pub fn register_adapter(&self, venue: Venue, adapter: Box<dyn ExchangeAdapter>) {
        if let Mode::InProcess { router, .. } = &self.mode {
            router.lock().register(venue, adapter);
        }
    }

    pub fn set_default_venue(&self, venue: Venue) {
        if let Mode::InProcess { router, .. } = &self.mode {
            router.lock().set_default_venue(venue);
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.dispatch.ingest(serde_json::json!({"type": "engine_started"}));
    }

    /// Idempotent per §4.11.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.dispatch.ingest(serde_json::json!({"type": "engine_shutdown"}));
        if let Mode::Subprocess { child, reader } = &self.mode {
            let mut child = child.lock();
            let _ = child.kill();
            let _ = child.wait();
            if let Some(handle) = reader.lock().take() {
                let _ = handle.join();
            }
        }
    }

    pub fn place_order(&self, venue: Option<crate::model::Venue>, request: OrderRequest) -> Result<(), BridgeError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(BridgeError::NotRunning);
        }
        match &self.mode {
            Mode::InProcess { router, store, .. } => {
                let record = store.lock().submit(request.clone(), now_ns());
                self.dispatch.ingest(serde_json::json!({
                    "type": "order_received",
                    "client_order_id": record.request.client_order_id,
                    "status": record.status.as_str(),
                    "symbol": record.request.symbol.0,
                    "side": record.request.side.to_string(),
                    "qty": record.request.qty,
                    "price": record.request.price,
                }));
                match router.lock().place_order(venue, &request) {
                    Ok(report) => self.apply_report(report),
                    Err(e) => self.emit_adapter_error(e),
                }
            }
            Mode::Subprocess { child, .. } => {
                let line = format!(
                    "{} {} {} {} {} {}\n",
                    if request.side == Side::Buy { "BUY" } else { "SELL" },
                    request.symbol,
                    request.qty,
                    request.price.unwrap_or(0.0),
                    request.client_order_id,
                    order_type_token(request.order_type),
                );
                let mut child = child.lock();
                if let Some(stdin) = child.stdin.as_mut() {
                    let _ = stdin.write_all(line.as_bytes());
                }
            }
        }
        Ok(())
    }

    /// A terminal order's cancel is an idempotent no-op (§9): no adapter call,
    /// an informational `order_update` instead of an `error`.
    pub fn cancel_order(&self, client_order_id: &str) -> Result<(), BridgeError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(BridgeError::NotRunning);
        }
        match &self.mode {
            Mode::InProcess { router, store, .. } => {
                match store.lock().is_cancelable(client_order_id) {
                    None => self.dispatch.ingest(serde_json::json!({
                        "type": "error",
                        "message": format!("no order with client_order_id '{client_order_id}'"),
                    })),
                    Some(false) => self.dispatch.ingest(serde_json::json!({
                        "type": "order_update",
                        "client_order_id": client_order_id,
                        "reason": "already terminal, cancel is a no-op",
                    })),
                    Some(true) => match router.lock().cancel_order(None, client_order_id) {
                        Ok(report) => self.apply_report(report),
                        Err(e) => self.emit_adapter_error(e),
                    },
                }
            }
            Mode::Subprocess { child, .. } => {
                let mut child = child.lock();
                if let Some(stdin) = child.stdin.as_mut() {
                    let _ = stdin.write_all(format!("CANCEL {client_order_id}\n").as_bytes());
                }
            }
        }
        Ok(())
    }

    fn apply_report(&self, report: ExecutionReport) {
        if let Mode::InProcess { store, positions, .. } = &self.mode {
            let client_order_id = report.client_order_id.clone();
            match store.lock().apply_report_with_implicit_accept(report.clone(), now_ns()) {
                Ok(record) => {
                    if let Some(qty) = report.last_fill_qty.filter(|q| *q > 0.0) {
                        let price = report.last_fill_price.unwrap_or(0.0);
                        positions.lock().apply_fill(&record.request.symbol, record.request.side, qty, price);
                    }
                    self.dispatch.ingest(serde_json::json!({
                        "type": "order_update",
                        "client_order_id": client_order_id,
                        "status": record.status.as_str(),
                        "executed_qty": record.cum_qty,
                        "avg_price": record.avg_price,
                    }));
                }
                Err(OrderStoreError::UnknownOrder(_)) => {}
                Err(e) => {
                    self.dispatch.ingest(serde_json::json!({"type": "error", "message": e.to_string()}));
                }
            }
        }
    }

    fn emit_adapter_error(&self, error: AdapterError) {
        self.dispatch.ingest(serde_json::json!({"type": "error", "message": error.to_string()}));
    }

    pub fn get_order(&self, client_order_id: &str) -> Option<OrderRecord> {
        self.dispatch.read_model.lock().orders.get(client_order_id).cloned()
    }

    pub fn get_orders(&self) -> Vec<OrderRecord> {
        self.dispatch.read_model.lock().orders.values().cloned().collect()
    }

    pub fn get_pending_orders(&self) -> Vec<OrderRecord> {
        self.dispatch
            .read_model
            .lock()
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn get_market_snapshot(&self, symbol: &SymbolId) -> Option<MarketSnapshot> {
        self.dispatch.read_model.lock().markets.get(symbol).cloned()
    }

    pub fn get_account_state(&self) -> AccountState {
        self.dispatch.read_model.lock().account.clone()
    }

    pub fn get_positions(&self) -> Vec<Position> {
        match &self.mode {
            Mode::InProcess { positions, .. } => positions.lock().all().cloned().collect(),
            Mode::Subprocess { .. } => Vec::new(),
        }
    }

    /// `filter` matches on the NDJSON `type` field; `None` fires on every
    /// event. Fails with `MaxSubscriptions` once the bounded slot count is
    /// exhausted.
    pub fn subscribe_to_events(
        &self,
        filter: Option<String>,
        callback: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<u64, BridgeError> {
        let mut subs = self.dispatch.subscribers.lock();
        if subs.len() >= self.dispatch.max_subscriptions {
            return Err(BridgeError::MaxSubscriptions);
        }
        let sub_id = self.dispatch.next_sub_id.fetch_add(1, Ordering::Relaxed);
        subs.insert(sub_id, Subscriber { filter, callback: Arc::new(callback) });
        Ok(sub_id)
    }

    pub fn unsubscribe(&self, sub_id: u64) {
        self.dispatch.subscribers.lock().remove(&sub_id);
    }
}

fn order_type_token(order_type: crate::model::OrderType) -> &'static str {
    match order_type {
        crate::model::OrderType::Market => "MARKET",
        _ => "LIMIT",
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
