//! Engine process (C17, §4 data flow, §6). Wires C1-C13 together, owns the
//! process lifecycle, and speaks the line/NDJSON protocol of §6.1/§6.2 over
//! stdin/stdout. Strategy handles (`STRATEGY` command) are tracked here as a
//! plain name/running registry — the spec defines only the command surface,
//! not a strategy execution architecture.

mod simulated_adapter;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use simulated_adapter::SimulatedAdapter;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use veloz_core::command::{Command, CommandParser, StrategyAction};
use veloz_core::config::Config;
use veloz_core::event_loop::EventLoop;
use veloz_core::logging::init_logger;
use veloz_core::market_data::MarketDataMgr;
use veloz_core::metrics::MarketMetrics;
use veloz_core::model::{OrderStatus, SymbolId, Venue};
use veloz_core::order_store::{OrderStore, OrderStoreError};
use veloz_core::persistence::{Snapshot, StatePersistence};
use veloz_core::position::PositionBook;
use veloz_core::risk::{CircuitBreaker, RiskEngine};
use veloz_core::router::OrderRouter;

#[derive(Parser, Debug)]
#[command(author, version, about = "VeloZ trading engine core")]
struct Args {
    /// Path to a TOML config file; falls back to built-in defaults.
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,
}

struct StrategyHandle {
    name: String,
    running: bool,
}

const STDOUT_SUBSCRIBER_ID: u64 = 0;

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
            Config::load_with_env_overrides(&raw).context("parsing config file")?
        }
        None => Config::load_with_env_overrides("").context("applying environment overrides to defaults")?,
    };
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.json_logs {
        config.json_logs = true;
    }
    config.validate().context("validating configuration")?;

    init_logger(&config.log_level, config.json_logs);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;
    }

    let event_loop = Arc::new(EventLoop::new(config.event_loop.worker_count));
    let metrics = Arc::new(MarketMetrics::new().context("initializing metrics registry")?);
    let market_data =
        MarketDataMgr::new(config.market_data.clone().into(), Arc::clone(&event_loop), Arc::clone(&metrics));

    let mut router = OrderRouter::new();
    router.register(Venue::Unknown, Box::new(SimulatedAdapter::new("simulated")));
    router.set_default_venue(Venue::Unknown);

    let mut order_store = OrderStore::new();
    let mut positions = PositionBook::new();
    let risk_engine = RiskEngine::new(config.risk.clone().into());
    let circuit_breaker = CircuitBreaker::new(config.circuit_breaker.clone().into());
    let persistence =
        StatePersistence::new(config.persistence.snapshot_dir.clone(), config.persistence.max_snapshots);
    let mut strategies: Vec<StrategyHandle> = Vec::new();
    let sequence = AtomicU64::new(0);

    if let Some(snapshot) = persistence.load_latest_snapshot().context("loading prior snapshot")? {
        restore(&snapshot, &mut order_store, &mut positions, &mut strategies);
        sequence.store(snapshot.sequence_num, Ordering::Relaxed);
        tracing::info!(sequence = snapshot.sequence_num, "restored from snapshot");
    }

    emit(&json!({"type": "engine_started", "ts_ns": now_ns()}));

    let snapshot_interval = Duration::from_secs(config.persistence.snapshot_interval_secs.max(1));
    let mut last_snapshot_at = std::time::Instant::now();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Ok(line) = line else { break };

        match CommandParser::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(command)) => handle_command(
                command,
                &mut order_store,
                &mut positions,
                &router,
                &risk_engine,
                &circuit_breaker,
                &market_data,
                &mut strategies,
            ),
            Err(e) => emit(&json!({"type": "error", "ts_ns": now_ns(), "message": e.to_string()})),
        }

        if last_snapshot_at.elapsed() >= snapshot_interval {
            persist_snapshot(&persistence, &sequence, &order_store, &positions, &strategies);
            last_snapshot_at = std::time::Instant::now();
        }
    }

    persist_snapshot(&persistence, &sequence, &order_store, &positions, &strategies);
    emit(&json!({"type": "engine_shutdown", "ts_ns": now_ns()}));

    drop(market_data);
    match Arc::try_unwrap(event_loop) {
        Ok(el) => el.stop(),
        Err(_) => tracing::warn!("event loop had outstanding references at shutdown; skipping join"),
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_command(
    command: Command,
    order_store: &mut OrderStore,
    positions: &mut PositionBook,
    router: &OrderRouter,
    risk_engine: &RiskEngine,
    circuit_breaker: &CircuitBreaker,
    market_data: &MarketDataMgr,
    strategies: &mut Vec<StrategyHandle>,
) {
    match command {
        Command::PlaceOrder(request) => {
            if !circuit_breaker.allow_request() {
                emit(&json!({
                    "type": "error", "ts_ns": now_ns(),
                    "message": "circuit breaker open, order rejected",
                    "client_order_id": request.client_order_id,
                }));
                return;
            }
            if let Err(rejection) = risk_engine.check(&request) {
                emit(&json!({
                    "type": "error", "ts_ns": now_ns(),
                    "message": rejection.to_string(),
                    "client_order_id": request.client_order_id,
                }));
                return;
            }

            let record = order_store.submit(request.clone(), now_ns());
            emit(&json!({
                "type": "order_received", "ts_ns": now_ns(),
                "client_order_id": record.request.client_order_id,
                "status": record.status.as_str(),
                "symbol": record.request.symbol.0,
                "side": record.request.side.to_string(),
                "qty": record.request.qty,
                "price": record.request.price,
            }));

            match router.place_order(None, &request) {
                Ok(report) => {
                    circuit_breaker.record_success();
                    match order_store.apply_report_with_implicit_accept(report.clone(), now_ns()) {
                        Ok(updated) => {
                            if let Some(qty) = report.last_fill_qty.filter(|q| *q > 0.0) {
                                let price = report.last_fill_price.unwrap_or(0.0);
                                positions.apply_fill(&updated.request.symbol, updated.request.side, qty, price);
                                emit(&json!({
                                    "type": "fill", "ts_ns": now_ns(),
                                    "client_order_id": updated.request.client_order_id,
                                    "symbol": updated.request.symbol.0,
                                    "qty": qty, "price": price,
                                }));
                            }
                            emit(&json!({
                                "type": "order_update", "ts_ns": now_ns(),
                                "client_order_id": updated.request.client_order_id,
                                "status": updated.status.as_str(),
                                "symbol": updated.request.symbol.0,
                                "executed_qty": updated.cum_qty,
                                "avg_price": updated.avg_price,
                                "venue_order_id": updated.venue_order_id,
                            }));
                        }
                        Err(e) => emit(&json!({"type": "error", "ts_ns": now_ns(), "message": e.to_string()})),
                    }
                }
                Err(e) => {
                    circuit_breaker.record_failure();
                    emit(&json!({
                        "type": "error", "ts_ns": now_ns(),
                        "message": e.to_string(),
                        "client_order_id": request.client_order_id,
                    }));
                }
            }
        }
        Command::Cancel { client_order_id } => match order_store.is_cancelable(&client_order_id) {
            None => emit(&json!({
                "type": "error", "ts_ns": now_ns(),
                "message": format!("no order with client_order_id '{client_order_id}'"),
            })),
            Some(false) => {
                let status = order_store.get(&client_order_id).map(|o| o.status).unwrap_or(OrderStatus::Canceled);
                emit(&json!({
                    "type": "order_update", "ts_ns": now_ns(),
                    "client_order_id": client_order_id,
                    "status": status.as_str(),
                    "reason": "already terminal, cancel is a no-op",
                }));
            }
            Some(true) => match router.cancel_order(None, &client_order_id) {
                Ok(report) => match order_store.apply_report_with_implicit_accept(report, now_ns()) {
                    Ok(updated) => emit(&json!({
                        "type": "order_update", "ts_ns": now_ns(),
                        "client_order_id": updated.request.client_order_id,
                        "status": updated.status.as_str(),
                    })),
                    Err(OrderStoreError::UnknownOrder(_)) => {}
                    Err(e) => emit(&json!({"type": "error", "ts_ns": now_ns(), "message": e.to_string()})),
                },
                Err(e) => emit(&json!({"type": "error", "ts_ns": now_ns(), "message": e.to_string()})),
            },
        },
        Command::Query { kind, params } => handle_query(&kind, &params, order_store, positions),
        Command::Subscribe { venue, symbol, event_type } => {
            // Single stdout consumer per engine process, so every command-line
            // subscription is tracked under one fixed subscriber id; C3 still
            // does real work multiplexing distinct (symbol, event_type) pairs.
            let needs_snapshot = market_data.ensure_book_subscribed(&symbol, event_type, STDOUT_SUBSCRIBER_ID);
            emit(&json!({
                "type": "subscribed", "ts_ns": now_ns(),
                "venue": venue.to_string(), "symbol": symbol.0, "event_type": format!("{event_type:?}"),
                "snapshot_requested": needs_snapshot,
            }));
        }
        Command::Unsubscribe { venue, symbol, event_type } => {
            market_data.remove_subscription(&symbol, event_type, STDOUT_SUBSCRIBER_ID);
            emit(&json!({
                "type": "unsubscribed", "ts_ns": now_ns(),
                "venue": venue.to_string(), "symbol": symbol.0, "event_type": format!("{event_type:?}"),
            }));
        }
        Command::Strategy { action, params } => handle_strategy(action, &params, strategies),
    }
}

fn handle_query(kind: &str, params: &[String], order_store: &OrderStore, positions: &PositionBook) {
    let data = match kind.to_ascii_lowercase().as_str() {
        "orders" => json!(order_store.all().cloned().collect::<Vec<_>>()),
        "pending" => json!(order_store.pending().cloned().collect::<Vec<_>>()),
        "order" => match params.first() {
            Some(id) => json!(order_store.get(id)),
            None => Value::Null,
        },
        "positions" => json!(positions.all().cloned().collect::<Vec<_>>()),
        "position" => match params.first() {
            Some(symbol) => json!(positions.get(&SymbolId::new(symbol))),
            None => Value::Null,
        },
        other => {
            emit(&json!({"type": "error", "ts_ns": now_ns(), "message": format!("unknown query kind '{other}'")}));
            return;
        }
    };
    emit(&json!({"type": "query_result", "ts_ns": now_ns(), "kind": kind, "data": data}));
}

fn handle_strategy(action: StrategyAction, params: &[String], strategies: &mut Vec<StrategyHandle>) {
    let target = params.first().cloned();
    match action {
        StrategyAction::Load => {
            let name = target.unwrap_or_else(|| "default".to_string());
            if !strategies.iter().any(|s| s.name == name) {
                strategies.push(StrategyHandle { name: name.clone(), running: false });
            }
            emit(&json!({"type": "strategy_status", "ts_ns": now_ns(), "name": name, "running": false}));
        }
        StrategyAction::Start | StrategyAction::Stop => {
            let running = action == StrategyAction::Start;
            if let Some(name) = &target {
                if let Some(handle) = strategies.iter_mut().find(|s| &s.name == name) {
                    handle.running = running;
                    emit(&json!({"type": "strategy_status", "ts_ns": now_ns(), "name": name, "running": running}));
                    return;
                }
            }
            emit(&json!({
                "type": "error", "ts_ns": now_ns(),
                "message": format!("unknown strategy handle '{}'", target.unwrap_or_default()),
            }));
        }
        StrategyAction::Unload => {
            if let Some(name) = target {
                strategies.retain(|s| s.name != name);
                emit(&json!({"type": "strategy_status", "ts_ns": now_ns(), "name": name, "unloaded": true}));
            }
        }
        StrategyAction::List => {
            let list: Vec<Value> = strategies
                .iter()
                .map(|s| json!({"name": s.name, "running": s.running}))
                .collect();
            emit(&json!({"type": "query_result", "ts_ns": now_ns(), "kind": "strategies", "data": list}));
        }
        StrategyAction::Status => {
            if let Some(name) = target {
                let data = strategies.iter().find(|s| s.name == name).map(|s| json!({"name": s.name, "running": s.running}));
                emit(&json!({"type": "query_result", "ts_ns": now_ns(), "kind": "strategy_status", "data": data}));
            }
        }
    }
}

fn persist_snapshot(
    persistence: &StatePersistence,
    sequence: &AtomicU64,
    order_store: &OrderStore,
    positions: &PositionBook,
    strategies: &[StrategyHandle],
) {
    let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
    let snapshot = Snapshot {
        sequence_num: seq,
        ts_ns: now_ns(),
        balances: Vec::new(),
        orders: order_store.all().cloned().collect(),
        positions: positions.all().cloned().collect(),
        strategies: strategies.iter().map(|s| s.name.clone()).collect(),
    };
    if let Err(e) = persistence.save(&snapshot) {
        tracing::error!(error = %e, "snapshot save failed");
    }
}

fn restore(
    snapshot: &Snapshot,
    order_store: &mut OrderStore,
    positions: &mut PositionBook,
    strategies: &mut Vec<StrategyHandle>,
) {
    for record in &snapshot.orders {
        order_store.restore(record.clone());
    }
    for position in &snapshot.positions {
        positions.restore(position.clone());
    }
    for name in &snapshot.strategies {
        strategies.push(StrategyHandle { name: name.clone(), running: false });
    }
}

fn emit(value: &Value) {
    let mut stdout = io::stdout();
    let _ = writeln!(stdout, "{value}");
    let _ = stdout.flush();
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
