//! Instant-fill exchange adapter used as the engine's default venue when no
//! real venue connector is configured. Modeled on the teacher's
//! `SimulatedExecutor`: no network I/O, fills happen synchronously at the
//! requested price, counters track volume for observability.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use veloz_core::error::AdapterError;
use veloz_core::model::{ExecutionReport, OrderRequest, OrderStatus};
use veloz_core::router::ExchangeAdapter;

pub struct SimulatedAdapter {
    name: String,
    connected: AtomicBool,
    total_orders: AtomicU64,
    total_fills: AtomicU64,
}

impl SimulatedAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            total_orders: AtomicU64::new(0),
            total_fills: AtomicU64::new(0),
        }
    }

    pub fn total_orders(&self) -> u64 {
        self.total_orders.load(Ordering::Relaxed)
    }

    pub fn total_fills(&self) -> u64 {
        self.total_fills.load(Ordering::Relaxed)
    }
}

impl ExchangeAdapter for SimulatedAdapter {
    fn place_order(&self, request: &OrderRequest) -> Result<ExecutionReport, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::AdapterDisconnected { venue: self.name.clone() });
        }
        self.total_orders.fetch_add(1, Ordering::Relaxed);
        self.total_fills.fetch_add(1, Ordering::Relaxed);

        Ok(ExecutionReport {
            client_order_id: request.client_order_id.clone(),
            venue_order_id: Some(format!("sim-{}", self.total_orders.load(Ordering::Relaxed))),
            status: OrderStatus::Filled,
            last_fill_qty: Some(request.qty),
            last_fill_price: Some(request.price.unwrap_or(0.0)),
            reason: None,
        })
    }

    fn cancel_order(&self, client_order_id: &str) -> Result<ExecutionReport, AdapterError> {
        Ok(ExecutionReport {
            client_order_id: client_order_id.to_string(),
            venue_order_id: None,
            status: OrderStatus::Canceled,
            last_fill_qty: None,
            last_fill_price: None,
            reason: None,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn connect(&self) -> Result<(), AdapterError> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "sim-1.0"
    }
}
