//! Multi-window quota accounting for the exchange's server-side limits.
//!
//! The exchange enforces several overlapping quotas: request weight per
//! minute, raw request count per five minutes, and order counts per ten
//! seconds and per day. The accountant keeps one bucket-indexed counter map
//! per window, admits or refuses requests locally, and reconciles its
//! counters against the authoritative values the exchange reports in
//! `x-mbx-*` response headers.
//!
//! Admission is conservative by construction: each window check commits its
//! charge before the next window is evaluated, so a refusal part-way through
//! leaves the earlier charges in place. The bookkeeping never under-counts a
//! request the exchange may already have seen.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::buckets;
use crate::clock::ServerClock;
use crate::error::GatewayError;
use crate::metrics;
use crate::request::{fetch_server_time, Transport};

pub const DEFAULT_WEIGHT_PER_MINUTE: u64 = 5_000;
pub const DEFAULT_ORDERS_PER_TEN_SECONDS: u64 = 10;
pub const DEFAULT_ORDERS_PER_DAY: u64 = 150_000;
pub const DEFAULT_RAW_PER_FIVE_MINUTES: u64 = 50_000;

/// Longest single sleep inside [`QuotaAccountant::wait_until_admissible`].
/// Keeps day-window waits cancellable.
const MAX_WAIT_SLICE_MS: i64 = 60_000;

/// Reconciliation deltas at or beyond these thresholds suggest the local
/// clock bucketed the request into the wrong window; a resync is scheduled.
const DRIFT_SUSPECT_WEIGHT_DELTA: i64 = 50;
const DRIFT_SUSPECT_ORDER_DELTA: i64 = 10;

/// Every `x-mbx-*` header the gateway knows how to account for. Anything
/// else is a new quota dimension and refuses to be silently absorbed.
const EXPECTED_MBX_HEADERS: [&str; 6] = [
    "x-mbx-uuid",
    "x-mbx-traceid",
    "x-mbx-used-weight",
    "x-mbx-used-weight-1m",
    "x-mbx-order-count-10s",
    "x-mbx-order-count-1d",
];

/// The four limits the accountant enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub weight_per_minute: u64,
    pub orders_per_ten_seconds: u64,
    pub orders_per_day: u64,
    pub raw_per_five_minutes: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            weight_per_minute: DEFAULT_WEIGHT_PER_MINUTE,
            orders_per_ten_seconds: DEFAULT_ORDERS_PER_TEN_SECONDS,
            orders_per_day: DEFAULT_ORDERS_PER_DAY,
            raw_per_five_minutes: DEFAULT_RAW_PER_FIVE_MINUTES,
        }
    }
}

/// One entry of the exchangeInfo `rateLimits` array.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSpec {
    #[serde(rename = "rateLimitType")]
    pub kind: String,
    pub interval: String,
    #[serde(rename = "intervalNum")]
    pub interval_num: u32,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(rename = "rateLimits", default)]
    rate_limits: Vec<RateLimitSpec>,
}

impl RateLimits {
    /// Parse an exchangeInfo response body. Unknown (kind, window) pairs are
    /// ignored; windows the response does not mention keep their defaults.
    pub fn from_exchange_info(body: &str) -> Result<Self, GatewayError> {
        let info: ExchangeInfo =
            serde_json::from_str(body).map_err(|err| GatewayError::Transport {
                message: format!("malformed exchangeInfo response: {}", err),
            })?;

        let mut limits = Self::default();
        for spec in &info.rate_limits {
            // Accept both the wire words (MINUTE) and single letters (M).
            let unit = spec.interval.chars().next().map(|c| c.to_ascii_uppercase());
            match (spec.kind.as_str(), spec.interval_num, unit) {
                ("REQUEST_WEIGHT", 1, Some('M')) => limits.weight_per_minute = spec.limit,
                ("ORDERS", 10, Some('S')) => limits.orders_per_ten_seconds = spec.limit,
                ("ORDERS", 1, Some('D')) => limits.orders_per_day = spec.limit,
                ("RAW_REQUESTS", 5, Some('M')) => limits.raw_per_five_minutes = spec.limit,
                _ => debug!(kind = %spec.kind, interval = %spec.interval, "ignoring rate limit window"),
            }
        }
        Ok(limits)
    }
}

/// The windows the accountant tracks, in admission-check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    MinuteWeight,
    FiveMinuteRaw,
    TenSecondOrders,
    DayOrders,
}

impl Window {
    pub fn size_ms(self) -> i64 {
        match self {
            Window::MinuteWeight => buckets::MS_PER_MINUTE,
            Window::FiveMinuteRaw => buckets::MS_PER_FIVE_MINUTES,
            Window::TenSecondOrders => buckets::MS_PER_TEN_SECONDS,
            Window::DayOrders => buckets::MS_PER_DAY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Window::MinuteWeight => "minute_weight",
            Window::FiveMinuteRaw => "five_minute_raw",
            Window::TenSecondOrders => "ten_second_orders",
            Window::DayOrders => "day_orders",
        }
    }

    fn bucket(self, now_ms: i64) -> i64 {
        match self {
            Window::MinuteWeight => buckets::minute(now_ms),
            Window::FiveMinuteRaw => buckets::five_minutes(now_ms),
            Window::TenSecondOrders => buckets::ten_seconds(now_ms),
            Window::DayOrders => buckets::day(now_ms),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    minute_weight: HashMap<i64, u64>,
    five_minute_raw: HashMap<i64, u64>,
    ten_second_orders: HashMap<i64, u64>,
    day_orders: HashMap<i64, u64>,
    next_minute_to_clean: i64,
    next_hour_to_clean: i64,
    resync_due: bool,
}

impl Counters {
    fn map(&mut self, window: Window) -> &mut HashMap<i64, u64> {
        match window {
            Window::MinuteWeight => &mut self.minute_weight,
            Window::FiveMinuteRaw => &mut self.five_minute_raw,
            Window::TenSecondOrders => &mut self.ten_second_orders,
            Window::DayOrders => &mut self.day_orders,
        }
    }

    fn value(&self, window: Window, bucket: i64) -> u64 {
        let map = match window {
            Window::MinuteWeight => &self.minute_weight,
            Window::FiveMinuteRaw => &self.five_minute_raw,
            Window::TenSecondOrders => &self.ten_second_orders,
            Window::DayOrders => &self.day_orders,
        };
        map.get(&bucket).copied().unwrap_or(0)
    }
}

/// Keep only the three most recent bucket keys.
fn prune(map: &mut HashMap<i64, u64>) {
    if map.len() <= 3 {
        return;
    }
    let mut keys: Vec<i64> = map.keys().copied().collect();
    keys.sort_unstable_by(|a, b| b.cmp(a));
    let keep: HashSet<i64> = keys.into_iter().take(3).collect();
    map.retain(|k, _| keep.contains(k));
}

/// Tracks all quota windows and answers admission questions. Exclusively
/// owns the window counters and the server clock offset policy. One mutex
/// guards the whole state; every critical section is O(number of windows).
pub struct QuotaAccountant {
    limits: RateLimits,
    clock: Arc<ServerClock>,
    state: Mutex<Counters>,
}

impl QuotaAccountant {
    pub fn new(limits: RateLimits, clock: Arc<ServerClock>) -> Self {
        let now_ms = clock.now_ms();
        let state = Counters {
            next_minute_to_clean: buckets::minute(now_ms) + 1,
            next_hour_to_clean: buckets::hour(now_ms) + 1,
            ..Counters::default()
        };
        Self {
            limits,
            clock,
            state: Mutex::new(state),
        }
    }

    /// Discover limits from the exchange and take a first clock fix. Either
    /// step failing is survivable: defaults apply and the offset stays 0.
    pub async fn initialize(
        transport: &dyn Transport,
        base_url: &Url,
        clock: Arc<ServerClock>,
    ) -> Self {
        let limits = match crate::request::fetch_exchange_limits(transport, base_url).await {
            Ok(limits) => {
                info!(?limits, "exchange rate limits discovered");
                limits
            }
            Err(err) => {
                warn!(%err, "exchangeInfo unavailable, applying default limits");
                RateLimits::default()
            }
        };
        let accountant = Self::new(limits, clock);
        if let Err(err) = accountant.sync_clock(transport, base_url).await {
            warn!(%err, "initial server clock sync failed, keeping zero offset");
        }
        accountant
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    /// Current-bucket value of one window.
    pub fn window_value(&self, window: Window) -> u64 {
        let now_ms = self.clock.now_ms();
        let state = self.state.lock().expect("accountant lock poisoned");
        state.value(window, window.bucket(now_ms))
    }

    /// Admission test: may a request of this weight (and order flag) go out
    /// now? On `true` the cost is charged. On `false` the charges committed
    /// before the failing window remain — see the module docs.
    pub fn can_make(&self, weight: u64, is_order: bool) -> bool {
        self.can_make_at(self.clock.now_ms(), weight, is_order)
    }

    fn can_make_at(&self, now_ms: i64, weight: u64, is_order: bool) -> bool {
        let mut state = self.state.lock().expect("accountant lock poisoned");

        let checks: [(Window, u64, u64, bool); 4] = [
            (Window::MinuteWeight, weight, self.limits.weight_per_minute, true),
            (Window::FiveMinuteRaw, 1, self.limits.raw_per_five_minutes, true),
            (Window::TenSecondOrders, 1, self.limits.orders_per_ten_seconds, is_order),
            (Window::DayOrders, 1, self.limits.orders_per_day, is_order),
        ];

        for (window, charge, limit, active) in checks {
            if !active {
                continue;
            }
            let bucket = window.bucket(now_ms);
            let current = state.value(window, bucket);
            if current + charge > limit {
                metrics::record_admission_rejected(window.label());
                debug!(
                    window = window.label(),
                    current,
                    charge,
                    limit,
                    "admission refused"
                );
                return false;
            }
            state.map(window).insert(bucket, current + charge);
        }

        self.housekeeping(&mut state, now_ms);
        true
    }

    fn housekeeping(&self, state: &mut Counters, now_ms: i64) {
        let minute = buckets::minute(now_ms);
        let hour = buckets::hour(now_ms);
        if minute < state.next_minute_to_clean && hour < state.next_hour_to_clean {
            return;
        }
        for window in [
            Window::MinuteWeight,
            Window::FiveMinuteRaw,
            Window::TenSecondOrders,
            Window::DayOrders,
        ] {
            prune(state.map(window));
        }
        state.next_minute_to_clean = minute + 1;
        state.next_hour_to_clean = hour + 1;
        state.resync_due = true;
        debug!("window counters pruned, clock resync scheduled");
    }

    /// Reconcile local counters against server-reported header values. The
    /// server is authoritative whenever it speaks: a differing value is
    /// warned about and overwritten. A header outside the known set is a
    /// hard error.
    pub fn update_from_headers(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<(), GatewayError> {
        self.reconcile_at(self.clock.now_ms(), headers)
    }

    fn reconcile_at(
        &self,
        now_ms: i64,
        headers: &HashMap<String, String>,
    ) -> Result<(), GatewayError> {
        for (name, value) in headers {
            let lower = name.to_ascii_lowercase();
            if !lower.starts_with("x-mbx-") {
                continue;
            }
            if !EXPECTED_MBX_HEADERS.contains(&lower.as_str()) {
                return Err(GatewayError::UnknownRateHeader { header: lower });
            }
            let (window, drift_threshold) = match lower.as_str() {
                "x-mbx-used-weight-1m" => (Window::MinuteWeight, DRIFT_SUSPECT_WEIGHT_DELTA),
                "x-mbx-order-count-10s" => (Window::TenSecondOrders, DRIFT_SUSPECT_ORDER_DELTA),
                "x-mbx-order-count-1d" => (Window::DayOrders, DRIFT_SUSPECT_ORDER_DELTA),
                _ => continue,
            };
            let Ok(server_value) = value.trim().parse::<u64>() else {
                debug!(header = %lower, value = %value, "unparseable rate header ignored");
                continue;
            };

            let bucket = window.bucket(now_ms);
            let mut state = self.state.lock().expect("accountant lock poisoned");
            let local = state.value(window, bucket);
            if local != server_value {
                let delta = server_value as i64 - local as i64;
                warn!(
                    header = %lower,
                    local,
                    server = server_value,
                    delta,
                    "server rate counter differs, overwriting local"
                );
                metrics::record_reconciliation(window.label());
                state.map(window).insert(bucket, server_value);
                if delta.abs() >= drift_threshold {
                    warn!(header = %lower, delta, "clock drift suspected");
                    state.resync_due = true;
                }
            }
        }
        Ok(())
    }

    /// Which window would refuse a request of this shape right now, without
    /// charging anything.
    fn first_failing_window(&self, now_ms: i64, weight: u64, is_order: bool) -> Option<Window> {
        let state = self.state.lock().expect("accountant lock poisoned");
        let checks: [(Window, u64, u64, bool); 4] = [
            (Window::MinuteWeight, weight, self.limits.weight_per_minute, true),
            (Window::FiveMinuteRaw, 1, self.limits.raw_per_five_minutes, true),
            (Window::TenSecondOrders, 1, self.limits.orders_per_ten_seconds, is_order),
            (Window::DayOrders, 1, self.limits.orders_per_day, is_order),
        ];
        checks
            .into_iter()
            .filter(|(_, _, _, active)| *active)
            .find(|(window, charge, limit, _)| {
                state.value(*window, window.bucket(now_ms)) + charge > *limit
            })
            .map(|(window, _, _, _)| window)
    }

    /// Admit, or wait for the first refusing window's next bucket boundary
    /// (at most one sleep, capped at 60 s) and try once more. A shutdown
    /// signal cancels the wait without committing anything.
    pub async fn wait_until_admissible(
        &self,
        weight: u64,
        is_order: bool,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> bool {
        if self.can_make(weight, is_order) {
            return true;
        }
        let now_ms = self.clock.now_ms();
        let Some(window) = self.first_failing_window(now_ms, weight, is_order) else {
            // The window freed up between the refusal and this look.
            return self.can_make(weight, is_order);
        };
        let wait_ms = buckets::ms_until_next_boundary(now_ms, window.size_ms()).min(MAX_WAIT_SLICE_MS);
        debug!(
            window = window.label(),
            wait_ms, "saturated, waiting for next bucket"
        );
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait_ms as u64)) => {
                self.can_make(weight, is_order)
            }
            _ = shutdown.recv() => {
                debug!("admission wait cancelled");
                false
            }
        }
    }

    /// Refresh the server clock offset via the time endpoint. The call is
    /// charged like any other request (weight 0, one raw count); when the
    /// accountant is saturated the refresh is skipped and the old offset
    /// kept, so a loaded gateway cannot spiral into resync traffic.
    pub async fn sync_clock(
        &self,
        transport: &dyn Transport,
        base_url: &Url,
    ) -> Result<i64, GatewayError> {
        if !self.can_make(0, false) {
            warn!("rate budget saturated, skipping server clock sync");
            return Ok(self.clock.offset_ms());
        }
        let server_ms = fetch_server_time(transport, base_url).await?;
        let offset = self.clock.set_from_server_time(server_ms);
        metrics::record_clock_resync();
        info!(offset_ms = offset, "server clock offset refreshed");
        Ok(offset)
    }

    /// Run a clock sync if housekeeping or reconciliation asked for one.
    /// Failures are logged, not surfaced — the next cycle retries.
    pub async fn maybe_resync(&self, transport: &dyn Transport, base_url: &Url) {
        let due = {
            let mut state = self.state.lock().expect("accountant lock poisoned");
            std::mem::take(&mut state.resync_due)
        };
        if !due {
            return;
        }
        if let Err(err) = self.sync_clock(transport, base_url).await {
            warn!(%err, "opportunistic clock sync failed");
        }
    }

    #[cfg(test)]
    fn bucket_count(&self, window: Window) -> usize {
        let mut state = self.state.lock().unwrap();
        state.map(window).len()
    }

    #[cfg(test)]
    fn resync_due(&self) -> bool {
        self.state.lock().unwrap().resync_due
    }
}
