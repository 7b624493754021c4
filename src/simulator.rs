//! The tick loop: the single writer of simulation state, precedence
//! arbitration via [`crate::state_machine`], and the sole caller into
//! the [`RegisterBank`] and [`EventSender`].
//!
//! Per the "Global mutable simulator singleton" Design Note (`spec.md`
//! §9), there is exactly one [`Simulator`], owned by the binary's
//! `main`, threaded explicitly rather than reached via module statics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::{Clock, VirtualInstant};
use crate::domain::{
    minor_breakdown_duration_sec, BlockPayload, ChangeoverType, Fingerprint, MajorBreakdown,
    MicrostopCode, Schedule, SkuTable,
};
use crate::error::SimResult;
use crate::events::{Actor, BottleResult, Event, EventPayload, EventSender, Hierarchy, RejectReason};
use crate::registers::{line_state_code, starved_blocked_code, *};
use crate::state_machine::{self, LineState, StopEpisode};

/// Fraction of GOOD completions that get a `BottleCompleted` event, per
/// `spec.md` §4.4's "2% sample" rule. Rejects always get one (resolving
/// the corresponding Open Question in `spec.md` §9).
const GOOD_BOTTLE_SAMPLE_RATE: f64 = 0.02;

/// Monotonically non-decreasing production counters. Kept as atomics
/// per `spec.md` §4.6's "Counters (AtomicU32 pair)" rendering even
/// though the tick loop is their only writer, so a future reader (a
/// diagnostics endpoint, a test harness) can observe them without
/// going through the register bank.
#[derive(Debug, Default)]
pub struct Counters {
    good: AtomicU32,
    reject: AtomicU32,
}

impl Counters {
    pub fn good(&self) -> u32 {
        self.good.load(Ordering::Relaxed)
    }

    pub fn reject(&self) -> u32 {
        self.reject.load(Ordering::Relaxed)
    }

    fn increment_good(&self) -> u32 {
        self.good.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn increment_reject(&self) -> u32 {
        self.reject.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A currently-open order, tracked so `OrderCompleted` can report exact
/// deltas against the counters observed at `OrderStarted`.
struct ActiveOrder {
    order_id: String,
    sku_id: String,
    start_ts: VirtualInstant,
    good_at_start: u32,
    reject_at_start: u32,
}

/// A currently-open non-order block (CHANGEOVER/CIP/LUNCH), tracked so
/// its `*Completed`/`*Ended` event can report an exact duration.
struct ActiveBlock {
    kind: NonOrderKind,
    start_ts: VirtualInstant,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NonOrderKind {
    Changeover(ChangeoverType),
    Cip,
    Lunch,
}

/// Bottle-per-minute accounting over the trailing virtual second.
#[derive(Default)]
struct LineSpeedWindow {
    completions_ms: std::collections::VecDeque<u64>,
}

impl LineSpeedWindow {
    fn record(&mut self, now_ms: u64) {
        self.completions_ms.push_back(now_ms);
        while let Some(&front) = self.completions_ms.front() {
            if now_ms.saturating_sub(front) > 1000 {
                self.completions_ms.pop_front();
            } else {
                break;
            }
        }
    }

    fn bpm(&self) -> f32 {
        self.completions_ms.len() as f32 * 60.0
    }
}

/// Owns every piece of live simulation state and the handles to the
/// two other activity roles (register bank, event emitter).
pub struct Simulator {
    clock: Clock,
    registers: Arc<RegisterBank>,
    schedule: Schedule,
    skus: SkuTable,
    events: EventSender,
    hierarchy: Hierarchy,
    sim_id: String,
    rng: StdRng,
    tick_interval: Duration,
    microstop_rate_multiplier: f64,

    state: LineState,
    counters: Counters,

    active_order: Option<ActiveOrder>,
    active_block: Option<ActiveBlock>,
    open_microstop: Option<(MicrostopCode, StopEpisode, VirtualInstant)>,
    open_minor_stop: Option<(String, StopEpisode, VirtualInstant)>,
    active_fault: Option<(MajorBreakdown, StopEpisode, VirtualInstant)>,
    last_bottle_at_ms: Option<u64>,
    speed_window: LineSpeedWindow,
    fired_breakdowns: std::collections::HashSet<u64>,
    ulid_generator: ulid::Generator,
}

impl Simulator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Clock,
        registers: Arc<RegisterBank>,
        schedule: Schedule,
        skus: SkuTable,
        events: EventSender,
        hierarchy: Hierarchy,
        sim_id: String,
        rng_seed: u64,
        tick_interval: Duration,
        microstop_rate_multiplier: f64,
    ) -> Self {
        registers.set_u16(ADDR_LINE_STATE, line_state_code::IDLE);
        registers.set_u16(ADDR_ORDER_INDEX, 0xFFFF);
        registers.set_u16(ADDR_SKU_INDEX, 0xFFFF);
        registers.set_u16(ADDR_SIM_SPEED_X10, (clock.speed_factor() * 10.0).round() as u16);

        Self {
            clock,
            registers,
            schedule,
            skus,
            events,
            hierarchy,
            sim_id,
            rng: StdRng::seed_from_u64(rng_seed),
            tick_interval,
            microstop_rate_multiplier,
            state: LineState::Idle,
            counters: Counters::default(),
            active_order: None,
            active_block: None,
            open_microstop: None,
            open_minor_stop: None,
            active_fault: None,
            last_bottle_at_ms: None,
            speed_window: LineSpeedWindow::default(),
            fired_breakdowns: std::collections::HashSet::new(),
            ulid_generator: ulid::Generator::new(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    /// Run one tick of the simulation, per `spec.md` §4.6's seven steps.
    pub async fn tick(&mut self) -> SimResult<()> {
        let now = self.clock.now();

        self.resolve_schedule(now).await?;
        self.expire_episodes(now).await?;
        self.sample_new_episodes(now).await?;
        self.run_station_cycles(now).await?;
        self.arbitrate_state().await?;
        self.update_line_speed_register();

        Ok(())
    }

    /// Sleep until the next tick boundary, in virtual time.
    pub async fn sleep_until_next_tick(&self) {
        self.clock.sleep(self.tick_interval).await;
    }

    // Step 2: resolve the active ScheduledBlock and ORDER, opening and
    // closing them as their windows start/end.
    async fn resolve_schedule(&mut self, now: VirtualInstant) -> SimResult<()> {
        let t_ms = now.as_millis();

        if let Some(order) = self.schedule.active_order(t_ms) {
            let already_active = self
                .active_order
                .as_ref()
                .is_some_and(|a| a.order_id == order.order_id);
            if !already_active {
                let sku_index = self.skus.index_of(&order.sku_id).unwrap_or(0xFFFF);
                self.registers.set_u16(ADDR_ORDER_INDEX, 0);
                self.registers.set_u16(ADDR_SKU_INDEX, sku_index);
                self.active_order = Some(ActiveOrder {
                    order_id: order.order_id.clone(),
                    sku_id: order.sku_id.clone(),
                    start_ts: now,
                    good_at_start: self.counters.good(),
                    reject_at_start: self.counters.reject(),
                });
                self.emit(
                    Some(order.order_id.clone()),
                    Some(order.sku_id.clone()),
                    EventPayload::OrderStarted {
                        planned_qty: order.planned_qty,
                        planned_start_ts: chrono::Utc::now(),
                        planned_end_ts: chrono::Utc::now(),
                    },
                )
                .await?;
            }
        } else if let Some(active) = self.active_order.take() {
            self.close_order(now, active).await?;
        }

        let block = self.schedule.active_block(t_ms);
        let desired_kind = block.and_then(|b| match &b.payload {
            BlockPayload::Changeover { changeover_type } => {
                Some(NonOrderKind::Changeover(*changeover_type))
            }
            BlockPayload::Cip => Some(NonOrderKind::Cip),
            BlockPayload::Lunch => Some(NonOrderKind::Lunch),
            _ => None,
        });

        let current_kind = self.active_block.as_ref().map(|b| b.kind);
        if current_kind != desired_kind {
            if let Some(active) = self.active_block.take() {
                self.close_non_order_block(now, active).await?;
            }
            if let Some(kind) = desired_kind {
                self.open_non_order_block(now, kind).await?;
            }
        }

        if let Some((start_ms, code)) = self.schedule.breakdown_at(t_ms).map(|(s, c)| (s, c.to_string())) {
            if self.fired_breakdowns.insert(start_ms) {
                self.trigger_breakdown(now, &code).await?;
            }
        }

        Ok(())
    }

    async fn close_order(&mut self, now: VirtualInstant, order: ActiveOrder) -> SimResult<()> {
        let good_delta = self.counters.good() - order.good_at_start;
        let reject_delta = self.counters.reject() - order.reject_at_start;
        let total = good_delta + reject_delta;
        let yield_ = if total == 0 {
            1.0
        } else {
            good_delta as f64 / total as f64
        };
        let duration_ms = now.saturating_duration_since(order.start_ts).as_millis() as u64;

        self.registers.set_u16(ADDR_ORDER_INDEX, 0xFFFF);
        self.registers.set_u16(ADDR_SKU_INDEX, 0xFFFF);

        self.emit(
            Some(order.order_id.clone()),
            Some(order.sku_id.clone()),
            EventPayload::OrderCompleted {
                good_count_delta: good_delta,
                reject_count_delta: reject_delta,
                duration_ms,
                yield_,
            },
        )
        .await
    }

    async fn open_non_order_block(
        &mut self,
        now: VirtualInstant,
        kind: NonOrderKind,
    ) -> SimResult<()> {
        match kind {
            NonOrderKind::Changeover(changeover_type) => {
                self.registers.set_bool(ADDR_CHANGEOVER_ACTIVE, true);
                self.emit(None, None, EventPayload::ChangeoverStarted { changeover_type })
                    .await?;
            }
            NonOrderKind::Cip => {
                self.registers.set_bool(ADDR_CIP_ACTIVE, true);
                self.emit(None, None, EventPayload::CipStarted {}).await?;
            }
            NonOrderKind::Lunch => {}
        }
        self.active_block = Some(ActiveBlock { kind, start_ts: now });
        Ok(())
    }

    async fn close_non_order_block(
        &mut self,
        now: VirtualInstant,
        block: ActiveBlock,
    ) -> SimResult<()> {
        let duration_ms = now.saturating_duration_since(block.start_ts).as_millis() as u64;
        match block.kind {
            NonOrderKind::Changeover(changeover_type) => {
                self.registers.set_bool(ADDR_CHANGEOVER_ACTIVE, false);
                self.emit(None, None, EventPayload::ChangeoverCompleted { changeover_type })
                    .await?;
            }
            NonOrderKind::Cip => {
                self.registers.set_bool(ADDR_CIP_ACTIVE, false);
                self.emit(None, None, EventPayload::CipEnded { duration_ms }).await?;
            }
            NonOrderKind::Lunch => {}
        }
        Ok(())
    }

    async fn trigger_breakdown(&mut self, now: VirtualInstant, code: &str) -> SimResult<()> {
        if let Some(major) = MajorBreakdown::from_code(code) {
            self.force_close_subordinate_episodes(now).await?;
            let duration_sec = major.sample_duration_sec(&mut self.rng);
            let end_ts = VirtualInstant(now.as_millis() + duration_sec * 1000);
            self.registers.set_u16(ADDR_FAULT_CODE, major.fault_code());
            self.active_fault = Some((major, StopEpisode::open(major.as_str(), now), end_ts));
            self.emit(
                None,
                None,
                EventPayload::FaultRaised {
                    fault_code: major.fault_code(),
                    severity: "MAJOR",
                    station: breakdown_station(major),
                },
            )
            .await
        } else {
            let duration_sec = minor_breakdown_duration_sec(&mut self.rng);
            let end_ts = VirtualInstant(now.as_millis() + duration_sec * 1000);
            self.registers.set_u16(ADDR_STOP_CODE, minor_stop_register_code(code));
            self.open_minor_stop = Some((code.to_string(), StopEpisode::open(code, now), end_ts));
            self.emit(
                None,
                None,
                EventPayload::StopStarted {
                    stop_code: code.to_string(),
                    reason_id: None,
                    reason_text: None,
                },
            )
            .await
        }
    }

    /// FAULT overrides any in-progress microstop or generic stop: close
    /// the subordinate episode with its current duration first, per
    /// `spec.md` §4.5.
    async fn force_close_subordinate_episodes(&mut self, now: VirtualInstant) -> SimResult<()> {
        if let Some((code, mut episode, _)) = self.open_microstop.take() {
            let duration_ms = episode.close(now);
            let fingerprint = self.revert_microstop_signals(code);
            self.emit(
                None,
                None,
                EventPayload::MicrostopEnded {
                    stop_code: code.as_str(),
                    fingerprint,
                    duration_ms,
                },
            )
            .await?;
        }
        if let Some((code, mut episode, _)) = self.open_minor_stop.take() {
            let duration_ms = episode.close(now);
            self.registers.set_u16(ADDR_STOP_CODE, 0);
            self.emit(
                None,
                None,
                EventPayload::StopEnded {
                    stop_code: code,
                    reason_id: None,
                    reason_text: None,
                    duration_ms,
                },
            )
            .await?;
        }
        Ok(())
    }

    // Episodes that end on their own timer: microstops, minor stops,
    // and major breakdowns.
    async fn expire_episodes(&mut self, now: VirtualInstant) -> SimResult<()> {
        if let Some((code, end_ts)) = self.open_microstop.as_ref().map(|(c, _, e)| (*c, *e)) {
            if now >= end_ts {
                let (_, mut episode, _) = self.open_microstop.take().unwrap();
                let duration_ms = episode.close(now);
                let fingerprint = self.revert_microstop_signals(code);
                self.emit(
                    None,
                    None,
                    EventPayload::MicrostopEnded {
                        stop_code: code.as_str(),
                        fingerprint,
                        duration_ms,
                    },
                )
                .await?;
            }
        }
        if let Some(end_ts) = self.open_minor_stop.as_ref().map(|(_, _, e)| *e) {
            if now >= end_ts {
                let (code, mut episode, _) = self.open_minor_stop.take().unwrap();
                let duration_ms = episode.close(now);
                self.registers.set_u16(ADDR_STOP_CODE, 0);
                self.emit(
                    None,
                    None,
                    EventPayload::StopEnded {
                        stop_code: code,
                        reason_id: None,
                        reason_text: None,
                        duration_ms,
                    },
                )
                .await?;
            }
        }
        if let Some(end_ts) = self.active_fault.as_ref().map(|(_, _, e)| *e) {
            if now >= end_ts {
                let (major, mut episode, _) = self.active_fault.take().unwrap();
                let _duration_ms = episode.close(now);
                self.registers.set_u16(ADDR_FAULT_CODE, 0);
                self.emit(
                    None,
                    None,
                    EventPayload::FaultCleared {
                        fault_code: major.fault_code(),
                        severity: "MAJOR",
                        station: breakdown_station(major),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    // Step 3: sample new microstop triggers for this tick.
    async fn sample_new_episodes(&mut self, now: VirtualInstant) -> SimResult<()> {
        let order_running = self.active_order.is_some()
            && self.active_fault.is_none()
            && self.open_minor_stop.is_none()
            && self.active_block.is_none();
        if !order_running || self.open_microstop.is_some() {
            return Ok(());
        }

        for code in MicrostopCode::ALL {
            let p = code.tick_trigger_probability() * self.microstop_rate_multiplier;
            if self.rng.gen_bool(p.clamp(0.0, 1.0)) {
                let fingerprint = self.apply_microstop_signals(code);
                let duration_sec = code.sample_duration_sec(&mut self.rng);
                let end_ts = VirtualInstant(now.as_millis() + duration_sec * 1000);
                self.registers.set_u16(ADDR_STOP_CODE, microstop_register_code(code));
                self.open_microstop = Some((code, StopEpisode::open(code.as_str(), now), end_ts));
                self.emit(
                    None,
                    None,
                    EventPayload::MicrostopStarted {
                        stop_code: code.as_str(),
                        fingerprint,
                    },
                )
                .await?;
                break;
            }
        }
        Ok(())
    }

    /// Write the forced signals for `code` per `spec.md` §4.7's table
    /// and return the fingerprint captured at entry.
    fn apply_microstop_signals(&mut self, code: MicrostopCode) -> Fingerprint {
        let sku = self.current_sku();
        let nominal_bpm = sku.map(|s| s.nominal_bpm()).unwrap_or(60.0);
        match code {
            MicrostopCode::Ms01 => {
                self.registers.set_bool(ADDR_BOTTLE_PRESENCE, false);
                let rate = (nominal_bpm * 10.0 * 0.5) as u16;
                self.registers.set_u16(ADDR_INFEED_RATE_BPM_X10, rate);
                Fingerprint::Ms01 {
                    bottle_presence: false,
                    infeed_rate_bpm_x10: rate,
                }
            }
            MicrostopCode::Ms02 => {
                self.registers.set_bool(ADDR_SCALE_STABLE, false);
                let nominal_fill_ms = self.registers.get_f32(ADDR_FILL_TIME_MS);
                let mult = self.rng.gen_range(1.15..1.4);
                let delta = nominal_fill_ms * (mult - 1.0);
                self.registers.set_f32(ADDR_FILL_TIME_MS, nominal_fill_ms + delta);
                self.registers.set_f32(ADDR_FILL_TIME_DELTA_MS, delta);
                Fingerprint::Ms02 {
                    scale_stable: false,
                    fill_time_delta_ms: delta,
                }
            }
            MicrostopCode::Ms03 => {
                self.registers.set_bool(ADDR_DRIP_SENSOR, true);
                let delay = self.rng.gen_range(50..300);
                self.registers.set_u16(ADDR_POST_FILL_DELAY_MS, delay);
                Fingerprint::Ms03 {
                    drip_sensor: true,
                    post_fill_delay_ms: delay,
                }
            }
            MicrostopCode::Ms04 => {
                self.registers.set_bool(ADDR_CAP_FEED_OK, false);
                self.registers.set_bool(ADDR_TORQUE_SAMPLE_MISSING, true);
                Fingerprint::Ms04 { cap_feed_ok: false }
            }
            MicrostopCode::Ms05 => {
                self.registers.set_bool(ADDR_TORQUE_IN_SPEC, false);
                let toggles = self.rng.gen_range(1..5);
                self.registers.set_u16(ADDR_TORQUE_TOGGLE_COUNT, toggles);
                Fingerprint::Ms05 {
                    torque_in_spec_toggle_count: toggles,
                }
            }
            MicrostopCode::Ms06 => {
                self.registers.set_bool(ADDR_REZERO_ACTIVE, true);
                Fingerprint::Ms06 { rezero_active: true }
            }
            MicrostopCode::Ms07 => {
                self.registers.set_bool(ADDR_LABEL_SENSOR_OK, false);
                let toggles = self.rng.gen_range(1..6);
                self.registers.set_u16(ADDR_LABEL_TOGGLE_COUNT, toggles);
                Fingerprint::Ms07 {
                    label_sensor_ok_toggles: toggles,
                }
            }
            MicrostopCode::Ms08 => {
                self.registers.set_bool(ADDR_BARCODE_READ_OK, false);
                let rescans = self.rng.gen_range(1..4);
                self.registers.set_u16(ADDR_RESCAN_COUNT, rescans);
                Fingerprint::Ms08 { rescan_count: rescans }
            }
            MicrostopCode::Ms09 => {
                let nominal = self.registers.get_f32(ADDR_PUSHER_CYCLE_MS).max(1.0);
                let cycle = nominal * self.rng.gen_range(1.5..2.0);
                self.registers.set_f32(ADDR_PUSHER_CYCLE_MS, cycle);
                Fingerprint::Ms09 { pusher_cycle_ms: cycle }
            }
            MicrostopCode::Ms10 => {
                self.registers.set_bool(ADDR_OUTFEED_FULL, true);
                let dip = self.rng.gen_range(100..400);
                self.registers.set_u16(ADDR_LINE_SPEED_DIP_PCT_X10, dip);
                Fingerprint::Ms10 {
                    outfeed_full: true,
                    line_speed_dip_pct_x10: dip,
                }
            }
        }
    }

    /// Revert the signals `apply_microstop_signals` forced, and build
    /// the fingerprint to attach to `MicrostopEnded`.
    fn revert_microstop_signals(&mut self, code: MicrostopCode) -> Fingerprint {
        match code {
            MicrostopCode::Ms01 => {
                self.registers.set_bool(ADDR_BOTTLE_PRESENCE, true);
                let value = self.registers.get_u16(ADDR_INFEED_RATE_BPM_X10);
                self.registers.set_u16(ADDR_INFEED_RATE_BPM_X10, value * 2);
                Fingerprint::Ms01 {
                    bottle_presence: true,
                    infeed_rate_bpm_x10: value,
                }
            }
            MicrostopCode::Ms02 => {
                self.registers.set_bool(ADDR_SCALE_STABLE, true);
                let delta = self.registers.get_f32(ADDR_FILL_TIME_DELTA_MS);
                Fingerprint::Ms02 {
                    scale_stable: true,
                    fill_time_delta_ms: delta,
                }
            }
            MicrostopCode::Ms03 => {
                self.registers.set_bool(ADDR_DRIP_SENSOR, false);
                let delay = self.registers.get_u16(ADDR_POST_FILL_DELAY_MS);
                Fingerprint::Ms03 {
                    drip_sensor: false,
                    post_fill_delay_ms: delay,
                }
            }
            MicrostopCode::Ms04 => {
                self.registers.set_bool(ADDR_CAP_FEED_OK, true);
                self.registers.set_bool(ADDR_TORQUE_SAMPLE_MISSING, false);
                Fingerprint::Ms04 { cap_feed_ok: true }
            }
            MicrostopCode::Ms05 => {
                self.registers.set_bool(ADDR_TORQUE_IN_SPEC, true);
                let toggles = self.registers.get_u16(ADDR_TORQUE_TOGGLE_COUNT);
                Fingerprint::Ms05 {
                    torque_in_spec_toggle_count: toggles,
                }
            }
            MicrostopCode::Ms06 => {
                self.registers.set_bool(ADDR_REZERO_ACTIVE, false);
                Fingerprint::Ms06 { rezero_active: false }
            }
            MicrostopCode::Ms07 => {
                self.registers.set_bool(ADDR_LABEL_SENSOR_OK, true);
                let toggles = self.registers.get_u16(ADDR_LABEL_TOGGLE_COUNT);
                Fingerprint::Ms07 {
                    label_sensor_ok_toggles: toggles,
                }
            }
            MicrostopCode::Ms08 => {
                self.registers.set_bool(ADDR_BARCODE_READ_OK, true);
                let rescans = self.registers.get_u16(ADDR_RESCAN_COUNT);
                Fingerprint::Ms08 { rescan_count: rescans }
            }
            MicrostopCode::Ms09 => {
                let cycle = self.registers.get_f32(ADDR_PUSHER_CYCLE_MS) / 1.75;
                self.registers.set_f32(ADDR_PUSHER_CYCLE_MS, cycle);
                Fingerprint::Ms09 { pusher_cycle_ms: cycle }
            }
            MicrostopCode::Ms10 => {
                self.registers.set_bool(ADDR_OUTFEED_FULL, false);
                let dip = self.registers.get_u16(ADDR_LINE_SPEED_DIP_PCT_X10);
                self.registers.set_u16(ADDR_LINE_SPEED_DIP_PCT_X10, 0);
                Fingerprint::Ms10 {
                    outfeed_full: false,
                    line_speed_dip_pct_x10: dip,
                }
            }
        }
    }

    fn current_sku(&self) -> Option<&crate::domain::Sku> {
        self.active_order
            .as_ref()
            .and_then(|order| self.skus.get(&order.sku_id))
    }

    // Step 4: per-station cycle logic and bottle completion.
    async fn run_station_cycles(&mut self, now: VirtualInstant) -> SimResult<()> {
        let Some(sku) = self.current_sku().cloned() else {
            return Ok(());
        };
        if self.open_minor_stop.is_some() || self.active_fault.is_some() {
            return Ok(());
        }

        let fill_stabilising = self.open_microstop.as_ref().is_some_and(|(c, _, _)| *c == MicrostopCode::Ms02);
        if !fill_stabilising {
            let noise = self.rng.gen_range(-0.005..0.005);
            self.registers
                .set_f32(ADDR_ACTUAL_WEIGHT_G, (sku.fill_target_g * (1.0 + noise)) as f32);
            self.registers.set_bool(ADDR_SCALE_STABLE, true);

            let fill_time_ms = (sku.volume_ml / 120.0) * 1000.0 * (1.0 + self.rng.gen_range(0.02..0.05));
            self.registers.set_f32(ADDR_FILL_TIME_MS, fill_time_ms as f32);
        }

        let torque_dipping = self.open_microstop.as_ref().is_some_and(|(c, _, _)| *c == MicrostopCode::Ms05);
        if !torque_dipping {
            let noise = self.rng.gen_range(-0.01..0.01);
            self.registers
                .set_f32(ADDR_TORQUE_ACTUAL_NCM, (sku.torque_target_ncm * (1.0 + noise)) as f32);
            self.registers.set_bool(ADDR_TORQUE_IN_SPEC, true);
        }

        let order_running = self.state == LineState::Running;
        if order_running {
            self.maybe_complete_bottle(now, &sku).await?;
        }
        Ok(())
    }

    async fn maybe_complete_bottle(
        &mut self,
        now: VirtualInstant,
        sku: &crate::domain::Sku,
    ) -> SimResult<()> {
        let cycle_ms = (60_000.0 / sku.nominal_bpm()) as u64;
        let due = self
            .last_bottle_at_ms
            .is_none_or(|last| now.as_millis().saturating_sub(last) >= cycle_ms);
        if !due {
            return Ok(());
        }
        self.last_bottle_at_ms = Some(now.as_millis());
        self.speed_window.record(now.as_millis());

        let is_reject = self.rng.gen_bool(sku.reject_probability.clamp(0.0, 1.0));
        let (order_id, sku_id) = self
            .active_order
            .as_ref()
            .map(|o| (o.order_id.clone(), o.sku_id.clone()))
            .unzip();

        if is_reject {
            self.counters.increment_reject();
            let reason = self.sample_reject_reason(sku);
            self.registers.set_u16(ADDR_REJECT_REASON, reject_reason_register_code(reason));
            self.registers.set_u32(ADDR_REJECT_COUNT, self.counters.reject());
            self.emit(
                order_id,
                sku_id,
                EventPayload::BottleCompleted {
                    result: BottleResult::Reject,
                    station: "CHECKWEIGHER",
                    reject_reason: Some(reason),
                    weight: Some(self.registers.get_f32(ADDR_ACTUAL_WEIGHT_G) as f64),
                    torque: Some(self.registers.get_f32(ADDR_TORQUE_ACTUAL_NCM) as f64),
                },
            )
            .await?;
        } else {
            self.counters.increment_good();
            self.registers.set_u32(ADDR_GOOD_COUNT, self.counters.good());
            if self.rng.gen_bool(GOOD_BOTTLE_SAMPLE_RATE) {
                self.emit(
                    order_id,
                    sku_id,
                    EventPayload::BottleCompleted {
                        result: BottleResult::Good,
                        station: "OUTFEED",
                        reject_reason: None,
                        weight: Some(self.registers.get_f32(ADDR_ACTUAL_WEIGHT_G) as f64),
                        torque: Some(self.registers.get_f32(ADDR_TORQUE_ACTUAL_NCM) as f64),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    fn sample_reject_reason(&mut self, sku: &crate::domain::Sku) -> RejectReason {
        if sku.hazard_required && self.rng.gen_bool(0.1) {
            return RejectReason::Hazard;
        }
        match self.rng.gen_range(0..4) {
            0 => RejectReason::Weight,
            1 => RejectReason::Torque,
            2 => RejectReason::Barcode,
            _ => RejectReason::Label,
        }
    }

    // Step 5: evaluate triggers and apply the arbitrated transition.
    //
    // The paired lifecycle event (`*Started`/`*Ended`/`FaultRaised`) for
    // whatever triggered this transition was already emitted in an
    // earlier tick step (`sample_new_episodes`, `expire_episodes`,
    // `trigger_breakdown`), so `StateChanged` always follows it. That
    // fixed order is the one spec.md's ordering ambiguity (per-transition
    // ordering must be consistent) resolves to here.
    async fn arbitrate_state(&mut self) -> SimResult<()> {
        let mut candidates = vec![LineState::Idle];
        if self.active_fault.is_some() {
            candidates.push(LineState::Fault);
        }
        if matches!(self.active_block.as_ref().map(|b| b.kind), Some(NonOrderKind::Cip)) {
            candidates.push(LineState::Cip);
        }
        if matches!(
            self.active_block.as_ref().map(|b| b.kind),
            Some(NonOrderKind::Changeover(_))
        ) {
            candidates.push(LineState::Changeover);
        }
        if matches!(self.active_block.as_ref().map(|b| b.kind), Some(NonOrderKind::Lunch))
            || self.open_minor_stop.is_some()
        {
            candidates.push(LineState::Stopped);
        }
        if self.open_microstop.is_some() {
            candidates.push(LineState::Microstop);
        }
        if self.active_order.is_some() && self.active_block.is_none() {
            candidates.push(LineState::Running);
        }

        let Some(target) = state_machine::select(&candidates, self.state) else {
            return Ok(());
        };

        let from = self.state;
        self.state = target;
        self.registers.set_u16(ADDR_LINE_STATE, target.register_code());
        self.registers.set_u16(
            ADDR_STARVED_OR_BLOCKED,
            match target {
                LineState::Starved => starved_blocked_code::STARVED,
                LineState::Blocked => starved_blocked_code::BLOCKED,
                _ => starved_blocked_code::NONE,
            },
        );

        let stop_code = match target {
            LineState::Microstop => self.open_microstop.as_ref().map(|(c, _, _)| c.as_str().to_string()),
            LineState::Stopped => self.open_minor_stop.as_ref().map(|(c, _, _)| c.clone()),
            _ => None,
        };
        let fault_code = self.active_fault.as_ref().map(|(m, _, _)| m.fault_code());

        self.emit(
            None,
            None,
            EventPayload::StateChanged {
                from_state: line_state_label(from),
                to_state: line_state_label(target),
                stop_code,
                fault_code,
                reason_id: None,
                duration_ms: None,
                fingerprint: None,
            },
        )
        .await?;

        Ok(())
    }

    // Step 6: line speed register, 0 when not RUNNING.
    fn update_line_speed_register(&mut self) {
        let bpm = if self.state == LineState::Running {
            self.speed_window.bpm()
        } else {
            0.0
        };
        self.registers.set_f32(ADDR_LINE_SPEED_BPM, bpm);
    }

    /// Run to end-of-tick on shutdown: if the line is not already IDLE,
    /// force a terminal `StateChanged -> IDLE`, per `spec.md` §5's
    /// shutdown sequence. Does not wait for the event flusher to drain;
    /// the caller does that separately by dropping every [`EventSender`]
    /// and awaiting the flusher's join handle.
    pub async fn shutdown(&mut self) -> SimResult<()> {
        if self.state == LineState::Idle {
            return Ok(());
        }
        let from = self.state;
        self.state = LineState::Idle;
        self.registers.set_u16(ADDR_LINE_STATE, line_state_code::IDLE);
        self.emit(
            None,
            None,
            EventPayload::StateChanged {
                from_state: line_state_label(from),
                to_state: line_state_label(LineState::Idle),
                stop_code: None,
                fault_code: None,
                reason_id: None,
                duration_ms: None,
                fingerprint: None,
            },
        )
        .await
    }

    async fn emit(
        &mut self,
        order_id: Option<String>,
        sku: Option<String>,
        payload: EventPayload,
    ) -> SimResult<()> {
        // `Generator` guarantees each id is strictly greater than the
        // last even within the same millisecond, per `spec.md`'s
        // "eventId ULIDs are strictly increasing" event-ordering
        // contract; plain `Ulid::new()` fills its random component
        // independently per call and does not.
        let event_id = self
            .ulid_generator
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());
        let event = Event::new(
            event_id,
            chrono::Utc::now(),
            self.hierarchy.clone(),
            order_id,
            sku,
            Actor::system(self.sim_id.clone()),
            payload,
        );
        self.events.send(event).await
    }
}

fn breakdown_station(major: MajorBreakdown) -> &'static str {
    match major {
        MajorBreakdown::BdM1 => "FILLER",
        MajorBreakdown::BdM2 => "CAPPER",
        MajorBreakdown::BdM3 => "CHECKWEIGHER",
    }
}

fn line_state_label(state: LineState) -> &'static str {
    match state {
        LineState::Idle => "IDLE",
        LineState::Running => "RUNNING",
        LineState::Microstop => "MICROSTOP",
        LineState::Stopped => "STOPPED",
        LineState::Fault => "FAULT",
        LineState::Changeover => "CHANGEOVER",
        LineState::Cip => "CIP",
        LineState::Starved => "STARVED",
        LineState::Blocked => "BLOCKED",
    }
}

/// `stop_code` register encoding per `spec.md` §6: 1-10 = MS01-MS10.
fn microstop_register_code(code: MicrostopCode) -> u16 {
    MicrostopCode::ALL.iter().position(|&c| c == code).unwrap() as u16 + 1
}

/// `stop_code` register encoding per `spec.md` §6: 11-20 = ST01-ST10.
fn minor_stop_register_code(code: &str) -> u16 {
    crate::domain::breakdowns::MINOR_BREAKDOWN_CODES
        .iter()
        .position(|&c| c == code)
        .map(|i| i as u16 + 11)
        .unwrap_or(11)
}

/// `reject_reason` register encoding per `spec.md` §6.
fn reject_reason_register_code(reason: RejectReason) -> u16 {
    match reason {
        RejectReason::Weight => 1,
        RejectReason::Torque => 2,
        RejectReason::Barcode => 3,
        RejectReason::Label => 4,
        RejectReason::Hazard => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, ScheduledBlock, Sku};
    use std::time::Instant;

    fn hierarchy() -> Hierarchy {
        Hierarchy {
            enterprise: "ACME".to_string(),
            site: "SITE1".to_string(),
            area: "BOTTLING".to_string(),
            line: "LINE1".to_string(),
        }
    }

    fn lemon_500() -> Sku {
        Sku {
            id: "LEM-500-IE".to_string(),
            liquid_id: "LEMONADE".to_string(),
            volume_ml: 500.0,
            hazard_required: false,
            fill_target_g: 505.0,
            torque_target_ncm: 12.0,
            reject_probability: 0.0,
        }
    }

    struct TestEnv {
        sim: Simulator,
        log_path: std::path::PathBuf,
        flusher_handle: tokio::task::JoinHandle<SimResult<()>>,
    }

    impl TestEnv {
        async fn events(self) -> Vec<serde_json::Value> {
            drop(self.sim);
            self.flusher_handle.await.unwrap().unwrap();
            let contents = tokio::fs::read_to_string(&self.log_path).await.unwrap();
            let events = contents
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
            let _ = tokio::fs::remove_file(&self.log_path).await;
            events
        }
    }

    async fn fresh_simulator(schedule: Schedule) -> TestEnv {
        let mut log_path = std::env::temp_dir();
        log_path.push(format!("bottling_sim_simulator_test_{}.jsonl", ulid::Ulid::new()));
        let (sender, flusher) = crate::events::EventFlusher::open(&log_path).await.unwrap();
        let flusher_handle = flusher.spawn();

        let clock = Clock::with_origin(Instant::now(), 0, 1.0);
        let registers = Arc::new(RegisterBank::new());
        let skus = SkuTable::new(vec![lemon_500()]);
        let sim = Simulator::new(
            clock,
            registers,
            schedule,
            skus,
            sender,
            hierarchy(),
            "sim-test".to_string(),
            42,
            Duration::from_millis(100),
            0.0,
        );
        TestEnv {
            sim,
            log_path,
            flusher_handle,
        }
    }

    #[tokio::test]
    async fn idle_with_no_schedule_stays_idle() {
        let mut env = fresh_simulator(Schedule::default()).await;
        env.sim.tick().await.unwrap();
        assert_eq!(env.sim.state(), LineState::Idle);
        assert_eq!(env.sim.counters().good(), 0);
    }

    #[tokio::test]
    async fn order_start_transitions_to_running_and_emits_events() {
        let block = ScheduledBlock {
            start_ms: 0,
            end_ms: 60_000,
            payload: BlockPayload::Order(Order {
                order_id: "ORD-1".to_string(),
                sku_id: "LEM-500-IE".to_string(),
                planned_start_ms: 0,
                planned_end_ms: 60_000,
                planned_qty: 60,
            }),
        };
        let schedule = Schedule::new(vec![block]).unwrap();
        let mut env = fresh_simulator(schedule).await;

        env.sim.tick().await.unwrap();
        assert_eq!(env.sim.state(), LineState::Running);

        let events = env.events().await;
        let saw_order_started = events
            .iter()
            .any(|e| matches!(e["eventType"], serde_json::Value::String(ref s) if s == "OrderStarted"));
        let saw_state_changed = events.iter().any(|e| {
            e["eventType"] == "StateChanged" && e["toState"] == "RUNNING"
        });
        assert!(saw_order_started);
        assert!(saw_state_changed);
    }

    #[test]
    fn microstop_register_codes_are_1_through_10() {
        assert_eq!(microstop_register_code(MicrostopCode::Ms01), 1);
        assert_eq!(microstop_register_code(MicrostopCode::Ms10), 10);
    }

    #[test]
    fn minor_stop_register_codes_are_11_through_20() {
        assert_eq!(minor_stop_register_code("ST01"), 11);
        assert_eq!(minor_stop_register_code("ST10"), 20);
    }
}
