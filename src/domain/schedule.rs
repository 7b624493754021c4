//! The time-ordered production schedule: orders, changeovers, CIP,
//! lunch breaks, and planned breakdowns.
//!
//! In production the schedule is populated by the week-schedule loader
//! (an external collaborator, out of scope per `spec.md` §1); this
//! module defines the in-memory shape, load-time validation, and the
//! lookup the tick loop performs every tick.

use serde::Deserialize;

use crate::error::{SimError, SimResult};

/// An order to run a SKU for a planned quantity within a time window.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub sku_id: String,
    pub planned_start_ms: u64,
    pub planned_end_ms: u64,
    pub planned_qty: u32,
}

/// The kind of a scheduled block, and any kind-specific payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum BlockPayload {
    Order(Order),
    Changeover { changeover_type: ChangeoverType },
    Cip,
    Lunch,
    Breakdown { code: String },
}

/// The three changeover flavors enumerated in `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeoverType {
    Label,
    Size,
    Liquid,
}

/// A single block of scheduled activity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScheduledBlock {
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(flatten)]
    pub payload: BlockPayload,
}

impl ScheduledBlock {
    pub fn contains(&self, t_ms: u64) -> bool {
        t_ms >= self.start_ms && t_ms < self.end_ms
    }

    pub fn is_order(&self) -> bool {
        matches!(self.payload, BlockPayload::Order(_))
    }
}

/// The fully validated, time-ordered schedule for a run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schedule {
    blocks: Vec<ScheduledBlock>,
}

impl Schedule {
    /// Build a schedule from unordered blocks, validating per
    /// `spec.md` §3: `planned_start < planned_end` for every order,
    /// blocks are time-ordered, and at most one ORDER block and one
    /// non-order block may be active at any instant.
    pub fn new(mut blocks: Vec<ScheduledBlock>) -> SimResult<Self> {
        for block in &blocks {
            if block.start_ms >= block.end_ms {
                return Err(SimError::schedule(format!(
                    "block starting at {} has end {} <= start",
                    block.start_ms, block.end_ms
                )));
            }
            if let BlockPayload::Order(order) = &block.payload {
                if order.planned_start_ms >= order.planned_end_ms {
                    return Err(SimError::schedule(format!(
                        "order {} has planned_end <= planned_start",
                        order.order_id
                    )));
                }
            }
        }
        blocks.sort_by_key(|b| b.start_ms);

        let orders: Vec<&ScheduledBlock> = blocks.iter().filter(|b| b.is_order()).collect();
        for pair in orders.windows(2) {
            if pair[1].start_ms < pair[0].end_ms {
                return Err(SimError::schedule(
                    "overlapping ORDER blocks in schedule".to_string(),
                ));
            }
        }
        let non_orders: Vec<&ScheduledBlock> = blocks.iter().filter(|b| !b.is_order()).collect();
        for pair in non_orders.windows(2) {
            if pair[1].start_ms < pair[0].end_ms {
                return Err(SimError::schedule(
                    "overlapping non-ORDER blocks in schedule".to_string(),
                ));
            }
        }

        Ok(Self { blocks })
    }

    /// The active ORDER block at virtual time `t_ms`, if any.
    pub fn active_order(&self, t_ms: u64) -> Option<&Order> {
        self.blocks.iter().find_map(|b| match &b.payload {
            BlockPayload::Order(order) if b.contains(t_ms) => Some(order),
            _ => None,
        })
    }

    /// The active non-ORDER block (CHANGEOVER/CIP/LUNCH/BREAKDOWN) at
    /// virtual time `t_ms`, if any.
    pub fn active_block(&self, t_ms: u64) -> Option<&ScheduledBlock> {
        self.blocks
            .iter()
            .find(|b| !b.is_order() && b.contains(t_ms))
    }

    /// The planned breakdown block active at virtual time `t_ms`, if
    /// any, as its `start_ms` (a stable per-block key the caller can
    /// use to fire it exactly once) and fault code. Uses window
    /// containment rather than exact equality against `start_ms`
    /// since virtual time advances in tick-sized (and speed-factor
    /// scaled) jumps that rarely land on an exact millisecond.
    pub fn breakdown_at(&self, t_ms: u64) -> Option<(u64, &str)> {
        self.blocks.iter().find_map(|b| match &b.payload {
            BlockPayload::Breakdown { code } if b.contains(t_ms) => Some((b.start_ms, code.as_str())),
            _ => None,
        })
    }

    pub fn blocks(&self) -> &[ScheduledBlock] {
        &self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, start: u64, end: u64) -> ScheduledBlock {
        ScheduledBlock {
            start_ms: start,
            end_ms: end,
            payload: BlockPayload::Order(Order {
                order_id: id.to_string(),
                sku_id: "LEM-500-IE".to_string(),
                planned_start_ms: start,
                planned_end_ms: end,
                planned_qty: 600,
            }),
        }
    }

    #[test]
    fn rejects_overlapping_orders() {
        let blocks = vec![order("A", 0, 1000), order("B", 500, 1500)];
        assert!(Schedule::new(blocks).is_err());
    }

    #[test]
    fn accepts_adjacent_orders() {
        let blocks = vec![order("A", 0, 1000), order("B", 1000, 2000)];
        assert!(Schedule::new(blocks).is_ok());
    }

    #[test]
    fn active_order_lookup() {
        let schedule = Schedule::new(vec![order("A", 0, 1000)]).unwrap();
        assert_eq!(schedule.active_order(500).unwrap().order_id, "A");
        assert!(schedule.active_order(1000).is_none());
    }

    #[test]
    fn breakdown_active_within_window() {
        let block = ScheduledBlock {
            start_ms: 100,
            end_ms: 200,
            payload: BlockPayload::Breakdown {
                code: "BD-M1".to_string(),
            },
        };
        let schedule = Schedule::new(vec![block]).unwrap();
        assert_eq!(schedule.breakdown_at(100), Some((100, "BD-M1")));
        assert_eq!(schedule.breakdown_at(150), Some((100, "BD-M1")));
        assert_eq!(schedule.breakdown_at(200), None);
        assert_eq!(schedule.breakdown_at(99), None);
    }
}
