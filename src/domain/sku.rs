//! SKU / BOM catalogue.
//!
//! In production this table is populated by the master-data workbook
//! loader (an external collaborator, out of scope per `spec.md` §1).
//! This module only defines the in-memory shape and the read-only
//! lookup table the simulator consumes.

use serde::Deserialize;

/// One bottling SKU: a liquid/bottle/cap combination with its fill and
/// torque targets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sku {
    pub id: String,
    pub liquid_id: String,
    pub volume_ml: f64,
    pub hazard_required: bool,
    pub fill_target_g: f64,
    pub torque_target_ncm: f64,
    /// Reject probability for a completed bottle of this SKU, default ~0.5%.
    #[serde(default = "default_reject_probability")]
    pub reject_probability: f64,
}

fn default_reject_probability() -> f64 {
    0.005
}

impl Sku {
    /// Nominal bottles-per-minute for this SKU, derived from bottle
    /// volume (larger bottles fill and convey more slowly).
    ///
    /// Calibrated against the two worked examples in `spec.md` §4.6:
    /// 500 mL -> 60 bpm, 2 L -> 20 bpm.
    pub fn nominal_bpm(&self) -> f64 {
        (30_000.0 / self.volume_ml).clamp(10.0, 120.0)
    }
}

/// Read-only catalogue of SKUs, keyed by id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkuTable {
    skus: Vec<Sku>,
}

impl SkuTable {
    pub fn new(skus: Vec<Sku>) -> Self {
        Self { skus }
    }

    pub fn get(&self, id: &str) -> Option<&Sku> {
        self.skus.iter().find(|sku| sku.id == id)
    }

    /// 0-based index of a SKU, matching the `sku_index` register
    /// contract (0xFFFF means IDLE, handled by the caller).
    pub fn index_of(&self, id: &str) -> Option<u16> {
        self.skus.iter().position(|sku| sku.id == id).map(|i| i as u16)
    }

    pub fn len(&self) -> usize {
        self.skus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skus.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lemon_500() -> Sku {
        Sku {
            id: "LEM-500-IE".to_string(),
            liquid_id: "LEMONADE".to_string(),
            volume_ml: 500.0,
            hazard_required: false,
            fill_target_g: 505.0,
            torque_target_ncm: 12.0,
            reject_probability: 0.005,
        }
    }

    #[test]
    fn nominal_bpm_matches_worked_examples() {
        assert_eq!(lemon_500().nominal_bpm(), 60.0);
        let two_liter = Sku {
            volume_ml: 2000.0,
            ..lemon_500()
        };
        assert_eq!(two_liter.nominal_bpm(), 20.0);
    }

    #[test]
    fn table_lookup_by_id_and_index() {
        let table = SkuTable::new(vec![lemon_500()]);
        assert_eq!(table.get("LEM-500-IE").unwrap().volume_ml, 500.0);
        assert_eq!(table.index_of("LEM-500-IE"), Some(0));
        assert_eq!(table.index_of("MISSING"), None);
    }
}
