use serde::Serialize;

use crate::cycles::{mean, CycleRecord};
use crate::health::{linear_fit, recent_window, HealthThresholds, SohPoint};

/// Totals and averages over the cycle table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedMetrics {
    pub total_cycles: usize,
    pub valid_cycles: usize,
    pub missing_cycles: usize,
    pub interpolated_cycles: usize,
    pub initial_capacity: f64,
    pub current_capacity: f64,
    pub max_capacity: f64,
    /// Percent of the maximum capacity lost by the latest cycle.
    pub capacity_fade: f64,
    pub avg_coulombic_efficiency: Option<f64>,
    pub avg_energy_efficiency: Option<f64>,
    pub max_voltage: Option<f64>,
    pub min_voltage: Option<f64>,
    pub avg_voltage: Option<f64>,
    /// Population standard deviation of the per-cycle average voltage.
    pub voltage_std_dev: Option<f64>,
    pub max_temperature: Option<f64>,
    /// SoH percentage points lost per 100 cycles over the recent window.
    pub fade_rate_per_100_cycles: Option<f64>,
}

pub fn compute_metrics(
    records: &[CycleRecord],
    history: &[SohPoint],
    thresholds: &HealthThresholds,
) -> ComputedMetrics {
    let with_capacity: Vec<&CycleRecord> = records.iter().filter(|r| r.has_capacity()).collect();
    let initial_capacity = with_capacity.first().map_or(0.0, |r| r.discharge_capacity);
    let current_capacity = with_capacity.last().map_or(0.0, |r| r.discharge_capacity);
    let max_capacity = with_capacity
        .iter()
        .map(|r| r.discharge_capacity)
        .fold(0.0, f64::max);
    let capacity_fade = if max_capacity > 0.0 {
        (max_capacity - current_capacity) / max_capacity * 100.0
    } else {
        0.0
    };

    let efficiencies: Vec<f64> = records
        .iter()
        .filter(|r| r.charge_capacity > 0.0)
        .map(|r| r.coulombic_efficiency)
        .collect();
    let energy_efficiencies: Vec<f64> = records.iter().filter_map(|r| r.energy_efficiency).collect();
    let averages: Vec<f64> = records.iter().filter_map(|r| r.avg_voltage).collect();

    let fade_rate_per_100_cycles = if history.len() < thresholds.min_rul_points {
        None
    } else {
        linear_fit(&recent_window(history, thresholds)).map(|(slope, _)| -slope * 100.0)
    };

    ComputedMetrics {
        total_cycles: records.len(),
        valid_cycles: records.iter().filter(|r| !r.is_missing).count(),
        missing_cycles: records.iter().filter(|r| r.is_missing).count(),
        interpolated_cycles: records.iter().filter(|r| r.is_interpolated).count(),
        initial_capacity,
        current_capacity,
        max_capacity,
        capacity_fade,
        avg_coulombic_efficiency: mean(&efficiencies),
        avg_energy_efficiency: mean(&energy_efficiencies),
        max_voltage: records.iter().filter_map(|r| r.max_voltage).reduce(f64::max),
        min_voltage: records.iter().filter_map(|r| r.min_voltage).reduce(f64::min),
        avg_voltage: mean(&averages),
        voltage_std_dev: std_dev(&averages),
        max_temperature: records.iter().filter_map(|r| r.max_temperature).reduce(f64::max),
        fade_rate_per_100_cycles,
    }
}

fn std_dev(values: &[f64]) -> Option<f64> {
    let centre = mean(values)?;
    let variance = values.iter().map(|v| (v - centre).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::soh_history;

    fn record(cycle: u32, discharge: f64, charge: f64, avg_voltage: f64) -> CycleRecord {
        CycleRecord {
            cycle,
            discharge_capacity: discharge,
            charge_capacity: charge,
            max_voltage: Some(avg_voltage + 0.5),
            min_voltage: Some(avg_voltage - 0.5),
            avg_voltage: Some(avg_voltage),
            coulombic_efficiency: if charge > 0.0 { discharge / charge * 100.0 } else { 0.0 },
            timestamp: None,
            is_missing: discharge == 0.0 && charge == 0.0,
            is_interpolated: false,
            discharge_energy: None,
            charge_energy: None,
            energy_efficiency: None,
            avg_temperature: None,
            max_temperature: Some(30.0 + f64::from(cycle)),
            sample_count: 2,
        }
    }

    #[test]
    fn summarizes_cycle_table() {
        let records = vec![
            record(1, 2000.0, 2000.0, 3.6),
            record(2, 1900.0, 2000.0, 3.7),
            record(3, 0.0, 0.0, 3.8),
            record(4, 1800.0, 2000.0, 3.7),
        ];
        let history = soh_history(&records);
        let metrics = compute_metrics(&records, &history, &HealthThresholds::default());

        assert_eq!(metrics.total_cycles, 4);
        assert_eq!(metrics.valid_cycles, 3);
        assert_eq!(metrics.missing_cycles, 1);
        assert_eq!(metrics.initial_capacity, 2000.0);
        assert_eq!(metrics.current_capacity, 1800.0);
        assert_eq!(metrics.max_capacity, 2000.0);
        assert!((metrics.capacity_fade - 10.0).abs() < 1e-9);
        assert!((metrics.avg_coulombic_efficiency.unwrap() - 95.0).abs() < 1e-9);
        assert!((metrics.max_voltage.unwrap() - 4.3).abs() < 1e-9);
        assert_eq!(metrics.max_temperature, Some(34.0));
        assert!((metrics.voltage_std_dev.unwrap() - 0.070710678).abs() < 1e-6);
        assert!(metrics.fade_rate_per_100_cycles.unwrap() > 0.0);
    }

    #[test]
    fn fade_rate_needs_enough_points() {
        let records = vec![record(1, 2000.0, 2000.0, 3.6), record(2, 1900.0, 2000.0, 3.6)];
        let history = soh_history(&records);
        let metrics = compute_metrics(&records, &history, &HealthThresholds::default());
        assert_eq!(metrics.fade_rate_per_100_cycles, None);
        assert_eq!(metrics.voltage_std_dev, Some(0.0));
    }
}
