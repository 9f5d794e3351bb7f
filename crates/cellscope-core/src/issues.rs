//! Rule-based diagnostics. Every rule sees the same health summary and
//! metrics, runs independently of the others and emits at most one issue.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::health::{BatteryHealthSummary, Chemistry};
use crate::metrics::ComputedMetrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueThresholds {
    pub soh_critical: f64,
    pub soh_warning: f64,
    pub rul_critical: u32,
    pub rul_warning: u32,
    /// Allowed excursion beyond the chemistry's voltage window, volts.
    pub voltage_margin: f64,
    pub unknown_max_voltage: f64,
    pub unknown_min_voltage: f64,
    pub voltage_std_dev: f64,
    pub high_cycle_count: usize,
    pub coulombic_efficiency_low: f64,
    pub coulombic_efficiency_high: f64,
    pub temperature_warning_c: f64,
    pub temperature_critical_c: f64,
    pub fade_rate_per_100_cycles: f64,
}

impl Default for IssueThresholds {
    fn default() -> Self {
        Self {
            soh_critical: 80.0,
            soh_warning: 90.0,
            rul_critical: 50,
            rul_warning: 100,
            voltage_margin: 0.1,
            unknown_max_voltage: 4.3,
            unknown_min_voltage: 2.0,
            voltage_std_dev: 0.1,
            high_cycle_count: 1000,
            coulombic_efficiency_low: 95.0,
            coulombic_efficiency_high: 105.0,
            temperature_warning_c: 45.0,
            temperature_critical_c: 60.0,
            fade_rate_per_100_cycles: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Performance,
    Lifecycle,
    Safety,
    Electrical,
    Thermal,
    DataQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub cause: String,
    pub recommendation: String,
    pub affected_metrics: Vec<String>,
}

impl Issue {
    fn new(id: &str, category: IssueCategory, severity: Severity, title: &str) -> Self {
        Self {
            id: id.to_string(),
            category,
            severity,
            title: title.to_string(),
            description: String::new(),
            cause: String::new(),
            recommendation: String::new(),
            affected_metrics: Vec::new(),
        }
    }

    fn describe(mut self, description: String, cause: &str, recommendation: &str) -> Self {
        self.description = description;
        self.cause = cause.to_string();
        self.recommendation = recommendation.to_string();
        self
    }

    fn affects(mut self, metrics: &[&str]) -> Self {
        self.affected_metrics = metrics.iter().map(|m| m.to_string()).collect();
        self
    }
}

/// Everything a rule may inspect.
#[derive(Debug, Clone, Copy)]
pub struct IssueContext<'a> {
    pub health: &'a BatteryHealthSummary,
    pub metrics: &'a ComputedMetrics,
}

type Rule = fn(&IssueContext<'_>, &IssueThresholds) -> Option<Issue>;

const RULES: [Rule; 10] = [
    state_of_health,
    remaining_life,
    overvoltage,
    undervoltage,
    voltage_instability,
    high_cycle_count,
    unknown_chemistry,
    coulombic_efficiency,
    thermal,
    accelerated_fade,
];

pub fn analyze_issues(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Vec<Issue> {
    let issues: Vec<Issue> = RULES
        .iter()
        .filter_map(|rule| rule(context, thresholds))
        .collect();
    debug!(issues = issues.len(), "evaluated issue rules");
    issues
}

fn state_of_health(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let soh = context.health.soh;
    if soh < thresholds.soh_critical {
        Some(
            Issue::new("soh-critical", IssueCategory::Performance, Severity::Critical, "Critical capacity loss")
                .describe(
                    format!(
                        "State of health is {soh:.1}%, below the {:.0}% end-of-life threshold.",
                        thresholds.soh_critical
                    ),
                    "Loss of active material and cyclable lithium from extended cycling or abuse.",
                    "Retire the cell from primary service or reassign it to a low-demand application.",
                )
                .affects(&["soh", "dischargeCapacity"]),
        )
    } else if soh < thresholds.soh_warning {
        Some(
            Issue::new("soh-degraded", IssueCategory::Performance, Severity::Warning, "Capacity degradation")
                .describe(
                    format!(
                        "State of health is {soh:.1}%, below the {:.0}% healthy threshold.",
                        thresholds.soh_warning
                    ),
                    "Normal ageing through SEI growth and gradual loss of cyclable lithium.",
                    "Increase monitoring frequency and plan for replacement.",
                )
                .affects(&["soh", "dischargeCapacity"]),
        )
    } else {
        None
    }
}

fn remaining_life(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let rul = context.health.rul;
    if rul >= thresholds.rul_warning {
        return None;
    }
    let severity = if rul < thresholds.rul_critical {
        Severity::Critical
    } else {
        Severity::Warning
    };
    Some(
        Issue::new("rul-low", IssueCategory::Lifecycle, severity, "Low remaining useful life")
            .describe(
                format!("Projected remaining useful life is {rul} cycle(s)."),
                "The recent capacity trend reaches end of life soon.",
                "Schedule replacement and avoid high-stress duty cycles.",
            )
            .affects(&["rul", "soh"]),
    )
}

fn overvoltage(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let observed = context.metrics.max_voltage?;
    let limit = match context.health.chemistry.profile() {
        Some(profile) => profile.max_voltage + thresholds.voltage_margin,
        None => thresholds.unknown_max_voltage,
    };
    if observed <= limit {
        return None;
    }
    Some(
        Issue::new("overvoltage", IssueCategory::Safety, Severity::Critical, "Overvoltage detected")
            .describe(
                format!(
                    "Maximum voltage {observed:.3} V exceeds the {limit:.2} V limit for {} cells.",
                    context.health.chemistry
                ),
                "Charge voltage limit set too high or a faulty charger or cycler channel.",
                "Verify charge cutoff settings and inspect the cell for swelling or heat.",
            )
            .affects(&["maxVoltage"]),
    )
}

fn undervoltage(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let observed = context.metrics.min_voltage?;
    let limit = match context.health.chemistry.profile() {
        Some(profile) => profile.min_voltage - thresholds.voltage_margin,
        None => thresholds.unknown_min_voltage,
    };
    if observed >= limit {
        return None;
    }
    Some(
        Issue::new("undervoltage", IssueCategory::Safety, Severity::Warning, "Over-discharge detected")
            .describe(
                format!(
                    "Minimum voltage {observed:.3} V is below the {limit:.2} V limit for {} cells.",
                    context.health.chemistry
                ),
                "Discharge cutoff set too low or the cell was left discharged.",
                "Raise the discharge cutoff and check the cell for copper dissolution damage.",
            )
            .affects(&["minVoltage"]),
    )
}

fn voltage_instability(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let spread = context.metrics.voltage_std_dev?;
    if spread <= thresholds.voltage_std_dev {
        return None;
    }
    Some(
        Issue::new(
            "voltage-instability",
            IssueCategory::Electrical,
            Severity::Warning,
            "Unstable average voltage",
        )
        .describe(
            format!(
                "Average cycle voltage varies by {spread:.3} V (standard deviation), above {:.2} V.",
                thresholds.voltage_std_dev
            ),
            "Rising internal resistance, poor contacts or changing test conditions.",
            "Check fixture contacts and measure internal resistance.",
        )
        .affects(&["avgVoltage", "voltageStdDev"]),
    )
}

fn high_cycle_count(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let cycles = context.metrics.total_cycles;
    if cycles <= thresholds.high_cycle_count {
        return None;
    }
    Some(
        Issue::new("high-cycle-count", IssueCategory::Lifecycle, Severity::Info, "High cycle count")
            .describe(
                format!("The cell has completed {cycles} cycles."),
                "Extended service life.",
                "Track degradation closely as the cell approaches its rated cycle life.",
            )
            .affects(&["totalCycles"]),
    )
}

fn unknown_chemistry(context: &IssueContext<'_>, _thresholds: &IssueThresholds) -> Option<Issue> {
    if context.health.chemistry != Chemistry::Unknown {
        return None;
    }
    Some(
        Issue::new(
            "unknown-chemistry",
            IssueCategory::DataQuality,
            Severity::Info,
            "Chemistry not identified",
        )
        .describe(
            "The voltage profile does not match any reference chemistry.".to_string(),
            "Unusual voltage window, partial cycling data or a misidentified voltage column.",
            "Record the cell chemistry with the test so voltage limits can be checked.",
        )
        .affects(&["chemistry", "maxVoltage", "minVoltage"]),
    )
}

fn coulombic_efficiency(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let efficiency = context.metrics.avg_coulombic_efficiency?;
    if efficiency < thresholds.coulombic_efficiency_low {
        Some(
            Issue::new(
                "coulombic-efficiency",
                IssueCategory::Electrical,
                Severity::Warning,
                "Low coulombic efficiency",
            )
            .describe(
                format!(
                    "Average coulombic efficiency is {efficiency:.1}%, below {:.0}%.",
                    thresholds.coulombic_efficiency_low
                ),
                "Parasitic side reactions such as electrolyte decomposition or lithium plating.",
                "Reduce charge rate or temperature and watch for accelerated fade.",
            )
            .affects(&["coulombicEfficiency"]),
        )
    } else if efficiency > thresholds.coulombic_efficiency_high {
        Some(
            Issue::new(
                "coulombic-efficiency",
                IssueCategory::DataQuality,
                Severity::Warning,
                "Implausible coulombic efficiency",
            )
            .describe(
                format!(
                    "Average coulombic efficiency is {efficiency:.1}%, above {:.0}%.",
                    thresholds.coulombic_efficiency_high
                ),
                "Incomplete charge steps, partial cycles or swapped capacity columns.",
                "Check the column mapping and whether each cycle contains a full charge.",
            )
            .affects(&["coulombicEfficiency", "chargeCapacity"]),
        )
    } else {
        None
    }
}

fn thermal(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let peak = context.metrics.max_temperature?;
    if peak <= thresholds.temperature_warning_c {
        return None;
    }
    let severity = if peak > thresholds.temperature_critical_c {
        Severity::Critical
    } else {
        Severity::Warning
    };
    Some(
        Issue::new("thermal", IssueCategory::Thermal, severity, "High cell temperature")
            .describe(
                format!(
                    "Peak temperature reached {peak:.1} °C, above {:.0} °C.",
                    thresholds.temperature_warning_c
                ),
                "High current, poor heat removal or internal short formation.",
                "Reduce current, improve cooling and inspect the cell.",
            )
            .affects(&["maxTemperature"]),
    )
}

fn accelerated_fade(context: &IssueContext<'_>, thresholds: &IssueThresholds) -> Option<Issue> {
    let rate = context.metrics.fade_rate_per_100_cycles?;
    if rate <= thresholds.fade_rate_per_100_cycles {
        return None;
    }
    Some(
        Issue::new(
            "accelerated-fade",
            IssueCategory::Performance,
            Severity::Warning,
            "Accelerated capacity fade",
        )
        .describe(
            format!(
                "State of health is falling {rate:.2} points per 100 cycles, above {:.1}.",
                thresholds.fade_rate_per_100_cycles
            ),
            "Aggressive cycling conditions or the onset of non-linear ageing.",
            "Review charge rate, depth of discharge and temperature.",
        )
        .affects(&["soh", "fadeRatePer100Cycles"]),
    )
}
