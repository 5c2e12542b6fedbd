//! Threshold steps derived from instrument limits.
//!
//! Grafana threshold steps are ordered by value; each step colours values at
//! or above it. The base step (no value) colours everything below the first
//! limit: red when the parameter has lower limits, green otherwise. Lower
//! limits move toward green, with the least severe configured lower limit
//! green. Upper limits go yellow, orange, red.

use serde::{Deserialize, Serialize};

use cryoem_monitor_common::Limits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Yellow,
    Orange,
    Red,
}

/// One Grafana threshold step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdStep {
    pub color: Color,
    /// `None` for the base step; serialized as `null`.
    pub value: Option<f64>,
}

impl ThresholdStep {
    fn base(color: Color) -> Self {
        Self { color, value: None }
    }

    fn at(color: Color, value: f64) -> Self {
        Self {
            color,
            value: Some(value),
        }
    }
}

#[derive(PartialEq)]
enum Severity {
    Caution,
    Warning,
    Critical,
}

/// Build threshold steps for a parameter's limits.
pub fn threshold_steps(limits: &Limits) -> Vec<ThresholdStep> {
    let base = if limits.has_lower() {
        Color::Red
    } else {
        Color::Green
    };
    let mut steps = vec![ThresholdStep::base(base)];

    let least_severe_min = if limits.caution_min.is_some() {
        Severity::Caution
    } else if limits.warning_min.is_some() {
        Severity::Warning
    } else {
        Severity::Critical
    };

    if let Some(value) = limits.critical_min {
        let color = if least_severe_min == Severity::Critical {
            Color::Green
        } else {
            Color::Orange
        };
        steps.push(ThresholdStep::at(color, value));
    }
    if let Some(value) = limits.warning_min {
        let color = if least_severe_min == Severity::Warning {
            Color::Green
        } else {
            Color::Yellow
        };
        steps.push(ThresholdStep::at(color, value));
    }
    if let Some(value) = limits.caution_min {
        steps.push(ThresholdStep::at(Color::Green, value));
    }
    if let Some(value) = limits.caution_max {
        steps.push(ThresholdStep::at(Color::Yellow, value));
    }
    if let Some(value) = limits.warning_max {
        steps.push(ThresholdStep::at(Color::Orange, value));
    }
    if let Some(value) = limits.critical_max {
        steps.push(ThresholdStep::at(Color::Red, value));
    }

    steps
}
