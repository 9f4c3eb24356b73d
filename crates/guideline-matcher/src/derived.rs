//! Derived values computed from observed vital signs.
//!
//! | Name | Formula | Unit |
//! |------|---------|------|
//! | `shock_index` | heart_rate / systolic_bp | |
//! | `mean_arterial_pressure` | (systolic_bp + 2 * diastolic_bp) / 3 | mmHg |
//! | `pulse_pressure` | systolic_bp - diastolic_bp | mmHg |
//!
//! Inputs are the most recent numeric observations. A value is not derived
//! when the patient data already contains it, when an input is missing, or
//! when a divisor is zero or negative.

use tracing::debug;

use crate::dataset::PatientDatum;
use crate::observations::Observations;

/// Name of the shock index.
pub const SHOCK_INDEX: &str = "shock_index";
/// Name of the mean arterial pressure.
pub const MEAN_ARTERIAL_PRESSURE: &str = "mean_arterial_pressure";
/// Name of the pulse pressure.
pub const PULSE_PRESSURE: &str = "pulse_pressure";

struct Formula {
    name: &'static str,
    unit: &'static str,
    inputs: &'static [&'static str],
    compute: fn(&[f64]) -> Option<f64>,
}

const FORMULAS: &[Formula] = &[
    Formula {
        name: SHOCK_INDEX,
        unit: "",
        inputs: &["heart_rate", "systolic_bp"],
        compute: |v| (v[1] > 0.0).then(|| v[0] / v[1]),
    },
    Formula {
        name: MEAN_ARTERIAL_PRESSURE,
        unit: "mmHg",
        inputs: &["systolic_bp", "diastolic_bp"],
        compute: |v| Some((v[0] + 2.0 * v[1]) / 3.0),
    },
    Formula {
        name: PULSE_PRESSURE,
        unit: "mmHg",
        inputs: &["systolic_bp", "diastolic_bp"],
        compute: |v| Some(v[0] - v[1]),
    },
];

/// Computes every derivable value that is not already observed.
///
/// Derived data carries the latest timestamp of its inputs.
pub(crate) fn derive(observations: &Observations<'_>) -> Vec<PatientDatum> {
    let mut derived = Vec::new();
    for formula in FORMULAS {
        if observations.contains(formula.name) {
            debug!(name = formula.name, "derived value observed directly, not recomputed");
            continue;
        }

        let mut values = Vec::with_capacity(formula.inputs.len());
        let mut timestamp = None;
        for input in formula.inputs {
            let Some((value, observation)) = observations.latest_number(input) else {
                break;
            };
            values.push(value);
            timestamp = timestamp.max(observation.datum.timestamp);
        }
        if values.len() < formula.inputs.len() {
            continue;
        }

        match (formula.compute)(&values).filter(|v| v.is_finite()) {
            Some(value) => {
                debug!(name = formula.name, value, "derived value");
                let mut datum = PatientDatum::new(formula.name, value).with_unit(formula.unit);
                datum.timestamp = timestamp;
                derived.push(datum);
            }
            None => debug!(name = formula.name, "derived value skipped, invalid divisor"),
        }
    }
    derived
}
