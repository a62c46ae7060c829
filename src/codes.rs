use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::KiraError;

pub const UNIT_NONE: i64 = 254;
pub const UNIT_UNSPECIFIED: i64 = 255;

const UNIT_CODES: &[(i64, &str)] = &[
    (1, "ppt"),
    (2, "ppm"),
    (3, "ppb"),
    (4, "mm"),
    (5, "um"),
    (6, "nm"),
    (7, "pm"),
    (8, "fm"),
    (9, "mgml"),
    (10, "ugml"),
    (11, "ngml"),
    (12, "pgml"),
    (13, "fgml"),
    (14, "m"),
    (15, "percent"),
    (16, "ratio"),
    (17, "sec"),
    (18, "rsec"),
    (19, "min"),
    (20, "rmin"),
    (21, "day"),
    (22, "rday"),
    (23, "ml-min-kg"),
    (24, "l-kg"),
    (25, "hr-ng-ml"),
    (26, "cm-sec"),
    (27, "mg-kg"),
    (UNIT_NONE, "none"),
    (UNIT_UNSPECIFIED, "unspecified"),
];

pub const ACTIVITY_COLUMN: &str = "Activity";

pub fn unit_label(code: i64) -> Option<&'static str> {
    UNIT_CODES
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, label)| *label)
}

/// Unit lookup for a declared result column. The unit table is closed, so an
/// unknown code is an integrity violation for the record.
pub fn decode_unit(tid: i64, code: i64) -> Result<&'static str, KiraError> {
    unit_label(code).ok_or(KiraError::UnknownUnitCode { tid, code })
}

pub fn unit_codes() -> impl Iterator<Item = (i64, &'static str)> {
    UNIT_CODES.iter().copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityOutcome {
    Inactive,
    Active,
    Inconclusive,
    Unspecified,
    Probe,
}

impl ActivityOutcome {
    pub const ALL: [ActivityOutcome; 5] = [
        ActivityOutcome::Inactive,
        ActivityOutcome::Active,
        ActivityOutcome::Inconclusive,
        ActivityOutcome::Unspecified,
        ActivityOutcome::Probe,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ActivityOutcome::Inactive),
            2 => Some(ActivityOutcome::Active),
            3 => Some(ActivityOutcome::Inconclusive),
            4 => Some(ActivityOutcome::Unspecified),
            5 => Some(ActivityOutcome::Probe),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ActivityOutcome::Inactive => 1,
            ActivityOutcome::Active => 2,
            ActivityOutcome::Inconclusive => 3,
            ActivityOutcome::Unspecified => 4,
            ActivityOutcome::Probe => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActivityOutcome::Inactive => "inactive",
            ActivityOutcome::Active => "active",
            ActivityOutcome::Inconclusive => "inconclusive",
            ActivityOutcome::Unspecified => "unspecified",
            ActivityOutcome::Probe => "probe",
        }
    }

    /// Decodes a raw outcome cell. Non-numeric or unregistered values give `None`
    /// instead of failing.
    pub fn decode(raw: &Value) -> Option<Self> {
        let code = match raw {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64)),
            Value::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        }?;
        Self::from_code(code)
    }
}

impl fmt::Display for ActivityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
