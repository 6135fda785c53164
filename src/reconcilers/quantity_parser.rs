use std::collections::BTreeMap;
use std::sync::OnceLock;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

use crate::resources::workspacekinds::PodConfigSpec;

#[allow(non_camel_case_types)]
enum QuantitySuffix {
    Ki,
    Mi,
    Gi,
    Ti,
    Pi,
    Ei,
    m,
    None,
    k,
    M,
    G,
    T,
    P,
    E,
}

impl QuantitySuffix {
    fn new(unit: &str) -> Option<Self> {
        Some(match unit {
            "Ki" => Self::Ki,
            "Mi" => Self::Mi,
            "Gi" => Self::Gi,
            "Ti" => Self::Ti,
            "Pi" => Self::Pi,
            "Ei" => Self::Ei,
            "m" => Self::m,
            "" => Self::None,
            "k" => Self::k,
            "M" => Self::M,
            "G" => Self::G,
            "T" => Self::T,
            "P" => Self::P,
            "E" => Self::E,
            _ => return None,
        })
    }

    /// Multiplier from one unit of the suffix to thousandths of the base unit
    fn milli_multiplier(&self) -> i128 {
        match self {
            Self::Ki => 1000 << 10,
            Self::Mi => 1000 << 20,
            Self::Gi => 1000 << 30,
            Self::Ti => 1000 << 40,
            Self::Pi => 1000 << 50,
            Self::Ei => 1000 << 60,
            Self::m => 1,
            Self::None => 1000,
            Self::k => 1000 * 10i128.pow(3),
            Self::M => 1000 * 10i128.pow(6),
            Self::G => 1000 * 10i128.pow(9),
            Self::T => 1000 * 10i128.pow(12),
            Self::P => 1000 * 10i128.pow(15),
            Self::E => 1000 * 10i128.pow(18),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid quantity {0:?}")]
    InvalidQuantity(String),
    #[error("Invalid quantity unit {0:?}")]
    InvalidUnit(String),
}

/// Parses resource quantities so that differently written but equal amounts (`1`, `1000m`) compare equal
pub trait QuantityParser {
    /// The amount in thousandths of the base unit, rounded up as Kubernetes does
    fn to_milli_units(&self) -> Result<i128, ParseError>;
}

impl QuantityParser for Quantity {
    fn to_milli_units(&self) -> Result<i128, ParseError> {
        static REGEX: OnceLock<Regex> = OnceLock::new();
        let raw = self.0.trim();
        let caps = REGEX
            .get_or_init(|| {
                Regex::new(r"^([+-]?)([0-9]*)(?:\.([0-9]*))?([A-Za-z]*)$")
                    .expect("quantity regex to compile")
            })
            .captures(raw)
            .ok_or_else(|| ParseError::InvalidQuantity(raw.to_owned()))?;

        let negative = &caps[1] == "-";
        let whole = &caps[2];
        let fraction = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        if whole.is_empty() && fraction.is_empty() {
            return Err(ParseError::InvalidQuantity(raw.to_owned()));
        }

        let suffix =
            QuantitySuffix::new(&caps[4]).ok_or_else(|| ParseError::InvalidUnit(caps[4].to_owned()))?;

        let digits = format!("{whole}{fraction}");
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| ParseError::InvalidQuantity(raw.to_owned()))?
        };
        let scale = 10i128
            .checked_pow(fraction.len() as u32)
            .ok_or_else(|| ParseError::InvalidQuantity(raw.to_owned()))?;

        let scaled = mantissa
            .checked_mul(suffix.milli_multiplier())
            .ok_or_else(|| ParseError::InvalidQuantity(raw.to_owned()))?;
        // round up any precision below a thousandth
        let milli = scaled / scale + i128::from(scaled % scale != 0);

        Ok(if negative { -milli } else { milli })
    }
}

fn normalize_quantities(
    quantities: &Option<BTreeMap<String, Quantity>>,
) -> Option<BTreeMap<String, Quantity>> {
    quantities.as_ref().map(|q| {
        q.iter()
            .map(|(name, quantity)| {
                let normalized = quantity
                    .to_milli_units()
                    .map(|m| Quantity(format!("{m}m")))
                    .unwrap_or_else(|_| quantity.clone());
                (name.clone(), normalized)
            })
            .collect()
    })
}

/// A copy of the spec with every resource quantity written the same way
pub fn normalize_pod_config_spec(spec: &PodConfigSpec) -> PodConfigSpec {
    let mut spec = spec.clone();
    spec.resources = spec.resources.map(|r| ResourceRequirements {
        limits: normalize_quantities(&r.limits),
        requests: normalize_quantities(&r.requests),
        ..r
    });
    spec
}
