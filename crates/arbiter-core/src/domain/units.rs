//! Physical units for numeric decisions.
//!
//! A [`Unit`] is identified by its canonical name (`"kelvin"`, `"meter"`, ...)
//! which is also the string stored in answer files. Conversions are linear:
//! `base = magnitude * factor + offset`, within one dimension only.

use serde::{Deserialize, Deserializer, Serialize, de};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Dimensionless,
    Length,
    Area,
    Volume,
    Mass,
    Time,
    Temperature,
    Power,
}

struct UnitDef {
    name: &'static str,
    symbols: &'static [&'static str],
    dimension: Dimension,
    factor: f64,
    offset: f64,
}

const UNITS: &[UnitDef] = &[
    UnitDef { name: "dimensionless", symbols: &["", "1"], dimension: Dimension::Dimensionless, factor: 1.0, offset: 0.0 },
    UnitDef { name: "percent", symbols: &["%"], dimension: Dimension::Dimensionless, factor: 0.01, offset: 0.0 },
    UnitDef { name: "meter", symbols: &["m"], dimension: Dimension::Length, factor: 1.0, offset: 0.0 },
    UnitDef { name: "centimeter", symbols: &["cm"], dimension: Dimension::Length, factor: 0.01, offset: 0.0 },
    UnitDef { name: "millimeter", symbols: &["mm"], dimension: Dimension::Length, factor: 0.001, offset: 0.0 },
    UnitDef { name: "kilometer", symbols: &["km"], dimension: Dimension::Length, factor: 1000.0, offset: 0.0 },
    UnitDef { name: "meter ** 2", symbols: &["m2", "m²", "m**2", "square_meter"], dimension: Dimension::Area, factor: 1.0, offset: 0.0 },
    UnitDef { name: "meter ** 3", symbols: &["m3", "m³", "m**3", "cubic_meter"], dimension: Dimension::Volume, factor: 1.0, offset: 0.0 },
    UnitDef { name: "liter", symbols: &["l", "L"], dimension: Dimension::Volume, factor: 0.001, offset: 0.0 },
    UnitDef { name: "kilogram", symbols: &["kg"], dimension: Dimension::Mass, factor: 1.0, offset: 0.0 },
    UnitDef { name: "gram", symbols: &["g"], dimension: Dimension::Mass, factor: 0.001, offset: 0.0 },
    UnitDef { name: "second", symbols: &["s"], dimension: Dimension::Time, factor: 1.0, offset: 0.0 },
    UnitDef { name: "minute", symbols: &["min"], dimension: Dimension::Time, factor: 60.0, offset: 0.0 },
    UnitDef { name: "hour", symbols: &["h"], dimension: Dimension::Time, factor: 3600.0, offset: 0.0 },
    UnitDef { name: "kelvin", symbols: &["K"], dimension: Dimension::Temperature, factor: 1.0, offset: 0.0 },
    UnitDef { name: "degree_Celsius", symbols: &["degC", "°C", "celsius"], dimension: Dimension::Temperature, factor: 1.0, offset: 273.15 },
    UnitDef { name: "watt", symbols: &["W"], dimension: Dimension::Power, factor: 1.0, offset: 0.0 },
    UnitDef { name: "kilowatt", symbols: &["kW"], dimension: Dimension::Power, factor: 1000.0, offset: 0.0 },
];

fn lookup(name: &str) -> Option<&'static UnitDef> {
    let name = name.trim();
    UNITS
        .iter()
        .find(|def| def.name == name || def.symbols.contains(&name))
}

/// A known physical unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Unit(&'static str);

/// Unknown unit name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown unit '{0}'")]
pub struct UnknownUnit(pub String);

impl Unit {
    pub fn dimensionless() -> Self {
        Unit("dimensionless")
    }

    pub fn kelvin() -> Self {
        Unit("kelvin")
    }

    pub fn meter() -> Self {
        Unit("meter")
    }

    pub fn watt() -> Self {
        Unit("watt")
    }

    /// Canonical name, as stored in answer files.
    pub fn name(&self) -> &'static str {
        self.0
    }

    fn def(&self) -> &'static UnitDef {
        // Unit values are only ever built from table entries.
        lookup(self.0).unwrap_or(&UNITS[0])
    }

    pub fn is_dimensionless(&self) -> bool {
        self.def().dimension == Dimension::Dimensionless && self.def().factor == 1.0
    }

    /// Convert `magnitude` given in `self` into `target`.
    ///
    /// Returns `None` when the units belong to different dimensions.
    pub fn convert(&self, magnitude: f64, target: &Unit) -> Option<f64> {
        let from = self.def();
        let to = target.def();
        if from.dimension != to.dimension {
            return None;
        }
        if from.name == to.name {
            return Some(magnitude);
        }
        let base = magnitude * from.factor + from.offset;
        Some((base - to.offset) / to.factor)
    }
}

impl FromStr for Unit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(s)
            .map(|def| Unit(def.name))
            .ok_or_else(|| UnknownUnit(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.0.to_string()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A magnitude tagged with its unit.
///
/// Serialized as `{"value": <magnitude>, "unit": "<name>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(rename = "value")]
    pub magnitude: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(magnitude: f64, unit: Unit) -> Self {
        Self { magnitude, unit }
    }

    /// Express this quantity in `unit`, if the dimensions match.
    pub fn to(&self, unit: &Unit) -> Option<Quantity> {
        self.unit
            .convert(self.magnitude, unit)
            .map(|magnitude| Quantity::new(magnitude, unit.clone()))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_dimensionless() {
            write!(f, "{}", self.magnitude)
        } else {
            write!(f, "{} {}", self.magnitude, self.unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("kelvin", "kelvin")]
    #[case("K", "kelvin")]
    #[case("degC", "degree_Celsius")]
    #[case("m²", "meter ** 2")]
    #[case("kW", "kilowatt")]
    #[case(" m ", "meter")]
    fn parses_names_and_symbols(#[case] raw: &str, #[case] expected: &str) {
        let unit: Unit = raw.parse().unwrap();
        assert_eq!(unit.name(), expected);
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let err = "furlong".parse::<Unit>().unwrap_err();
        assert_eq!(err, UnknownUnit("furlong".to_string()));
    }

    #[test]
    fn converts_within_dimension() {
        let q = Quantity::new(20.0, "degC".parse().unwrap());
        let k = q.to(&Unit::kelvin()).unwrap();
        assert!((k.magnitude - 293.15).abs() < 1e-9);

        let mm = Quantity::new(1.5, Unit::meter())
            .to(&"mm".parse().unwrap())
            .unwrap();
        assert!((mm.magnitude - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn refuses_cross_dimension_conversion() {
        let q = Quantity::new(1.0, Unit::meter());
        assert!(q.to(&Unit::kelvin()).is_none());
    }

    #[test]
    fn quantity_serializes_as_value_and_unit() {
        let q = Quantity::new(293.15, Unit::kelvin());
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v, serde_json::json!({"value": 293.15, "unit": "kelvin"}));

        let back: Quantity = serde_json::from_value(v).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn quantity_reads_unit_symbols_from_text() {
        let q: Quantity = serde_json::from_str(r#"{"value": 20, "unit": "degC"}"#).unwrap();
        assert_eq!(q, Quantity::new(20.0, "degree_Celsius".parse().unwrap()));

        let err = serde_json::from_str::<Quantity>(r#"{"value": 1, "unit": "furlong"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown unit 'furlong'"));
    }
}
