//! Unit normalization and conversion for instrument parameters.
//!
//! The health monitor export stores values in the instrument's storage unit
//! (e.g. Kelvin, mbar). The parameter schema names the unit that should be
//! exported; [`convert`] bridges the two for units of the same dimension.

/// Physical dimension of a unit. Conversion is only defined within one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Temperature,
    Pressure,
    Voltage,
    Current,
    Length,
    Time,
    Frequency,
    Power,
    Ratio,
}

/// `base = value * scale + offset`
struct UnitDef {
    symbol: &'static str,
    dimension: Dimension,
    scale: f64,
    offset: f64,
}

const TORR_IN_PA: f64 = 101_325.0 / 760.0;

const UNITS: &[UnitDef] = &[
    // Temperature, base K
    UnitDef { symbol: "K", dimension: Dimension::Temperature, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "°C", dimension: Dimension::Temperature, scale: 1.0, offset: 273.15 },
    UnitDef {
        symbol: "°F",
        dimension: Dimension::Temperature,
        scale: 5.0 / 9.0,
        offset: 273.15 - 32.0 * 5.0 / 9.0,
    },
    // Pressure, base Pa
    UnitDef { symbol: "Pa", dimension: Dimension::Pressure, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "mPa", dimension: Dimension::Pressure, scale: 1e-3, offset: 0.0 },
    UnitDef { symbol: "hPa", dimension: Dimension::Pressure, scale: 1e2, offset: 0.0 },
    UnitDef { symbol: "kPa", dimension: Dimension::Pressure, scale: 1e3, offset: 0.0 },
    UnitDef { symbol: "MPa", dimension: Dimension::Pressure, scale: 1e6, offset: 0.0 },
    UnitDef { symbol: "mbar", dimension: Dimension::Pressure, scale: 1e2, offset: 0.0 },
    UnitDef { symbol: "bar", dimension: Dimension::Pressure, scale: 1e5, offset: 0.0 },
    UnitDef { symbol: "Torr", dimension: Dimension::Pressure, scale: TORR_IN_PA, offset: 0.0 },
    UnitDef { symbol: "mTorr", dimension: Dimension::Pressure, scale: TORR_IN_PA * 1e-3, offset: 0.0 },
    UnitDef { symbol: "psi", dimension: Dimension::Pressure, scale: 6_894.757_293_168, offset: 0.0 },
    // Voltage, base V
    UnitDef { symbol: "V", dimension: Dimension::Voltage, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "uV", dimension: Dimension::Voltage, scale: 1e-6, offset: 0.0 },
    UnitDef { symbol: "mV", dimension: Dimension::Voltage, scale: 1e-3, offset: 0.0 },
    UnitDef { symbol: "kV", dimension: Dimension::Voltage, scale: 1e3, offset: 0.0 },
    // Current, base A
    UnitDef { symbol: "A", dimension: Dimension::Current, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "mA", dimension: Dimension::Current, scale: 1e-3, offset: 0.0 },
    UnitDef { symbol: "uA", dimension: Dimension::Current, scale: 1e-6, offset: 0.0 },
    UnitDef { symbol: "nA", dimension: Dimension::Current, scale: 1e-9, offset: 0.0 },
    UnitDef { symbol: "pA", dimension: Dimension::Current, scale: 1e-12, offset: 0.0 },
    // Length, base m
    UnitDef { symbol: "m", dimension: Dimension::Length, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "mm", dimension: Dimension::Length, scale: 1e-3, offset: 0.0 },
    UnitDef { symbol: "um", dimension: Dimension::Length, scale: 1e-6, offset: 0.0 },
    UnitDef { symbol: "nm", dimension: Dimension::Length, scale: 1e-9, offset: 0.0 },
    UnitDef { symbol: "Å", dimension: Dimension::Length, scale: 1e-10, offset: 0.0 },
    // Time, base s
    UnitDef { symbol: "s", dimension: Dimension::Time, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "ms", dimension: Dimension::Time, scale: 1e-3, offset: 0.0 },
    UnitDef { symbol: "us", dimension: Dimension::Time, scale: 1e-6, offset: 0.0 },
    UnitDef { symbol: "min", dimension: Dimension::Time, scale: 60.0, offset: 0.0 },
    UnitDef { symbol: "h", dimension: Dimension::Time, scale: 3_600.0, offset: 0.0 },
    // Frequency, base Hz
    UnitDef { symbol: "Hz", dimension: Dimension::Frequency, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "kHz", dimension: Dimension::Frequency, scale: 1e3, offset: 0.0 },
    UnitDef { symbol: "MHz", dimension: Dimension::Frequency, scale: 1e6, offset: 0.0 },
    // Power, base W
    UnitDef { symbol: "W", dimension: Dimension::Power, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "mW", dimension: Dimension::Power, scale: 1e-3, offset: 0.0 },
    UnitDef { symbol: "kW", dimension: Dimension::Power, scale: 1e3, offset: 0.0 },
    // Ratio, base fraction
    UnitDef { symbol: "fraction", dimension: Dimension::Ratio, scale: 1.0, offset: 0.0 },
    UnitDef { symbol: "%", dimension: Dimension::Ratio, scale: 1e-2, offset: 0.0 },
    UnitDef { symbol: "ppm", dimension: Dimension::Ratio, scale: 1e-6, offset: 0.0 },
];

/// Normalize a unit symbol to its canonical spelling.
///
/// Unknown units are returned trimmed but otherwise unchanged, so two
/// identical unknown units still compare equal.
pub fn normalize(unit: &str) -> String {
    let trimmed = unit.trim();
    let canonical = match trimmed {
        "C" | "degC" | "deg C" | "ºC" | "Celsius" | "celsius" => "°C",
        "F" | "degF" | "deg F" | "ºF" | "Fahrenheit" | "fahrenheit" => "°F",
        "Kelvin" | "kelvin" | "degK" => "K",
        "pa" | "Pascal" | "pascal" => "Pa",
        "mBar" | "mb" => "mbar",
        "torr" => "Torr",
        "mtorr" | "mTORR" => "mTorr",
        "volt" | "Volt" => "V",
        "ampere" | "Ampere" | "amp" => "A",
        "sec" | "secs" | "seconds" => "s",
        "A°" | "Angstrom" | "angstrom" => "Å",
        "percent" | "pct" => "%",
        "ratio" | "1" => "fraction",
        other => other,
    };

    // Both the micro sign and the Greek mu are spelled as "u".
    canonical.replace(['\u{00B5}', '\u{03BC}'], "u")
}

fn lookup(unit: &str) -> Option<&'static UnitDef> {
    let normalized = normalize(unit);
    UNITS.iter().find(|def| def.symbol == normalized)
}

/// Check whether two unit spellings denote the same unit.
pub fn same_unit(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Convert `value` from unit `from` to unit `to`.
///
/// Returns `None` when the units belong to different dimensions or either
/// unit is unknown (and not identical to the other).
pub fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
    if same_unit(from, to) {
        return Some(value);
    }

    let from = lookup(from)?;
    let to = lookup(to)?;
    if from.dimension != to.dimension {
        return None;
    }

    let base = value * from.scale + from.offset;
    Some((base - to.offset) / to.scale)
}
