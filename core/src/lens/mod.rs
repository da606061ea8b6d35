//! Lazy, zero-copy transforms over series.
//!
//! A [`Lens`] borrows its source and applies a pure function at lookup time;
//! nothing is copied and absence propagates. Composition is function
//! composition. The server surface restricts transforms to the symbolic
//! [`Transform`] set so lens expressions can be listed, persisted and
//! composed at the protocol layer without closures.

use crate::storage::series::Series;
use crate::storage::{Label, TimeDomain, Value};

/// Anything that can answer a point query: a series or another lens.
pub trait Sample<Out> {
    fn at(&self, ts: i64) -> Option<Out>;
    fn domain(&self) -> TimeDomain;
}

impl<T: Value> Sample<T> for Series<T> {
    fn at(&self, ts: i64) -> Option<T> {
        Series::at(self, ts)
    }

    fn domain(&self) -> TimeDomain {
        Series::domain(self)
    }
}

/// A lazy pure transform over a source of `In` values.
pub struct Lens<'a, In, Out> {
    source: &'a dyn Sample<In>,
    f: fn(In) -> Out,
}

impl<'a, In, Out> Lens<'a, In, Out> {
    /// Builds a lens directly over a series.
    pub fn from_series(source: &'a Series<In>, f: fn(In) -> Out) -> Self
    where
        In: Value,
    {
        Lens { source, f }
    }

    /// Composes a new lens over an existing one: `g` is applied to the
    /// parent's output.
    pub fn compose<New>(parent: &'a Lens<'a, In, Out>, g: fn(Out) -> New) -> Lens<'a, Out, New> {
        Lens { source: parent, f: g }
    }

    /// Looks up `ts` in the source and applies the transform. Absence
    /// propagates untouched.
    pub fn at(&self, ts: i64) -> Option<Out> {
        self.source.at(ts).map(self.f)
    }

    /// The source's domain; a lens never narrows it.
    pub fn domain(&self) -> TimeDomain {
        self.source.domain()
    }
}

impl<'a, In, Out> Sample<Out> for Lens<'a, In, Out> {
    fn at(&self, ts: i64) -> Option<Out> {
        Lens::at(self, ts)
    }

    fn domain(&self) -> TimeDomain {
        Lens::domain(self)
    }
}

/// Feet per meter, the conversion factor fixed by the wire contract.
const FEET_PER_METER: f64 = 3.28084;
const KELVIN_OFFSET: f64 = 273.15;

/// The closed set of transforms nameable at the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    CelsiusToFahrenheit,
    FahrenheitToCelsius,
    CelsiusToKelvin,
    KelvinToCelsius,
    MetersToFeet,
    FeetToMeters,
    Returns,
    LogReturn,
}

impl Transform {
    /// Every transform, in wire-name order.
    pub const ALL: [Transform; 9] = [
        Transform::Identity,
        Transform::CelsiusToFahrenheit,
        Transform::FahrenheitToCelsius,
        Transform::CelsiusToKelvin,
        Transform::KelvinToCelsius,
        Transform::MetersToFeet,
        Transform::FeetToMeters,
        Transform::Returns,
        Transform::LogReturn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Transform::Identity => "identity",
            Transform::CelsiusToFahrenheit => "celsius_to_fahrenheit",
            Transform::FahrenheitToCelsius => "fahrenheit_to_celsius",
            Transform::CelsiusToKelvin => "celsius_to_kelvin",
            Transform::KelvinToCelsius => "kelvin_to_celsius",
            Transform::MetersToFeet => "meters_to_feet",
            Transform::FeetToMeters => "feet_to_meters",
            Transform::Returns => "returns",
            Transform::LogReturn => "log_return",
        }
    }

    pub fn from_name(name: &str) -> Option<Transform> {
        Transform::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Parses a 32-byte NUL-padded transform name from the wire.
    pub fn from_wire(bytes: &[u8]) -> Option<Transform> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let name = std::str::from_utf8(&bytes[..end]).ok()?;
        Transform::from_name(name)
    }

    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Transform::Identity => value,
            Transform::CelsiusToFahrenheit => value * 9.0 / 5.0 + 32.0,
            Transform::FahrenheitToCelsius => (value - 32.0) * 5.0 / 9.0,
            Transform::CelsiusToKelvin => value + KELVIN_OFFSET,
            Transform::KelvinToCelsius => value - KELVIN_OFFSET,
            Transform::MetersToFeet => value * FEET_PER_METER,
            Transform::FeetToMeters => value / FEET_PER_METER,
            // Stateless lenses cannot see the previous sample, so both
            // return transforms pass the value through.
            Transform::Returns | Transform::LogReturn => value,
        }
    }
}

/// A server-visible lens: a label, a source label (series or lens) and a
/// symbolic transform. Stored as a value, not a closure, so lenses can be
/// listed and composed over the wire.
#[derive(Debug, Clone, Copy)]
pub struct LensExpr {
    pub label: Label,
    pub source: Label,
    pub transform: Transform,
}
