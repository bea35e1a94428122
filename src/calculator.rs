//! Pure quantity and cost computation.
//!
//! Everything here is decimal arithmetic with a fixed rounding policy:
//! round-half-up (midpoint away from zero; inputs are never negative) to the
//! configured number of decimal places, with the result scale pinned to that
//! precision. The same inputs therefore always produce the same digits.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Error, Result};
use crate::models::{Estimate, Material, Quote};

/// Decimal places used when none are configured.
pub const DEFAULT_PRECISION: u32 = 2;
/// Upper bound accepted for the precision setting.
pub const MAX_PRECISION: u32 = 10;

/// Stateless apart from its precision; cheap to copy into every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calculator {
    precision: u32,
}

impl Default for Calculator {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
        }
    }
}

impl Calculator {
    /// Calculator rounding to `precision` places. Anything above
    /// [`MAX_PRECISION`] is rejected up front so results never depend on how
    /// far a large value can be rescaled.
    pub fn new(precision: u32) -> Result<Self> {
        if precision > MAX_PRECISION {
            return Err(Error::InvalidPrecision(precision));
        }
        Ok(Self { precision })
    }

    /// Decimal places applied to units, costs and averages.
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Waste-adjusted units and their cost for `requested_quantity` of
    /// `material`.
    pub fn compute(&self, material: &Material, requested_quantity: Decimal) -> Result<Estimate> {
        if requested_quantity <= Decimal::ZERO {
            return Err(Error::invalid_quantity(
                requested_quantity,
                "quantity must be greater than zero",
            ));
        }
        material.validate()?;

        let factor = Decimal::ONE
            .checked_add(material.waste_factor)
            .ok_or_else(|| Error::invalid_quantity(requested_quantity, "waste factor overflow"))?;
        let raw_units = requested_quantity
            .checked_mul(factor)
            .ok_or_else(|| Error::invalid_quantity(requested_quantity, "quantity too large"))?;
        let total_units = self.round(raw_units)?;

        let raw_cost = total_units
            .checked_mul(material.unit_cost)
            .ok_or_else(|| Error::invalid_quantity(requested_quantity, "cost too large"))?;
        let total_cost = self.round(raw_cost)?;

        Ok(Estimate {
            total_units,
            total_cost,
        })
    }

    /// Estimate every material for the same quantity, cheapest first. Ties
    /// keep a stable order by material id.
    pub fn compare(&self, materials: &[Material], requested_quantity: Decimal) -> Result<Vec<Quote>> {
        if materials.is_empty() {
            return Err(Error::NoMaterials);
        }

        let mut quotes = materials
            .iter()
            .map(|material| {
                self.compute(material, requested_quantity)
                    .map(|estimate| Quote {
                        material: material.clone(),
                        estimate,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        quotes.sort_by(|a, b| {
            a.estimate
                .total_cost
                .cmp(&b.estimate.total_cost)
                .then_with(|| a.material.id.cmp(&b.material.id))
        });
        Ok(quotes)
    }

    /// Apply the rounding policy. Values too large to carry `precision`
    /// decimal places are an [`Error::Overflow`] rather than a silently
    /// shorter scale.
    pub fn round(&self, value: Decimal) -> Result<Decimal> {
        let mut rounded =
            value.round_dp_with_strategy(self.precision, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(self.precision);
        if rounded.scale() != self.precision {
            return Err(Error::Overflow(format!(
                "{value} cannot be represented with {} decimal places",
                self.precision
            )));
        }
        Ok(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn brick() -> Material {
        Material::new("brick", "Red Brick", "piece", dec("0.50")).with_waste_factor(dec("0.05"))
    }

    #[test]
    fn brick_scenario() {
        let estimate = Calculator::default().compute(&brick(), dec("100")).unwrap();
        assert_eq!(estimate.total_units.to_string(), "105.00");
        assert_eq!(estimate.total_cost.to_string(), "52.50");
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected() {
        let calc = Calculator::default();
        for q in ["0", "-1", "-0.001"] {
            let err = calc.compute(&brick(), dec(q)).unwrap_err();
            assert!(matches!(err, Error::InvalidQuantity { .. }), "{q}: {err}");
        }
    }

    #[test]
    fn midpoint_rounds_up() {
        let calc = Calculator::default();
        let m = Material::new("tile", "Tile", "m2", dec("1"));
        let estimate = calc.compute(&m, dec("0.125")).unwrap();
        assert_eq!(estimate.total_units, dec("0.13"));

        let estimate = calc.compute(&m, dec("0.124")).unwrap();
        assert_eq!(estimate.total_units, dec("0.12"));
    }

    #[test]
    fn cost_uses_rounded_units() {
        // 3 * 1.1 = 3.3 units, 3.3 * 0.333 = 1.0989 -> 1.10
        let m = Material::new("paint", "Paint", "l", dec("0.333")).with_waste_factor(dec("0.1"));
        let estimate = Calculator::default().compute(&m, dec("3")).unwrap();
        assert_eq!(estimate.total_units.to_string(), "3.30");
        assert_eq!(estimate.total_cost.to_string(), "1.10");
    }

    #[test]
    fn repeated_calls_are_identical() {
        let calc = Calculator::new(4).unwrap();
        let m = Material::new("grout", "Grout", "kg", dec("2.7182")).with_waste_factor(dec("0.0713"));
        let first = calc.compute(&m, dec("17.3")).unwrap();
        for _ in 0..100 {
            assert_eq!(calc.compute(&m, dec("17.3")).unwrap(), first);
        }
        assert_eq!(first.total_units.scale(), 4);
    }

    #[test]
    fn precision_zero_gives_whole_units() {
        let calc = Calculator::new(0).unwrap();
        let estimate = calc.compute(&brick(), dec("10")).unwrap();
        // 10.5 rounds half up
        assert_eq!(estimate.total_units.to_string(), "11");
        assert_eq!(estimate.total_cost.to_string(), "6");
    }

    #[test]
    fn precision_above_limit_is_rejected() {
        assert!(matches!(
            Calculator::new(11),
            Err(Error::InvalidPrecision(11))
        ));
    }

    #[test]
    fn extreme_waste_material_is_computed() {
        let m = Material::new("glass", "Glass", "m2", dec("10"))
            .with_waste_factor(dec("1.5"))
            .allowing_extreme_waste();
        let estimate = Calculator::default().compute(&m, dec("2")).unwrap();
        assert_eq!(estimate.total_units, dec("5"));
        assert_eq!(estimate.total_cost, dec("50"));
    }

    #[test]
    fn compare_sorts_cheapest_first() {
        let cheap = Material::new("laminate", "Laminate", "m2", dec("8"));
        let pricey = Material::new("parquet", "Parquet", "m2", dec("25"));
        let quotes = Calculator::default()
            .compare(&[pricey, cheap], dec("20"))
            .unwrap();
        let ids: Vec<_> = quotes.iter().map(|q| q.material.id.as_str()).collect();
        assert_eq!(ids, ["laminate", "parquet"]);
    }

    #[test]
    fn huge_quantity_cannot_keep_its_scale() {
        let m = Material::new("ballast", "Ballast", "kg", dec("1"));
        let err = Calculator::default()
            .compute(&m, dec("50000000000000000000000000000"))
            .unwrap_err();
        assert!(matches!(err, Error::Overflow(_)), "{err}");
    }

    #[test]
    fn round_pins_scale() {
        let calc = Calculator::new(3).unwrap();
        assert_eq!(calc.round(dec("7")).unwrap().to_string(), "7.000");
        assert!(matches!(calc.round(Decimal::MAX), Err(Error::Overflow(_))));
    }

    #[test]
    fn compare_requires_materials() {
        assert!(matches!(
            Calculator::default().compare(&[], dec("1")),
            Err(Error::NoMaterials)
        ));
    }
}
