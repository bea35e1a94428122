//! Room geometry helpers that turn dimensions into the area handed to the
//! calculator.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{Error, Result};

/// Surface of a room to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Floor,
    Walls,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::Floor => write!(f, "floor"),
            Surface::Walls => write!(f, "walls"),
        }
    }
}

impl FromStr for Surface {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "floor" => Ok(Surface::Floor),
            "wall" | "walls" => Ok(Surface::Walls),
            other => Err(Error::InvalidDimensions(format!(
                "unknown surface '{other}', expected 'floor' or 'walls'"
            ))),
        }
    }
}

/// Rectangular room dimensions in metres. Door and window areas are in square
/// metres and only matter for walls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub length: Decimal,
    pub width: Decimal,
    pub height: Option<Decimal>,
    pub door_area: Decimal,
    pub window_area: Decimal,
}

impl Room {
    /// Room with no known height and no openings.
    pub fn new(length: Decimal, width: Decimal) -> Self {
        Self {
            length,
            width,
            height: None,
            door_area: Decimal::ZERO,
            window_area: Decimal::ZERO,
        }
    }

    /// Ceiling height, needed for wall area.
    pub fn with_height(mut self, height: Decimal) -> Self {
        self.height = Some(height);
        self
    }

    /// Total door and window area deducted from the walls.
    pub fn with_openings(mut self, door_area: Decimal, window_area: Decimal) -> Self {
        self.door_area = door_area;
        self.window_area = window_area;
        self
    }

    /// Length of all four walls together.
    pub fn perimeter(&self) -> Result<Decimal> {
        self.length
            .checked_add(self.width)
            .and_then(|sum| sum.checked_mul(Decimal::TWO))
            .ok_or_else(too_large)
    }

    /// Area of the requested surface.
    pub fn area(&self, surface: Surface) -> Result<Decimal> {
        match surface {
            Surface::Floor => floor_area(self.length, self.width),
            Surface::Walls => {
                let height = self.height.ok_or_else(|| {
                    Error::InvalidDimensions("wall area needs the room height".into())
                })?;
                if self.length <= Decimal::ZERO || self.width <= Decimal::ZERO {
                    return Err(Error::InvalidDimensions(
                        "length and width must be positive".into(),
                    ));
                }
                wall_area(self.perimeter()?, height, self.door_area, self.window_area)
            }
        }
    }

    /// Short human description, used as the default note of room calculations.
    pub fn describe(&self, surface: Surface) -> String {
        match (surface, self.height) {
            (Surface::Walls, Some(height)) => format!(
                "walls {} x {} x {} m",
                self.length, self.width, height
            ),
            _ => format!("{surface} {} x {} m", self.length, self.width),
        }
    }
}

/// Floor area of a rectangle; both sides must be positive.
pub fn floor_area(length: Decimal, width: Decimal) -> Result<Decimal> {
    if length <= Decimal::ZERO || width <= Decimal::ZERO {
        return Err(Error::InvalidDimensions(
            "length and width must be positive".into(),
        ));
    }
    length.checked_mul(width).ok_or_else(too_large)
}

/// Wall area minus doors and windows.
pub fn wall_area(
    perimeter: Decimal,
    height: Decimal,
    door_area: Decimal,
    window_area: Decimal,
) -> Result<Decimal> {
    if perimeter <= Decimal::ZERO || height <= Decimal::ZERO {
        return Err(Error::InvalidDimensions(
            "perimeter and height must be positive".into(),
        ));
    }
    if door_area < Decimal::ZERO || window_area < Decimal::ZERO {
        return Err(Error::InvalidDimensions(
            "door and window areas must not be negative".into(),
        ));
    }

    let openings = door_area.checked_add(window_area).ok_or_else(too_large)?;
    let area = perimeter
        .checked_mul(height)
        .and_then(|gross| gross.checked_sub(openings))
        .ok_or_else(too_large)?;
    if area <= Decimal::ZERO {
        return Err(Error::InvalidDimensions(format!(
            "openings ({openings}) leave no wall area"
        )));
    }
    Ok(area)
}

fn too_large() -> Error {
    Error::InvalidDimensions("dimensions are too large to compute an area".into())
}
