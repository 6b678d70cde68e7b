//! # Tide Coupler Core Library
//!
//! This library couples a hydrodynamic model ("hydro") with a sequence
//! predictor ("surrogate") so that either one can drive the other's boundary
//! conditions. The two models step with their own clocks and native time
//! steps, and report in their own physical units; the library reconciles both.
//!
//! ## Design Philosophy
//!
//! ### Explicit Coupling State
//! - **One owner**: the [`scheduler::CouplingScheduler`] owns the clocks, the
//!   exchange records and the feedback buffer. Nothing lives in globals.
//! - **Copies across the boundary**: each model receives a copy of the
//!   exchanged values ([`model::BoundarySeries`], [`model::SeriesWindow`]),
//!   never a reference into the other side's state.
//!
//! ### Time Reconciliation
//! The driving model advances by a *super-step*: the smallest multiple of its
//! native step that keeps it ahead of the driven model's next requested time
//! (see [`planner`]). The driven model then sub-steps to catch up, reading the
//! two-point boundary series written by [`exchange`].
//!
//! ### Data Flow
//! 1. **Plan**: compute the super-step for the driving side
//! 2. **Drive**: step the driving model, reduce its clock and scalar over ranks
//! 3. **Exchange**: convert the scalar into the driven model's boundary series
//! 4. **Follow**: step the driven model for the matching number of sub-steps
//! 5. **Feedback** (two-way only): aggregate the driven boundary state and feed
//!    it back to the driving model through a rolling [`time_series`] window
//!
//! ## Core Types
//!
//! - [`Quantity`]: the coupled physical quantity (elevation or flux)
//! - [`Side`]: which of the two models a value belongs to
//! - [`CouplingMode`]: the four coupling topologies, parsed from the CLI codes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Module declarations
pub mod collective;
pub mod config;
pub mod error;
pub mod exchange;
pub mod feedback;
pub mod model;
pub mod planner;
pub mod renderer;
pub mod report;
pub mod scheduler;
pub mod synthetic;
pub mod time_series;

pub use error::CouplingError;

/// Physical quantity carried across the coupled boundary.
///
/// Elevations pass through the exchange unchanged (both sides in meters once
/// the adapter has applied its length factor). Fluxes are aggregate discharges
/// on the driving side and are spread over the coupled boundary length to give
/// a per-unit-width rate on the driven side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    /// Water surface elevation (m)
    Elevation,
    /// Discharge (m³/s aggregate, m²/s per unit width after exchange)
    Flux,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Elevation => write!(f, "elevation"),
            Quantity::Flux => write!(f, "flux"),
        }
    }
}

/// One of the two coupled models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Hydro,
    Surrogate,
}

impl Side {
    /// The other model.
    pub fn other(self) -> Side {
        match self {
            Side::Hydro => Side::Surrogate,
            Side::Surrogate => Side::Hydro,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Hydro => write!(f, "hydro"),
            Side::Surrogate => write!(f, "surrogate"),
        }
    }
}

/// Coupling topology.
///
/// The variant names describe the role split, the CLI codes come from the
/// order in which the models appear (`A` = hydro, `dn` = surrogate):
///
/// | Variant | CLI code | Driving side | Feedback |
/// |---|---|---|---|
/// | `DrivenByDriving` | `ndA` | surrogate | no |
/// | `DrivingByDriven` | `Adn` | hydro | no |
/// | `TwoWayDrivenFirst` | `ndAdn` | surrogate | hydro → surrogate |
/// | `TwoWayDrivingFirst` | `AdndA` | hydro | surrogate → hydro |
///
/// # Example
/// ```
/// use tide_coupler_lib::{CouplingMode, Side};
///
/// let mode: CouplingMode = "ndAdn".parse().unwrap();
/// assert_eq!(mode, CouplingMode::TwoWayDrivenFirst);
/// assert_eq!(mode.driving_side(), Side::Surrogate);
/// assert!(mode.is_two_way());
/// assert!("AnA".parse::<CouplingMode>().is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouplingMode {
    DrivenByDriving,
    DrivingByDriven,
    TwoWayDrivenFirst,
    TwoWayDrivingFirst,
}

impl CouplingMode {
    pub const ALL: [CouplingMode; 4] = [
        CouplingMode::DrivenByDriving,
        CouplingMode::DrivingByDriven,
        CouplingMode::TwoWayDrivenFirst,
        CouplingMode::TwoWayDrivingFirst,
    ];

    /// The model whose output becomes the other model's boundary condition.
    pub fn driving_side(self) -> Side {
        match self {
            CouplingMode::DrivenByDriving | CouplingMode::TwoWayDrivenFirst => Side::Surrogate,
            CouplingMode::DrivingByDriven | CouplingMode::TwoWayDrivingFirst => Side::Hydro,
        }
    }

    /// The model stepping behind and consuming the exchanged boundary.
    pub fn driven_side(self) -> Side {
        self.driving_side().other()
    }

    pub fn is_two_way(self) -> bool {
        match self {
            CouplingMode::DrivenByDriving | CouplingMode::DrivingByDriven => false,
            CouplingMode::TwoWayDrivenFirst | CouplingMode::TwoWayDrivingFirst => true,
        }
    }

    /// Command-line code of the mode.
    pub fn code(self) -> &'static str {
        match self {
            CouplingMode::DrivenByDriving => "ndA",
            CouplingMode::DrivingByDriven => "Adn",
            CouplingMode::TwoWayDrivenFirst => "ndAdn",
            CouplingMode::TwoWayDrivingFirst => "AdndA",
        }
    }

    /// Human readable run banner.
    pub fn description(self) -> &'static str {
        match self {
            CouplingMode::DrivenByDriving => "surrogate driving hydro, one-way coupling",
            CouplingMode::DrivingByDriven => "hydro driving surrogate, one-way coupling",
            CouplingMode::TwoWayDrivenFirst => {
                "surrogate driving hydro driving surrogate, two-way coupling"
            }
            CouplingMode::TwoWayDrivingFirst => {
                "hydro driving surrogate driving hydro, two-way coupling"
            }
        }
    }
}

impl FromStr for CouplingMode {
    type Err = CouplingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CouplingMode::ALL
            .into_iter()
            .find(|mode| mode.code() == s)
            .ok_or_else(|| CouplingError::UnknownCouplingMode(s.to_string()))
    }
}

impl fmt::Display for CouplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes_roundtrip() {
        for mode in CouplingMode::ALL {
            assert_eq!(mode.code().parse::<CouplingMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = "ndAA".parse::<CouplingMode>().unwrap_err();
        assert!(matches!(err, CouplingError::UnknownCouplingMode(ref s) if s == "ndAA"));
        // Codes are case sensitive
        assert!("ADN".parse::<CouplingMode>().is_err());
    }

    #[test]
    fn test_roles() {
        assert_eq!(CouplingMode::DrivenByDriving.driving_side(), Side::Surrogate);
        assert_eq!(CouplingMode::DrivenByDriving.driven_side(), Side::Hydro);
        assert_eq!(CouplingMode::DrivingByDriven.driving_side(), Side::Hydro);
        assert_eq!(CouplingMode::TwoWayDrivingFirst.driven_side(), Side::Surrogate);
        assert!(!CouplingMode::DrivingByDriven.is_two_way());
        assert!(CouplingMode::TwoWayDrivingFirst.is_two_way());
    }
}
