// Amplicon sizing policy: maps a named amplicon preset or explicit product-size
// bounds to the step size, product-size bounds and minimum distance-to-edit used
// for every site of a run.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PROD_SIZE_LOWER: i64 = 250;
pub const DEFAULT_PROD_SIZE_UPPER: i64 = 350;

/// Sequence retrieved around a cut site carries this many extra steps on each
/// side; the designer pulls them into the considered zone while relaxing.
pub const WINDOW_BUFFER_STEPS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmpliconMode {
    Short,
    Sanger,
    Long,
    Custom,
}

impl AmpliconMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "short" => Some(Self::Short),
            "sanger" => Some(Self::Sanger),
            "long" => Some(Self::Long),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Sanger => "sanger",
            Self::Long => "long",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AmpliconMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TmBounds {
    pub min: f64,
    pub opt: f64,
    pub max: f64,
}

impl Default for TmBounds {
    fn default() -> Self {
        Self {
            min: 57.0,
            opt: 60.0,
            max: 63.0,
        }
    }
}

/// Immutable sizing configuration, resolved once before any row is processed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmpliconConfig {
    pub mode: AmpliconMode,
    pub step_size: i64,
    pub prod_size_lower: i64,
    pub prod_size_upper: i64,
    pub min_dist_to_center: i64,
    pub tm: TmBounds,
}

/// Quadratic fit through the three preset anchors (250,40), (700,80), (3300,150).
pub fn compute_step_size(prod_size_lower: i64) -> i64 {
    let l = prod_size_lower as f64;
    (-29.0 / 1_427_400.0 * l * l + 15_443.0 / 142_740.0 * l + 33_835.0 / 2_379.0).round() as i64
}

pub fn min_dist_for_product_size(prod_size_lower: i64) -> i64 {
    if prod_size_lower >= 3300 {
        1000
    } else if prod_size_lower >= 2500 {
        700
    } else if prod_size_lower >= 1500 {
        300
    } else if prod_size_lower >= 700 {
        150
    } else {
        100
    }
}

impl AmpliconConfig {
    /// Resolves the run configuration. Explicit product-size bounds that differ
    /// from the defaults switch the mode to `Custom` and derive step size and
    /// min-dist from the lower bound; otherwise the preset supplies fixed
    /// values. Explicit bounds always win over preset bounds, and an explicit
    /// min-dist wins over whatever was derived.
    pub fn resolve(
        preset: AmpliconMode,
        explicit_lower: Option<i64>,
        explicit_upper: Option<i64>,
        min_dist_override: Option<i64>,
        tm: TmBounds,
    ) -> Result<Self, PipelineError> {
        let lower = explicit_lower.unwrap_or(DEFAULT_PROD_SIZE_LOWER);
        let upper = explicit_upper.unwrap_or(DEFAULT_PROD_SIZE_UPPER);

        let (mode, step_size, mut min_dist, mut size_lower, mut size_upper) =
            if lower != DEFAULT_PROD_SIZE_LOWER || upper != DEFAULT_PROD_SIZE_UPPER {
                (
                    AmpliconMode::Custom,
                    compute_step_size(lower),
                    min_dist_for_product_size(lower),
                    lower,
                    upper,
                )
            } else {
                match preset {
                    AmpliconMode::Short => (AmpliconMode::Short, 40, 100, 250, 350),
                    AmpliconMode::Sanger => (AmpliconMode::Sanger, 80, 100, 700, 900),
                    AmpliconMode::Long => (AmpliconMode::Long, 150, 1000, 3300, 3700),
                    AmpliconMode::Custom => (
                        AmpliconMode::Custom,
                        compute_step_size(lower),
                        min_dist_for_product_size(lower),
                        lower,
                        upper,
                    ),
                }
            };

        if explicit_lower.is_some() || explicit_upper.is_some() {
            size_lower = lower;
            size_upper = upper;
        }

        if size_lower > size_upper {
            return Err(PipelineError::config(format!(
                "product size lower bound ({size_lower}) is greater than upper bound ({size_upper})"
            )));
        }

        if let Some(dist) = min_dist_override {
            min_dist = dist;
        }

        Ok(Self {
            mode,
            step_size,
            prod_size_lower: size_lower,
            prod_size_upper: size_upper,
            min_dist_to_center: min_dist,
            tm,
        })
    }

    #[inline(always)]
    pub fn window_buffer(&self) -> i64 {
        self.step_size * WINDOW_BUFFER_STEPS
    }
}

/// Genomic interval handed to the sequence service for one cut site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub left: i64,
    pub right: i64,
}

impl SearchWindow {
    pub fn around(coordinate: i64, config: &AmpliconConfig) -> Self {
        let half = config.prod_size_upper / 2;
        let buffer = config.window_buffer();
        Self {
            left: coordinate - half - buffer,
            right: coordinate + half + buffer,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> i64 {
        self.right - self.left + 1
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.right < self.left
    }
}
