//! Price Animation
//!
//! Smooths discrete price updates into continuous motion. Each visual
//! series owns one [`PriceAnimator`]; the render loop calls
//! [`PriceAnimator::update`] once per frame and draws the returned value.

use std::fmt;
use std::str::FromStr;

/// Default interpolation speed.
pub const DEFAULT_SPEED: f64 = 0.15;

/// Default convergence/noise threshold.
pub const DEFAULT_MIN_DIFFERENCE: f64 = 0.0001;

// =============================================================================
// Easing
// =============================================================================

/// Interpolation curve applied to the animator speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Easing {
    /// `s`
    Linear,
    /// `s * (2 - s)`
    #[default]
    EaseOut,
    /// `2s²` below one half, `-1 + (4 - 2s)s` above.
    EaseInOut,
}

impl Easing {
    /// Apply the curve to `s`.
    #[must_use]
    pub fn apply(&self, s: f64) -> f64 {
        match self {
            Self::Linear => s,
            Self::EaseOut => s * (2.0 - s),
            Self::EaseInOut => {
                if s < 0.5 {
                    2.0 * s * s
                } else {
                    (4.0 - 2.0 * s).mul_add(s, -1.0)
                }
            }
        }
    }

    /// Configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::EaseOut => "easeOut",
            Self::EaseInOut => "easeInOut",
        }
    }
}

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown easing name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown easing: {0}")]
pub struct UnknownEasing(pub String);

impl FromStr for Easing {
    type Err = UnknownEasing;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "linear" => Ok(Self::Linear),
            "easeout" => Ok(Self::EaseOut),
            "easeinout" => Ok(Self::EaseInOut),
            _ => Err(UnknownEasing(s.to_string())),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Animator configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimatorConfig {
    /// Fraction of the remaining distance covered per update, in `(0, 1]`.
    pub speed: f64,
    /// Interpolation curve.
    pub easing: Easing,
    /// Differences below this are treated as noise or convergence.
    pub min_difference: f64,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            easing: Easing::default(),
            min_difference: DEFAULT_MIN_DIFFERENCE,
        }
    }
}

impl AnimatorConfig {
    /// Create a configuration tuned for an instrument's tick size.
    #[must_use]
    pub fn with_min_difference(mut self, min_difference: f64) -> Self {
        self.min_difference = min_difference;
        self
    }

    fn sanitized(self) -> Self {
        let speed = if self.speed.is_finite() && self.speed > 0.0 {
            self.speed.min(1.0)
        } else {
            DEFAULT_SPEED
        };
        let min_difference = if self.min_difference.is_finite() && self.min_difference >= 0.0 {
            self.min_difference
        } else {
            DEFAULT_MIN_DIFFERENCE
        };
        Self {
            speed,
            easing: self.easing,
            min_difference,
        }
    }
}

// =============================================================================
// Animator
// =============================================================================

/// Interpolates a displayed price toward a target price.
///
/// `update` must be called at most once per render tick; calling it more
/// often simply animates faster.
#[derive(Debug, Clone)]
pub struct PriceAnimator {
    config: AnimatorConfig,
    factor: f64,
    current: f64,
    target: f64,
    animating: bool,
}

impl PriceAnimator {
    /// Create an animator at rest at zero.
    #[must_use]
    pub fn new(config: AnimatorConfig) -> Self {
        let config = config.sanitized();
        Self {
            factor: config.easing.apply(config.speed),
            config,
            current: 0.0,
            target: 0.0,
            animating: false,
        }
    }

    /// Set a new target. Changes smaller than `min_difference` are ignored.
    pub fn set_target(&mut self, price: f64) {
        if !price.is_finite() || (price - self.target).abs() < self.config.min_difference {
            return;
        }
        self.target = price;
        self.animating = true;
    }

    /// Advance one frame and return the displayed value.
    pub fn update(&mut self) -> f64 {
        if !self.animating {
            return self.current;
        }

        let diff = self.target - self.current;
        if diff.abs() < self.config.min_difference {
            return self.snap();
        }

        let next = diff.mul_add(self.factor, self.current);
        // Below float resolution the step no longer moves the value.
        if next == self.current {
            return self.snap();
        }
        self.current = next;
        self.current
    }

    /// Jump to `price` without animating.
    pub fn set_direct(&mut self, price: f64) {
        self.current = price;
        self.target = price;
        self.animating = false;
    }

    /// Displayed value.
    #[must_use]
    pub const fn current(&self) -> f64 {
        self.current
    }

    /// Target value.
    #[must_use]
    pub const fn target(&self) -> f64 {
        self.target
    }

    /// Whether the animation is still converging.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.animating
    }

    /// Effective configuration after clamping.
    #[must_use]
    pub const fn config(&self) -> &AnimatorConfig {
        &self.config
    }

    fn snap(&mut self) -> f64 {
        self.current = self.target;
        self.animating = false;
        self.current
    }
}

impl Default for PriceAnimator {
    fn default() -> Self {
        Self::new(AnimatorConfig::default())
    }
}
