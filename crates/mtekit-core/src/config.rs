//! Build configuration for tag and alignment checking.
//!
//! Checking is selected with cargo features and resolved into
//! [`MteConfig::BUILD`] at compile time:
//! - `tag-checks`: tag values above 15 are a contract violation. Without it
//!   only the low 4 bits of a tag are used.
//! - `align-checks`: granule alignment contracts are enforced.
//! - `relaxed-align-checks`: like `align-checks`, but only the critical
//!   checks run (the ones guarding instructions that fault on misalignment).
//! - `double-granule`: region operations may use the 32-byte instructions.
//!
//! A [`MteConfig`] is a plain `Copy` value. Consumers capture it once (a
//! `Tagger` stores one) so the hot path only reads fields.

use crate::contract::Criticality;

/// Which alignment contracts are enforced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlignmentChecks {
    /// Every alignment contract is checked.
    #[default]
    Full,
    /// Only critical contracts are checked. Advisory ones (misalignment that
    /// merely over-tags) are skipped.
    Relaxed,
    /// Nothing is checked. Misaligned input reaching a faulting instruction
    /// is the caller's explicit risk.
    Off,
}

impl AlignmentChecks {
    /// Parse from string (case-insensitive). `None` for an unknown level.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "strict" | "on" | "all" => Some(Self::Full),
            "relaxed" | "critical" | "critical-only" => Some(Self::Relaxed),
            "off" | "none" | "disabled" => Some(Self::Off),
            _ => None,
        }
    }

    /// [`Self::parse`], falling back to `Full` for unknown input.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Full)
    }

    /// Canonical lowercase name, the inverse of [`Self::from_str_loose`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Relaxed => "relaxed",
            Self::Off => "off",
        }
    }

    /// Returns true if checks guarding faulting instructions run.
    #[must_use]
    pub const fn enforces_critical(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns true if checks that only prevent over-tagging run.
    #[must_use]
    pub const fn enforces_advisory(self) -> bool {
        matches!(self, Self::Full)
    }

    #[must_use]
    pub const fn enforces(self, criticality: Criticality) -> bool {
        match criticality {
            Criticality::Critical => self.enforces_critical(),
            Criticality::Advisory => self.enforces_advisory(),
        }
    }

    const fn from_features() -> Self {
        if !cfg!(feature = "align-checks") {
            Self::Off
        } else if cfg!(feature = "relaxed-align-checks") {
            Self::Relaxed
        } else {
            Self::Full
        }
    }
}

/// Resolved checking and fast-path configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MteConfig {
    /// Range-check tag arguments.
    pub tag_checks: bool,
    /// Alignment contract enforcement.
    pub alignment: AlignmentChecks,
    /// Allow the double-granule instructions. Only effective on backends
    /// that provide them.
    pub double_granule: bool,
}

impl MteConfig {
    /// Configuration selected by this build's cargo features.
    pub const BUILD: Self = Self {
        tag_checks: cfg!(feature = "tag-checks"),
        alignment: AlignmentChecks::from_features(),
        double_granule: cfg!(feature = "double-granule"),
    };

    /// Every check on, fast path on.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            tag_checks: true,
            alignment: AlignmentChecks::Full,
            double_granule: true,
        }
    }

    /// Trusted-caller build: no checks at all.
    #[must_use]
    pub const fn unchecked() -> Self {
        Self {
            tag_checks: false,
            alignment: AlignmentChecks::Off,
            double_granule: true,
        }
    }

    #[must_use]
    pub const fn with_tag_checks(mut self, enabled: bool) -> Self {
        self.tag_checks = enabled;
        self
    }

    #[must_use]
    pub const fn with_alignment(mut self, alignment: AlignmentChecks) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub const fn with_double_granule(mut self, enabled: bool) -> Self {
        self.double_granule = enabled;
        self
    }
}

impl Default for MteConfig {
    fn default() -> Self {
        Self::BUILD
    }
}
