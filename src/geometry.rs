use crate::error::InkspreadError;
use crate::types::{Margins, Pt, Size};
use std::str::FromStr;

/// Bleed extends artwork 0.125 in past the trim line on every edge.
pub const BLEED_IN: f32 = 0.125;

/// Final cut dimensions of a printed page, excluding bleed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimSize {
    SixByNine,
    EightByTen,
    EightHalfByEleven,
}

impl TrimSize {
    pub fn inches(self) -> (f32, f32) {
        match self {
            TrimSize::SixByNine => (6.0, 9.0),
            TrimSize::EightByTen => (8.0, 10.0),
            TrimSize::EightHalfByEleven => (8.5, 11.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrimSize::SixByNine => "6x9",
            TrimSize::EightByTen => "8x10",
            TrimSize::EightHalfByEleven => "8.5x11",
        }
    }
}

impl FromStr for TrimSize {
    type Err = InkspreadError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('"', "").as_str() {
            "6x9" => Ok(TrimSize::SixByNine),
            "8x10" => Ok(TrimSize::EightByTen),
            "8.5x11" => Ok(TrimSize::EightHalfByEleven),
            other => Err(InkspreadError::InvalidConfiguration(format!(
                "unsupported trim size: {other}"
            ))),
        }
    }
}

/// Margin settings in inches. `inner` hugs the spine, `outer` faces the
/// page edge; the physical left/right assignment depends on page parity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginSpec {
    pub top: f32,
    pub bottom: f32,
    pub inner: f32,
    pub outer: f32,
    pub safe_zone: f32,
}

impl Default for MarginSpec {
    fn default() -> Self {
        Self {
            top: 0.75,
            bottom: 0.75,
            inner: 0.875,
            outer: 0.5,
            safe_zone: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintConfig {
    pub trim_size: TrimSize,
    pub has_bleed: bool,
    pub margins: MarginSpec,
}

impl PrintConfig {
    pub fn new(trim_size: TrimSize, has_bleed: bool) -> Self {
        Self {
            trim_size,
            has_bleed,
            margins: MarginSpec::default(),
        }
    }

    /// Fatal pre-build check. A build must never start from a config that
    /// would emit malformed pages.
    pub fn validate(&self) -> Result<(), InkspreadError> {
        let m = &self.margins;
        for (name, value) in [
            ("top", m.top),
            ("bottom", m.bottom),
            ("inner", m.inner),
            ("outer", m.outer),
            ("safe_zone", m.safe_zone),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(InkspreadError::InvalidConfiguration(format!(
                    "margin `{name}` must be a non-negative number, got {value}"
                )));
            }
        }
        let (trim_w, trim_h) = self.trim_size.inches();
        if m.inner + m.outer >= trim_w {
            return Err(InkspreadError::InvalidConfiguration(format!(
                "inner+outer margins ({}) exceed trim width ({trim_w})",
                m.inner + m.outer
            )));
        }
        if m.top + m.bottom >= trim_h {
            return Err(InkspreadError::InvalidConfiguration(format!(
                "top+bottom margins ({}) exceed trim height ({trim_h})",
                m.top + m.bottom
            )));
        }
        Ok(())
    }

    /// Physical page size in points: trim plus 0.25 in per axis when bleed
    /// is enabled (0.125 in per edge).
    pub fn page_size(&self) -> Size {
        let (w, h) = self.trim_size.inches();
        if self.has_bleed {
            Size::from_inches(w + 2.0 * BLEED_IN, h + 2.0 * BLEED_IN)
        } else {
            Size::from_inches(w, h)
        }
    }
}

/// Page role under the print convention: odd 1-based page numbers are
/// recto (RIGHT), even are verso (LEFT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSide {
    Left,
    Right,
}

impl PageSide {
    pub fn of(page_number: usize) -> PageSide {
        if page_number % 2 == 0 {
            PageSide::Left
        } else {
            PageSide::Right
        }
    }
}

/// Mirrors inner/outer margins across the spine for the given 1-based page
/// number. Pure and deterministic; no error conditions.
pub fn resolved_margins(config: &PrintConfig, page_number: usize) -> Margins {
    let m = &config.margins;
    let (left_in, right_in) = match PageSide::of(page_number) {
        PageSide::Left => (m.outer, m.inner),
        PageSide::Right => (m.inner, m.outer),
    };
    Margins {
        top: Pt::from_inches(m.top),
        right: Pt::from_inches(right_in),
        bottom: Pt::from_inches(m.bottom),
        left: Pt::from_inches(left_in),
    }
}
