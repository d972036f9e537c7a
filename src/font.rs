use crate::error::InkspreadError;
use crate::types::Pt;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Face used whenever a requested font cannot be resolved. The PDF writer
/// maps it to the base-14 Helvetica, the raster backend to a system face.
pub const FALLBACK_FONT: &str = "Helvetica";

/// Registry of caller-supplied TrueType/OpenType faces. Read-only after
/// initial load and shareable across concurrent builds.
#[derive(Debug, Default)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) metrics: FontMetrics,
}

/// Metrics pre-scaled to a 1000-unit em, the space PDF font dictionaries
/// use. Widths are indexed by WinAnsi code, 32..=255.
#[derive(Debug)]
pub(crate) struct FontMetrics {
    pub(crate) widths: Vec<u16>,
    pub(crate) missing_width: u16,
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) cap_height: i16,
    pub(crate) italic_angle: i16,
    pub(crate) bbox: (i16, i16, i16, i16),
}

pub(crate) const FIRST_CHAR: u8 = 32;
pub(crate) const LAST_CHAR: u8 = 255;

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;

        let mut widths = Vec::with_capacity((LAST_CHAR - FIRST_CHAR) as usize + 1);
        for code in FIRST_CHAR..=LAST_CHAR {
            let ch = winansi_char(code);
            let advance = face
                .glyph_index(ch)
                .and_then(|gid| face.glyph_hor_advance(gid))
                .unwrap_or(0);
            widths.push(scale_u16(advance, scale));
        }
        let missing_width = widths.first().copied().unwrap_or(0);

        let ascent = scale_i16(face.ascender(), scale);
        let bbox = face.global_bounding_box();
        Self {
            widths,
            missing_width,
            ascent,
            descent: scale_i16(face.descender(), scale),
            cap_height: face
                .capital_height()
                .map(|v| scale_i16(v, scale))
                .unwrap_or(ascent),
            italic_angle: face
                .italic_angle()
                .map(|v| v.round() as i16)
                .unwrap_or(0),
            bbox: (
                scale_i16(bbox.x_min, scale),
                scale_i16(bbox.y_min, scale),
                scale_i16(bbox.x_max, scale),
                scale_i16(bbox.y_max, scale),
            ),
        }
    }

    pub(crate) fn width_of(&self, ch: char) -> u16 {
        match winansi_code(ch) {
            Some(code) => self.widths[(code - FIRST_CHAR) as usize],
            None => self.missing_width,
        }
    }

    fn measure(&self, font_size: Pt, text: &str) -> Pt {
        let mut total_milli: i64 = 0;
        let size_milli = font_size.to_milli_i64();
        for ch in text.chars() {
            let w = self.width_of(ch) as i64;
            total_milli += (w * size_milli + 500) / 1000;
        }
        Pt::from_milli_i64(total_milli)
    }

    pub(crate) fn line_height(&self, font_size: Pt) -> Pt {
        let span = (self.ascent as i64 - self.descent as i64).max(1000);
        Pt::from_milli_i64((span * font_size.to_milli_i64() + 500) / 1000)
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                self.register_file(path);
            }
        }
    }

    /// Registers one .ttf/.otf file. Unreadable or unparsable files are
    /// skipped silently; a directory scan must not abort the load.
    pub fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        if !matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf") {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        let source = path
            .file_stem()
            .and_then(|v| v.to_str())
            .unwrap_or("font")
            .to_string();
        let _ = self.register_bytes(data, Some(&source));
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, InkspreadError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
            return Err(InkspreadError::Asset(format!(
                "invalid font data for {source}"
            )));
        };

        let mut aliases = face_names(&face);
        if aliases.is_empty() {
            aliases.push(source.to_string());
        }
        let name = aliases[0].clone();
        let metrics = FontMetrics::from_face(&face);
        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data,
            metrics,
        });

        for alias in aliases {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Ok(name)
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<&RegisteredFont> {
        self.lookup
            .get(&normalize_name(name))
            .and_then(|index| self.fonts.get(*index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Width of `text` at `font_size`. Unresolved names fall back to a
    /// 0.6 em per-character estimate so word-wrap stays usable without any
    /// registered fonts.
    pub fn measure_text_width(&self, name: &str, font_size: Pt, text: &str) -> Pt {
        match self.resolve(name) {
            Some(font) => font.metrics.measure(font_size, text),
            None => {
                let char_width = (font_size * 0.6).max(Pt::from_f32(1.0));
                char_width * (text.chars().count() as i32)
            }
        }
    }

    pub fn line_height(&self, name: &str, font_size: Pt, fallback: Pt) -> Pt {
        match self.resolve(name) {
            Some(font) => font.metrics.line_height(font_size).max(fallback),
            None => fallback,
        }
    }
}

fn face_names(face: &ttf_parser::Face<'_>) -> Vec<String> {
    use ttf_parser::name_id;
    let mut out = Vec::new();
    for id in [name_id::FULL_NAME, name_id::POST_SCRIPT_NAME, name_id::FAMILY] {
        for name in face.names() {
            if name.name_id != id || !name.is_unicode() {
                continue;
            }
            if let Some(value) = name.to_string() {
                if !value.trim().is_empty() && !out.contains(&value) {
                    out.push(value);
                }
            }
        }
    }
    out
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    (value as f32 * scale).round() as i16
}

fn scale_u16(value: u16, scale: f32) -> u16 {
    (value as f32 * scale).round().clamp(0.0, u16::MAX as f32) as u16
}

/// WinAnsi (CP1252) code for a char, if representable.
pub(crate) fn winansi_code(ch: char) -> Option<u8> {
    let cp = ch as u32;
    match cp {
        0x20..=0x7E => Some(cp as u8),
        0xA0..=0xFF => Some(cp as u8),
        _ => match ch {
            '\u{20AC}' => Some(0x80),
            '\u{201A}' => Some(0x82),
            '\u{0192}' => Some(0x83),
            '\u{201E}' => Some(0x84),
            '\u{2026}' => Some(0x85),
            '\u{2020}' => Some(0x86),
            '\u{2021}' => Some(0x87),
            '\u{02C6}' => Some(0x88),
            '\u{2030}' => Some(0x89),
            '\u{0160}' => Some(0x8A),
            '\u{2039}' => Some(0x8B),
            '\u{0152}' => Some(0x8C),
            '\u{017D}' => Some(0x8E),
            '\u{2018}' => Some(0x91),
            '\u{2019}' => Some(0x92),
            '\u{201C}' => Some(0x93),
            '\u{201D}' => Some(0x94),
            '\u{2022}' => Some(0x95),
            '\u{2013}' => Some(0x96),
            '\u{2014}' => Some(0x97),
            '\u{02DC}' => Some(0x98),
            '\u{2122}' => Some(0x99),
            '\u{0161}' => Some(0x9A),
            '\u{203A}' => Some(0x9B),
            '\u{0153}' => Some(0x9C),
            '\u{017E}' => Some(0x9E),
            '\u{0178}' => Some(0x9F),
            _ => None,
        },
    }
}

/// Inverse of `winansi_code` for the 32..=255 range, used when building
/// width tables. Codes without a CP1252 assignment map to space.
pub(crate) fn winansi_char(code: u8) -> char {
    match code {
        0x20..=0x7E => code as char,
        0xA0..=0xFF => char::from_u32(code as u32).unwrap_or(' '),
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        _ => ' ',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winansi_maps_ascii_and_cp1252_specials_both_ways() {
        for code in 0x20u8..=0x7E {
            assert_eq!(winansi_code(winansi_char(code)), Some(code));
        }
        assert_eq!(winansi_code('\u{20AC}'), Some(0x80));
        assert_eq!(winansi_char(0x97), '\u{2014}');
        assert_eq!(winansi_code('\u{4E2D}'), None);
    }

    #[test]
    fn unresolved_font_measures_with_heuristic_width() {
        let registry = FontRegistry::new();
        let width = registry.measure_text_width("Nonexistent", Pt::from_f32(10.0), "abcd");
        // 4 chars at 0.6 em of 10 pt.
        assert_eq!(width.to_milli_i64(), 24_000);
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let mut registry = FontRegistry::new();
        let err = registry.register_bytes(vec![0u8; 16], Some("broken"));
        assert!(matches!(err, Err(InkspreadError::Asset(_))));
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn name_normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_name("Open Sans-Bold"), "opensansbold");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn line_height_falls_back_when_unresolved() {
        let registry = FontRegistry::new();
        let fallback = Pt::from_f32(14.0);
        assert_eq!(
            registry.line_height("Ghost", Pt::from_f32(12.0), fallback),
            fallback
        );
    }
}
