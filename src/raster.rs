use crate::assets;
use crate::canvas::{Command, Page};
use crate::error::InkspreadError;
use crate::font::FontRegistry;
use crate::types::{Color, Pt, Size};
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tiny_skia::{
    FillRule, FilterQuality, LineCap, LineJoin, Mask, Paint, Path, PathBuilder, Pixmap,
    PixmapPaint, Rect, Stroke, StrokeDash, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

#[derive(Clone)]
struct RasterState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    dash_pattern: Vec<Pt>,
    dash_phase: Pt,
    font_name: String,
    font_size: Pt,
    clip_mask: Option<Mask>,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            dash_pattern: Vec::new(),
            dash_phase: Pt::ZERO,
            font_name: "Helvetica".to_string(),
            font_size: Pt::from_f32(12.0),
            clip_mask: None,
        }
    }
}

/// Renders one page of canvas commands onto a white pixmap at `scale`
/// pixels per point. Canvas coordinates are top-left based; the device
/// transform flips them into raster space.
pub(crate) fn rasterize_page(
    page: &Page,
    page_size: Size,
    scale: f32,
    registry: Option<&FontRegistry>,
) -> Result<Pixmap, InkspreadError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(InkspreadError::Raster(format!(
            "invalid raster scale {scale}"
        )));
    }
    let width_px = pt_milli_to_px(page_size.width.to_milli_i64(), scale)?;
    let height_px = pt_milli_to_px(page_size.height.to_milli_i64(), scale)?;
    let page_height_pt = page_size.height.to_f32();
    let base_transform = Transform::from_row(scale, 0.0, 0.0, -scale, 0.0, page_height_pt * scale);

    let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
        InkspreadError::Raster(format!(
            "invalid raster size {width_px}x{height_px} at scale {scale}"
        ))
    })?;
    pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));

    let mut state = RasterState::default();
    let mut stack: Vec<RasterState> = Vec::new();
    let mut path_builder = PathBuilder::new();
    let mut has_path = false;
    let mut image_cache: HashMap<String, Option<Pixmap>> = HashMap::new();

    for cmd in &page.commands {
        match cmd {
            Command::SaveState => stack.push(state.clone()),
            Command::RestoreState => {
                if let Some(restored) = stack.pop() {
                    state = restored;
                }
            }
            Command::Meta { .. } => {}
            Command::SetFillColor(color) => state.fill_color = *color,
            Command::SetStrokeColor(color) => state.stroke_color = *color,
            Command::SetLineWidth(width) => {
                state.line_width = (*width).max(Pt::ZERO);
            }
            Command::SetDash { pattern, phase } => {
                state.dash_pattern = pattern.clone();
                state.dash_phase = *phase;
            }
            Command::SetFontName(name) => state.font_name = name.clone(),
            Command::SetFontSize(size) => state.font_size = *size,
            Command::ClipRect {
                x,
                y,
                width,
                height,
            } => {
                let draw_y = page_height_pt - y.to_f32() - height.to_f32();
                if let Some(rect) =
                    Rect::from_xywh(x.to_f32(), draw_y, width.to_f32(), height.to_f32())
                {
                    let path = PathBuilder::from_rect(rect);
                    apply_clip_path(
                        &mut state,
                        &path,
                        base_transform,
                        pixmap.width(),
                        pixmap.height(),
                    );
                }
            }
            Command::MoveTo { x, y } => {
                path_builder.move_to(x.to_f32(), page_height_pt - y.to_f32());
                has_path = true;
            }
            Command::LineTo { x, y } => {
                path_builder.line_to(x.to_f32(), page_height_pt - y.to_f32());
                has_path = true;
            }
            Command::ClosePath => {
                if has_path {
                    path_builder.close();
                }
            }
            Command::Fill => {
                if let Some(path) = take_path(&mut path_builder, &mut has_path) {
                    let paint = fill_paint(state.fill_color);
                    pixmap.fill_path(
                        &path,
                        &paint,
                        FillRule::Winding,
                        base_transform,
                        state.clip_mask.as_ref(),
                    );
                }
            }
            Command::Stroke => {
                if let Some(path) = take_path(&mut path_builder, &mut has_path) {
                    let paint = fill_paint(state.stroke_color);
                    let stroke = build_stroke(&state);
                    pixmap.stroke_path(
                        &path,
                        &paint,
                        &stroke,
                        base_transform,
                        state.clip_mask.as_ref(),
                    );
                }
            }
            Command::DrawString { x, y, text } => {
                draw_string(
                    &mut pixmap,
                    &state,
                    x.to_f32(),
                    y.to_f32(),
                    text,
                    page_height_pt,
                    base_transform,
                    registry,
                );
            }
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => {
                let draw_y = page_height_pt - y.to_f32() - height.to_f32();
                if let Some(rect) =
                    Rect::from_xywh(x.to_f32(), draw_y, width.to_f32(), height.to_f32())
                {
                    let path = PathBuilder::from_rect(rect);
                    let paint = fill_paint(state.fill_color);
                    pixmap.fill_path(
                        &path,
                        &paint,
                        FillRule::Winding,
                        base_transform,
                        state.clip_mask.as_ref(),
                    );
                }
            }
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => {
                let draw_y = page_height_pt - y.to_f32() - height.to_f32();
                if let Some(rect) =
                    Rect::from_xywh(x.to_f32(), draw_y, width.to_f32(), height.to_f32())
                {
                    let path = PathBuilder::from_rect(rect);
                    let paint = fill_paint(state.stroke_color);
                    let stroke = build_stroke(&state);
                    pixmap.stroke_path(
                        &path,
                        &paint,
                        &stroke,
                        base_transform,
                        state.clip_mask.as_ref(),
                    );
                }
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                let source = image_cache
                    .entry(resource_id.clone())
                    .or_insert_with(|| load_image_pixmap(resource_id));
                if let Some(image) = source.as_ref() {
                    let src_w = image.width() as f32;
                    let src_h = image.height() as f32;
                    if src_w > 0.0 && src_h > 0.0 {
                        let sx = width.to_f32() / src_w;
                        let sy = height.to_f32() / src_h;
                        // Local y-flip so source row 0 lands at the visual
                        // top, matching the PDF writer's /Im Do placement.
                        let image_ts = Transform::from_row(
                            sx,
                            0.0,
                            0.0,
                            -sy,
                            x.to_f32(),
                            page_height_pt - y.to_f32(),
                        );
                        let device_ts = base_transform.pre_concat(image_ts);
                        let mut paint = PixmapPaint::default();
                        paint.quality = FilterQuality::Bilinear;
                        pixmap.draw_pixmap(
                            0,
                            0,
                            image.as_ref(),
                            &paint,
                            device_ts,
                            state.clip_mask.as_ref(),
                        );
                    }
                }
            }
        }
    }

    Ok(pixmap)
}

fn apply_clip_path(
    state: &mut RasterState,
    path: &Path,
    transform: Transform,
    width: u32,
    height: u32,
) {
    if let Some(mask) = state.clip_mask.as_mut() {
        mask.intersect_path(path, FillRule::Winding, true, transform);
        return;
    }
    let Some(mut mask) = Mask::new(width, height) else {
        return;
    };
    mask.fill_path(path, FillRule::Winding, true, transform);
    state.clip_mask = Some(mask);
}

#[allow(clippy::too_many_arguments)]
fn draw_string(
    pixmap: &mut Pixmap,
    state: &RasterState,
    x: f32,
    y: f32,
    text: &str,
    page_height_pt: f32,
    base_transform: Transform,
    registry: Option<&FontRegistry>,
) {
    let font_size = state.font_size.to_f32().max(0.0);
    if font_size <= 0.0 || text.is_empty() {
        return;
    }

    let baseline_x = x;
    let baseline_y = page_height_pt - y - font_size;
    let paint = fill_paint(state.fill_color);

    let mut try_draw = |font_data: &[u8]| -> bool {
        let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
            return false;
        };
        let placements = layout_text_glyphs(font_data, text, font_size, baseline_x, baseline_y);
        if placements.is_empty() {
            return false;
        }
        let mut drawn = 0usize;
        for placement in placements {
            let mut builder =
                GlyphPathBuilder::new(placement.origin_x, placement.origin_y, placement.scale);
            if face
                .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
                .is_none()
            {
                continue;
            }
            let Some(path) = builder.finish() else {
                continue;
            };
            pixmap.fill_path(
                &path,
                &paint,
                FillRule::Winding,
                base_transform,
                state.clip_mask.as_ref(),
            );
            drawn += 1;
        }
        drawn > 0
    };

    if let Some(registry) = registry {
        if let Some(font) = registry.resolve(&state.font_name) {
            if try_draw(font.data.as_slice()) {
                return;
            }
        }
    }
    if let Some(system_bytes) = resolve_system_font_bytes(&state.font_name) {
        try_draw(system_bytes.as_slice());
    }
}

#[derive(Clone, Copy)]
struct GlyphPlacement {
    glyph_id: u16,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

fn layout_text_glyphs(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> Vec<GlyphPlacement> {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    let mut pen_y = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid == 0 {
            pen_x += (pos.x_advance as f32 / units_per_em) * font_size;
            pen_y += (pos.y_advance as f32 / units_per_em) * font_size;
            continue;
        }
        let x_off = (pos.x_offset as f32 / units_per_em) * font_size;
        let y_off = (pos.y_offset as f32 / units_per_em) * font_size;
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x + x_off,
            origin_y: baseline_y + pen_y + y_off,
            scale,
        });
        pen_x += (pos.x_advance as f32 / units_per_em) * font_size;
        pen_y += (pos.y_advance as f32 / units_per_em) * font_size;
    }
    out
}

fn layout_text_glyphs_unshaped(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> Vec<GlyphPlacement> {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return Vec::new();
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * 0.5;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x,
            origin_y: baseline_y,
            scale,
        });
        let advance_units = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
        let mut advance = (advance_units / units_per_em) * font_size;
        if advance <= 0.0 {
            advance = font_size * 0.5;
        }
        pen_x += advance;
    }
    out
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

static SYSTEM_FONT_CACHE: OnceLock<Mutex<HashMap<String, Option<Arc<Vec<u8>>>>>> = OnceLock::new();

/// Best-effort lookup of an installed face for text the registry cannot
/// serve. Text missing here leaves a gap in the raster output; the vector
/// document is unaffected.
fn resolve_system_font_bytes(font_name: &str) -> Option<Arc<Vec<u8>>> {
    let cache = SYSTEM_FONT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let key = crate::font::normalize_name(font_name);

    if let Ok(cache_guard) = cache.lock() {
        if let Some(entry) = cache_guard.get(&key) {
            return entry.clone();
        }
    }

    let loaded = load_system_font(&key);
    if let Ok(mut cache_guard) = cache.lock() {
        cache_guard.insert(key, loaded.clone());
    }
    loaded
}

fn load_system_font(normalized: &str) -> Option<Arc<Vec<u8>>> {
    let candidates: &[&str] = match normalized {
        name if name.contains("courier") || name.contains("mono") => &[
            "cour.ttf",
            "consola.ttf",
            "LiberationMono-Regular.ttf",
            "DejaVuSansMono.ttf",
        ],
        name if name.contains("times") || name.contains("serif") => &[
            "times.ttf",
            "LiberationSerif-Regular.ttf",
            "DejaVuSerif.ttf",
        ],
        _ => &[
            "arial.ttf",
            "segoeui.ttf",
            "LiberationSans-Regular.ttf",
            "DejaVuSans.ttf",
            "NotoSans-Regular.ttf",
        ],
    };

    for dir in system_font_dirs() {
        for file_name in candidates {
            let Ok(bytes) = std::fs::read(dir.join(file_name)) else {
                continue;
            };
            if ttf_parser::Face::parse(&bytes, 0).is_ok() {
                return Some(Arc::new(bytes));
            }
        }
    }
    None
}

fn system_font_dirs() -> Vec<std::path::PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(std::path::PathBuf::from(r"C:\Windows\Fonts"));
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(std::path::PathBuf::from("/usr/share/fonts"));
        dirs.push(std::path::PathBuf::from(
            "/usr/share/fonts/truetype/liberation",
        ));
        dirs.push(std::path::PathBuf::from("/usr/share/fonts/truetype/dejavu"));
        dirs.push(std::path::PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(std::path::PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(std::path::PathBuf::from("/System/Library/Fonts"));
        dirs.push(std::path::PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(std::path::PathBuf::from(home).join("Library/Fonts"));
        }
    }

    if let Ok(extra) = std::env::var("INKSPREAD_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    dirs
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            self.origin_x + x1 * self.scale,
            self.origin_y + y1 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.origin_x + x1 * self.scale,
            self.origin_y + y1 * self.scale,
            self.origin_x + x2 * self.scale,
            self.origin_y + y2 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn take_path(path_builder: &mut PathBuilder, has_path: &mut bool) -> Option<Path> {
    if !*has_path {
        return None;
    }
    *has_path = false;
    let builder = std::mem::replace(path_builder, PathBuilder::new());
    builder.finish()
}

fn build_stroke(state: &RasterState) -> Stroke {
    let mut stroke = Stroke::default();
    stroke.width = state.line_width.to_f32().max(0.0);
    stroke.line_cap = LineCap::Butt;
    stroke.line_join = LineJoin::Miter;

    if !state.dash_pattern.is_empty() {
        let mut pattern: Vec<f32> = state
            .dash_pattern
            .iter()
            .map(|p| p.to_f32().abs())
            .collect();
        if pattern.len() % 2 == 1 {
            let copy = pattern.clone();
            pattern.extend(copy);
        }
        if pattern.len() >= 2 {
            if let Some(dash) = StrokeDash::new(pattern, state.dash_phase.to_f32()) {
                stroke.dash = Some(dash);
            }
        }
    }

    stroke
}

fn fill_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color));
    paint.anti_alias = true;
    paint
}

fn to_sk_color(color: Color) -> tiny_skia::Color {
    let r = color.r.clamp(0.0, 1.0);
    let g = color.g.clamp(0.0, 1.0);
    let b = color.b.clamp(0.0, 1.0);
    tiny_skia::Color::from_rgba(r, g, b, 1.0)
        .unwrap_or_else(|| tiny_skia::Color::from_rgba8(0, 0, 0, 255))
}

/// Milli-points to device pixels, rounded half away from zero. Integer
/// math keeps the result identical across platforms.
pub(crate) fn pt_milli_to_px(pt_milli: i64, scale: f32) -> Result<u32, InkspreadError> {
    let scale_micro = (scale as f64 * 1_000_000.0).round() as i128;
    if scale_micro <= 0 {
        return Err(InkspreadError::Raster(format!(
            "invalid raster scale {scale}"
        )));
    }
    let num = (pt_milli as i128).saturating_mul(scale_micro);
    let den = 1_000_000_000_i128;
    let px = if num >= 0 {
        (num + den / 2) / den
    } else {
        -(((-num) + den / 2) / den)
    };
    if px <= 0 {
        return Err(InkspreadError::Raster(format!(
            "non-positive pixel dimension {px} for pt_milli={pt_milli} scale={scale}"
        )));
    }
    u32::try_from(px).map_err(|_| {
        InkspreadError::Raster(format!(
            "pixel dimension out of range: {px} for pt_milli={pt_milli} scale={scale}"
        ))
    })
}

fn load_image_pixmap(source: &str) -> Option<Pixmap> {
    let (mime, bytes) = assets::load_image_bytes(source)?;
    decode_image_to_pixmap(&bytes, mime.as_deref())
}

fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let format = if let Some(mime) = mime {
        if mime.contains("png") {
            Some(image::ImageFormat::Png)
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Some(image::ImageFormat::Jpeg)
        } else {
            None
        }
    } else {
        image::guess_format(data).ok()
    };

    let decoded = if let Some(format) = format {
        image::load_from_memory_with_format(data, format).ok()?
    } else {
        image::load_from_memory(data).ok()?
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use image::RgbaImage;
    use std::io::Cursor;

    fn to_image(pixmap: &Pixmap) -> RgbaImage {
        let png = pixmap.encode_png().unwrap();
        image::load_from_memory(&png).unwrap().to_rgba8()
    }

    fn page_with(build: impl FnOnce(&mut Canvas)) -> (Page, Size) {
        let size = Size::from_inches(1.0, 1.0);
        let mut canvas = Canvas::new(size);
        build(&mut canvas);
        canvas.show_page();
        (canvas.into_document().pages.remove(0), size)
    }

    #[test]
    fn pt_milli_to_px_rounds_half_away_from_zero() {
        // 72 pt at 300/72 px per pt is exactly 300 px.
        assert_eq!(pt_milli_to_px(72_000, 300.0 / 72.0).unwrap(), 300);
        assert_eq!(pt_milli_to_px(120, 300.0 / 72.0).unwrap(), 1);
        assert!(pt_milli_to_px(100, 300.0 / 72.0).is_err());
        assert!(pt_milli_to_px(0, 1.0).is_err());
    }

    #[test]
    fn filled_rect_paints_at_the_flipped_location() {
        let (page, size) = page_with(|canvas| {
            canvas.set_fill_color(Color::BLACK);
            // Top-left quadrant in canvas space.
            canvas.draw_rect(
                Pt::ZERO,
                Pt::ZERO,
                Pt::from_f32(36.0),
                Pt::from_f32(36.0),
            );
        });
        let pixmap = rasterize_page(&page, size, 1.0, None).unwrap();
        let img = to_image(&pixmap);
        assert_eq!(img.get_pixel(10, 10).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(60, 60).0, [255, 255, 255, 255]);
    }

    #[test]
    fn clip_rect_masks_drawing_outside_it() {
        let (page, size) = page_with(|canvas| {
            canvas.save_state();
            canvas.clip_rect(
                Pt::ZERO,
                Pt::ZERO,
                Pt::from_f32(20.0),
                Pt::from_f32(20.0),
            );
            canvas.draw_rect(
                Pt::ZERO,
                Pt::ZERO,
                Pt::from_f32(72.0),
                Pt::from_f32(72.0),
            );
            canvas.restore_state();
        });
        let pixmap = rasterize_page(&page, size, 1.0, None).unwrap();
        let img = to_image(&pixmap);
        assert_eq!(img.get_pixel(10, 10).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(40, 40).0, [255, 255, 255, 255]);
    }

    #[test]
    fn restore_state_drops_the_clip() {
        let (page, size) = page_with(|canvas| {
            canvas.save_state();
            canvas.clip_rect(Pt::ZERO, Pt::ZERO, Pt::from_f32(10.0), Pt::from_f32(10.0));
            canvas.restore_state();
            canvas.draw_rect(
                Pt::from_f32(30.0),
                Pt::from_f32(30.0),
                Pt::from_f32(20.0),
                Pt::from_f32(20.0),
            );
        });
        let pixmap = rasterize_page(&page, size, 1.0, None).unwrap();
        let img = to_image(&pixmap);
        assert_eq!(img.get_pixel(40, 40).0, [0, 0, 0, 255]);
    }

    #[test]
    fn missing_image_reference_is_a_noop() {
        let (page, size) = page_with(|canvas| {
            canvas.draw_image(
                Pt::from_f32(10.0),
                Pt::from_f32(10.0),
                Pt::from_f32(40.0),
                Pt::from_f32(40.0),
                "/no/such/image.png",
            );
        });
        let pixmap = rasterize_page(&page, size, 1.0, None).unwrap();
        let img = to_image(&pixmap);
        assert_eq!(img.get_pixel(30, 30).0, [255, 255, 255, 255]);
    }

    #[test]
    fn draw_image_preserves_source_orientation() {
        let mut src = RgbaImage::new(1, 2);
        src.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        src.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        let mut bytes = Vec::new();
        src.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let uri = assets::encode_data_uri("image/png", &bytes);

        let (page, size) = page_with(|canvas| {
            canvas.draw_image(
                Pt::from_f32(10.0),
                Pt::from_f32(10.0),
                Pt::from_f32(20.0),
                Pt::from_f32(20.0),
                uri,
            );
        });
        let pixmap = rasterize_page(&page, size, 1.0, None).unwrap();
        let img = to_image(&pixmap);
        let top = img.get_pixel(20, 13).0;
        let bottom = img.get_pixel(20, 27).0;
        assert!(top[0] > top[2], "top sample should be red, got {top:?}");
        assert!(
            bottom[2] > bottom[0],
            "bottom sample should be blue, got {bottom:?}"
        );
    }

    #[test]
    fn dashed_stroke_leaves_gaps() {
        let (page, size) = page_with(|canvas| {
            canvas.set_line_width(Pt::from_f32(4.0));
            canvas.set_dash(vec![Pt::from_f32(6.0), Pt::from_f32(6.0)], Pt::ZERO);
            canvas.move_to(Pt::ZERO, Pt::from_f32(36.0));
            canvas.line_to(Pt::from_f32(72.0), Pt::from_f32(36.0));
            canvas.stroke();
        });
        let pixmap = rasterize_page(&page, size, 1.0, None).unwrap();
        let img = to_image(&pixmap);
        let row = 36u32;
        let painted = (0..72u32)
            .filter(|x| img.get_pixel(*x, row).0 != [255, 255, 255, 255])
            .count();
        assert!(painted > 0, "dashed stroke should paint something");
        assert!(painted < 72, "dashed stroke should leave gaps");
    }

    #[test]
    fn premultiply_matches_rounded_product() {
        assert_eq!(premul_u8(255, 255), 255);
        assert_eq!(premul_u8(255, 0), 0);
        assert_eq!(premul_u8(200, 128), 100);
    }
}
