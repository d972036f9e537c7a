use crate::assets;
use crate::canvas::Canvas;
use crate::debug::BuildLogger;
use crate::font::{FALLBACK_FONT, FontRegistry};
use crate::geometry::{PrintConfig, resolved_margins};
use crate::project::{ContentUnit, ImageFit, MatterPage, Template};
use crate::types::{Color, Pt, Rect};
use std::collections::HashSet;

// Fixed inner padding between the resolved margins and flowed text.
const INNER_PAD: f32 = 18.0;
const FRAME_PAD: f32 = 6.0;

const MATTER_TITLE_SIZE: f32 = 28.0;
const STORY_TITLE_SIZE: f32 = 20.0;
const BODY_SIZE: f32 = 12.0;
const CAPTION_SIZE: f32 = 11.0;
const TRACING_SIZE: f32 = 34.0;
const TRACING_ADVANCE: f32 = 56.0;

/// Payload for one physical page. A closed set, dispatched here rather
/// than through trait objects: the page kinds are known at design time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PageContent<'a> {
    Blank,
    Matter(&'a MatterPage),
    Illustration(&'a ContentUnit),
    Story(&'a ContentUnit),
}

impl PageContent<'_> {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PageContent::Blank => "blank-filler",
            PageContent::Matter(_) => "matter",
            PageContent::Illustration(_) => "illustration",
            PageContent::Story(_) => "story",
        }
    }
}

/// Draws the visible content of one page. Owns the per-build font-fallback
/// warning state so each unresolved face is reported once, not per page.
pub(crate) struct Renderer<'a> {
    config: &'a PrintConfig,
    template: &'a Template,
    fonts: &'a FontRegistry,
    logger: Option<&'a BuildLogger>,
    warned_fonts: HashSet<String>,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(
        config: &'a PrintConfig,
        template: &'a Template,
        fonts: &'a FontRegistry,
        logger: Option<&'a BuildLogger>,
    ) -> Self {
        Self {
            config,
            template,
            fonts,
            logger,
            warned_fonts: HashSet::new(),
        }
    }

    /// Resolves a requested face, degrading to the built-in fallback. This
    /// is the only recoverable mid-build failure; it never aborts.
    fn face(&mut self, requested: &str) -> String {
        if self.fonts.contains(requested) || requested == FALLBACK_FONT {
            return requested.to_string();
        }
        if self.warned_fonts.insert(requested.to_string()) {
            if let Some(logger) = self.logger {
                logger.warn(
                    "font not registered, using fallback face",
                    &[("font", requested), ("fallback", FALLBACK_FONT)],
                );
                logger.increment("font-fallbacks", 1);
            }
        }
        FALLBACK_FONT.to_string()
    }

    pub(crate) fn render(
        &mut self,
        canvas: &mut Canvas,
        content: PageContent<'_>,
        page_number: usize,
    ) {
        canvas.meta("page-kind", content.kind());
        let margins = resolved_margins(self.config, page_number);
        let page = canvas.page_size();
        let content_rect = Rect {
            x: margins.left,
            y: margins.top,
            width: (page.width - margins.left - margins.right).max(Pt::ZERO),
            height: (page.height - margins.top - margins.bottom).max(Pt::ZERO),
        };

        match content {
            PageContent::Blank => {}
            PageContent::Matter(matter) => self.matter_page(canvas, matter, content_rect),
            PageContent::Illustration(unit) => {
                self.illustration_page(canvas, unit, content_rect)
            }
            PageContent::Story(unit) => self.story_page(canvas, unit, content_rect, margins.bottom),
        }
    }

    fn matter_page(&mut self, canvas: &mut Canvas, matter: &MatterPage, rect: Rect) {
        canvas.meta("matter-kind", matter.kind.as_str());
        let page = canvas.page_size();
        canvas.set_fill_color(self.template.ink);

        let title_font = self.template.title_font.clone();
        let title_face = self.face(&title_font);
        let title_y = page.height * 0.38 - Pt::from_f32(MATTER_TITLE_SIZE);
        self.draw_centered(
            canvas,
            &title_face,
            Pt::from_f32(MATTER_TITLE_SIZE),
            title_y,
            &matter.title,
        );

        let body_font = self.template.body_font.clone();
        let body_face = self.face(&body_font);
        let body_size = Pt::from_f32(BODY_SIZE);
        let body_width = rect.width - Pt::from_f32(2.0 * INNER_PAD);
        let leading = self
            .fonts
            .line_height(&body_face, body_size, Pt::from_f32(16.0));
        let mut y = page.height * 0.38 + Pt::from_f32(24.0);
        for line in wrap_text(self.fonts, &body_face, body_size, &matter.body, body_width) {
            self.draw_centered(canvas, &body_face, body_size, y, &line);
            y += leading;
        }

        if let Some(source) = matter.image.as_deref() {
            let lower = Rect {
                x: rect.x + Pt::from_f32(INNER_PAD),
                y: y + Pt::from_f32(INNER_PAD),
                width: rect.width - Pt::from_f32(2.0 * INNER_PAD),
                height: (rect.y + rect.height - y - Pt::from_f32(2.0 * INNER_PAD)).max(Pt::ZERO),
            };
            if let Some(dims) = assets::image_dimensions(source) {
                draw_fitted_image(canvas, source, dims, lower, ImageFit::Contain);
            }
        }
    }

    fn illustration_page(&mut self, canvas: &mut Canvas, unit: &ContentUnit, rect: Rect) {
        canvas.set_stroke_color(self.template.ink);
        canvas.set_line_width(Pt::from_f32(1.5));
        canvas.stroke_rect(rect.x, rect.y, rect.width, rect.height);

        let pad = Pt::from_f32(FRAME_PAD);
        let inner = rect.inset(pad, pad, pad, pad);

        let dims = unit
            .illustration
            .as_deref()
            .and_then(|source| assets::image_dimensions(source).map(|d| (source, d)));

        match dims {
            Some((source, dims)) => {
                draw_fitted_image(canvas, source, dims, inner, self.template.image_fit);
            }
            None => self.missing_illustration(canvas, unit, inner),
        }
    }

    /// Visual degradation only. The build carries on; pre-export validation
    /// is the collaborator that reports incomplete content.
    fn missing_illustration(&mut self, canvas: &mut Canvas, unit: &ContentUnit, inner: Rect) {
        canvas.meta("missing-illustration", &unit.title);
        if let Some(logger) = self.logger {
            logger.increment("missing-illustration", 1);
            logger.event(
                "missing-illustration",
                &[("unit", unit.title.as_str())],
            );
        }

        canvas.save_state();
        canvas.set_stroke_color(Color::gray(0.6));
        canvas.set_line_width(Pt::from_f32(0.8));
        canvas.set_dash(vec![Pt::from_f32(4.0), Pt::from_f32(3.0)], Pt::ZERO);
        canvas.stroke_rect(inner.x, inner.y, inner.width, inner.height);
        canvas.restore_state();

        let body_font = self.template.body_font.clone();
        let face = self.face(&body_font);
        canvas.set_fill_color(Color::gray(0.45));
        let label_y = inner.y + inner.height / 2 - Pt::from_f32(CAPTION_SIZE / 2.0);
        self.draw_centered(
            canvas,
            &face,
            Pt::from_f32(CAPTION_SIZE),
            label_y,
            "Illustration unavailable",
        );
        canvas.set_fill_color(self.template.ink);
    }

    fn story_page(&mut self, canvas: &mut Canvas, unit: &ContentUnit, rect: Rect, bottom: Pt) {
        let page = canvas.page_size();
        canvas.set_fill_color(self.template.ink);

        let title_font = self.template.title_font.clone();
        let title_face = self.face(&title_font);
        let title_size = Pt::from_f32(STORY_TITLE_SIZE);
        self.draw_centered(canvas, &title_face, title_size, rect.y, &unit.title);

        let body_font = self.template.body_font.clone();
        let body_face = self.face(&body_font);
        let body_size = Pt::from_f32(BODY_SIZE);
        let body_width = rect.width - Pt::from_f32(2.0 * INNER_PAD);
        let body_x = rect.x + Pt::from_f32(INNER_PAD);
        let leading = self
            .fonts
            .line_height(&body_face, body_size, Pt::from_f32(16.0));
        let mut y = rect.y + title_size + Pt::from_f32(18.0);
        canvas.set_font_name(&body_face);
        canvas.set_font_size(body_size);
        for line in wrap_text(self.fonts, &body_face, body_size, &unit.body_text, body_width) {
            canvas.draw_string(body_x, y, line);
            y += leading;
        }

        // Tracing block: one baseline rule per word, large tracing face in a
        // light tone sitting on the rule, fixed vertical advance.
        let tracing_font = self.template.tracing_font.clone();
        let tracing_face = self.face(&tracing_font);
        let tracing_size = Pt::from_f32(TRACING_SIZE);
        let advance = Pt::from_f32(TRACING_ADVANCE);
        let rule_x0 = body_x;
        let rule_x1 = rect.x + rect.width - Pt::from_f32(INNER_PAD);
        let limit = rect.y + rect.height - Pt::from_f32(40.0);
        y += Pt::from_f32(24.0);
        for word in &unit.tracing_words {
            if y + tracing_size > limit {
                break;
            }
            let rule_y = y + tracing_size + Pt::from_f32(4.0);
            canvas.set_stroke_color(Color::gray(0.6));
            canvas.set_line_width(Pt::from_f32(0.8));
            canvas.move_to(rule_x0, rule_y);
            canvas.line_to(rule_x1, rule_y);
            canvas.stroke();

            canvas.set_fill_color(Color::gray(0.55));
            canvas.set_font_name(&tracing_face);
            canvas.set_font_size(tracing_size);
            canvas.draw_string(rule_x0, y, word.clone());
            y += advance;
        }
        canvas.set_fill_color(self.template.ink);

        if let Some(caption) = unit.caption.as_deref() {
            let caption_y = page.height - bottom - Pt::from_f32(24.0);
            self.draw_centered(
                canvas,
                &body_face,
                Pt::from_f32(CAPTION_SIZE),
                caption_y,
                caption,
            );
        }
    }

    fn draw_centered(&self, canvas: &mut Canvas, face: &str, size: Pt, y: Pt, text: &str) {
        if text.is_empty() {
            return;
        }
        let width = self.fonts.measure_text_width(face, size, text);
        let x = (canvas.page_size().width - width) / 2;
        canvas.set_font_name(face);
        canvas.set_font_size(size);
        canvas.draw_string(x.max(Pt::ZERO), y, text);
    }
}

fn draw_fitted_image(
    canvas: &mut Canvas,
    source: &str,
    (img_w, img_h): (u32, u32),
    frame: Rect,
    fit: ImageFit,
) {
    if img_w == 0 || img_h == 0 || frame.width <= Pt::ZERO || frame.height <= Pt::ZERO {
        return;
    }
    let fw = frame.width.to_f32();
    let fh = frame.height.to_f32();
    let sx = fw / img_w as f32;
    let sy = fh / img_h as f32;
    let scale = match fit {
        ImageFit::Contain => sx.min(sy),
        ImageFit::Cover => sx.max(sy),
    };
    let draw_w = Pt::from_f32(img_w as f32 * scale);
    let draw_h = Pt::from_f32(img_h as f32 * scale);
    let x = frame.x + (frame.width - draw_w) / 2;
    let y = frame.y + (frame.height - draw_h) / 2;

    match fit {
        ImageFit::Contain => {
            canvas.draw_image(x, y, draw_w, draw_h, source);
        }
        ImageFit::Cover => {
            canvas.save_state();
            canvas.clip_rect(frame.x, frame.y, frame.width, frame.height);
            canvas.draw_image(x, y, draw_w, draw_h, source);
            canvas.restore_state();
        }
    }
}

/// Greedy word wrap against measured widths. A single over-long word gets
/// its own line rather than being truncated.
pub(crate) fn wrap_text(
    fonts: &FontRegistry,
    face: &str,
    size: Pt,
    text: &str,
    max_width: Pt,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if line.is_empty() {
            line.push_str(word);
            continue;
        }
        let candidate = format!("{line} {word}");
        if fonts.measure_text_width(face, size, &candidate) > max_width {
            lines.push(std::mem::take(&mut line));
            line.push_str(word);
        } else {
            line = candidate;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
