use crate::canvas::{Command, Document};
use crate::font::{FALLBACK_FONT, FontRegistry};
use crate::geometry::{PrintConfig, resolved_margins};
use crate::project::Template;
use crate::types::Pt;

const BORDER_WIDTH: f32 = 0.75;
// Border sits just outside the content margins, inside the trim.
const BORDER_PAD: f32 = 9.0;
const NUMBER_SIZE: f32 = 10.0;
const NUMBER_RISE: f32 = 30.0;

/// Decorates finished pages with the template's border and page numbers.
/// Runs once per build, after assembly; every value is recomputed from the
/// page index, so repeated application appends identical commands. Blank
/// filler pages stay untouched.
pub(crate) fn apply(
    document: &mut Document,
    config: &PrintConfig,
    template: &Template,
    fonts: &FontRegistry,
) {
    if !template.has_border && !template.page_numbers {
        return;
    }
    let page_size = document.page_size;
    let face = if fonts.contains(&template.body_font) {
        template.body_font.clone()
    } else {
        FALLBACK_FONT.to_string()
    };

    for (index, page) in document.pages.iter_mut().enumerate() {
        let page_number = index + 1;
        if page.meta_value("page-kind") == Some("blank-filler") {
            continue;
        }
        let margins = resolved_margins(config, page_number);

        if template.has_border {
            let pad = Pt::from_f32(BORDER_PAD);
            let x = (margins.left - pad).max(Pt::ZERO);
            let y = (margins.top - pad).max(Pt::ZERO);
            let width = page_size.width - x - (margins.right - pad).max(Pt::ZERO);
            let height = page_size.height - y - (margins.bottom - pad).max(Pt::ZERO);
            page.commands.push(Command::SaveState);
            page.commands.push(Command::SetStrokeColor(template.ink));
            page.commands
                .push(Command::SetLineWidth(Pt::from_f32(BORDER_WIDTH)));
            page.commands.push(Command::StrokeRect {
                x,
                y,
                width,
                height,
            });
            page.commands.push(Command::RestoreState);
        }

        if template.page_numbers {
            let label = page_number.to_string();
            let size = Pt::from_f32(NUMBER_SIZE);
            let width = fonts.measure_text_width(&face, size, &label);
            let x = ((page_size.width - width) / 2).max(Pt::ZERO);
            let y = page_size.height - Pt::from_f32(NUMBER_RISE);
            page.commands.push(Command::SaveState);
            page.commands.push(Command::SetFillColor(template.ink));
            page.commands.push(Command::SetFontName(face.clone()));
            page.commands.push(Command::SetFontSize(size));
            page.commands.push(Command::DrawString {
                x,
                y,
                text: label,
            });
            page.commands.push(Command::RestoreState);
        }
    }
}
