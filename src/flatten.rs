use crate::assets;
use crate::canvas::{Command, Document, Page};
use crate::debug::BuildLogger;
use crate::error::InkspreadError;
use crate::font::FontRegistry;
use crate::raster;
use crate::types::Pt;
use image::codecs::jpeg::JpegEncoder;
use rayon::prelude::*;
use std::time::Instant;

/// 300 DPI equivalent for a 72 pt/in document.
pub const DEFAULT_RASTER_SCALE: f32 = 300.0 / 72.0;
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Rasterizes every page and re-embeds it as a single full-page JPEG at
/// the original physical size. Fonts become pixels, so the output renders
/// identically on vendor pipelines that lack the embedded faces.
///
/// Pages are processed in parallel and reassembled in input order. Any
/// single page failure fails the whole pass; the input document is left
/// untouched either way.
pub(crate) fn flatten(
    document: &Document,
    scale: f32,
    quality: u8,
    fonts: Option<&FontRegistry>,
    logger: Option<&BuildLogger>,
) -> Result<Document, InkspreadError> {
    if quality == 0 || quality > 100 {
        return Err(InkspreadError::InvalidConfiguration(format!(
            "jpeg quality must be 1..=100, got {quality}"
        )));
    }
    if !scale.is_finite() || scale <= 0.0 {
        return Err(InkspreadError::InvalidConfiguration(format!(
            "raster scale must be positive, got {scale}"
        )));
    }

    let started = Instant::now();
    let pages = document
        .pages
        .par_iter()
        .enumerate()
        .map(|(index, page)| {
            flatten_page(page, document, scale, quality, fonts).map_err(|e| {
                InkspreadError::Raster(format!("flatten failed on page {}: {e}", index + 1))
            })
        })
        .collect::<Result<Vec<Page>, InkspreadError>>()?;

    if let Some(logger) = logger {
        logger.increment("flattened-pages", pages.len() as u64);
        logger.span_ms("flatten", started.elapsed().as_secs_f64() * 1000.0);
    }

    Ok(Document {
        page_size: document.page_size,
        pages,
    })
}

fn flatten_page(
    page: &Page,
    document: &Document,
    scale: f32,
    quality: u8,
    fonts: Option<&FontRegistry>,
) -> Result<Page, InkspreadError> {
    let pixmap = raster::rasterize_page(page, document.page_size, scale, fonts)?;
    let rgb = pixmap_to_rgb(&pixmap);

    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| InkspreadError::Raster(format!("jpeg encode failed: {e}")))?;
    let uri = assets::encode_data_uri("image/jpeg", &jpeg);

    // Meta markers carry no ink; keeping them preserves page-kind
    // reporting across the flatten.
    let mut commands: Vec<Command> = page
        .commands
        .iter()
        .filter(|cmd| matches!(cmd, Command::Meta { .. }))
        .cloned()
        .collect();
    commands.push(Command::DrawImage {
        x: Pt::ZERO,
        y: Pt::ZERO,
        width: document.page_size.width,
        height: document.page_size.height,
        resource_id: uri,
    });
    Ok(Page { commands })
}

fn pixmap_to_rgb(pixmap: &tiny_skia::Pixmap) -> image::RgbImage {
    let mut img = image::RgbImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in img.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = image::Rgb([c.red(), c.green(), c.blue()]);
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::types::Size;

    fn two_page_document() -> Document {
        let mut canvas = Canvas::new(Size::from_inches(1.0, 1.0));
        canvas.meta("page-kind", "illustration");
        canvas.draw_rect(
            Pt::from_f32(6.0),
            Pt::from_f32(6.0),
            Pt::from_f32(30.0),
            Pt::from_f32(30.0),
        );
        canvas.show_page();
        canvas.meta("page-kind", "story");
        canvas.show_page();
        canvas.into_document()
    }

    fn image_commands(page: &Page) -> Vec<&Command> {
        page.commands
            .iter()
            .filter(|cmd| matches!(cmd, Command::DrawImage { .. }))
            .collect()
    }

    #[test]
    fn page_count_and_size_are_preserved() {
        let document = two_page_document();
        let flat = flatten(&document, 1.0, 80, None, None).unwrap();
        assert_eq!(flat.pages.len(), document.pages.len());
        assert_eq!(flat.page_size, document.page_size);
    }

    #[test]
    fn each_page_becomes_one_full_page_jpeg() {
        let document = two_page_document();
        let flat = flatten(&document, 1.0, 80, None, None).unwrap();
        for page in &flat.pages {
            let images = image_commands(page);
            assert_eq!(images.len(), 1);
            let Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } = images[0]
            else {
                unreachable!();
            };
            assert_eq!(*x, Pt::ZERO);
            assert_eq!(*y, Pt::ZERO);
            assert_eq!(*width, document.page_size.width);
            assert_eq!(*height, document.page_size.height);
            assert!(resource_id.starts_with("data:image/jpeg;base64,"));
        }
    }

    #[test]
    fn rasterized_content_survives_the_round_trip() {
        let document = two_page_document();
        let flat = flatten(&document, 1.0, 90, None, None).unwrap();
        let Command::DrawImage { resource_id, .. } = image_commands(&flat.pages[0])[0] else {
            unreachable!();
        };
        let (mime, bytes) = assets::parse_data_uri(resource_id).unwrap();
        assert_eq!(mime, "image/jpeg");
        let img = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (72, 72));
        // Inside the black rect; JPEG is lossy so allow some drift.
        assert!(img.get_pixel(20, 20).0[0] < 96);
        // Outside it, near-white.
        assert!(img.get_pixel(60, 60).0[0] > 200);
    }

    #[test]
    fn meta_markers_survive_flattening() {
        let document = two_page_document();
        let flat = flatten(&document, 1.0, 80, None, None).unwrap();
        assert_eq!(flat.pages[0].meta_value("page-kind"), Some("illustration"));
        assert_eq!(flat.pages[1].meta_value("page-kind"), Some("story"));
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let document = two_page_document();
        assert!(matches!(
            flatten(&document, 1.0, 0, None, None),
            Err(InkspreadError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            flatten(&document, 1.0, 101, None, None),
            Err(InkspreadError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn bad_geometry_fails_the_whole_pass() {
        let document = Document {
            page_size: Size {
                width: Pt::ZERO,
                height: Pt::from_f32(72.0),
            },
            pages: vec![Page {
                commands: Vec::new(),
            }],
        };
        assert!(matches!(
            flatten(&document, 1.0, 80, None, None),
            Err(InkspreadError::Raster(_))
        ));
    }
}
