use crate::assets;
use crate::canvas::{Command, Document, Page};
use crate::error::InkspreadError;
use crate::font::{FALLBACK_FONT, FIRST_CHAR, FontRegistry, LAST_CHAR, RegisteredFont, winansi_code};
use crate::types::Pt;
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId,
    Stream as LoStream, dictionary};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Serializes a canvas document as PDF 1.7 bytes. Registered faces are
/// embedded as TrueType programs with WinAnsi encoding; everything else
/// maps to the base-14 Helvetica. Identical image payloads share one
/// XObject, keyed by content hash.
pub(crate) fn document_to_pdf(
    document: &Document,
    registry: &FontRegistry,
) -> Result<Vec<u8>, InkspreadError> {
    let mut doc = LoDocument::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut font_resources: BTreeMap<String, (String, ObjectId)> = BTreeMap::new();
    for (index, name) in collect_font_names(document).into_iter().enumerate() {
        let font_id = match registry.resolve(&name) {
            Some(font) => embed_truetype_font(&mut doc, font),
            None => doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
                "Encoding" => "WinAnsiEncoding",
            }),
        };
        font_resources.insert(name, (format!("F{}", index + 1), font_id));
    }

    let mut image_resources: HashMap<String, String> = HashMap::new();
    let mut xobject_entries: Vec<(String, ObjectId)> = Vec::new();
    let mut dedup: HashMap<[u8; 32], ObjectId> = HashMap::new();
    for source in collect_image_sources(document) {
        let Some(image) = load_image(&source) else {
            continue;
        };
        let key = hash_image(&image);
        let object_id = match dedup.get(&key) {
            Some(id) => *id,
            None => {
                let id = add_image_object(&mut doc, &image);
                dedup.insert(key, id);
                id
            }
        };
        let resource = format!("Im{}", xobject_entries.len() + 1);
        xobject_entries.push((resource.clone(), object_id));
        image_resources.insert(source, resource);
    }

    let mut font_dict = LoDictionary::new();
    for (resource, font_id) in font_resources.values() {
        font_dict.set(resource.as_bytes(), *font_id);
    }
    let mut xobject_dict = LoDictionary::new();
    for (resource, object_id) in &xobject_entries {
        xobject_dict.set(resource.as_bytes(), *object_id);
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => LoObject::Dictionary(font_dict),
        "XObject" => LoObject::Dictionary(xobject_dict),
    });

    let media_box = vec![
        0.into(),
        0.into(),
        document.page_size.width.to_f32().into(),
        document.page_size.height.to_f32().into(),
    ];
    let mut kids: Vec<LoObject> = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        let content = render_page_content(
            page,
            document.page_size.height,
            &font_resources,
            &image_resources,
        );
        let content_id = doc.add_object(LoStream::new(LoDictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => media_box.clone(),
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| InkspreadError::Pdf(format!("pdf serialization failed: {e}")))?;
    Ok(out)
}

fn collect_font_names(document: &Document) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    names.insert(FALLBACK_FONT.to_string());
    for page in &document.pages {
        for cmd in &page.commands {
            if let Command::SetFontName(name) = cmd {
                names.insert(name.clone());
            }
        }
    }
    names
}

fn collect_image_sources(document: &Document) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for page in &document.pages {
        for cmd in &page.commands {
            if let Command::DrawImage { resource_id, .. } = cmd {
                if seen.insert(resource_id.clone()) {
                    out.push(resource_id.clone());
                }
            }
        }
    }
    out
}

fn embed_truetype_font(doc: &mut LoDocument, font: &RegisteredFont) -> ObjectId {
    let file_id = doc.add_object(LoStream::new(
        dictionary! { "Length1" => font.data.len() as i64 },
        font.data.clone(),
    ));
    let metrics = &font.metrics;
    let base_font = sanitize_font_name(&font.name);
    let (x_min, y_min, x_max, y_max) = metrics.bbox;
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => LoObject::Name(base_font.clone().into_bytes()),
        // Nonsymbolic.
        "Flags" => 32,
        "FontBBox" => vec![
            (x_min as i64).into(),
            (y_min as i64).into(),
            (x_max as i64).into(),
            (y_max as i64).into(),
        ],
        "ItalicAngle" => metrics.italic_angle as i64,
        "Ascent" => metrics.ascent as i64,
        "Descent" => metrics.descent as i64,
        "CapHeight" => metrics.cap_height as i64,
        "StemV" => 80,
        "FontFile2" => file_id,
    });
    let widths: Vec<LoObject> = metrics
        .widths
        .iter()
        .map(|w| (*w as i64).into())
        .collect();
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "TrueType",
        "BaseFont" => LoObject::Name(base_font.into_bytes()),
        "FirstChar" => FIRST_CHAR as i64,
        "LastChar" => LAST_CHAR as i64,
        "Widths" => widths,
        "FontDescriptor" => descriptor_id,
        "Encoding" => "WinAnsiEncoding",
    })
}

struct ImageData {
    width: u32,
    height: u32,
    color_space: &'static str,
    jpeg: bool,
    data: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

fn load_image(source: &str) -> Option<ImageData> {
    let (mime, bytes) = assets::load_image_bytes(source)?;
    decode_image_bytes(&bytes, mime.as_deref())
}

fn decode_image_bytes(data: &[u8], mime: Option<&str>) -> Option<ImageData> {
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

    let decoded = image::load_from_memory(data).ok()?;
    let (width, height) = (decoded.width(), decoded.height());

    // JPEG bytes go into the stream untouched under DCTDecode.
    if matches!(format, Some(image::ImageFormat::Jpeg)) {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "DeviceGray",
            _ => "DeviceRGB",
        };
        return Some(ImageData {
            width,
            height,
            color_space,
            jpeg: true,
            data: data.to_vec(),
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width as usize) * (height as usize) * 3);
    let mut alpha = Vec::with_capacity((width as usize) * (height as usize));
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }
    Some(ImageData {
        width,
        height,
        color_space: "DeviceRGB",
        jpeg: false,
        data: rgb,
        alpha: has_alpha.then_some(alpha),
    })
}

fn hash_image(image: &ImageData) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(&image.data);
    if let Some(alpha) = &image.alpha {
        hasher.update(alpha);
    }
    hasher.finalize().into()
}

fn add_image_object(doc: &mut LoDocument, image: &ImageData) -> ObjectId {
    let smask_id = image.alpha.as_ref().map(|alpha| {
        doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha.clone(),
        ))
    });

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width as i64,
        "Height" => image.height as i64,
        "ColorSpace" => image.color_space,
        "BitsPerComponent" => 8,
    };
    if image.jpeg {
        dict.set("Filter", "DCTDecode");
    }
    if let Some(smask_id) = smask_id {
        dict.set("SMask", smask_id);
    }
    doc.add_object(LoStream::new(dict, image.data.clone()))
}

fn sanitize_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '+')
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}

fn render_page_content(
    page: &Page,
    page_height: Pt,
    font_resources: &BTreeMap<String, (String, ObjectId)>,
    image_resources: &HashMap<String, String>,
) -> String {
    let mut out = String::new();
    let mut current_font_name = FALLBACK_FONT.to_string();
    let mut current_font_size = Pt::from_f32(12.0);

    for cmd in &page.commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::Meta { .. } => {}
            Command::SetFillColor(color) => {
                out.push_str(&format!(
                    "{} {} {} rg\n",
                    fmt(color.r),
                    fmt(color.g),
                    fmt(color.b)
                ));
            }
            Command::SetStrokeColor(color) => {
                out.push_str(&format!(
                    "{} {} {} RG\n",
                    fmt(color.r),
                    fmt(color.g),
                    fmt(color.b)
                ));
            }
            Command::SetLineWidth(width) => {
                out.push_str(&format!("{} w\n", fmt_pt(*width)));
            }
            Command::SetDash { pattern, phase } => {
                let items = pattern
                    .iter()
                    .map(|v| fmt_pt(*v))
                    .collect::<Vec<_>>()
                    .join(" ");
                out.push_str(&format!("[{}] {} d\n", items, fmt_pt(*phase)));
            }
            Command::SetFontName(name) => current_font_name = name.clone(),
            Command::SetFontSize(size) => current_font_size = *size,
            Command::ClipRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\nW\nn\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::MoveTo { x, y } => {
                out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::LineTo { x, y } => {
                out.push_str(&format!("{} {} l\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::ClosePath => out.push_str("h\n"),
            Command::Fill => out.push_str("f\n"),
            Command::Stroke => out.push_str("S\n"),
            Command::DrawString { x, y, text } => {
                let resource = font_resources
                    .get(&current_font_name)
                    .map(|(resource, _)| resource.as_str())
                    .unwrap_or("F1");
                out.push_str("BT\n");
                out.push_str(&format!("/{} {} Tf\n", resource, fmt_pt(current_font_size)));
                out.push_str(&format!(
                    "{} {} Td\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - current_font_size)
                ));
                out.push_str(&format!("({}) Tj\n", encode_winansi_literal(text)));
                out.push_str("ET\n");
            }
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\nf\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\nS\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                if let Some(resource) = image_resources.get(resource_id) {
                    let draw_y = page_height - *y - *height;
                    out.push_str("q\n");
                    out.push_str(&format!(
                        "{} 0 0 {} {} {} cm\n",
                        fmt_pt(*width),
                        fmt_pt(*height),
                        fmt_pt(*x),
                        fmt_pt(draw_y)
                    ));
                    out.push_str(&format!("/{} Do\n", resource));
                    out.push_str("Q\n");
                }
            }
        }
    }

    out
}

/// Literal-string encoding for WinAnsi text: delimiters escaped, bytes
/// above ASCII written as octal escapes, unencodable chars replaced.
fn encode_winansi_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        let byte = winansi_code(ch).unwrap_or(b'?');
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7E => out.push(byte as char),
            _ => out.push_str(&format!("\\{:03o}", byte)),
        }
    }
    out
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}

fn fmt(value: f32) -> String {
    format_milli(Pt::from_f32(value).to_milli_i64())
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{sign}{int_part}")
    } else {
        let mut s = format!("{sign}{int_part}.{frac_part:03}");
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::types::Size;
    use std::io::Cursor;

    fn sample_document() -> Document {
        let mut canvas = Canvas::new(Size::from_inches(6.0, 9.0));
        canvas.set_font_name("Helvetica");
        canvas.set_font_size(Pt::from_f32(14.0));
        canvas.draw_string(Pt::from_f32(72.0), Pt::from_f32(72.0), "Hello (world)");
        canvas.show_page();
        canvas.stroke_rect(
            Pt::from_f32(36.0),
            Pt::from_f32(36.0),
            Pt::from_f32(100.0),
            Pt::from_f32(50.0),
        );
        canvas.show_page();
        canvas.into_document()
    }

    fn png_uri() -> String {
        // Opaque RGB keeps the XObject count at one; alpha would add an SMask.
        let img = image::RgbImage::new(2, 2);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        assets::encode_data_uri("image/png", &bytes)
    }

    #[test]
    fn output_parses_back_with_matching_page_count() {
        let document = sample_document();
        let registry = FontRegistry::new();
        let bytes = document_to_pdf(&document, &registry).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let parsed = LoDocument::load_mem(&bytes).unwrap();
        assert_eq!(parsed.get_pages().len(), 2);
    }

    #[test]
    fn media_box_carries_the_physical_page_size() {
        let document = sample_document();
        let registry = FontRegistry::new();
        let bytes = document_to_pdf(&document, &registry).unwrap();
        let parsed = LoDocument::load_mem(&bytes).unwrap();
        let (_, page_id) = parsed.get_pages().into_iter().next().unwrap();
        let page = parsed.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media_box[2].as_float().unwrap().round() as i64, 432);
        assert_eq!(media_box[3].as_float().unwrap().round() as i64, 648);
    }

    #[test]
    fn repeated_image_payloads_share_one_xobject() {
        let uri = png_uri();
        let mut canvas = Canvas::new(Size::from_inches(6.0, 9.0));
        canvas.draw_image(
            Pt::ZERO,
            Pt::ZERO,
            Pt::from_f32(72.0),
            Pt::from_f32(72.0),
            uri.clone(),
        );
        canvas.show_page();
        canvas.draw_image(
            Pt::from_f32(10.0),
            Pt::from_f32(10.0),
            Pt::from_f32(36.0),
            Pt::from_f32(36.0),
            uri,
        );
        canvas.show_page();
        let document = canvas.into_document();
        let registry = FontRegistry::new();
        let bytes = document_to_pdf(&document, &registry).unwrap();
        let parsed = LoDocument::load_mem(&bytes).unwrap();
        let image_objects = parsed
            .objects
            .values()
            .filter(|object| {
                object
                    .as_stream()
                    .ok()
                    .and_then(|stream| stream.dict.get(b"Subtype").ok())
                    .and_then(|subtype| subtype.as_name().ok())
                    == Some(b"Image")
            })
            .count();
        assert_eq!(image_objects, 1);
    }

    #[test]
    fn winansi_literal_escapes_delimiters_and_high_bytes() {
        assert_eq!(encode_winansi_literal("a(b)"), "a\\(b\\)");
        assert_eq!(encode_winansi_literal("\\"), "\\\\");
        assert_eq!(encode_winansi_literal("é"), "\\351");
        assert_eq!(encode_winansi_literal("\u{20AC}"), "\\200");
        assert_eq!(encode_winansi_literal("\u{4E2D}"), "?");
    }

    #[test]
    fn milli_formatting_trims_trailing_zeros() {
        assert_eq!(format_milli(0), "0");
        assert_eq!(format_milli(612_000), "612");
        assert_eq!(format_milli(612_500), "612.5");
        assert_eq!(format_milli(-1_250), "-1.25");
        assert_eq!(format_milli(3), "0.003");
    }

    #[test]
    fn unregistered_fonts_map_to_base14_helvetica() {
        let mut canvas = Canvas::new(Size::from_inches(6.0, 9.0));
        canvas.set_font_name("Totally-Unknown");
        canvas.draw_string(Pt::from_f32(10.0), Pt::from_f32(10.0), "x");
        canvas.show_page();
        let document = canvas.into_document();
        let registry = FontRegistry::new();
        let bytes = document_to_pdf(&document, &registry).unwrap();
        let parsed = LoDocument::load_mem(&bytes).unwrap();
        let base_fonts: Vec<Vec<u8>> = parsed
            .objects
            .values()
            .filter_map(|object| object.as_dict().ok())
            .filter(|dict| dict.get(b"Type").ok().and_then(|t| t.as_name().ok()) == Some(b"Font"))
            .filter_map(|dict| dict.get(b"BaseFont").ok())
            .filter_map(|name| name.as_name().ok().map(|n| n.to_vec()))
            .collect();
        assert!(!base_fonts.is_empty());
        assert!(base_fonts.iter().all(|name| name == b"Helvetica"));
    }
}
