mod assemble;
mod assets;
mod canvas;
mod debug;
mod error;
mod flatten;
mod font;
mod geometry;
mod metrics;
mod pdf;
mod project;
mod raster;
mod render;
mod stylepass;
mod types;

pub use assemble::ProgressSink;
pub use canvas::{Canvas, Command, Document, Page};
use debug::BuildLogger;
pub use error::InkspreadError;
pub use flatten::{DEFAULT_JPEG_QUALITY, DEFAULT_RASTER_SCALE};
pub use font::{FALLBACK_FONT, FontRegistry};
pub use geometry::{BLEED_IN, MarginSpec, PageSide, PrintConfig, TrimSize, resolved_margins};
pub use metrics::{BuildMetrics, PageMetrics};
pub use project::{ContentUnit, ImageFit, MatterKind, MatterPage, Project, Template};
pub use types::{Color, Margins, Pt, Rect, Size};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Book-assembly engine. Construct once through [`InkspreadBuilder`], then
/// reuse across builds; the font registry and output settings are shared
/// read-only state.
pub struct Inkspread {
    font_registry: Arc<FontRegistry>,
    raster_scale: f32,
    jpeg_quality: u8,
    debug: Option<BuildLogger>,
}

#[derive(Clone)]
pub struct InkspreadBuilder {
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(Vec<u8>, Option<String>)>,
    raster_scale: f32,
    jpeg_quality: u8,
    debug_path: Option<PathBuf>,
}

impl InkspreadBuilder {
    pub fn new() -> Self {
        Self {
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            raster_scale: DEFAULT_RASTER_SCALE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            debug_path: None,
        }
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, data: Vec<u8>, name: Option<&str>) -> Self {
        self.font_bytes.push((data, name.map(str::to_string)));
        self
    }

    /// Rasterization scale for flattening, in pixels per point. The default
    /// of 300/72 produces 300 DPI output.
    pub fn raster_scale(mut self, scale: f32) -> Self {
        self.raster_scale = scale;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Enables the JSONL build log at the given path.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Inkspread, InkspreadError> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(InkspreadError::InvalidConfiguration(format!(
                "jpeg quality must be 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if !self.raster_scale.is_finite() || self.raster_scale <= 0.0 {
            return Err(InkspreadError::InvalidConfiguration(format!(
                "raster scale must be positive, got {}",
                self.raster_scale
            )));
        }
        let mut registry = FontRegistry::new();
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        for file in &self.font_files {
            registry.register_file(file);
        }
        for (data, name) in self.font_bytes {
            registry.register_bytes(data, name.as_deref())?;
        }
        let debug = match self.debug_path {
            Some(path) => Some(BuildLogger::new(path)?),
            None => None,
        };
        Ok(Inkspread {
            font_registry: Arc::new(registry),
            raster_scale: self.raster_scale,
            jpeg_quality: self.jpeg_quality,
            debug,
        })
    }
}

impl Default for InkspreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Inkspread {
    pub fn builder() -> InkspreadBuilder {
        InkspreadBuilder::new()
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.font_registry
    }

    /// Assembles a project into a vector document: front matter, alignment
    /// fillers, illustration/story spreads, end matter, then the border and
    /// page-number pass.
    pub fn build_document(&self, project: &Project) -> Result<Document, InkspreadError> {
        self.build_document_with_metrics(project)
            .map(|(document, _)| document)
    }

    pub fn build_document_with_metrics(
        &self,
        project: &Project,
    ) -> Result<(Document, BuildMetrics), InkspreadError> {
        project.config.validate()?;
        let result = assemble::assemble(project, &self.font_registry, self.debug.as_ref(), None);
        if let Some(logger) = &self.debug {
            logger.emit_summary("build");
            logger.flush();
        }
        Ok(result)
    }

    /// Like [`build_document`](Self::build_document), reporting completion
    /// percentages to `progress` after each page and after the style pass.
    pub fn build_document_with_progress(
        &self,
        project: &Project,
        progress: &ProgressSink,
    ) -> Result<Document, InkspreadError> {
        project.config.validate()?;
        let (document, _) = assemble::assemble(
            project,
            &self.font_registry,
            self.debug.as_ref(),
            Some(progress),
        );
        if let Some(logger) = &self.debug {
            logger.emit_summary("build");
            logger.flush();
        }
        Ok(document)
    }

    /// Rasterizes every page and re-embeds it as a full-page JPEG at the
    /// engine's configured scale and quality.
    pub fn flatten(&self, document: &Document) -> Result<Document, InkspreadError> {
        self.flatten_with(document, self.raster_scale, self.jpeg_quality)
    }

    pub fn flatten_with(
        &self,
        document: &Document,
        scale: f32,
        quality: u8,
    ) -> Result<Document, InkspreadError> {
        let flat = flatten::flatten(
            document,
            scale,
            quality,
            Some(&self.font_registry),
            self.debug.as_ref(),
        )?;
        if let Some(logger) = &self.debug {
            logger.emit_summary("flatten");
            logger.flush();
        }
        Ok(flat)
    }

    pub fn document_to_pdf(&self, document: &Document) -> Result<Vec<u8>, InkspreadError> {
        pdf::document_to_pdf(document, &self.font_registry)
    }

    pub fn write_pdf(
        &self,
        document: &Document,
        path: impl AsRef<Path>,
    ) -> Result<(), InkspreadError> {
        let bytes = self.document_to_pdf(document)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project() -> Project {
        let mut project = Project::new(PrintConfig::new(TrimSize::SixByNine, true));
        project.template.page_numbers = true;
        project.front_matter.push(
            MatterPage::new(MatterKind::TitlePage, "The Quiet Pond").with_body("A coloring story"),
        );
        let mut unit = ContentUnit::new("The Frog", "A frog sat on a log and watched the rain.");
        unit.tracing_words = vec!["frog".to_string(), "log".to_string()];
        project.units.push(unit);
        let mut second = ContentUnit::new("The Heron", "A heron waded in slow, careful steps.");
        second.caption = Some("Color the heron.".to_string());
        project.units.push(second);
        project
            .end_matter
            .push(MatterPage::new(MatterKind::Notes, "Notes"));
        project
    }

    #[test]
    fn engine_builds_the_expected_page_count() {
        let engine = Inkspread::builder().build().unwrap();
        let document = engine.build_document(&sample_project()).unwrap();
        // 1 front + 2 fillers + 2 spreads + 1 end.
        assert_eq!(document.pages.len(), 8);
        // 6x9 with bleed.
        assert_eq!(document.page_size.width.to_milli_i64(), 450_000);
        assert_eq!(document.page_size.height.to_milli_i64(), 666_000);
    }

    #[test]
    fn invalid_config_fails_before_any_rendering() {
        let engine = Inkspread::builder().build().unwrap();
        let mut project = sample_project();
        project.config.margins.inner = -1.0;
        assert!(matches!(
            engine.build_document(&project),
            Err(InkspreadError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn builder_rejects_bad_output_settings() {
        assert!(matches!(
            Inkspread::builder().jpeg_quality(0).build(),
            Err(InkspreadError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Inkspread::builder().raster_scale(-1.0).build(),
            Err(InkspreadError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn document_serializes_to_pdf_bytes() {
        let engine = Inkspread::builder().build().unwrap();
        let document = engine.build_document(&sample_project()).unwrap();
        let bytes = engine.document_to_pdf(&document).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let parsed = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(parsed.get_pages().len(), 8);
    }

    #[test]
    fn flattened_document_is_one_jpeg_per_page() {
        let engine = Inkspread::builder().build().unwrap();
        let document = engine.build_document(&sample_project()).unwrap();
        // Low scale keeps the test cheap; geometry is scale-independent.
        let flat = engine.flatten_with(&document, 0.5, 80).unwrap();
        assert_eq!(flat.pages.len(), document.pages.len());
        for page in &flat.pages {
            let images = page
                .commands
                .iter()
                .filter(|cmd| matches!(cmd, Command::DrawImage { .. }))
                .count();
            assert_eq!(images, 1);
        }
        // Flattened output still serializes.
        let bytes = engine.document_to_pdf(&flat).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn progress_reaches_completion_through_the_engine() {
        use std::sync::Mutex;
        let engine = Inkspread::builder().build().unwrap();
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |pct| {
            if let Ok(mut values) = sink_seen.lock() {
                values.push(pct);
            }
        });
        engine
            .build_document_with_progress(&sample_project(), &sink)
            .unwrap();
        let values = seen.lock().unwrap();
        assert_eq!(values.last().copied(), Some(100));
    }
}
