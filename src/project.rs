use crate::geometry::PrintConfig;
use crate::types::Color;

/// How an illustration is scaled into its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFit {
    /// Preserve aspect ratio, fit entirely inside the frame, no cropping.
    Contain,
    /// Preserve aspect ratio, fill the frame, crop the overflow.
    Cover,
}

/// Per-book styling. Read-only during a build.
#[derive(Debug, Clone)]
pub struct Template {
    pub has_border: bool,
    pub page_numbers: bool,
    pub image_fit: ImageFit,
    pub title_font: String,
    pub body_font: String,
    pub tracing_font: String,
    pub ink: Color,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            has_border: false,
            page_numbers: true,
            image_fit: ImageFit::Contain,
            title_font: "Helvetica".to_string(),
            body_font: "Helvetica".to_string(),
            tracing_font: "Helvetica".to_string(),
            ink: Color::BLACK,
        }
    }
}

/// One scene of the book. Produces exactly one spread: an illustration page
/// on the verso and a story/tracing page on the facing recto.
#[derive(Debug, Clone)]
pub struct ContentUnit {
    pub title: String,
    pub body_text: String,
    pub tracing_words: Vec<String>,
    /// Opaque illustration reference (data URI or path), resolved at draw
    /// time. `None` or an unresolvable value degrades to a placeholder.
    pub illustration: Option<String>,
    pub caption: Option<String>,
}

impl ContentUnit {
    pub fn new(title: impl Into<String>, body_text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body_text: body_text.into(),
            tracing_words: Vec::new(),
            illustration: None,
            caption: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatterKind {
    TitlePage,
    Copyright,
    Dedication,
    About,
    Certificate,
    Notes,
    Custom,
}

impl MatterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatterKind::TitlePage => "title-page",
            MatterKind::Copyright => "copyright",
            MatterKind::Dedication => "dedication",
            MatterKind::About => "about",
            MatterKind::Certificate => "certificate",
            MatterKind::Notes => "notes",
            MatterKind::Custom => "custom",
        }
    }
}

/// A single front- or end-matter page.
#[derive(Debug, Clone)]
pub struct MatterPage {
    pub kind: MatterKind,
    pub title: String,
    pub body: String,
    pub image: Option<String>,
}

impl MatterPage {
    pub fn new(kind: MatterKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: String::new(),
            image: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Everything needed for one build. The pipeline borrows this read-only
/// and never mutates it.
#[derive(Debug, Clone)]
pub struct Project {
    pub config: PrintConfig,
    pub template: Template,
    pub front_matter: Vec<MatterPage>,
    pub units: Vec<ContentUnit>,
    pub end_matter: Vec<MatterPage>,
}

impl Project {
    pub fn new(config: PrintConfig) -> Self {
        Self {
            config,
            template: Template::default(),
            front_matter: Vec::new(),
            units: Vec::new(),
            end_matter: Vec::new(),
        }
    }
}
