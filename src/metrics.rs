#[derive(Debug, Clone, Default)]
pub struct PageMetrics {
    pub page_number: usize,
    /// Content kind tag: "matter", "blank-filler", "illustration", "story".
    pub content: &'static str,
    pub render_ms: f64,
    pub command_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BuildMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_render_ms: f64,
    pub blank_filler_pages: usize,
}
