use crate::canvas::{Canvas, Document};
use crate::debug::BuildLogger;
use crate::font::FontRegistry;
use crate::metrics::{BuildMetrics, PageMetrics};
use crate::project::Project;
use crate::render::{PageContent, Renderer};
use crate::stylepass;
use std::sync::Arc;
use std::time::Instant;

/// Progress callback, invoked with a completed percentage (0..=100) after
/// each page-producing step and after the style pass.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// Assembly proceeds through these phases in order; there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildPhase {
    FrontMatter,
    AlignmentCheck,
    Spreads,
    EndMatter,
    Done,
}

struct BuildState<'a> {
    canvas: Canvas,
    renderer: Renderer<'a>,
    metrics: BuildMetrics,
    pages_emitted: usize,
    steps_done: usize,
    total_steps: usize,
    progress: Option<&'a ProgressSink>,
}

impl BuildState<'_> {
    fn emit(&mut self, content: PageContent<'_>) {
        self.pages_emitted += 1;
        let kind = content.kind();
        let started = Instant::now();
        self.renderer
            .render(&mut self.canvas, content, self.pages_emitted);
        let render_ms = started.elapsed().as_secs_f64() * 1000.0;
        let command_count = self.canvas.current_command_count();
        self.canvas.show_page();

        self.metrics.pages.push(PageMetrics {
            page_number: self.pages_emitted,
            content: kind,
            render_ms,
            command_count,
        });
        self.metrics.total_render_ms += render_ms;
        if kind == "blank-filler" {
            self.metrics.blank_filler_pages += 1;
        }
        self.steps_done += 1;
        report(self.progress, self.steps_done, self.total_steps);
    }
}

fn report(progress: Option<&ProgressSink>, done: usize, total: usize) {
    if let Some(sink) = progress {
        let percent = (done * 100 / total.max(1)).min(100) as u8;
        sink(percent);
    }
}

/// Runs the build state machine over a project and returns the finished
/// vector document plus per-page metrics. Rendering never fails; config
/// validation happens before this is called.
///
/// Page order: front matter, then two blank fillers when the front matter
/// ends on an odd count, then illustration/story pairs (one spread per
/// content unit), then end matter. The fillers keep each illustration on a
/// verso so every spread reads image-left, text-right.
pub(crate) fn assemble(
    project: &Project,
    fonts: &FontRegistry,
    logger: Option<&BuildLogger>,
    progress: Option<&ProgressSink>,
) -> (Document, BuildMetrics) {
    let front = project.front_matter.len();
    let fillers = if front % 2 == 1 { 2 } else { 0 };
    let total_steps = front + fillers + 2 * project.units.len() + project.end_matter.len() + 1;
    let started = Instant::now();

    let mut state = BuildState {
        canvas: Canvas::new(project.config.page_size()),
        renderer: Renderer::new(&project.config, &project.template, fonts, logger),
        metrics: BuildMetrics::default(),
        pages_emitted: 0,
        steps_done: 0,
        total_steps,
        progress,
    };

    let mut phase = BuildPhase::FrontMatter;
    while phase != BuildPhase::Done {
        phase = match phase {
            BuildPhase::FrontMatter => {
                for matter in &project.front_matter {
                    state.emit(PageContent::Matter(matter));
                }
                BuildPhase::AlignmentCheck
            }
            BuildPhase::AlignmentCheck => {
                if state.pages_emitted % 2 == 1 {
                    if let Some(logger) = logger {
                        logger.event(
                            "blank-fillers",
                            &[("after-page", &state.pages_emitted.to_string())],
                        );
                        logger.increment("blank-filler-pages", 2);
                    }
                    state.emit(PageContent::Blank);
                    state.emit(PageContent::Blank);
                }
                BuildPhase::Spreads
            }
            BuildPhase::Spreads => {
                for unit in &project.units {
                    state.emit(PageContent::Illustration(unit));
                    state.emit(PageContent::Story(unit));
                }
                BuildPhase::EndMatter
            }
            BuildPhase::EndMatter => {
                for matter in &project.end_matter {
                    state.emit(PageContent::Matter(matter));
                }
                BuildPhase::Done
            }
            BuildPhase::Done => BuildPhase::Done,
        };
    }

    let BuildState {
        canvas,
        metrics,
        steps_done,
        total_steps,
        ..
    } = state;
    let mut document = canvas.into_document();
    stylepass::apply(&mut document, &project.config, &project.template, fonts);
    report(progress, steps_done + 1, total_steps);

    if let Some(logger) = logger {
        logger.increment("pages", document.pages.len() as u64);
        logger.span_ms("assemble", started.elapsed().as_secs_f64() * 1000.0);
    }
    (document, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PrintConfig, TrimSize};
    use crate::project::{ContentUnit, MatterKind, MatterPage};
    use std::sync::Mutex;

    fn project_with(front: usize, units: usize, end: usize) -> Project {
        let mut project = Project::new(PrintConfig::new(TrimSize::SixByNine, false));
        for i in 0..front {
            project
                .front_matter
                .push(MatterPage::new(MatterKind::TitlePage, format!("Front {i}")));
        }
        for i in 0..units {
            let mut unit = ContentUnit::new(format!("Scene {i}"), "Once upon a time.");
            unit.tracing_words = vec!["cat".to_string()];
            project.units.push(unit);
        }
        for i in 0..end {
            project
                .end_matter
                .push(MatterPage::new(MatterKind::Notes, format!("End {i}")));
        }
        project
    }

    fn page_kinds(document: &Document) -> Vec<&str> {
        document
            .pages
            .iter()
            .map(|page| page.meta_value("page-kind").unwrap_or("?"))
            .collect()
    }

    #[test]
    fn odd_front_matter_yields_the_eight_page_book() {
        let project = project_with(1, 2, 1);
        let fonts = FontRegistry::new();
        let (document, metrics) = assemble(&project, &fonts, None, None);
        assert_eq!(document.pages.len(), 8);
        assert_eq!(
            page_kinds(&document),
            vec![
                "matter",
                "blank-filler",
                "blank-filler",
                "illustration",
                "story",
                "illustration",
                "story",
                "matter"
            ]
        );
        // With the fillers in place every illustration sits on a verso.
        for (idx, kind) in page_kinds(&document).iter().enumerate() {
            if *kind == "illustration" {
                assert_eq!((idx + 1) % 2, 0, "page {}", idx + 1);
            }
        }
        assert_eq!(metrics.blank_filler_pages, 2);
        assert_eq!(metrics.pages.len(), 8);
    }

    #[test]
    fn even_front_matter_inserts_no_fillers() {
        let project = project_with(2, 1, 0);
        let fonts = FontRegistry::new();
        let (document, metrics) = assemble(&project, &fonts, None, None);
        assert_eq!(document.pages.len(), 4);
        assert_eq!(metrics.blank_filler_pages, 0);
        assert!(!page_kinds(&document).contains(&"blank-filler"));
    }

    #[test]
    fn page_count_matches_the_alignment_formula() {
        let fonts = FontRegistry::new();
        for front in 0..4 {
            for units in 0..3 {
                let project = project_with(front, units, 1);
                let (document, _) = assemble(&project, &fonts, None, None);
                let fillers = if front % 2 == 1 { 2 } else { 0 };
                assert_eq!(
                    document.pages.len(),
                    front + fillers + 2 * units + 1,
                    "front={front} units={units}"
                );
            }
        }
    }

    #[test]
    fn progress_is_monotone_and_finishes_at_100() {
        let project = project_with(1, 2, 1);
        let fonts = FontRegistry::new();
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |pct| {
            if let Ok(mut values) = sink_seen.lock() {
                values.push(pct);
            }
        });
        assemble(&project, &fonts, None, Some(&sink));
        let values = seen.lock().unwrap().clone();
        // 8 page steps plus the style pass.
        assert_eq!(values.len(), 9);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values.last().copied(), Some(100));
    }

    #[test]
    fn empty_project_builds_an_empty_document() {
        let project = project_with(0, 0, 0);
        let fonts = FontRegistry::new();
        let (document, metrics) = assemble(&project, &fonts, None, None);
        assert!(document.pages.is_empty());
        assert_eq!(metrics.blank_filler_pages, 0);
    }

    #[test]
    fn story_pages_alternate_onto_rectos() {
        let project = project_with(3, 2, 0);
        let fonts = FontRegistry::new();
        let (document, _) = assemble(&project, &fonts, None, None);
        // 3 front + 2 fillers, so spreads start at page 6.
        let kinds = page_kinds(&document);
        assert_eq!(kinds[5], "illustration");
        assert_eq!(kinds[6], "story");
        assert_eq!(kinds[7], "illustration");
        assert_eq!(kinds[8], "story");
    }
}
