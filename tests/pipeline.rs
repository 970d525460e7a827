use board2pdf::{
    Board, Board2Pdf, Capabilities, EnginePreference, ExportSettings,
    LayerCatalog, LayerEntry, PlotBackend, PlotOptions, Size, inspect_pdf_path,
    render_first_page,
};
use lopdf::{Document, Object, Stream, dictionary};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PAGE: (f32, f32) = (300.0, 100.0);

struct FakeBoard {
    path: PathBuf,
    comments: BTreeMap<u8, String>,
}

impl FakeBoard {
    fn new(dir: &Path) -> Self {
        let mut comments = BTreeMap::new();
        comments.insert(4, "rev B".to_string());
        Self {
            path: dir.join("demo.kicad_pcb"),
            comments,
        }
    }
}

impl Board for FakeBoard {
    fn file_path(&self) -> &Path {
        &self.path
    }

    fn layer_catalog(&self) -> board2pdf::Result<LayerCatalog> {
        Ok(LayerCatalog::new(vec![
            LayerEntry::new("F.Cu", "F.Cu", true),
            LayerEntry::new("F.SilkS", "F.Silkscreen", false),
            LayerEntry::new("Edge.Cuts", "Edge.Cuts", false),
        ]))
    }

    fn title_comment(&self, index: u8) -> Option<String> {
        self.comments.get(&index).cloned()
    }

    fn set_title_comment(&mut self, index: u8, text: &str) -> board2pdf::Result<()> {
        self.comments.insert(index, text.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PlotCall {
    options: PlotOptions,
    page_info: Option<String>,
}

/// Draws one black rectangle per layer, overlapping its neighbours:
/// Edge.Cuts on x 0..100, F.SilkS on 50..150, F.Cu on 100..200.
#[derive(Default)]
struct FakePlotter {
    calls: Vec<PlotCall>,
}

fn layer_rect(layer: &str) -> (f32, f32, f32, f32) {
    match layer {
        "Edge.Cuts" => (0.0, 10.0, 100.0, 80.0),
        "F.SilkS" => (50.0, 20.0, 100.0, 60.0),
        _ => (100.0, 30.0, 100.0, 40.0),
    }
}

fn write_layer_pdf(path: &Path, rect: (f32, f32, f32, f32)) -> Result<(), String> {
    let content = format!(
        "0 0 0 rg {} {} {} {} re f\n",
        rect.0, rect.1, rect.2, rect.3
    );
    write_page_pdf(path, content)
}

fn write_page_pdf(path: &Path, content: String) -> Result<(), String> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Real(PAGE.0), Object::Real(PAGE.1)],
        "Contents" => content_id,
        "Resources" => dictionary! {},
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).map(|_| ()).map_err(|e| e.to_string())
}

impl PlotBackend for FakePlotter {
    fn name(&self) -> &str {
        "fake"
    }

    fn plot(&mut self, board: &dyn Board, options: &PlotOptions, output: &Path) -> Result<(), String> {
        self.calls.push(PlotCall {
            options: options.clone(),
            page_info: board.title_comment(4),
        });
        write_layer_pdf(output, layer_rect(&options.layer))
    }
}

fn settings(main: &str, templates: &str) -> ExportSettings {
    let text = format!(
        "[main]\ndel_temp_files = true\ndelete_single_page_files = false\n{main}\n{templates}"
    );
    ExportSettings::from_toml_str(&text).expect("settings")
}

const TOP: &str = r##"
[templates.Top]
enabled_layers = "F.Cu,F.SilkS,Edge.Cuts"
frame = "Edge.Cuts"
popups = "None"
layers = { "F.Cu" = "#FF0000" }
"##;

const TOP_COLOURED: &str = r##"
[templates.Top]
enabled_layers = "F.Cu,F.SilkS,Edge.Cuts"
frame = "Edge.Cuts"
popups = "None"
layers = { "F.Cu" = "#FF0000", "F.SilkS" = "#0000FF", "Edge.Cuts" = "#00FF00" }
"##;

fn exporter(settings: ExportSettings, caps: Capabilities) -> Board2Pdf {
    Board2Pdf::builder(settings)
        .capabilities(caps)
        .build()
        .expect("exporter")
}

#[test]
fn top_template_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let export = exporter(
        settings("enabled_templates = [\"Top\"]", TOP),
        Capabilities::with_flags(true, false),
    );

    let result = export.run(&mut board, &mut plotter);
    assert!(result.success, "{:?}", result.error);

    let calls = &plotter.calls;
    let plotted: Vec<&str> = calls.iter().map(|c| c.options.layer.as_str()).collect();
    assert_eq!(plotted, vec!["Edge.Cuts", "F.SilkS", "F.Cu"]);
    assert!(calls[0].options.plot_frame_ref);
    assert!(!calls[1].options.plot_frame_ref);

    let out = dir.path().join("plot");
    let merged = out.join("demo_Top.pdf");
    let assembly = out.join("demo__Assembly.pdf");
    assert_eq!(result.files, vec![merged.clone(), assembly.clone()]);

    let report = inspect_pdf_path(&assembly).expect("assembly");
    assert_eq!(report.page_count, 1);
    assert_eq!(report.first_page_size, Some(Size::new(PAGE.0, PAGE.1)));
    assert_eq!(report.outline_titles, vec!["Top"]);
    assert!(!report.has_javascript);

    let page = render_first_page(&merged, 72).expect("render");
    assert_eq!(page.color_at(125.0, 50.0), Some((255, 0, 0)));
    assert_eq!(page.color_at(75.0, 50.0), Some((0, 0, 0)));
    assert_eq!(page.color_at(25.0, 50.0), Some((0, 0, 0)));
    assert_eq!(page.color_at(250.0, 50.0), Some((255, 255, 255)));

    let assembled = render_first_page(&assembly, 72).expect("render");
    assert_eq!(assembled.color_at(125.0, 50.0), Some((255, 0, 0)));

    assert!(!out.join(board2pdf::LOCK_FILE_NAME).exists());
    assert!(!out.join("temp").exists());
    assert!(!result.timings.is_empty());
}

#[test]
fn first_listed_layer_ends_on_top_with_either_engine() {
    for (has_fast, preference) in [
        (true, EnginePreference::Fast),
        (true, EnginePreference::Portable),
        (false, EnginePreference::Auto),
    ] {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut board = FakeBoard::new(dir.path());
        let mut plotter = FakePlotter::default();
        let export = Board2Pdf::builder(settings("enabled_templates = [\"Top\"]", TOP_COLOURED))
            .capabilities(Capabilities::with_flags(has_fast, false))
            .merge_engine(preference)
            .colorize_engine(preference)
            .build()
            .expect("exporter");
        let result = export.run(&mut board, &mut plotter);
        assert!(result.success, "{preference:?}: {:?}", result.error);

        let page = render_first_page(&dir.path().join("plot").join("demo_Top.pdf"), 72)
            .expect("render");
        // F.Cu over F.SilkS over Edge.Cuts
        assert_eq!(page.color_at(125.0, 50.0), Some((255, 0, 0)), "{preference:?}");
        assert_eq!(page.color_at(75.0, 50.0), Some((0, 0, 255)), "{preference:?}");
        assert_eq!(page.color_at(25.0, 50.0), Some((0, 255, 0)), "{preference:?}");
    }
}

#[test]
fn template_names_become_safe_file_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let templates = r#"
[templates."Bottom Assembly"]
enabled_layers = "F.SilkS,Edge.Cuts"
popups = "Front Layer"
"#;
    let export = exporter(
        settings("enabled_templates = [\"Bottom Assembly\"]", templates),
        Capabilities::with_flags(true, false),
    );
    let result = export.run(&mut board, &mut plotter);
    assert!(result.success, "{:?}", result.error);

    let out = dir.path().join("plot");
    assert!(out.join("demo_Bottom_Assembly.pdf").is_file());
    let report = inspect_pdf_path(&out.join("demo__Assembly.pdf")).expect("assembly");
    assert_eq!(report.outline_titles, vec!["Bottom Assembly"]);
    assert!(report.has_javascript);
}

#[test]
fn rerun_produces_identical_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("plot");
    let export = exporter(
        settings("enabled_templates = [\"Top\"]", TOP_COLOURED),
        Capabilities::with_flags(true, false),
    );

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let mut board = FakeBoard::new(dir.path());
        let mut plotter = FakePlotter::default();
        let result = export.run(&mut board, &mut plotter);
        assert!(result.success, "{:?}", result.error);
        outputs.push((
            std::fs::read(out.join("demo_Top.pdf")).expect("merged"),
            std::fs::read(out.join("demo__Assembly.pdf")).expect("assembly"),
        ));
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn missing_fast_engine_falls_back_or_fails_before_plotting() {
    let dir = tempfile::tempdir().expect("tempdir");

    let svg = exporter(
        settings("enabled_templates = [\"Top\"]\ncreate_svg = true", TOP),
        Capabilities::with_flags(false, false),
    );
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let result = svg.run(&mut board, &mut plotter);
    assert!(!result.success);
    let error = result.error.expect("error");
    assert!(error.starts_with("EngineUnavailableError"), "{error}");
    assert!(error.contains("fast pdf engine"));
    assert!(plotter.calls.is_empty());
    assert!(!dir.path().join("plot").exists());

    let forced = Board2Pdf::builder(settings("enabled_templates = [\"Top\"]", TOP))
        .capabilities(Capabilities::with_flags(false, false))
        .merge_engine(EnginePreference::Fast)
        .build()
        .expect("exporter");
    let result = forced.run(&mut board, &mut plotter);
    assert!(result.error.expect("error").starts_with("EngineUnavailableError"));
    assert!(plotter.calls.is_empty());
}

#[test]
fn crop_without_utility_fails_before_plotting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let templates = r#"
[templates.Top]
enabled_layers = "F.Cu,F.SilkS"
scaling_method = "1"
"#;
    let export = exporter(
        settings("enabled_templates = [\"Top\"]", templates),
        Capabilities::with_flags(true, false),
    );
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let result = export.run(&mut board, &mut plotter);
    assert!(result.error.expect("error").contains("crop utility"));
    assert!(plotter.calls.is_empty());
}

#[test]
fn svg_is_written_next_to_the_template_page() {
    let dir = tempfile::tempdir().expect("tempdir");
    let export = exporter(
        settings("enabled_templates = [\"Top\"]\ncreate_svg = true", TOP),
        Capabilities::with_flags(true, false),
    );
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let result = export.run(&mut board, &mut plotter);
    assert!(result.success, "{:?}", result.error);
    let svg = dir.path().join("plot").join("demo_Top.svg");
    assert!(result.files.contains(&svg));
    let text = std::fs::read_to_string(&svg).expect("svg");
    let doc = roxmltree::Document::parse(&text).expect("xml");
    let fills: Vec<_> = doc
        .descendants()
        .filter(|n| n.tag_name().name() == "path")
        .filter_map(|n| n.attribute("fill"))
        .collect();
    assert_eq!(fills.last(), Some(&"#FF0000"));
}

#[test]
fn factor_one_keeps_page_size_and_title() {
    let dir = tempfile::tempdir().expect("tempdir");
    let templates = r#"
[templates.Top]
enabled_layers = "F.Cu,F.SilkS,Edge.Cuts"
frame = "Edge.Cuts"
scaling_method = "3"
scaling_factor = 1.0
"#;
    let export = exporter(
        settings("enabled_templates = [\"Top\"]", templates),
        Capabilities::with_flags(true, false),
    );
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let result = export.run(&mut board, &mut plotter);
    assert!(result.success, "{:?}", result.error);

    let report = inspect_pdf_path(&dir.path().join("plot").join("demo_Top.pdf")).expect("merged");
    assert_eq!(report.first_page_size, Some(Size::new(PAGE.0, PAGE.1)));
    assert_eq!(report.outline_titles.first().map(String::as_str), Some("Top"));
}

#[test]
fn page_info_is_stamped_per_template_and_restored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let templates = r#"
[templates.Top]
enabled_layers = "F.Cu"
popups = "None"

[templates.Bottom]
enabled_layers = "F.SilkS"
popups = "None"
"#;
    let export = exporter(
        settings("enabled_templates = [\"Top\", \"Bottom\"]", templates),
        Capabilities::with_flags(true, false),
    );
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let result = export.run(&mut board, &mut plotter);
    assert!(result.success, "{:?}", result.error);

    let seen: Vec<Option<String>> = plotter.calls.iter().map(|c| c.page_info.clone()).collect();
    assert_eq!(
        seen,
        vec![
            Some("Board2Pdf: Top - Page 1/2".to_string()),
            Some("Board2Pdf: Bottom - Page 2/2".to_string()),
        ]
    );
    assert_eq!(board.title_comment(4).as_deref(), Some("rev B"));

    let report = inspect_pdf_path(&dir.path().join("plot").join("demo__Assembly.pdf")).expect("assembly");
    assert_eq!(report.page_count, 2);
    assert_eq!(report.outline_titles, vec!["Top", "Bottom"]);
}

#[test]
fn failed_plot_reports_layer_and_restores_title_block() {
    struct Failing;
    impl PlotBackend for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn plot(&mut self, _: &dyn Board, options: &PlotOptions, _: &Path) -> Result<(), String> {
            Err(format!("no such layer {}", options.layer))
        }
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let export = exporter(
        settings("enabled_templates = [\"Top\"]", TOP),
        Capabilities::with_flags(true, false),
    );
    let mut board = FakeBoard::new(dir.path());
    let result = export.run(&mut board, &mut Failing);
    assert!(!result.success);
    let error = result.error.expect("error");
    assert!(error.starts_with("HostPlotError"), "{error}");
    assert!(error.contains("Edge.Cuts"));
    assert_eq!(board.title_comment(4).as_deref(), Some("rev B"));

    let out = dir.path().join("plot");
    assert!(!out.join("demo_Top.pdf").exists());
    assert!(!out.join("demo__Assembly.pdf").exists());
    assert!(!out.join(board2pdf::LOCK_FILE_NAME).exists());
}

#[test]
fn unknown_layer_is_rejected_before_plotting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let templates = r#"
[templates.Top]
enabled_layers = "F.Cu,In4.Cu"
"#;
    let export = exporter(
        settings("enabled_templates = [\"Top\"]", templates),
        Capabilities::with_flags(true, false),
    );
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = FakePlotter::default();
    let result = export.run(&mut board, &mut plotter);
    let error = result.error.expect("error");
    assert!(error.starts_with("ConfigError"), "{error}");
    assert!(error.contains("In4.Cu"));
    assert!(plotter.calls.is_empty());
}

#[test]
fn scaled_template_exports_the_visible_area() {
    let dir = tempfile::tempdir().expect("tempdir");
    let templates = r##"
[templates.Top]
enabled_layers = "F.Cu,F.SilkS,Edge.Cuts"
frame = "Edge.Cuts"
scaling_method = "3"
scaling_factor = 2.0
layers = { "F.Cu" = "#FF0000" }
"##;
    for preference in [EnginePreference::Fast, EnginePreference::Portable] {
        let export = Board2Pdf::builder(settings(
            "enabled_templates = [\"Top\"]\ncreate_svg = true",
            templates,
        ))
        .capabilities(Capabilities::with_flags(true, false))
        .merge_engine(preference)
        .build()
        .expect("exporter");
        let mut board = FakeBoard::new(dir.path());
        let mut plotter = FakePlotter::default();
        let result = export.run(&mut board, &mut plotter);
        assert!(result.success, "{preference:?}: {:?}", result.error);

        let out = dir.path().join("plot");
        let report = inspect_pdf_path(&out.join("demo_Top.pdf")).expect("merged");
        assert_eq!(report.first_page_size, Some(Size::new(600.0, 200.0)));
        assert_eq!(report.outline_titles, vec!["Top"]);

        // Visible area is the 300x100 crop box centred at (150, 50).
        let page = render_first_page(&out.join("demo_Top.pdf"), 72).expect("render");
        assert_eq!(page.pixmap.width(), 300);
        assert_eq!(page.pixmap.height(), 100);
        // Frame 1:1 at x 150..250, copper doubled to x 200..400 on top.
        assert_eq!(page.color_at(175.0, 100.0), Some((0, 0, 0)), "{preference:?}");
        assert_eq!(page.color_at(260.0, 100.0), Some((255, 0, 0)), "{preference:?}");

        let text = std::fs::read_to_string(out.join("demo_Top.svg")).expect("svg");
        let doc = roxmltree::Document::parse(&text).expect("xml");
        let root = doc.root_element();
        assert_eq!(root.attribute("width"), Some("300pt"));
        assert_eq!(root.attribute("height"), Some("100pt"));
        assert_eq!(root.attribute("viewBox"), Some("0 0 300 100"));
        let group = root
            .children()
            .find(|n| n.has_tag_name("g"))
            .expect("group");
        assert_eq!(group.attribute("transform"), Some("matrix(1 0 0 -1 -150 150)"));
        let frame = doc
            .descendants()
            .find(|n| n.has_tag_name("path"))
            .and_then(|n| n.attribute("d"))
            .expect("frame path");
        assert!(frame.starts_with("M150 60 L250 60"), "{frame}");
    }
}

/// Plots F.Cu with a two-operand `rg`, everything else like [`FakePlotter`].
#[derive(Default)]
struct MalformedCopper {
    inner: FakePlotter,
}

impl PlotBackend for MalformedCopper {
    fn name(&self) -> &str {
        "malformed"
    }

    fn plot(&mut self, board: &dyn Board, options: &PlotOptions, output: &Path) -> Result<(), String> {
        if options.layer == "F.Cu" {
            return write_page_pdf(output, "1 0 rg 100 30 100 40 re f\n".to_string());
        }
        self.inner.plot(board, options, output)
    }
}

#[test]
fn malformed_colour_operator_aborts_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let export = Board2Pdf::builder(settings("enabled_templates = [\"Top\"]", TOP))
        .capabilities(Capabilities::with_flags(true, false))
        .colorize_engine(EnginePreference::Portable)
        .build()
        .expect("exporter");
    let mut board = FakeBoard::new(dir.path());
    let mut plotter = MalformedCopper::default();
    let result = export.run(&mut board, &mut plotter);

    assert!(!result.success);
    let error = result.error.expect("error");
    assert!(error.starts_with("ContentStreamError"), "{error}");
    assert!(error.contains("demo-F.Cu.pdf"), "{error}");
    assert!(error.contains("rg with 2 operands"), "{error}");
    assert_eq!(board.title_comment(4).as_deref(), Some("rev B"));

    let out = dir.path().join("plot");
    assert!(!out.join("demo_Top.pdf").exists());
    assert!(!out.join("demo__Assembly.pdf").exists());
    assert!(!out.join(board2pdf::LOCK_FILE_NAME).exists());
}
