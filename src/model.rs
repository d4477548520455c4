use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

use crate::domain::{
    CMDMode, ChartType, DVConfig, DVError, HELP_TEXT, LoadResult, Message, PAGE_SIZES,
};
use crate::engine::{self, ChartData, ColumnStats, ColumnSummary, InferredType, PieData, Row, Table};
use crate::inputter::{InputResult, Inputter};
use crate::loader::Loader;

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    LOADING,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    POPUP,
    CMDINPUT,
}

/// What the chart area shows for the selected column.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartView {
    /// One point per numeric cell, labelled with its row index.
    Points(ChartData),
    /// Value counts.
    Counts(ChartData),
    Percentages(PieData),
}

/// Everything derived from the selected column. Rebuilt whenever the table, the column or the
/// chart type changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAnalysis {
    pub column: String,
    pub inferred_type: InferredType,
    pub stats: Option<ColumnStats>,
    pub chart: ChartView,
}

impl ColumnAnalysis {
    pub fn is_numeric(&self) -> bool {
        self.inferred_type == InferredType::Numeric
    }
}

pub struct Model {
    config: DVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    table: Table,
    file_name: Option<String>,
    summaries: Vec<ColumnSummary>,
    selected_column: usize,
    chart_type: ChartType,
    analysis: Option<ColumnAnalysis>,
    page: usize,
    page_size: usize,
    loader: Loader,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    show_popup: bool,
    ui_size: (usize, usize),
    status_message: String,
    last_status_message_update: Instant,
}

impl Model {
    pub fn init(config: &DVConfig) -> Result<Self, DVError> {
        if config.page_size == 0 {
            return Err(DVError::LoadingFailed("Page size must be positive".into()));
        }
        let model = Self {
            config: config.clone(),
            status: Status::READY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            table: Table::empty(),
            file_name: None,
            summaries: Vec::new(),
            selected_column: 0,
            chart_type: ChartType::default(),
            analysis: None,
            page: 0,
            page_size: config.page_size,
            loader: Loader::new(),
            clipboard: None,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            show_popup: false,
            ui_size: (0, 0),
            status_message: "Started dv! Press o to open a CSV file.".to_string(),
            last_status_message_update: Instant::now(),
        };
        Ok(model)
    }

    /// Starts loading a file in the background. `path` is shell expanded.
    pub fn open(&mut self, path: &str) {
        let expanded = match shellexpand::full(path) {
            Ok(p) => p.into_owned(),
            Err(e) => {
                self.set_status_message(format!("Can not expand \"{path}\": {e}"));
                return;
            }
        };
        if expanded.trim().is_empty() {
            self.report_error(DVError::EmptyUpload);
            return;
        }
        let ticket = self.loader.request(PathBuf::from(&expanded));
        trace!("Requested load #{ticket}");
        self.status = Status::LOADING;
        self.set_status_message(format!("Loading {expanded} ..."));
    }

    /// Hands out a finished background load as a message.
    pub fn poll_loader(&mut self) -> Option<Message> {
        self.loader.poll().map(Message::Loaded)
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), DVError> {
        if let Some(msg) = message {
            // Loads finish independent of the current mode
            if let Message::Loaded(result) = msg {
                self.apply_load(result);
                return Ok(());
            }
            match self.modus {
                Modus::TABLE => match msg {
                    Message::Quit => self.quit(),
                    Message::Help => self.show_help(),
                    Message::NextColumn => self.move_column(1),
                    Message::PrevColumn => self.move_column(-1),
                    Message::NextChartType => self.set_chart_type(self.chart_type.next()),
                    Message::SetChartType(chart_type) => self.set_chart_type(chart_type),
                    Message::NextPage => self.set_page(self.page.saturating_add(1)),
                    Message::PrevPage => self.set_page(self.page.saturating_sub(1)),
                    Message::FirstPage => self.set_page(0),
                    Message::LastPage => self.set_page(self.page_count() - 1),
                    Message::IncreasePageSize => self.cycle_page_size(true),
                    Message::DecreasePageSize => self.cycle_page_size(false),
                    Message::OpenFile => self.enter_cmd_mode(CMDMode::OpenFile),
                    Message::GotoColumn => self.enter_cmd_mode(CMDMode::GotoColumn),
                    Message::CopyPage => self.copy_page(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::POPUP => match msg {
                    Message::Quit => self.quit(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    Message::Exit | Message::Enter | Message::Help => self.exit(),
                    _ => (),
                },
                Modus::CMDINPUT => match msg {
                    Message::RawKey(key) => self.raw_input(key),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
            }
        }
        Ok(())
    }

    // -------------------- State changes ---------------------- //

    fn apply_load(&mut self, result: LoadResult) {
        match result.table {
            Ok(table) => {
                self.file_name = Some(
                    result
                        .path
                        .file_name()
                        .and_then(|s| s.to_str())
                        .unwrap_or("???")
                        .to_string(),
                );
                self.replace_table(table);
                if self.table.is_empty() {
                    self.set_status_message("File is empty, nothing to show.");
                } else {
                    self.set_status_message(format!(
                        "Loaded {} rows and {} columns.",
                        self.table.nrows(),
                        self.table.ncols()
                    ));
                }
            }
            Err(e) => {
                error!("Loading {:?} failed: {e}", result.path);
                self.report_error(e);
            }
        }
        if !self.loader.is_loading() {
            self.status = Status::READY;
        }
    }

    /// Replaces the current table in full and resets selection and paging.
    pub fn replace_table(&mut self, table: Table) {
        self.table = table;
        self.summaries = engine::column_summaries_with(&self.table, self.config.numeric_rule);
        self.selected_column = 0;
        self.page = 0;
        self.rebuild_analysis();
    }

    fn rebuild_analysis(&mut self) {
        let Some(column) = self.table.headers().get(self.selected_column).cloned() else {
            self.analysis = None;
            return;
        };
        let start_time = Instant::now();
        let table = &self.table;

        let inferred_type = engine::classify(table, &column, self.config.numeric_rule);
        let numeric = inferred_type == InferredType::Numeric;
        let stats = if numeric {
            engine::numeric_stats(table, &column)
        } else {
            None
        };
        let chart = match self.chart_type {
            ChartType::Bar if numeric => {
                ChartView::Points(engine::bar_chart_data(table, &column, true))
            }
            ChartType::Bar => ChartView::Counts(engine::bar_chart_data(table, &column, false)),
            ChartType::Histogram => ChartView::Counts(engine::histogram_data(table, &column)),
            ChartType::Pie => ChartView::Percentages(engine::pie_data(table, &column)),
        };

        debug!(
            "Analysis of \"{column}\" ({inferred_type}, {:?}) took {}ms",
            self.chart_type,
            start_time.elapsed().as_millis()
        );
        self.analysis = Some(ColumnAnalysis {
            column,
            inferred_type,
            stats,
            chart,
        });
    }

    fn select_column(&mut self, idx: usize) {
        if idx >= self.table.ncols() {
            return;
        }
        self.selected_column = idx;
        self.rebuild_analysis();
    }

    fn move_column(&mut self, step: isize) {
        let ncols = self.table.ncols() as isize;
        if ncols == 0 {
            return;
        }
        let idx = (self.selected_column as isize + step).rem_euclid(ncols);
        self.select_column(idx as usize);
    }

    pub fn goto_column(&mut self, name: &str) -> Result<(), DVError> {
        let idx = self
            .table
            .column_index(name)
            .ok_or_else(|| DVError::UnknownColumn(name.to_string()))?;
        self.select_column(idx);
        Ok(())
    }

    fn set_chart_type(&mut self, chart_type: ChartType) {
        self.chart_type = chart_type;
        self.rebuild_analysis();
    }

    pub fn page_count(&self) -> usize {
        std::cmp::max(1, self.table.nrows().div_ceil(self.page_size))
    }

    fn set_page(&mut self, page: usize) {
        self.page = std::cmp::min(page, self.page_count() - 1);
    }

    fn cycle_page_size(&mut self, grow: bool) {
        let pos = PAGE_SIZES.iter().position(|&s| s >= self.page_size);
        let next = match (pos, grow) {
            (Some(p), true) if PAGE_SIZES[p] > self.page_size => p,
            (Some(p), true) => std::cmp::min(p + 1, PAGE_SIZES.len() - 1),
            (Some(p), false) => p.saturating_sub(1),
            (None, _) => PAGE_SIZES.len() - 1,
        };
        self.page_size = PAGE_SIZES[next];
        self.page = 0;
        trace!("Page size is now {}", self.page_size);
    }

    /// Index of the first row on the current page.
    pub fn page_start(&self) -> usize {
        std::cmp::min(self.page * self.page_size, self.table.nrows())
    }

    pub fn page_rows(&self) -> &[Row] {
        let begin = self.page_start();
        let end = std::cmp::min(begin + self.page_size, self.table.nrows());
        &self.table.rows()[begin..end]
    }

    fn wrap_cell_content(c: &str) -> String {
        let needs_escaping = c.contains('"');
        let needs_wrapping = needs_escaping || c.chars().any(|c| c == ',' || c == '\n');
        let mut out = String::from(c);

        if needs_escaping {
            out = out.replace('"', "\"\"");
        }
        if needs_wrapping {
            out = format!("\"{out}\"");
        }
        out
    }

    /// The header and the rows of the current page as CSV text.
    pub fn page_as_csv(&self) -> String {
        let mut lines = Vec::with_capacity(self.page_size + 1);
        lines.push(
            self.table
                .headers()
                .iter()
                .map(|h| Model::wrap_cell_content(h))
                .collect::<Vec<String>>()
                .join(","),
        );
        for row in self.page_rows() {
            lines.push(
                row.iter()
                    .map(|c| Model::wrap_cell_content(&c.to_string()))
                    .collect::<Vec<String>>()
                    .join(","),
            );
        }
        lines.join("\n")
    }

    fn copy_page(&mut self) {
        if self.table.is_empty() {
            return;
        }
        let content = self.page_as_csv();
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(e) => {
                    error!("Clipboard unavailable: {:?}", e);
                    self.set_status_message("Clipboard unavailable!");
                    return;
                }
            }
        }
        if let Some(clipboard) = self.clipboard.as_mut() {
            match clipboard.set_text(content) {
                Ok(_) => {
                    trace!("Copied page {} to clipboard.", self.page);
                    self.set_status_message(format!("Copied {} rows.", self.page_rows().len()));
                }
                Err(e) => error!("Error copying to clipboard: {:?}", e),
            }
        }
    }

    fn report_error(&mut self, e: DVError) {
        self.set_status_message(format!("Error: {e}"));
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.last_status_message_update = Instant::now();
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.ui_size.0, width, self.ui_size.1, height
        );
        self.ui_size = (width, height);
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.show_popup = true;
    }

    fn exit(&mut self) {
        if self.modus == Modus::POPUP {
            trace!("Close popup ...");
            self.modus = self.previous_modus;
            self.previous_modus = Modus::POPUP;
            self.show_popup = false;
        }
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {:?} ...", mode);
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);
        self.active_cmdinput = true;
        self.input.clear();
        self.last_input = self.input.get();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if self.active_cmdinput {
            self.last_input = self.input.read(key);
            if self.last_input.finished {
                self.handle_cmd_input();
            }
        }
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {}", self.last_input.input);
        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;

        let cmd_input = self.last_input.input.clone();
        let cmd_mode = self.cmd_mode.take();
        if self.last_input.canceled {
            info!("Command {:?} canceled", cmd_mode);
            return;
        }
        match cmd_mode {
            Some(CMDMode::OpenFile) => self.open(&cmd_input),
            Some(CMDMode::GotoColumn) => {
                if let Err(e) = self.goto_column(cmd_input.trim()) {
                    self.report_error(e);
                }
            }
            None => info!("Cmd mode is none!"),
        }
    }

    // -------------------- Read access for the UI ---------------------- //

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn summaries(&self) -> &[ColumnSummary] {
        &self.summaries
    }

    pub fn selected_column(&self) -> Option<&str> {
        self.table
            .headers()
            .get(self.selected_column)
            .map(|s| s.as_str())
    }

    pub fn selected_column_idx(&self) -> usize {
        self.selected_column
    }

    /// The analysis of the selected column. Never hands out results of another column.
    pub fn analysis(&self) -> Option<&ColumnAnalysis> {
        let selected = self.selected_column()?;
        self.analysis.as_ref().filter(|a| a.column == selected)
    }

    pub fn chart_type(&self) -> ChartType {
        self.chart_type
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn status_message_age(&self) -> Duration {
        self.last_status_message_update.elapsed()
    }

    pub fn is_loading(&self) -> bool {
        self.status == Status::LOADING
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn cmd_mode(&self) -> Option<CMDMode> {
        self.cmd_mode
    }

    pub fn cmd_input(&self) -> &InputResult {
        &self.last_input
    }

    pub fn popup_message(&self) -> Option<&'static str> {
        self.show_popup.then_some(HELP_TEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Cell, Record};
    use ratatui::crossterm::event::{KeyCode, KeyModifiers};

    fn sample_table() -> Table {
        let names = vec!["city".to_string(), "pop".to_string()];
        let rows = [("NY", 8.0), ("LA", 4.0), ("NY", 8.0), ("SF", 1.0), ("LA", 2.0), ("BO", 3.0)];
        let records = rows
            .iter()
            .map(|(city, pop)| {
                Record::from([
                    ("city".to_string(), Cell::Text(city.to_string())),
                    ("pop".to_string(), Cell::Number(*pop)),
                ])
            })
            .collect();
        engine::ingest(records, names)
    }

    fn model_with(table: Table) -> Model {
        let mut model = Model::init(&DVConfig::default()).unwrap();
        model
            .update(Some(Message::Loaded(LoadResult {
                ticket: 1,
                path: PathBuf::from("/tmp/cities.csv"),
                table: Ok(table),
            })))
            .unwrap();
        model
    }

    fn key(code: KeyCode) -> Message {
        Message::RawKey(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(model: &mut Model, text: &str) {
        for c in text.chars() {
            model.update(Some(key(KeyCode::Char(c)))).unwrap();
        }
        model.update(Some(key(KeyCode::Enter))).unwrap();
    }

    #[test]
    fn load_selects_first_column() {
        let model = model_with(sample_table());
        assert_eq!(model.file_name(), Some("cities.csv"));
        assert_eq!(model.selected_column(), Some("city"));
        assert_eq!(model.status, Status::READY);

        let analysis = model.analysis().unwrap();
        assert_eq!(analysis.column, "city");
        assert!(!analysis.is_numeric());
        assert_eq!(analysis.stats, None);
        assert_eq!(model.summaries().len(), 2);
    }

    #[test]
    fn changing_column_recomputes_analysis() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::NextColumn)).unwrap();

        let analysis = model.analysis().unwrap();
        assert_eq!(analysis.column, "pop");
        assert!(analysis.is_numeric());
        let stats = analysis.stats.unwrap();
        assert_eq!((stats.min, stats.max), (1.0, 8.0));
        assert!(matches!(analysis.chart, ChartView::Points(_)));

        // Wraps around to the first column
        model.update(Some(Message::NextColumn)).unwrap();
        assert_eq!(model.analysis().unwrap().column, "city");
        model.update(Some(Message::PrevColumn)).unwrap();
        assert_eq!(model.analysis().unwrap().column, "pop");
    }

    #[test]
    fn new_table_resets_selection_and_page() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::NextColumn)).unwrap();
        model.update(Some(Message::NextPage)).unwrap();
        assert_eq!(model.page(), 1);

        let other = engine::ingest(
            vec![Record::from([("x".to_string(), Cell::Number(1.0))])],
            vec!["x".to_string()],
        );
        model.replace_table(other);
        assert_eq!(model.selected_column(), Some("x"));
        assert_eq!(model.page(), 0);
        assert_eq!(model.analysis().unwrap().column, "x");
    }

    #[test]
    fn chart_type_selects_chart_data() {
        let mut model = model_with(sample_table());
        let ChartView::Counts(bar) = &model.analysis().unwrap().chart else {
            panic!("text column should plot counts");
        };
        assert_eq!(bar.labels, vec!["NY", "LA", "SF", "BO"]);
        assert_eq!(bar.values, vec![2.0, 2.0, 1.0, 1.0]);

        model.update(Some(Message::SetChartType(ChartType::Pie))).unwrap();
        let ChartView::Percentages(pie) = &model.analysis().unwrap().chart else {
            panic!("pie chart should plot percentages");
        };
        assert_eq!(pie.percentages, vec![33.33, 33.33, 16.67, 16.67]);

        model.update(Some(Message::NextChartType)).unwrap();
        assert_eq!(model.chart_type(), ChartType::Bar);
        model.update(Some(Message::NextColumn)).unwrap();
        model.update(Some(Message::NextChartType)).unwrap();
        assert_eq!(model.chart_type(), ChartType::Histogram);
        assert!(matches!(model.analysis().unwrap().chart, ChartView::Counts(_)));
    }

    #[test]
    fn pages_are_clamped() {
        let mut model = model_with(sample_table());
        assert_eq!(model.page_count(), 2);
        assert_eq!(model.page_rows().len(), 5);

        model.update(Some(Message::LastPage)).unwrap();
        assert_eq!(model.page(), 1);
        assert_eq!(model.page_start(), 5);
        assert_eq!(model.page_rows().len(), 1);

        model.update(Some(Message::NextPage)).unwrap();
        assert_eq!(model.page(), 1);

        model.update(Some(Message::FirstPage)).unwrap();
        model.update(Some(Message::PrevPage)).unwrap();
        assert_eq!(model.page(), 0);
    }

    #[test]
    fn page_size_cycles_and_resets_page() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::NextPage)).unwrap();
        model.update(Some(Message::IncreasePageSize)).unwrap();
        assert_eq!(model.page_size(), 10);
        assert_eq!(model.page(), 0);
        assert_eq!(model.page_count(), 1);

        model.update(Some(Message::IncreasePageSize)).unwrap();
        model.update(Some(Message::IncreasePageSize)).unwrap();
        assert_eq!(model.page_size(), 25);

        model.update(Some(Message::DecreasePageSize)).unwrap();
        model.update(Some(Message::DecreasePageSize)).unwrap();
        model.update(Some(Message::DecreasePageSize)).unwrap();
        assert_eq!(model.page_size(), 5);
    }

    #[test]
    fn empty_table_shows_nothing() {
        let model = model_with(Table::empty());
        assert_eq!(model.selected_column(), None);
        assert!(model.analysis().is_none());
        assert!(model.summaries().is_empty());
        assert!(model.page_rows().is_empty());
        assert_eq!(model.page_count(), 1);
        assert_eq!(model.status_message(), "File is empty, nothing to show.");
    }

    #[test]
    fn failed_load_keeps_current_table() {
        let mut model = model_with(sample_table());
        model
            .update(Some(Message::Loaded(LoadResult {
                ticket: 2,
                path: PathBuf::from("missing.csv"),
                table: Err(DVError::FileNotFound),
            })))
            .unwrap();
        assert_eq!(model.table().nrows(), 6);
        assert_eq!(model.file_name(), Some("cities.csv"));
        assert_eq!(model.status_message(), "Error: File not found");
    }

    #[test]
    fn goto_column_by_name() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::GotoColumn)).unwrap();
        assert!(model.raw_keyevents());
        type_text(&mut model, "pop");
        assert!(!model.raw_keyevents());
        assert_eq!(model.selected_column(), Some("pop"));

        model.update(Some(Message::GotoColumn)).unwrap();
        type_text(&mut model, "nope");
        assert_eq!(model.selected_column(), Some("pop"));
        assert_eq!(model.status_message(), "Error: Unknown column \"nope\"");
        assert!(matches!(
            model.goto_column("nope"),
            Err(DVError::UnknownColumn(_))
        ));
    }

    #[test]
    fn canceled_command_changes_nothing() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::GotoColumn)).unwrap();
        model.update(Some(key(KeyCode::Char('p')))).unwrap();
        model.update(Some(key(KeyCode::Esc))).unwrap();
        assert!(!model.raw_keyevents());
        assert_eq!(model.selected_column(), Some("city"));
    }

    #[test]
    fn opening_blank_path_reports_empty_upload() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::OpenFile)).unwrap();
        type_text(&mut model, "  ");
        assert_eq!(model.status, Status::READY);
        assert_eq!(model.status_message(), "Error: No file selected");
    }

    #[test]
    fn help_popup_opens_and_closes() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::Help)).unwrap();
        assert!(model.popup_message().is_some());
        // Navigation is ignored while the popup is open
        model.update(Some(Message::NextColumn)).unwrap();
        assert_eq!(model.selected_column(), Some("city"));
        model.update(Some(Message::Exit)).unwrap();
        assert!(model.popup_message().is_none());
    }

    #[test]
    fn page_is_exported_as_csv() {
        let table = engine::ingest(
            vec![
                Record::from([
                    ("name".to_string(), Cell::Text("Doe, Jane".into())),
                    ("n".to_string(), Cell::Number(1.5)),
                ]),
                Record::from([("name".to_string(), Cell::Text("say \"hi\"".into()))]),
            ],
            vec!["name".to_string(), "n".to_string()],
        );
        let model = model_with(table);
        assert_eq!(
            model.page_as_csv(),
            "name,n\n\"Doe, Jane\",1.5\n\"say \"\"hi\"\"\","
        );
    }

    #[test]
    fn quit_stops_the_model() {
        let mut model = model_with(sample_table());
        model.update(Some(Message::Quit)).unwrap();
        assert_eq!(model.status, Status::QUITTING);
    }
}
