use std::time::Duration;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Flex, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span, Text},
    widgets::{
        Axis, Bar, BarChart, BarGroup, Block, Cell as TCell, Chart, Clear, Dataset, GraphType,
        Paragraph, Row as TRow, Table, Wrap,
    },
};

use crate::domain::{CMDMode, DVConfig};
use crate::engine::{ChartData, ColumnStats, PieData, render_number};
use crate::model::{ChartView, Model};

pub const STATUSLINE_HEIGHT: u16 = 1;
pub const TITLE_HEIGHT: u16 = 1;
pub const STATS_PANEL_WIDTH: u16 = 28;
pub const COLUMN_WIDTH_MARGIN: usize = 1;
pub const MISSING_SYMBOL: &str = "∅";
const STATUS_MESSAGE_FADE: Duration = Duration::from_secs(5);
const HELP_HINT: &str = " ? help ";

#[derive(Debug)]
pub struct TableUI {
    max_column_width: usize,
}

impl TableUI {
    pub fn new(cfg: &DVConfig) -> Self {
        Self {
            max_column_width: cfg.max_column_width,
        }
    }

    pub fn draw(&mut self, model: &Model, frame: &mut Frame) {
        let [title_area, body_area, status_area] = Layout::vertical([
            Constraint::Length(TITLE_HEIGHT),
            Constraint::Min(0),
            Constraint::Length(STATUSLINE_HEIGHT),
        ])
        .areas(frame.area());

        self.render_title(model, frame, title_area);
        if model.table().is_empty() {
            self.render_nothing(model, frame, body_area);
        } else {
            let table_height = model.page_size() as u16 + 4;
            let summary_height = model.summaries().len() as u16 + 3;
            let [top_area, data_area, summary_area] = Layout::vertical([
                Constraint::Min(10),
                Constraint::Length(table_height),
                Constraint::Length(summary_height),
            ])
            .areas(body_area);
            let [stats_area, chart_area] = Layout::horizontal([
                Constraint::Length(STATS_PANEL_WIDTH),
                Constraint::Min(0),
            ])
            .areas(top_area);

            self.render_stats(model, frame, stats_area);
            self.render_chart(model, frame, chart_area);
            self.render_data_table(model, frame, data_area);
            self.render_summary_table(model, frame, summary_area);
        }
        self.render_statusline(model, frame, status_area);

        if let Some(message) = model.popup_message() {
            self.render_popup(message, frame);
        }
    }

    fn render_title(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let mut spans = vec![" dv ".bold().reversed()];
        if let Some(name) = model.file_name() {
            spans.push(format!(" {name} ").yellow());
        }
        if let Some(column) = model.selected_column() {
            spans.push(" │ column: ".into());
            spans.push(column.to_string().bold());
            spans.push(" │ chart: ".into());
            spans.push(model.chart_type().title().bold());
            spans.push(format!(" │ page {}/{}", model.page() + 1, model.page_count()).into());
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn render_nothing(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let text = if model.is_loading() {
            "Loading ..."
        } else {
            "Nothing to show. Press o to open a CSV file."
        };
        let [center] = Layout::vertical([Constraint::Length(1)])
            .flex(Flex::Center)
            .areas(area);
        frame.render_widget(Paragraph::new(text).centered().dim(), center);
    }

    fn render_stats(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().title(" Statistics ");
        let stats: Option<ColumnStats> = model
            .analysis()
            .filter(|a| a.is_numeric())
            .and_then(|a| a.stats);

        let lines = match stats {
            Some(s) => vec![
                stat_line("Minimum", s.min),
                stat_line("Maximum", s.max),
                stat_line("Mean", s.mean),
            ],
            None => vec![Line::from("no statistics".dim())],
        };
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_chart(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let Some(analysis) = model.analysis() else {
            frame.render_widget(Block::bordered().title(" Chart "), area);
            return;
        };
        let title = format!(" {} of {} ", model.chart_type().title(), analysis.column);
        let block = Block::bordered().title(title);
        match &analysis.chart {
            ChartView::Points(data) => render_points(data, block, frame, area),
            ChartView::Counts(data) => render_counts(data, block, frame, area),
            ChartView::Percentages(data) => render_percentages(data, block, frame, area),
        }
    }

    fn render_data_table(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let table = model.table();
        let rows = model.page_rows();
        let selected = model.selected_column_idx();

        let widths: Vec<Constraint> = table
            .headers()
            .iter()
            .enumerate()
            .map(|(cidx, name)| {
                let widest = rows
                    .iter()
                    .map(|row| display_cell(&row[cidx]).chars().count())
                    .max()
                    .unwrap_or(0);
                let width = std::cmp::max(name.chars().count(), widest) + COLUMN_WIDTH_MARGIN;
                Constraint::Length(std::cmp::min(width, self.max_column_width) as u16)
            })
            .collect();

        let header_style = Style::default().add_modifier(Modifier::BOLD);
        let header = TRow::new(table.headers().iter().enumerate().map(|(cidx, name)| {
            let cell = TCell::from(name.as_str());
            if cidx == selected {
                cell.style(header_style.fg(Color::Yellow))
            } else {
                cell.style(header_style)
            }
        }));

        let body = rows.iter().map(|row| {
            TRow::new(row.iter().enumerate().map(|(cidx, value)| {
                let cell = TCell::from(display_cell(value));
                if cidx == selected {
                    cell.style(Style::default().fg(Color::Yellow))
                } else {
                    cell
                }
            }))
        });

        let first = model.page_start();
        let footer = if rows.is_empty() {
            format!(" no rows of {} ", table.nrows())
        } else {
            format!(" rows {}-{} of {} ", first + 1, first + rows.len(), table.nrows())
        };
        let block = Block::bordered()
            .title(" Data ")
            .title_bottom(Line::from(footer).right_aligned());

        frame.render_widget(Table::new(body, widths).header(header).block(block), area);
    }

    fn render_summary_table(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let header = TRow::new(["Column Name", "Non-Null Count", "Data Type"])
            .style(Style::default().add_modifier(Modifier::BOLD));
        let rows = model.summaries().iter().map(|s| {
            TRow::new([
                s.name.clone(),
                s.non_null_count.to_string(),
                s.inferred_type.to_string(),
            ])
        });
        let widths = [
            Constraint::Length(self.max_column_width as u16),
            Constraint::Length(16),
            Constraint::Length(10),
        ];
        frame.render_widget(
            Table::new(rows, widths)
                .header(header)
                .block(Block::bordered().title(" Info ")),
            area,
        );
    }

    fn render_statusline(&self, model: &Model, frame: &mut Frame, area: Rect) {
        if model.raw_keyevents() {
            let prompt = match model.cmd_mode() {
                Some(CMDMode::OpenFile) => "Open: ",
                Some(CMDMode::GotoColumn) => "Column: ",
                None => ":",
            };
            let prompt_width = prompt.chars().count() as u16;
            let input_width = area.width.saturating_sub(prompt_width) as usize;
            let (visible, cursor) = model.cmd_input().visible(input_width);
            let line = Line::from(vec![prompt.bold(), Span::raw(visible)]);
            frame.render_widget(Paragraph::new(line), area);
            frame.set_cursor_position((area.x + prompt_width + cursor as u16, area.y));
            return;
        }

        let message = model.status_message().to_string();
        let styled: Span = if model.status_message_age() > STATUS_MESSAGE_FADE {
            message.dim()
        } else {
            message.into()
        };
        let mut spans = vec![styled];
        if model.is_loading() {
            spans.push("  ⟳".yellow());
        }
        let [message_area, help_area] = Layout::horizontal([
            Constraint::Min(0),
            Constraint::Length(HELP_HINT.chars().count() as u16),
        ])
        .areas(area);
        frame.render_widget(Paragraph::new(Line::from(spans)), message_area);
        frame.render_widget(Paragraph::new(HELP_HINT.dim()).right_aligned(), help_area);
    }

    fn render_popup(&self, message: &str, frame: &mut Frame) {
        let text = Text::from(message);
        let height = text.height() as u16 + 2;
        let width = text.width() as u16 + 4;
        let area = popup_area(frame.area(), width, height);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .block(Block::bordered().title(" Help ").title_bottom(" Esc ")),
            area,
        );
    }
}

fn display_cell(value: &crate::engine::Cell) -> String {
    if value.is_missing() {
        MISSING_SYMBOL.to_string()
    } else {
        value.to_string().replace("\r\n", " ↵ ").replace('\n', " ↵ ")
    }
}

fn stat_line(name: &str, value: f64) -> Line<'static> {
    Line::from(vec![
        format!("{name:<9}").bold(),
        Span::raw(render_number(value)),
    ])
}

fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let [area] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(area);
    area
}

fn bounds(values: &[f64]) -> [f64; 2] {
    let min = values.iter().copied().fold(0.0, f64::min);
    let max = values.iter().copied().fold(0.0, f64::max);
    if min == max { [min, min + 1.0] } else { [min, max] }
}

fn render_points(data: &ChartData, block: Block, frame: &mut Frame, area: Rect) {
    let points: Vec<(f64, f64)> = data
        .labels
        .iter()
        .zip(data.values.iter())
        .map(|(label, &value)| (label.parse::<f64>().unwrap_or_default(), value))
        .collect();
    let x_bounds = [0.0, points.last().map(|p| p.0).unwrap_or(0.0).max(1.0)];
    let y_bounds = bounds(&data.values);

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Bar)
        .style(Style::default().fg(Color::Cyan))
        .data(&points);
    let chart = Chart::new(vec![dataset])
        .block(block)
        .x_axis(
            Axis::default()
                .title("Row".dim())
                .bounds(x_bounds)
                .labels([render_number(x_bounds[0]), render_number(x_bounds[1])]),
        )
        .y_axis(
            Axis::default()
                .title("Value".dim())
                .bounds(y_bounds)
                .labels([render_number(y_bounds[0]), render_number(y_bounds[1])]),
        );
    frame.render_widget(chart, area);
}

fn render_counts(data: &ChartData, block: Block, frame: &mut Frame, area: Rect) {
    let bars: Vec<Bar> = data
        .labels
        .iter()
        .zip(data.values.iter())
        .map(|(label, &count)| {
            Bar::default()
                .value(count as u64)
                .label(Line::from(label.clone()))
                .text_value(render_number(count))
        })
        .collect();
    let inner_width = area.width.saturating_sub(2) as usize;
    let bar_width = (inner_width / bars.len().max(1)).saturating_sub(1).clamp(1, 9) as u16;

    let chart = BarChart::default()
        .block(block)
        .bar_width(bar_width)
        .bar_gap(1)
        .bar_style(Style::default().fg(Color::Cyan))
        .value_style(Style::default().fg(Color::Black).bg(Color::Cyan))
        .data(BarGroup::default().bars(&bars));
    frame.render_widget(chart, area);
}

fn render_percentages(data: &PieData, block: Block, frame: &mut Frame, area: Rect) {
    let bars: Vec<Bar> = data
        .labels
        .iter()
        .zip(data.percentages.iter())
        .enumerate()
        .map(|(idx, (label, &percent))| {
            Bar::default()
                .value((percent * 100.0).round() as u64)
                .text_value(format!("{label}: {percent:.2}%"))
                .style(Style::default().fg(slice_color(idx)))
        })
        .collect();

    let chart = BarChart::default()
        .block(block)
        .direction(Direction::Horizontal)
        .bar_width(1)
        .bar_gap(0)
        .max(10_000)
        .data(BarGroup::default().bars(&bars));
    frame.render_widget(chart, area);
}

fn slice_color(idx: usize) -> Color {
    const PALETTE: [Color; 6] = [
        Color::Cyan,
        Color::Magenta,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Red,
    ];
    PALETTE[idx % PALETTE.len()]
}
