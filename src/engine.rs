//! Tabular analysis engine.
//!
//! Everything in here is a pure function of an immutable [`Table`] and a column name. Nothing is
//! cached; the model decides when to recompute.

use std::collections::HashMap;
use std::fmt;

use clap::ValueEnum;
use tracing::debug;

/// A single parsed value, tagged once at ingest time.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Display string used as a frequency key. Missing cells have none.
    pub fn render(&self) -> Option<String> {
        match self {
            Cell::Number(v) => Some(render_number(*v)),
            Cell::Text(s) => Some(s.clone()),
            Cell::Missing => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(v) => write!(f, "{}", render_number(*v)),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Missing => Ok(()),
        }
    }
}

/// Renders a number the way a browser would print it: no trailing `.0`, exponent notation
/// outside of [1e-6, 1e21).
pub fn render_number(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return if v.is_nan() {
            "NaN".to_string()
        } else if v > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }
    let magnitude = v.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let s = format!("{v:e}");
        // Rust omits the sign of positive exponents
        match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        }
    } else {
        format!("{v}")
    }
}

/// One parsed record as handed over by the loader: field name to value. Fields may be absent.
pub type Record = HashMap<String, Cell>;

/// A row holds one cell per header, in header order.
pub type Row = Vec<Cell>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn empty() -> Self {
        Table::default()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.headers.len()
    }

    /// True if there is nothing to display.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let cidx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(cidx))
    }
}

/// Builds a table from parsed records. Absent fields become [`Cell::Missing`], fields not in
/// `field_order` are dropped. An empty `field_order` yields an empty table.
pub fn ingest(records: Vec<Record>, field_order: Vec<String>) -> Table {
    if field_order.is_empty() {
        debug!("Ingest without fields, {} records dropped", records.len());
        return Table::empty();
    }

    let rows = records
        .into_iter()
        .map(|mut record| {
            field_order
                .iter()
                .map(|field| record.remove(field).unwrap_or(Cell::Missing))
                .collect::<Row>()
        })
        .collect::<Vec<Row>>();

    debug!("Ingested {} rows with {} columns", rows.len(), field_order.len());
    Table {
        headers: field_order,
        rows,
    }
}

/// The column view. An unknown column yields an empty view.
pub fn column_values<'a>(table: &'a Table, column: &str) -> Vec<&'a Cell> {
    match table.column_index(column) {
        Some(cidx) => table.rows.iter().map(|row| &row[cidx]).collect(),
        None => {
            debug!("Requested values of unknown column \"{column}\"");
            Vec::new()
        }
    }
}

/// Rule deciding when a column counts as numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum NumericRule {
    /// At least one cell is a number.
    #[default]
    Any,
    /// More than half of the non-missing cells are numbers.
    Majority,
    /// Every non-missing cell is a number.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Numeric,
    Text,
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferredType::Numeric => write!(f, "Numeric"),
            InferredType::Text => write!(f, "String"),
        }
    }
}

/// True if any cell of the column is a number. A single numeric cell among text is enough.
pub fn is_numeric_column(table: &Table, column: &str) -> bool {
    column_values(table, column)
        .iter()
        .any(|c| matches!(c, Cell::Number(_)))
}

// Number of numeric cells and number of non-missing cells.
fn numeric_share(table: &Table, column: &str) -> (usize, usize) {
    column_values(table, column)
        .iter()
        .fold((0, 0), |(numbers, present), c| match c {
            Cell::Number(_) => (numbers + 1, present + 1),
            Cell::Text(_) => (numbers, present + 1),
            Cell::Missing => (numbers, present),
        })
}

pub fn classify(table: &Table, column: &str, rule: NumericRule) -> InferredType {
    let numeric = match rule {
        NumericRule::Any => is_numeric_column(table, column),
        NumericRule::Majority => {
            let (numbers, present) = numeric_share(table, column);
            numbers > 0 && numbers * 2 > present
        }
        NumericRule::All => {
            let (numbers, present) = numeric_share(table, column);
            numbers > 0 && numbers == present
        }
    };
    if numeric {
        InferredType::Numeric
    } else {
        InferredType::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Min, max and mean over the numeric cells. `None` when the column holds no number.
pub fn numeric_stats(table: &Table, column: &str) -> Option<ColumnStats> {
    let values: Vec<f64> = column_values(table, column)
        .iter()
        .filter_map(|c| c.as_number())
        .collect();
    if values.is_empty() {
        return None;
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(ColumnStats { min, max, mean })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frequency {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Percentage {
    pub label: String,
    pub percent: f64,
}

pub type FrequencyTable = Vec<Frequency>;
pub type PercentageTable = Vec<Percentage>;

/// Counts per rendered value in first-seen order. Missing cells are skipped.
pub fn frequencies(table: &Table, column: &str) -> FrequencyTable {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut counts: FrequencyTable = Vec::new();

    for label in column_values(table, column).iter().filter_map(|c| c.render()) {
        match positions.get(&label) {
            Some(&pos) => counts[pos].count += 1,
            None => {
                positions.insert(label.clone(), counts.len());
                counts.push(Frequency { label, count: 1 });
            }
        }
    }
    counts
}

/// Rounds half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn percentages(table: &Table, column: &str) -> PercentageTable {
    let counts = frequencies(table, column);
    let total: usize = counts.iter().map(|f| f.count).sum();
    if total == 0 {
        return Vec::new();
    }
    counts
        .into_iter()
        .map(|f| Percentage {
            percent: round2(f.count as f64 / total as f64 * 100.0),
            label: f.label,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSummary {
    pub name: String,
    pub non_null_count: usize,
    pub inferred_type: InferredType,
}

pub fn column_summaries(table: &Table) -> Vec<ColumnSummary> {
    column_summaries_with(table, NumericRule::Any)
}

pub fn column_summaries_with(table: &Table, rule: NumericRule) -> Vec<ColumnSummary> {
    table
        .headers
        .iter()
        .map(|name| ColumnSummary {
            name: name.clone(),
            non_null_count: column_values(table, name)
                .iter()
                .filter(|c| !c.is_missing())
                .count(),
            inferred_type: classify(table, name, rule),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PieData {
    pub labels: Vec<String>,
    pub percentages: Vec<f64>,
}

impl From<FrequencyTable> for ChartData {
    fn from(counts: FrequencyTable) -> Self {
        let (labels, values): (Vec<String>, Vec<f64>) = counts
            .into_iter()
            .map(|f| (f.label, f.count as f64))
            .unzip();
        ChartData { labels, values }
    }
}

/// Numeric columns plot every number against its row index, other columns plot value counts.
pub fn bar_chart_data(table: &Table, column: &str, numeric: bool) -> ChartData {
    if !numeric {
        return frequencies(table, column).into();
    }
    let (labels, values): (Vec<String>, Vec<f64>) = column_values(table, column)
        .iter()
        .enumerate()
        .filter_map(|(idx, c)| c.as_number().map(|v| (idx.to_string(), v)))
        .unzip();
    ChartData { labels, values }
}

pub fn histogram_data(table: &Table, column: &str) -> ChartData {
    frequencies(table, column).into()
}

pub fn pie_data(table: &Table, column: &str) -> PieData {
    let (labels, percentages): (Vec<String>, Vec<f64>) = percentages(table, column)
        .into_iter()
        .map(|p| (p.label, p.percent))
        .unzip();
    PieData {
        labels,
        percentages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(fields: &[(&str, Cell)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn city_table() -> Table {
        ingest(
            vec![
                record(&[("city", text("NY")), ("pop", Cell::Number(8.0))]),
                record(&[("city", text("LA")), ("pop", Cell::Number(4.0))]),
                record(&[("city", text("NY")), ("pop", Cell::Number(8.0))]),
            ],
            headers(&["city", "pop"]),
        )
    }

    #[test]
    fn city_frequencies_and_population_stats() {
        let t = city_table();
        assert_eq!(
            frequencies(&t, "city"),
            vec![
                Frequency { label: "NY".into(), count: 2 },
                Frequency { label: "LA".into(), count: 1 },
            ]
        );
        let stats = numeric_stats(&t, "pop").unwrap();
        assert_eq!(stats.min, 4.0);
        assert_eq!(stats.max, 8.0);
        assert_eq!(stats.mean, 20.0 / 3.0);
    }

    #[test]
    fn numbers_are_counted_by_their_rendered_value() {
        let t = city_table();
        assert_eq!(
            frequencies(&t, "pop"),
            vec![
                Frequency { label: "8".into(), count: 2 },
                Frequency { label: "4".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn all_missing_column_has_no_stats_and_no_counts() {
        let t = ingest(
            vec![
                record(&[("a", Cell::Number(1.0))]),
                record(&[("a", Cell::Number(2.0)), ("b", Cell::Missing)]),
            ],
            headers(&["a", "b"]),
        );
        let summary = &column_summaries(&t)[1];
        assert_eq!(summary.non_null_count, 0);
        assert_eq!(summary.inferred_type, InferredType::Text);
        assert_eq!(numeric_stats(&t, "b"), None);
        assert!(frequencies(&t, "b").is_empty());
        assert!(percentages(&t, "b").is_empty());
    }

    // A single numeric cell makes the whole column numeric. This is the loose rule on purpose.
    #[test]
    fn one_number_among_text_makes_a_numeric_column() {
        let t = ingest(
            vec![
                record(&[("v", text("apple"))]),
                record(&[("v", Cell::Number(42.5))]),
                record(&[("v", text("pear"))]),
                record(&[("v", text("plum"))]),
            ],
            headers(&["v"]),
        );
        assert!(is_numeric_column(&t, "v"));
        assert_eq!(classify(&t, "v", NumericRule::Any), InferredType::Numeric);
        assert_eq!(
            numeric_stats(&t, "v"),
            Some(ColumnStats { min: 42.5, max: 42.5, mean: 42.5 })
        );
    }

    #[test]
    fn stricter_rules_reject_mostly_text_columns() {
        let t = ingest(
            vec![
                record(&[("v", text("apple"))]),
                record(&[("v", Cell::Number(1.0))]),
                record(&[("v", text("pear"))]),
                record(&[("v", Cell::Missing)]),
            ],
            headers(&["v"]),
        );
        assert_eq!(classify(&t, "v", NumericRule::Majority), InferredType::Text);
        assert_eq!(classify(&t, "v", NumericRule::All), InferredType::Text);

        let t = ingest(
            vec![
                record(&[("v", Cell::Number(3.0))]),
                record(&[("v", Cell::Missing)]),
                record(&[("v", Cell::Number(1.0))]),
            ],
            headers(&["v"]),
        );
        assert_eq!(classify(&t, "v", NumericRule::Majority), InferredType::Numeric);
        assert_eq!(classify(&t, "v", NumericRule::All), InferredType::Numeric);
        assert_eq!(
            column_summaries_with(&t, NumericRule::All)[0].inferred_type,
            InferredType::Numeric
        );
    }

    #[test]
    fn empty_field_order_gives_empty_table() {
        let t = ingest(vec![record(&[("x", Cell::Number(1.0))])], Vec::new());
        assert!(t.is_empty());
        assert_eq!(t.nrows(), 0);
        assert!(column_summaries(&t).is_empty());
        assert!(column_values(&t, "x").is_empty());
        assert!(!is_numeric_column(&t, "x"));
        assert_eq!(numeric_stats(&t, "x"), None);
        assert!(frequencies(&t, "x").is_empty());
        assert!(percentages(&t, "x").is_empty());
        assert_eq!(bar_chart_data(&t, "x", true), ChartData::default());
        assert_eq!(pie_data(&t, "x"), PieData::default());
    }

    #[test]
    fn ingest_fills_absent_fields_and_drops_unknown_ones() {
        let t = ingest(
            vec![
                record(&[("a", Cell::Number(1.0)), ("zzz", text("ignored"))]),
                record(&[("b", text("x"))]),
            ],
            headers(&["a", "b"]),
        );
        assert_eq!(t.rows()[0], vec![Cell::Number(1.0), Cell::Missing]);
        assert_eq!(t.rows()[1], vec![Cell::Missing, text("x")]);
        assert_eq!(t.cell(1, "b"), Some(&text("x")));
        assert_eq!(t.cell(1, "zzz"), None);
    }

    #[test]
    fn unknown_column_has_an_empty_view() {
        let t = city_table();
        assert!(column_values(&t, "nope").is_empty());
        assert!(frequencies(&t, "nope").is_empty());
    }

    #[test]
    fn percentages_round_to_two_decimals() {
        let t = city_table();
        let pct = percentages(&t, "city");
        assert_eq!(pct[0].label, "NY");
        assert_eq!(pct[0].percent, 66.67);
        assert_eq!(pct[1].percent, 33.33);
        assert_eq!(round2(200.0 / 3.0), 66.67);
        assert_eq!(round2(0.125), 0.13);
    }

    #[test]
    fn bar_chart_of_numeric_column_uses_row_indices() {
        let t = ingest(
            vec![
                record(&[("v", Cell::Number(3.0))]),
                record(&[("v", text("n/a"))]),
                record(&[("v", Cell::Number(-1.5))]),
            ],
            headers(&["v"]),
        );
        let data = bar_chart_data(&t, "v", true);
        assert_eq!(data.labels, vec!["0", "2"]);
        assert_eq!(data.values, vec![3.0, -1.5]);

        let data = bar_chart_data(&t, "v", false);
        assert_eq!(data.labels, vec!["3", "n/a", "-1.5"]);
        assert_eq!(data.values, vec![1.0, 1.0, 1.0]);
        assert_eq!(histogram_data(&t, "v"), data);
    }

    #[test]
    fn pie_data_matches_percentages() {
        let t = city_table();
        let pie = pie_data(&t, "city");
        assert_eq!(pie.labels, vec!["NY", "LA"]);
        assert_eq!(pie.percentages, vec![66.67, 33.33]);
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(render_number(8.0), "8");
        assert_eq!(render_number(-0.0), "0");
        assert_eq!(render_number(2.5), "2.5");
        assert_eq!(render_number(1e21), "1e+21");
        assert_eq!(render_number(1.5e-7), "1.5e-7");
        assert_eq!(render_number(123456789.0), "123456789");
    }

    fn cell_strategy() -> impl Strategy<Value = Cell> {
        prop_oneof![
            Just(Cell::Missing),
            (-1e6..1e6f64).prop_map(Cell::Number),
            (0i32..5).prop_map(|v| Cell::Number(v as f64)),
            "[a-c]{1,2}".prop_map(Cell::Text),
        ]
    }

    fn table_strategy() -> impl Strategy<Value = Table> {
        (1usize..4).prop_flat_map(|ncols| {
            prop::collection::vec(prop::collection::vec(cell_strategy(), ncols), 0..40).prop_map(
                move |rows| {
                    let names: Vec<String> = (0..ncols).map(|i| format!("c{i}")).collect();
                    let records = rows
                        .into_iter()
                        .map(|cells| names.iter().cloned().zip(cells).collect::<Record>())
                        .collect();
                    ingest(records, names)
                },
            )
        })
    }

    proptest! {
        #[test]
        fn frequency_counts_add_up_to_non_null_count(t in table_strategy()) {
            for summary in column_summaries(&t) {
                let total: usize = frequencies(&t, &summary.name).iter().map(|f| f.count).sum();
                prop_assert_eq!(total, summary.non_null_count);
            }
        }

        #[test]
        fn percentages_add_up_to_one_hundred(t in table_strategy()) {
            for summary in column_summaries(&t) {
                let pct = percentages(&t, &summary.name);
                if summary.non_null_count == 0 {
                    prop_assert!(pct.is_empty());
                } else {
                    let sum: f64 = pct.iter().map(|p| p.percent).sum();
                    let tolerance = 0.005 * pct.len() as f64 + 1e-9;
                    prop_assert!((sum - 100.0).abs() <= tolerance, "sum {} of {:?}", sum, pct);
                }
            }
        }

        #[test]
        fn stats_exist_iff_a_number_exists(t in table_strategy()) {
            for name in t.headers() {
                let has_number = column_values(&t, name).iter().any(|c| c.as_number().is_some());
                match numeric_stats(&t, name) {
                    None => prop_assert!(!has_number),
                    Some(s) => {
                        prop_assert!(has_number);
                        let slack = 1e-9 * s.max.abs().max(s.min.abs()).max(1.0);
                        prop_assert!(s.min <= s.mean + slack);
                        prop_assert!(s.mean <= s.max + slack);
                    }
                }
            }
        }

        #[test]
        fn derived_values_are_repeatable(t in table_strategy()) {
            prop_assert_eq!(column_summaries(&t), column_summaries(&t));
            for name in t.headers() {
                prop_assert_eq!(frequencies(&t, name), frequencies(&t, name));
                prop_assert_eq!(percentages(&t, name), percentages(&t, name));
                prop_assert_eq!(numeric_stats(&t, name), numeric_stats(&t, name));
                prop_assert_eq!(is_numeric_column(&t, name), is_numeric_column(&t, name));
            }
        }
    }
}
