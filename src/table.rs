use serde::Serialize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::models::{NumericSummaryRow, PredictionRow};

pub const PAGE_SIZE: usize = 10;

/// A row the explorer can show: serializable, with a unique id.
pub trait TableRow: Serialize {
    fn row_id(&self) -> &str;
}

impl TableRow for PredictionRow {
    fn row_id(&self) -> &str {
        &self.row_id
    }
}

impl TableRow for NumericSummaryRow {
    fn row_id(&self) -> &str {
        &self.row_id
    }
}

/// Rows whose full serialized form contains `term`, case-insensitively.
/// An empty term keeps every row. Order is preserved either way.
pub fn filter<'a, T: TableRow>(rows: &'a [T], term: &str) -> Vec<&'a T> {
    if term.is_empty() {
        return rows.iter().collect();
    }
    let needle = term.to_lowercase();
    rows.iter()
        .filter(|row| {
            serde_json::to_string(row)
                .map(|text| text.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect()
}

pub fn total_pages(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1)).max(1)
}

/// Nearest valid page in `[1, total_pages]`.
pub fn clamp_page(page: usize, total_pages: usize) -> usize {
    page.clamp(1, total_pages.max(1))
}

/// Slice for a 1-based `page`. Out-of-range pages give an empty slice.
pub fn paginate<'r, 'a, T>(rows: &'r [&'a T], page: usize, page_size: usize) -> &'r [&'a T] {
    let start = page.saturating_sub(1).saturating_mul(page_size);
    if page == 0 || start >= rows.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(rows.len());
    &rows[start..end]
}

/// Search term and page of one table instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    search: String,
    page: usize,
    page_size: usize,
}

impl Default for TableView {
    fn default() -> Self {
        TableView {
            search: String::new(),
            page: 1,
            page_size: PAGE_SIZE,
        }
    }
}

/// One rendered page of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePage<'a, T> {
    pub rows: Vec<&'a T>,
    pub page: usize,
    pub total_pages: usize,
    pub matched: usize,
}

impl TableView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// A new term always sends the view back to page 1.
    pub fn set_search(&mut self, term: &str) {
        self.search = term.to_string();
        self.page = 1;
    }

    pub fn go_to(&mut self, page: usize, total_pages: usize) {
        self.page = clamp_page(page, total_pages);
    }

    pub fn next_page(&mut self, total_pages: usize) {
        self.go_to(self.page.saturating_add(1), total_pages);
    }

    pub fn prev_page(&mut self) {
        self.page = self.page.saturating_sub(1).max(1);
    }

    /// Filter, clamp the page into range, slice.
    pub fn view<'a, T: TableRow>(&self, rows: &'a [T]) -> TablePage<'a, T> {
        let filtered = filter(rows, &self.search);
        let total = total_pages(filtered.len(), self.page_size);
        let page = clamp_page(self.page, total);
        TablePage {
            rows: paginate(&filtered, page, self.page_size).to_vec(),
            page,
            total_pages: total,
            matched: filtered.len(),
        }
    }
}

pub type Renderer<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

pub struct Column<T> {
    pub key: String,
    pub label: String,
    render: Option<Renderer<T>>,
}

impl<T: TableRow> Column<T> {
    pub fn new(key: &str, label: &str) -> Self {
        Column {
            key: key.to_string(),
            label: label.to_string(),
            render: None,
        }
    }

    pub fn render(mut self, render: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.render = Some(Box::new(render));
        self
    }

    /// Custom renderer output, else the raw field value as text.
    pub fn cell(&self, row: &T) -> String {
        if let Some(render) = &self.render {
            return render(row);
        }
        let value = serde_json::to_value(row).unwrap_or(Value::Null);
        match value.get(&self.key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "-".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// Column layout plus view state for one table.
pub struct Explorer<T> {
    columns: Vec<Column<T>>,
    view: TableView,
}

impl<T: TableRow> Explorer<T> {
    pub fn new(columns: Vec<Column<T>>) -> Self {
        Explorer {
            columns,
            view: TableView::new(),
        }
    }

    pub fn view(&self) -> &TableView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut TableView {
        &mut self.view
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.label.as_str()).collect()
    }

    pub fn cells(&self, row: &T) -> Vec<String> {
        self.columns.iter().map(|c| c.cell(row)).collect()
    }

    /// Current page as a text table followed by a pager line.
    pub fn render(&self, rows: &[T]) -> String {
        let page = self.view.view(rows);
        let mut builder = Builder::default();
        builder.push_record(self.headers());
        for row in &page.rows {
            builder.push_record(self.cells(row));
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        format!(
            "{}\n{} rows | Page {} of {}",
            table, page.matched, page.page, page.total_pages
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scalar;

    fn rows(n: usize) -> Vec<PredictionRow> {
        (0..n)
            .map(|i| PredictionRow {
                row_id: i.to_string(),
                transaction_id: Some(Scalar::Int(3_000_000 + i as i64)),
                proba: if i % 3 == 0 { 0.92 } else { 0.08 },
                pred_label: Scalar::Text(if i % 3 == 0 { "Fraud" } else { "Legit" }.into()),
            })
            .collect()
    }

    #[test]
    fn empty_term_returns_everything_in_order() {
        let data = rows(5);
        let out = filter(&data, "");
        assert_eq!(out.len(), 5);
        assert!(out.iter().zip(&data).all(|(a, b)| std::ptr::eq(*a, b)));
    }

    #[test]
    fn search_is_case_insensitive_over_every_field() {
        let data = rows(9);
        let fraud: Vec<&str> = filter(&data, "FRAUD").iter().map(|r| r.row_id()).collect();
        assert_eq!(fraud, vec!["0", "3", "6"]);
        // matches on a field no column shows
        assert_eq!(filter(&data, "3000004").len(), 1);
        assert_eq!(filter(&data, "pred_label").len(), 9);
    }

    #[test]
    fn total_pages_is_at_least_one() {
        assert_eq!(total_pages(0, PAGE_SIZE), 1);
        assert_eq!(total_pages(10, PAGE_SIZE), 1);
        assert_eq!(total_pages(11, PAGE_SIZE), 2);
    }

    #[test]
    fn out_of_range_page_slices_empty_unless_clamped() {
        let data = rows(23);
        let all = filter(&data, "");
        assert_eq!(paginate(&all, 3, PAGE_SIZE).len(), 3);
        assert!(paginate(&all, 4, PAGE_SIZE).is_empty());
        assert!(paginate(&all, 0, PAGE_SIZE).is_empty());
        let clamped = clamp_page(4, total_pages(all.len(), PAGE_SIZE));
        assert_eq!(clamped, 3);
        assert_eq!(clamp_page(0, 3), 1);
    }

    #[test]
    fn changing_search_resets_page() {
        let data = rows(35);
        let mut view = TableView::new();
        view.go_to(4, 4);
        assert_eq!(view.page(), 4);
        view.set_search("legit");
        assert_eq!(view.page(), 1);
        view.go_to(3, 3);
        view.set_search("legit");
        assert_eq!(view.page(), 1);
        assert_eq!(view.view(&data).page, 1);
    }

    #[test]
    fn view_clamps_stale_page_after_rows_shrink() {
        let mut view = TableView::new();
        view.go_to(3, 3);
        let data = rows(4);
        let page = view.view(&data);
        assert_eq!(page.page, 1);
        assert_eq!(page.rows.len(), 4);
    }

    #[test]
    fn pager_never_leaves_bounds() {
        let mut view = TableView::new();
        view.prev_page();
        assert_eq!(view.page(), 1);
        view.next_page(2);
        view.next_page(2);
        assert_eq!(view.page(), 2);
    }

    #[test]
    fn columns_fall_back_to_raw_field_text() {
        let row = &rows(1)[0];
        let explorer = Explorer::new(vec![
            Column::new("TransactionID", "TransactionID"),
            Column::new("pred_label", "Prediction"),
            Column::new("missing", "Missing"),
            Column::new("proba", "Probability").render(|r: &PredictionRow| format!("{:.1}%", r.proba * 100.0)),
        ]);
        assert_eq!(
            explorer.cells(row),
            vec!["3000000", "Fraud", "-", "92.0%"]
        );
        let text = explorer.render(&rows(12));
        assert!(text.contains("Probability"));
        assert!(text.ends_with("12 rows | Page 1 of 2"));
    }
}
