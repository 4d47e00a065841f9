//! Filterable, sortable projections of a table
//!
//! A view never copies column data: it is the owning table (shared,
//! immutable) plus an optional index list. Operations return a success
//! flag and leave the view untouched on failure.

use std::sync::Arc;

use crate::table::columns::{ColumnValues, ComparisonOperator, Entries, IndexList};
use crate::table::Table;
use crate::threading;

#[derive(Clone)]
pub struct TableView {
    table: Arc<Table>,
    is_subset: bool,
    ordered: bool,
    indices: IndexList,
}

fn merge_union(first: &IndexList, second: &IndexList) -> IndexList {
    let mut combined = IndexList::with_capacity(first.len() + second.len());
    let mut a = 0;
    let mut b = 0;
    while a < first.len() || b < second.len() {
        let next = if b >= second.len() || (a < first.len() && first[a] <= second[b]) {
            let value = first[a];
            a += 1;
            value
        } else {
            let value = second[b];
            b += 1;
            value
        };
        if combined.last() != Some(&next) {
            combined.push(next);
        }
    }
    combined
}

impl TableView {
    /// A view of the whole table
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            is_subset: false,
            ordered: true,
            indices: IndexList::new(),
        }
    }

    /// A view restricted to the given rows
    pub fn with_indices(table: Arc<Table>, indices: IndexList, ordered: bool) -> Self {
        Self {
            table,
            is_subset: true,
            ordered,
            indices,
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn is_subset(&self) -> bool {
        self.is_subset
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn indices(&self) -> &IndexList {
        &self.indices
    }

    pub fn num_rows(&self) -> usize {
        if self.is_subset {
            self.indices.len()
        } else {
            self.table.num_rows()
        }
    }

    /// Restricts the view to rows matching the predicate. Strings and
    /// unsupported columns are rejected.
    pub fn numeric_filter(
        &mut self,
        column_name: &str,
        op: ComparisonOperator,
        value: f64,
        secondary_value: f64,
    ) -> bool {
        let column = match self.table.get_column(column_name) {
            Some(column) => column,
            None => return false,
        };

        let matching = match column.filter_indices(
            &self.indices,
            self.is_subset,
            op,
            value,
            secondary_value,
        ) {
            Some(matching) => matching,
            None => return false,
        };

        self.replace_indices(matching, column.num_entries());
        true
    }

    /// Restricts the view to rows whose string value contains `needle`
    pub fn string_filter(&mut self, column_name: &str, needle: &str, case_insensitive: bool) -> bool {
        let column = match self.table.get_column(column_name) {
            Some(column) => column,
            None => return false,
        };
        let entries = match &column.entries {
            Entries::String(entries) => entries,
            _ => return false,
        };

        let needle = if case_insensitive {
            needle.to_lowercase()
        } else {
            needle.to_string()
        };

        let matches = |value: &str| {
            if case_insensitive {
                value.to_lowercase().contains(&needle)
            } else {
                value.contains(needle.as_str())
            }
        };

        let mut matching = IndexList::new();
        if self.is_subset {
            for &index in &self.indices {
                if index < 0 || index as usize >= entries.len() {
                    continue;
                }
                if matches(&entries[index as usize]) {
                    matching.push(index);
                }
            }
        } else {
            for (index, value) in entries.iter().enumerate() {
                if matches(value) {
                    matching.push(index as i64);
                }
            }
        }

        self.replace_indices(matching, entries.len());
        true
    }

    /// Replaces the subset with its complement. Requires an ordered
    /// subset; the complement of the whole table is the empty set and
    /// vice versa.
    pub fn invert(&mut self) -> bool {
        let total_row_count = self.table.num_rows();

        if self.is_subset {
            if self.indices.is_empty() {
                self.is_subset = false;
                self.ordered = true;
            } else if self.ordered {
                let mut inverted = IndexList::with_capacity(total_row_count - self.indices.len());
                let mut it = self.indices.iter();
                let mut next_val = it.next().copied();
                for i in 0..total_row_count as i64 {
                    if Some(i) == next_val {
                        next_val = it.next().copied();
                    } else {
                        inverted.push(i);
                    }
                }
                self.indices = inverted;
            } else {
                return false;
            }
        } else {
            self.is_subset = true;
            self.indices.clear();
        }
        true
    }

    /// Restores the whole-table view
    pub fn reset(&mut self) {
        self.is_subset = false;
        self.ordered = true;
        self.indices.clear();
    }

    /// Unions this view with another over the same table. Both must be
    /// ordered; if either is the whole table, so is the result.
    pub fn combine(&mut self, second: &TableView) -> bool {
        if !Arc::ptr_eq(&self.table, &second.table) {
            return false;
        }
        if !(self.is_subset && second.is_subset) {
            self.reset();
            return true;
        }
        if !(self.ordered && second.ordered) {
            return false;
        }

        let combined = merge_union(&self.indices, &second.indices);
        self.replace_indices(combined, self.table.num_rows());
        true
    }

    /// Stable sort of the view's rows by a column's values.
    ///
    /// Materializes the identity index list first when the view is the
    /// whole table. Afterwards the view is no longer index-ordered.
    pub fn sort_by_column(&mut self, column_name: &str, ascending: bool) -> bool {
        let column = match self.table.get_column(column_name) {
            Some(column) => column,
            None => return false,
        };

        if !self.is_subset {
            self.indices = (0..self.table.num_rows() as i64).collect();
        }

        let mut indices = std::mem::take(&mut self.indices);
        if !column.sort_indices(&mut indices, ascending) {
            self.indices = indices;
            if !self.is_subset {
                self.indices.clear();
            }
            return false;
        }

        self.indices = indices;
        self.is_subset = true;
        self.ordered = false;
        true
    }

    /// Restores monotone index order
    pub fn sort_by_index(&mut self) -> bool {
        if !self.ordered {
            threading::parallel_sort(&mut self.indices);
        }
        self.ordered = true;
        true
    }

    /// Writes the row slice `[start, end)` of the view into `values`.
    /// Negative bounds select the full range.
    pub fn fill_values(
        &self,
        column_name: &str,
        values: &mut ColumnValues,
        start: i64,
        end: i64,
    ) -> bool {
        let column = match self.table.get_column(column_name) {
            Some(column) => column,
            None => return false,
        };
        column.fill_column_values(values, self.is_subset, &self.indices, start, end);
        true
    }

    /// Like [`TableView::fill_values`], addressing the column by its
    /// position in the table
    pub fn fill_values_by_index(
        &self,
        column_index: usize,
        values: &mut ColumnValues,
        start: i64,
        end: i64,
    ) -> bool {
        let column = match self.table.column(column_index) {
            Some(column) => column,
            None => return false,
        };
        column.fill_column_values(values, self.is_subset, &self.indices, start, end);
        true
    }

    /// Installs a new subset, collapsing back to the whole table when it
    /// covers every row
    fn replace_indices(&mut self, matching: IndexList, num_entries: usize) {
        if matching.len() == num_entries {
            self.indices.clear();
            self.is_subset = false;
            self.ordered = true;
        } else {
            self.indices = matching;
            self.is_subset = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::columns::{Column, ColumnType};
    use crate::table::CatalogFileType;

    fn sample_table() -> Arc<Table> {
        let mut flux = Column::new("flux", ColumnType::Float);
        for text in ["1.0", "2.0", "3.0", "4.0", "5.0"] {
            flux.push_text(text);
        }
        let names = Column::from_strings(
            "name",
            ["alpha", "beta", "gamma", "delta", "epsilon"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        Arc::new(
            Table::new(
                vec![names, flux],
                5,
                String::new(),
                CatalogFileType::Csv,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_whole_table_view() {
        let view = TableView::new(sample_table());
        assert!(!view.is_subset());
        assert!(view.is_ordered());
        assert_eq!(view.num_rows(), 5);
    }

    #[test]
    fn test_numeric_filter_shrinks() {
        let mut view = TableView::new(sample_table());
        assert!(view.numeric_filter("flux", ComparisonOperator::Greater, 2.5, 0.0));
        assert_eq!(view.num_rows(), 3);
        assert_eq!(view.indices(), &vec![2, 3, 4]);

        // Filters compose: the subset shrinks monotonically
        assert!(view.numeric_filter("flux", ComparisonOperator::Lesser, 4.5, 0.0));
        assert_eq!(view.indices(), &vec![2, 3]);
    }

    #[test]
    fn test_numeric_filter_rejects_strings() {
        let mut view = TableView::new(sample_table());
        assert!(!view.numeric_filter("name", ComparisonOperator::Equal, 0.0, 0.0));
        assert!(!view.is_subset());
    }

    #[test]
    fn test_numeric_filter_unknown_column() {
        let mut view = TableView::new(sample_table());
        assert!(!view.numeric_filter("missing", ComparisonOperator::Equal, 0.0, 0.0));
    }

    #[test]
    fn test_filter_matching_everything_collapses() {
        let mut view = TableView::new(sample_table());
        assert!(view.numeric_filter("flux", ComparisonOperator::Greater, 0.0, 0.0));
        assert!(!view.is_subset());
        assert_eq!(view.num_rows(), 5);
    }

    #[test]
    fn test_string_filter() {
        let mut view = TableView::new(sample_table());
        assert!(view.string_filter("name", "a", false));
        // alpha, beta, gamma, delta all contain "a"
        assert_eq!(view.indices(), &vec![0, 1, 2, 3]);

        assert!(view.string_filter("name", "ALPHA", true));
        assert_eq!(view.indices(), &vec![0]);
    }

    #[test]
    fn test_invert_round_trip() {
        let mut view = TableView::new(sample_table());
        view.numeric_filter("flux", ComparisonOperator::LessOrEqual, 2.0, 0.0);
        let original = view.indices().clone();

        assert!(view.invert());
        assert_eq!(view.indices(), &vec![2, 3, 4]);
        assert!(view.invert());
        assert_eq!(view.indices(), &original);
    }

    #[test]
    fn test_invert_of_whole_and_empty() {
        let mut view = TableView::new(sample_table());
        assert!(view.invert());
        assert!(view.is_subset());
        assert_eq!(view.num_rows(), 0);

        assert!(view.invert());
        assert!(!view.is_subset());
        assert_eq!(view.num_rows(), 5);
    }

    #[test]
    fn test_invert_rejected_when_unordered() {
        let mut view = TableView::new(sample_table());
        view.sort_by_column("flux", false);
        assert!(!view.is_ordered());
        assert!(!view.invert());
    }

    #[test]
    fn test_combine_union() {
        let table = sample_table();
        let mut first = TableView::with_indices(Arc::clone(&table), vec![0, 2], true);
        let second = TableView::with_indices(Arc::clone(&table), vec![2, 4], true);

        assert!(first.combine(&second));
        assert_eq!(first.indices(), &vec![0, 2, 4]);
        assert!(first.is_ordered());
    }

    #[test]
    fn test_combine_rejects_unordered() {
        let table = sample_table();
        let mut first = TableView::with_indices(Arc::clone(&table), vec![0, 2], true);
        let second = TableView::with_indices(Arc::clone(&table), vec![4, 2], false);
        assert!(!first.combine(&second));
    }

    #[test]
    fn test_combine_rejects_different_tables() {
        let mut first = TableView::new(sample_table());
        let second = TableView::new(sample_table());
        assert!(!first.combine(&second));
    }

    #[test]
    fn test_combine_with_whole_table() {
        let table = sample_table();
        let mut first = TableView::with_indices(Arc::clone(&table), vec![0], true);
        let second = TableView::new(Arc::clone(&table));
        assert!(first.combine(&second));
        assert!(!first.is_subset());
        assert_eq!(first.num_rows(), 5);
    }

    #[test]
    fn test_sort_by_column_then_index() {
        let mut view = TableView::new(sample_table());
        assert!(view.sort_by_column("name", true));
        // alpha, beta, delta, epsilon, gamma
        assert_eq!(view.indices(), &vec![0, 1, 3, 4, 2]);
        assert!(!view.is_ordered());
        assert_eq!(view.num_rows(), 5);

        assert!(view.sort_by_index());
        assert!(view.is_ordered());
        assert_eq!(view.indices(), &vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_filter_then_sort() {
        // S6: names [b, a, c]; drop "a", sort ascending -> rows 0 and 2
        let names = Column::from_strings(
            "A",
            ["b", "a", "c"].iter().map(|s| s.to_string()).collect(),
        );
        let table = Arc::new(
            Table::new(vec![names], 3, String::new(), CatalogFileType::Csv).unwrap(),
        );
        let mut view = TableView::new(table);

        assert!(view.string_filter("A", "a", false));
        assert!(view.invert());
        assert!(view.sort_by_column("A", true));
        assert_eq!(view.indices(), &vec![0, 2]);

        let mut values = ColumnValues::default();
        assert!(view.fill_values("A", &mut values, -1, -1));
        assert_eq!(values.string_data, vec!["b", "c"]);
    }

    #[test]
    fn test_fill_values_range() {
        let mut view = TableView::new(sample_table());
        view.sort_by_column("flux", false);

        let mut values = ColumnValues::default();
        assert!(view.fill_values("flux", &mut values, 0, 2));
        assert_eq!(values.binary_data.len(), 8);
        let first = f32::from_ne_bytes(values.binary_data[0..4].try_into().unwrap());
        assert_eq!(first, 5.0);
    }

    #[test]
    fn test_sort_never_changes_row_count() {
        let mut view = TableView::new(sample_table());
        view.numeric_filter("flux", ComparisonOperator::GreaterOrEqual, 2.0, 0.0);
        let before = view.num_rows();
        view.sort_by_column("flux", false);
        assert_eq!(view.num_rows(), before);
    }
}
