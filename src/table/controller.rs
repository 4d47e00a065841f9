//! Catalog request handling
//!
//! Owns the open catalogs of one session and answers open/close/filter
//! requests. Filter results stream back through a callback in bounded
//! chunks so a million-row match never materializes one giant response.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::table::columns::{ColumnType, ColumnValues, ComparisonOperator};
use crate::table::{Table, TableView};

/// One requested restriction of a catalog view
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub column_name: String,
    pub filter: ColumnFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnFilter {
    /// Substring match on a string column
    SubString(String),
    /// Comparison against one or two numeric bounds
    Numeric {
        operator: ComparisonOperator,
        value: f64,
        secondary_value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortingType {
    Ascending,
    Descending,
}

/// Column metadata returned when a catalog is opened
#[derive(Debug, Clone)]
pub struct CatalogHeader {
    pub name: String,
    pub data_type: ColumnType,
    pub description: String,
    pub units: String,
    pub column_index: usize,
}

/// Acknowledgement for an open-catalog request
#[derive(Debug, Clone, Default)]
pub struct OpenCatalogFileAck {
    pub success: bool,
    pub message: String,
    pub file_id: i32,
    pub file_name: String,
    pub file_type_name: String,
    pub data_size: usize,
    pub headers: Vec<CatalogHeader>,
    /// Preview rows per supported column, keyed by column index
    pub preview_data: HashMap<usize, ColumnValues>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogFilterRequest {
    pub file_id: i32,
    pub filter_configs: Vec<FilterConfig>,
    pub sort_column: String,
    pub sorting_type: Option<SortingType>,
    pub subset_start_index: usize,
    pub subset_data_size: usize,
    pub column_indices: Vec<usize>,
}

/// One chunk of a filter result; the last chunk carries progress 1.0
#[derive(Debug, Clone, Default)]
pub struct CatalogFilterResponse {
    pub file_id: i32,
    pub columns: HashMap<usize, ColumnValues>,
    /// Total rows matching the filter
    pub filter_data_size: usize,
    pub request_end_index: usize,
    /// Rows in this chunk
    pub subset_data_size: usize,
    pub subset_end_index: usize,
    pub progress: f32,
}

struct ViewCache {
    view: TableView,
    filter_configs: Vec<FilterConfig>,
    sort_column: String,
    sorting_type: Option<SortingType>,
}

/// Per-session registry of open catalogs and their cached filter views
pub struct TableController {
    config: CoreConfig,
    tables: DashMap<i32, Arc<Table>>,
    view_cache: DashMap<i32, ViewCache>,
}

impl TableController {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            tables: DashMap::new(),
            view_cache: DashMap::new(),
        }
    }

    /// Opens a catalog file under `file_id`, replacing any previous
    /// catalog with the same id, and returns headers plus preview rows
    pub fn on_open_file_request<P: AsRef<Path>>(
        &self,
        file_id: i32,
        path: P,
        preview_rows: usize,
    ) -> OpenCatalogFileAck {
        let path = path.as_ref();
        let mut ack = OpenCatalogFileAck {
            file_id,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ..Default::default()
        };

        let num_preview_rows = if preview_rows == 0 {
            self.config.catalog_preview_rows
        } else {
            preview_rows
        };

        // Close any existing table with the same id
        self.tables.remove(&file_id);
        self.view_cache.remove(&file_id);

        let table = match Table::open_file(path) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                ack.message = e.to_string();
                return ack;
            }
        };

        let view = TableView::new(Arc::clone(&table));
        ack.file_type_name = table.file_type().name().to_string();
        ack.data_size = table.num_rows();
        ack.headers = Self::populate_headers(&table);

        let preview_end = num_preview_rows.min(table.num_rows()) as i64;
        for index in 0..table.num_columns() {
            let column = match table.column(index) {
                Some(column) => column,
                None => continue,
            };
            if column.data_type() != ColumnType::Unsupported {
                let mut values = ColumnValues::default();
                view.fill_values_by_index(index, &mut values, 0, preview_end);
                ack.preview_data.insert(index, values);
            }
        }

        self.tables.insert(file_id, table);
        self.view_cache.insert(
            file_id,
            ViewCache {
                view,
                filter_configs: Vec::new(),
                sort_column: String::new(),
                sorting_type: None,
            },
        );
        ack.success = true;
        ack
    }

    pub fn on_close_file_request(&self, file_id: i32) {
        self.tables.remove(&file_id);
        self.view_cache.remove(&file_id);
    }

    /// Applies the request's filters and sort (reusing the cached view
    /// when nothing changed), then streams the selected row window to
    /// `partial_results_callback` in chunks
    pub fn on_filter_request(
        &self,
        request: &CatalogFilterRequest,
        partial_results_callback: &mut dyn FnMut(&CatalogFilterResponse),
    ) -> Result<()> {
        let table = self
            .tables
            .get(&request.file_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::ResourceMissing(format!("no catalog open with id {}", request.file_id))
            })?;
        let mut cache = self.view_cache.get_mut(&request.file_id).ok_or_else(|| {
            Error::Invariant(format!("catalog {} has no cached view", request.file_id))
        })?;

        if Self::filter_params_changed(request, &cache) {
            cache.filter_configs = request.filter_configs.clone();
            cache.sort_column = request.sort_column.clone();
            cache.sorting_type = request.sorting_type;
            cache.view.reset();

            for config in &request.filter_configs {
                Self::apply_filter(config, &mut cache.view);
            }
            if !request.sort_column.is_empty() {
                let ascending = request.sorting_type != Some(SortingType::Descending);
                if !cache.view.sort_by_column(&request.sort_column, ascending) {
                    log::warn!("Could not sort on column \"{}\"", request.sort_column);
                }
            }
        }

        let view = &cache.view;
        let num_results = view.num_rows();
        let start_index = request.subset_start_index.min(num_results);
        let response_size = request.subset_data_size.min(num_results - start_index);

        let mut response = CatalogFilterResponse {
            file_id: request.file_id,
            filter_data_size: num_results,
            request_end_index: start_index + response_size,
            ..Default::default()
        };

        // Handle empty filters
        if response_size == 0 {
            response.progress = 1.0;
            response.subset_end_index = start_index;
            partial_results_callback(&response);
            return Ok(());
        }

        let max_chunk_size = self.config.catalog_chunk_size.max(1);
        let mut num_remaining_rows = response_size;
        let mut sent_rows = 0;
        let mut chunk_start_index = start_index;

        while num_remaining_rows > 0 {
            let chunk_size = num_remaining_rows.min(max_chunk_size);
            let chunk_end_index = chunk_start_index + chunk_size;
            response.subset_data_size = chunk_size;
            response.subset_end_index = chunk_end_index;
            response.columns.clear();

            for &index in &request.column_indices {
                let supported = table
                    .column(index)
                    .is_some_and(|c| c.data_type() != ColumnType::Unsupported);
                if supported {
                    let mut values = ColumnValues::default();
                    view.fill_values_by_index(
                        index,
                        &mut values,
                        chunk_start_index as i64,
                        chunk_end_index as i64,
                    );
                    response.columns.insert(index, values);
                }
            }

            sent_rows += chunk_size;
            chunk_start_index += chunk_size;
            num_remaining_rows -= chunk_size;
            response.progress = if num_remaining_rows == 0 {
                1.0
            } else {
                sent_rows as f32 / response_size as f32
            };

            partial_results_callback(&response);
        }

        Ok(())
    }

    /// Number of catalogs currently open
    pub fn num_open(&self) -> usize {
        self.tables.len()
    }

    fn apply_filter(config: &FilterConfig, view: &mut TableView) {
        let applied = match &config.filter {
            ColumnFilter::SubString(needle) => {
                view.string_filter(&config.column_name, needle, false)
            }
            ColumnFilter::Numeric {
                operator,
                value,
                secondary_value,
            } => view.numeric_filter(&config.column_name, *operator, *value, *secondary_value),
        };
        if !applied {
            log::warn!("Could not filter on column \"{}\"", config.column_name);
        }
    }

    fn populate_headers(table: &Table) -> Vec<CatalogHeader> {
        let mut headers = Vec::with_capacity(table.num_columns());
        for index in 0..table.num_columns() {
            if let Some(column) = table.column(index) {
                headers.push(CatalogHeader {
                    name: column.name.clone(),
                    data_type: column.data_type(),
                    description: column.description.clone(),
                    units: column.unit.clone(),
                    column_index: index,
                });
            }
        }
        headers
    }

    fn filter_params_changed(request: &CatalogFilterRequest, cache: &ViewCache) -> bool {
        cache.sort_column != request.sort_column
            || cache.sorting_type != request.sorting_type
            || cache.filter_configs != request.filter_configs
    }
}
