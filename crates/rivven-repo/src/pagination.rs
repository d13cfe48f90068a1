//! Pagination engine
//!
//! Three entry points on [`SqlRepository`]:
//! - [`query_paged`](SqlRepository::query_paged): the count query is derived
//!   from the page query (`SELECT COUNT(*) FROM (<query>) AS _count`, trailing
//!   ORDER BY stripped)
//! - [`query_paged_with_count`](SqlRepository::query_paged_with_count): the
//!   caller supplies the count query (required for set operators)
//! - [`query_paged_procedure`](SqlRepository::query_paged_procedure): a stored
//!   procedure pages server-side and reports `TotalCount`
//!
//! SQL generation is the pure [`PagePlan`]; offset and page size are always
//! bound as parameters and the only sort text ever concatenated is a column
//! name that passed [`validate_sort_column`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use validator::Validate;

use crate::command::CommandSpec;
use crate::dialect::{SqlDialect, OFFSET_PARAM, PAGE_SIZE_PARAM};
use crate::error::{Error, Result};
use crate::mapper::{scalar_from_row, Record, RowMapper};
use crate::repository::{SqlRepository, Statement};
use crate::security::{validate_sort_column, validate_sql_identifier};
use crate::sql::{bind_named, trim_statement, SqlText};
use crate::types::{Params, Row, Value};

/// Largest page size any caller may request
pub const MAX_PAGE_SIZE: u32 = 10_000;

/// Parameter carrying the free-text search term
pub const SEARCH_TERM_PARAM: &str = "SearchTerm";

/// Column (or output parameter) a paging procedure reports its total in
pub const TOTAL_COUNT_COLUMN: &str = "TotalCount";

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

impl SortDirection {
    /// SQL keyword
    pub fn to_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// Which page to fetch and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PaginationSpec {
    /// 1-based page number
    #[validate(range(min = 1))]
    pub page_index: u32,

    /// Rows per page
    #[validate(range(min = 1, max = 10000))]
    pub page_size: u32,

    /// Column to order by; validated before it reaches SQL
    #[serde(default)]
    pub sort_column: Option<String>,

    /// Sort direction
    #[serde(default)]
    pub sort_direction: SortDirection,

    /// Free-text search term, bound as `@SearchTerm`
    #[serde(default)]
    pub search_term: Option<String>,

    /// Named filters, each bound as a parameter of the same name
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
}

impl Default for PaginationSpec {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

impl PaginationSpec {
    /// Page `page_index` of `page_size` rows
    pub fn new(page_index: u32, page_size: u32) -> Self {
        Self {
            page_index,
            page_size,
            sort_column: None,
            sort_direction: SortDirection::Ascending,
            search_term: None,
            filters: BTreeMap::new(),
        }
    }

    /// Order by `column`
    pub fn sort_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_column = Some(column.into());
        self.sort_direction = direction;
        self
    }

    /// Set the search term
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    /// Add a filter
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Rows skipped before this page
    pub fn offset(&self) -> u64 {
        u64::from(self.page_index.saturating_sub(1)) * u64::from(self.page_size)
    }

    fn search_term(&self) -> Option<&str> {
        self.search_term
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Check bounds, sort column and filter names.
    ///
    /// `max_page_size` tightens the upper bound below [`MAX_PAGE_SIZE`].
    pub fn check(&self, max_page_size: u32) -> Result<()> {
        if let Err(errors) = self.validate() {
            let field = errors
                .field_errors()
                .keys()
                .min()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "pagination".to_string());
            return Err(Error::validation(field, errors.to_string()));
        }
        if self.page_size > max_page_size.min(MAX_PAGE_SIZE) {
            return Err(Error::validation(
                "page_size",
                format!("must be at most {}", max_page_size.min(MAX_PAGE_SIZE)),
            ));
        }
        if let Some(column) = &self.sort_column {
            validate_sort_column(column)?;
        }
        for name in self.filters.keys() {
            validate_sql_identifier(name).map_err(|_| {
                Error::validation("filters", format!("invalid filter name '{name}'"))
            })?;
        }
        Ok(())
    }

    fn bind_into(&self, params: &mut Params) {
        if let Some(term) = self.search_term() {
            params.insert(SEARCH_TERM_PARAM, term);
        }
        for (name, value) in &self.filters {
            params.insert(name.as_str(), value.clone());
        }
    }
}

/// What a paged call actually applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    /// A non-empty search term was bound
    pub search_applied: bool,
    /// Number of filters bound
    pub filter_count: usize,
    /// Sort column used, if the caller supplied one
    pub sort_column: Option<String>,
    /// Sort direction used with `sort_column`
    pub sort_direction: Option<SortDirection>,
    /// The engine injected its default order
    pub default_order_applied: bool,
}

impl PageMetadata {
    /// Whether any filter was bound
    pub fn filters_applied(&self) -> bool {
        self.filter_count > 0
    }
}

/// One page of results plus totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResult<T> {
    items: Vec<T>,
    page_index: u32,
    page_size: u32,
    total_count: u64,
    total_pages: u64,
    has_next_page: bool,
    has_previous_page: bool,
    metadata: PageMetadata,
}

impl<T> PagedResult<T> {
    /// Assemble a page; derived totals are computed here
    pub fn new(
        items: Vec<T>,
        page_index: u32,
        page_size: u32,
        total_count: u64,
        metadata: PageMetadata,
    ) -> Self {
        let size = u64::from(page_size.max(1));
        Self {
            items,
            page_index,
            page_size,
            total_count,
            total_pages: total_count.div_ceil(size),
            has_next_page: u64::from(page_index) * size < total_count,
            has_previous_page: page_index > 1,
            metadata,
        }
    }

    /// Items of this page
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Take the items
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// 1-based page number
    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    /// Requested page size
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Rows across all pages
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// `ceil(total_count / page_size)`
    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Whether a later page has rows
    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    /// Whether this is not the first page
    pub fn has_previous_page(&self) -> bool {
        self.has_previous_page
    }

    /// What the call applied
    pub fn metadata(&self) -> &PageMetadata {
        &self.metadata
    }

    /// Number of items on this page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this page is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Convert the items, keeping totals and metadata
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            page_index: self.page_index,
            page_size: self.page_size,
            total_count: self.total_count,
            total_pages: self.total_pages,
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
            metadata: self.metadata,
        }
    }
}

/// SQL for one paged call, before dialect placeholder binding
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    /// Query returning the total row count
    pub count_sql: String,
    /// Query returning one page; references `@__Offset` and `@__PageSize`
    pub page_sql: String,
    /// Caller parameters plus search term, filters, offset and page size
    pub params: Params,
    /// Rows skipped
    pub offset: u64,
    /// What the plan applied
    pub metadata: PageMetadata,
}

impl PagePlan {
    /// Plan with a count query derived from `query`.
    ///
    /// Queries with a top-level UNION/INTERSECT/EXCEPT cannot be wrapped
    /// safely and need [`PagePlan::with_count_query`].
    pub fn derive(
        query: &str,
        params: &Params,
        spec: &PaginationSpec,
        dialect: &dyn SqlDialect,
    ) -> Result<Self> {
        let base = trim_statement(query);
        let text = SqlText::scan(base, dialect.database_type())?;
        if text.has_set_operator() {
            return Err(Error::validation(
                "query",
                "queries with set operators need an explicit count query",
            ));
        }
        let count_sql = dialect.count_query(&text.without_order_by());
        Self::build(base, &text, count_sql, params, spec, dialect)
    }

    /// Plan with a caller-supplied count query
    pub fn with_count_query(
        query: &str,
        count_query: &str,
        params: &Params,
        spec: &PaginationSpec,
        dialect: &dyn SqlDialect,
    ) -> Result<Self> {
        let count_sql = trim_statement(count_query).to_string();
        if count_sql.is_empty() {
            return Err(Error::validation("count_query", "must not be empty"));
        }
        let base = trim_statement(query);
        let text = SqlText::scan(base, dialect.database_type())?;
        Self::build(base, &text, count_sql, params, spec, dialect)
    }

    fn build(
        base: &str,
        text: &SqlText,
        count_sql: String,
        params: &Params,
        spec: &PaginationSpec,
        dialect: &dyn SqlDialect,
    ) -> Result<Self> {
        if base.is_empty() {
            return Err(Error::validation("query", "must not be empty"));
        }

        let mut metadata = PageMetadata {
            search_applied: spec.search_term().is_some(),
            filter_count: spec.filters.len(),
            ..Default::default()
        };

        let ordered = match &spec.sort_column {
            Some(column) => {
                metadata.sort_column = Some(column.clone());
                metadata.sort_direction = Some(spec.sort_direction);
                format!(
                    "{} ORDER BY {} {}",
                    text.without_order_by(),
                    column,
                    spec.sort_direction.to_sql()
                )
            }
            None if text.has_order_by() => base.to_string(),
            None => {
                metadata.default_order_applied = true;
                format!("{} {}", base, dialect.default_order_by())
            }
        };
        let page_sql = format!("{} {}", ordered, dialect.paging_clause());

        let offset = spec.offset();
        let mut all = params.clone();
        spec.bind_into(&mut all);
        all.insert(OFFSET_PARAM, Value::Int64(offset as i64));
        all.insert(PAGE_SIZE_PARAM, Value::Int32(spec.page_size as i32));

        Ok(Self {
            count_sql,
            page_sql,
            params: all,
            offset,
            metadata,
        })
    }

    /// Bind both queries for `dialect`
    pub fn statements(&self, dialect: &dyn SqlDialect) -> Result<(Statement, Statement)> {
        let (count_sql, count_args) = bind_named(&self.count_sql, &self.params, dialect)?;
        let (page_sql, page_args) = bind_named(&self.page_sql, &self.params, dialect)?;
        Ok((
            Statement::new(count_sql, count_args),
            Statement::new(page_sql, page_args),
        ))
    }
}

struct PageStatements {
    count: Statement,
    page: Statement,
    offset: u64,
}

fn total_from_rows(rows: &[Row]) -> Result<u64> {
    let total: i64 = scalar_from_row(rows.first())?;
    Ok(total.max(0) as u64)
}

impl SqlRepository {
    /// Fetch one page, deriving the count query from `cmd`
    pub async fn query_paged<T: Record>(
        &self,
        cmd: &CommandSpec,
        spec: &PaginationSpec,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<T>> {
        spec.check(self.options().max_page_size)?;
        let plan = PagePlan::derive(&cmd.sql, &cmd.params, spec, self.dialect())?;
        self.run_page_plan("query_paged", cmd, plan, spec, cancel).await
    }

    /// Fetch one page using an explicit count query
    pub async fn query_paged_with_count<T: Record>(
        &self,
        cmd: &CommandSpec,
        count_query: &str,
        spec: &PaginationSpec,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<T>> {
        spec.check(self.options().max_page_size)?;
        let plan =
            PagePlan::with_count_query(&cmd.sql, count_query, &cmd.params, spec, self.dialect())?;
        self.run_page_plan("query_paged_with_count", cmd, plan, spec, cancel)
            .await
    }

    async fn run_page_plan<T: Record>(
        &self,
        operation: &'static str,
        cmd: &CommandSpec,
        plan: PagePlan,
        spec: &PaginationSpec,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<T>> {
        let (count, page) = plan.statements(self.dialect())?;
        let stmts = PageStatements {
            count,
            page,
            offset: plan.offset,
        };

        // count and page share one connection and one retry scope
        let (total, rows) = self
            .run(
                operation,
                &plan.page_sql,
                self.timeout_for(cmd),
                cancel,
                &stmts,
                |conn, stmts| {
                    Box::pin(async move {
                        let counted = conn.query(&stmts.count.sql, &stmts.count.args).await?;
                        let total = total_from_rows(&counted)?;
                        if stmts.offset >= total {
                            return Ok((total, Vec::new()));
                        }
                        let rows = conn.query(&stmts.page.sql, &stmts.page.args).await?;
                        Ok((total, rows))
                    })
                },
            )
            .await?;

        let items = RowMapper::<T>::new(self.options().mapping)
            .map_all(&rows)
            .map_err(|e| e.in_operation(operation, 1).with_target(std::any::type_name::<T>()))?;

        debug!(
            operation,
            page_index = spec.page_index,
            page_size = spec.page_size,
            total,
            rows = items.len(),
            "Fetched page"
        );
        Ok(PagedResult::new(
            items,
            spec.page_index,
            spec.page_size,
            total,
            plan.metadata,
        ))
    }

    /// Fetch one page through a paging stored procedure.
    ///
    /// The procedure receives `@PageNumber`, `@PageSize` and, when set,
    /// `@SortColumn`, `@SortDirection`, `@SearchTerm` and one parameter per
    /// filter. Where the dialect supports it the total is read from a
    /// `TotalCount` output parameter; otherwise the procedure returns it as a
    /// `TotalCount` column, either in a trailing result set or alongside the
    /// page rows when it returns a single set.
    pub async fn query_paged_procedure<T: Record>(
        &self,
        procedure: &str,
        params: &Params,
        spec: &PaginationSpec,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<T>> {
        const OP: &str = "query_paged_procedure";
        spec.check(self.options().max_page_size)?;

        let mut all = params.clone();
        all.insert("PageNumber", Value::Int32(spec.page_index as i32));
        all.insert("PageSize", Value::Int32(spec.page_size as i32));
        if let Some(column) = &spec.sort_column {
            all.insert("SortColumn", column.as_str());
            all.insert("SortDirection", spec.sort_direction.to_sql());
        }
        spec.bind_into(&mut all);

        let output_select = self.dialect().supports_output_params();
        let mut cmd = CommandSpec::procedure(procedure).params(all);
        if output_select {
            cmd = cmd.output(TOTAL_COUNT_COLUMN, "INT");
        }

        let mut sets = self.query_result_sets(&cmd, cancel).await?;
        if sets.is_empty() {
            return Err(Error::query(format!(
                "procedure '{procedure}' returned no {TOTAL_COUNT_COLUMN}"
            ))
            .in_operation(OP, 1));
        }
        // Without an output parameter a lone result set carries both the page
        // and its TotalCount column.
        let totals = if output_select || sets.len() > 1 {
            sets.pop()
        } else {
            None
        };
        let total = match totals
            .as_ref()
            .or(sets.first())
            .and_then(|set| set.rows.first())
            .and_then(|r| r.get_by_name(TOTAL_COUNT_COLUMN))
        {
            None | Some(Value::Null) => 0,
            Some(v) => v.as_i64().unwrap_or(0).max(0) as u64,
        };
        let rows = if sets.is_empty() {
            Vec::new()
        } else {
            sets.swap_remove(0).rows
        };

        let items = RowMapper::<T>::new(self.options().mapping)
            .map_all(&rows)
            .map_err(|e| e.in_operation(OP, 1).with_target(std::any::type_name::<T>()))?;

        let metadata = PageMetadata {
            search_applied: spec.search_term().is_some(),
            filter_count: spec.filters.len(),
            sort_column: spec.sort_column.clone(),
            sort_direction: spec.sort_column.as_ref().map(|_| spec.sort_direction),
            default_order_applied: false,
        };
        Ok(PagedResult::new(
            items,
            spec.page_index,
            spec.page_size,
            total,
            metadata,
        ))
    }
}
