//! Row mapper
//!
//! Record types describe their writable fields once in a [`BindingTable`]:
//!
//! ```
//! use rivven_repo::mapper::{BindingTable, Record};
//!
//! #[derive(Debug, Default)]
//! struct Customer {
//!     id: i64,
//!     name: String,
//!     email: Option<String>,
//! }
//!
//! impl Record for Customer {
//!     fn bindings(table: &mut BindingTable<Self>) {
//!         table
//!             .field("Id", |c, v| c.id = v)
//!             .field("Name", |c, v| c.name = v)
//!             .field("Email", |c, v| c.email = v);
//!     }
//! }
//! ```
//!
//! The table is built once per type and cached process-wide. A [`RowMapper`]
//! resolves column positions once per result set (case-insensitively); columns
//! without a field and fields without a column are skipped. NULL leaves the
//! field at its default.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{enum_from_value, FromValue, Row, Value};

/// What to do when a non-null column cannot be coerced into its field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    /// Leave the field at its default and carry on
    #[default]
    Lenient,
    /// Fail the row with a type conversion error naming the column
    Strict,
}

type Setter<T> = Box<dyn Fn(&mut T, &Value) -> Result<()> + Send + Sync>;

struct FieldBinding<T> {
    name: String,
    set: Setter<T>,
}

/// Column-name to setter table for one record type
pub struct BindingTable<T> {
    fields: Vec<FieldBinding<T>>,
    _marker: PhantomData<fn(&mut T)>,
}

impl<T> Default for BindingTable<T> {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for BindingTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|b| &b.name))
            .finish()
    }
}

impl<T> BindingTable<T> {
    /// Bind a column to a field through [`FromValue`] coercion
    pub fn field<V, F>(&mut self, column: &str, set: F) -> &mut Self
    where
        V: FromValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.field_with(column, move |record, value| {
            set(record, V::from_value(value)?);
            Ok(())
        })
    }

    /// Bind a column to an enum field stored by ordinal or by name
    pub fn enum_field<E, F>(&mut self, column: &str, set: F) -> &mut Self
    where
        E: TryFrom<i64> + FromStr,
        F: Fn(&mut T, E) + Send + Sync + 'static,
    {
        self.field_with(column, move |record, value| {
            set(record, enum_from_value::<E>(value)?);
            Ok(())
        })
    }

    /// Bind a column with a custom conversion
    pub fn field_with<F>(&mut self, column: &str, set: F) -> &mut Self
    where
        F: Fn(&mut T, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.fields.push(FieldBinding {
            name: column.to_string(),
            set: Box::new(set),
        });
        self
    }

    /// Number of bound fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is bound
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A type that can be materialised from a database row
pub trait Record: Default + Send + 'static {
    /// Register the type's writable fields
    fn bindings(table: &mut BindingTable<Self>);
}

static BINDINGS: LazyLock<DashMap<TypeId, Arc<dyn Any + Send + Sync>>> =
    LazyLock::new(DashMap::new);

/// Cached binding table for `T`, built on first use
pub fn bindings_for<T: Record>() -> Arc<BindingTable<T>> {
    let key = TypeId::of::<T>();
    if let Some(cached) = BINDINGS.get(&key) {
        if let Ok(table) = Arc::clone(cached.value()).downcast::<BindingTable<T>>() {
            return table;
        }
    }

    let mut table = BindingTable::default();
    T::bindings(&mut table);
    let table = Arc::new(table);
    BINDINGS.insert(key, Arc::clone(&table) as Arc<dyn Any + Send + Sync>);
    table
}

struct Plan {
    columns: Arc<[String]>,
    /// (column index, field index) pairs
    pairs: Vec<(usize, usize)>,
}

/// Maps rows of one result set into `T`
pub struct RowMapper<T: Record> {
    table: Arc<BindingTable<T>>,
    mode: MappingMode,
    plan: Option<Plan>,
}

impl<T: Record> std::fmt::Debug for RowMapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowMapper")
            .field("target", &std::any::type_name::<T>())
            .field("mode", &self.mode)
            .field("fields", &self.table.len())
            .finish()
    }
}

impl<T: Record> RowMapper<T> {
    /// Create a mapper using the cached binding table of `T`
    pub fn new(mode: MappingMode) -> Self {
        Self {
            table: bindings_for::<T>(),
            mode,
            plan: None,
        }
    }

    fn plan_for(&mut self, columns: &Arc<[String]>) -> &Plan {
        let stale = self.plan.as_ref().is_some_and(|plan| {
            !Arc::ptr_eq(&plan.columns, columns) && plan.columns[..] != columns[..]
        });
        if stale {
            self.plan = None;
        }

        let table = &self.table;
        self.plan.get_or_insert_with(|| {
            let pairs = table
                .fields
                .iter()
                .enumerate()
                .filter_map(|(field_idx, field)| {
                    columns
                        .iter()
                        .position(|c| c.eq_ignore_ascii_case(&field.name))
                        .map(|col_idx| (col_idx, field_idx))
                })
                .collect();
            Plan {
                columns: Arc::clone(columns),
                pairs,
            }
        })
    }

    /// Map one row
    pub fn map(&mut self, row: &Row) -> Result<T> {
        let mode = self.mode;
        let table = Arc::clone(&self.table);
        let plan = self.plan_for(row.column_names());

        let mut record = T::default();
        for &(col_idx, field_idx) in &plan.pairs {
            let Some(value) = row.get(col_idx) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            let field = &table.fields[field_idx];
            if let Err(e) = (field.set)(&mut record, value) {
                match mode {
                    MappingMode::Lenient => {
                        debug!(
                            target_type = std::any::type_name::<T>(),
                            column = %field.name,
                            error = %e,
                            "Skipping field that failed to convert"
                        );
                    }
                    MappingMode::Strict => {
                        return Err(Error::type_conversion(format!(
                            "column '{}' of {}: {}",
                            field.name,
                            std::any::type_name::<T>(),
                            e
                        )));
                    }
                }
            }
        }

        Ok(record)
    }

    /// Map every row of a result set
    pub fn map_all(&mut self, rows: &[Row]) -> Result<Vec<T>> {
        rows.iter().map(|row| self.map(row)).collect()
    }
}

/// Read the first column of a row as a scalar, NULL or missing yielding the default
pub fn scalar_from_row<S: FromValue + Default>(row: Option<&Row>) -> Result<S> {
    match row.and_then(|r| r.get(0)) {
        None | Some(Value::Null) => Ok(S::default()),
        Some(value) => S::from_value(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(Debug, Default, PartialEq)]
    enum Tier {
        #[default]
        Free,
        Pro,
    }

    impl TryFrom<i64> for Tier {
        type Error = ();
        fn try_from(n: i64) -> std::result::Result<Self, ()> {
            match n {
                0 => Ok(Self::Free),
                1 => Ok(Self::Pro),
                _ => Err(()),
            }
        }
    }

    impl FromStr for Tier {
        type Err = ();
        fn from_str(s: &str) -> std::result::Result<Self, ()> {
            match s.to_ascii_lowercase().as_str() {
                "free" => Ok(Self::Free),
                "pro" => Ok(Self::Pro),
                _ => Err(()),
            }
        }
    }

    #[derive(Debug, Default)]
    struct Account {
        id: i64,
        external_id: Uuid,
        name: String,
        tier: Tier,
        balance: Option<f64>,
    }

    impl Record for Account {
        fn bindings(table: &mut BindingTable<Self>) {
            table
                .field("Id", |a, v| a.id = v)
                .field("ExternalId", |a, v| a.external_id = v)
                .field("Name", |a, v| a.name = v)
                .enum_field("Tier", |a, v| a.tier = v)
                .field("Balance", |a, v| a.balance = v);
        }
    }

    fn row(values: Vec<Value>) -> Row {
        Row::new(
            vec![
                "id".into(),
                "EXTERNALID".into(),
                "name".into(),
                "tier".into(),
                "balance".into(),
                "ignored".into(),
            ],
            values,
        )
    }

    #[test]
    fn test_case_insensitive_mapping() {
        let id = Uuid::new_v4();
        let mut mapper = RowMapper::<Account>::new(MappingMode::Lenient);
        let account = mapper
            .map(&row(vec![
                Value::Int64(7),
                Value::String(id.to_string()),
                Value::String("Ada".into()),
                Value::String("Pro".into()),
                Value::Float64(12.5),
                Value::Bool(true),
            ]))
            .unwrap();

        assert_eq!(account.id, 7);
        assert_eq!(account.external_id, id);
        assert_eq!(account.name, "Ada");
        assert_eq!(account.tier, Tier::Pro);
        assert_eq!(account.balance, Some(12.5));
    }

    #[test]
    fn test_nulls_leave_defaults() {
        let mut mapper = RowMapper::<Account>::new(MappingMode::Strict);
        let account = mapper
            .map(&row(vec![
                Value::Int32(1),
                Value::Null,
                Value::Null,
                Value::Int32(1),
                Value::Null,
                Value::Null,
            ]))
            .unwrap();
        assert_eq!(account.id, 1);
        assert_eq!(account.name, "");
        assert_eq!(account.tier, Tier::Pro);
        assert_eq!(account.balance, None);
    }

    #[test]
    fn test_lenient_skips_bad_field() {
        let mut mapper = RowMapper::<Account>::new(MappingMode::Lenient);
        let account = mapper
            .map(&row(vec![
                Value::String("not a number".into()),
                Value::Null,
                Value::String("Bob".into()),
                Value::Int32(9),
                Value::Null,
                Value::Null,
            ]))
            .unwrap();
        assert_eq!(account.id, 0);
        assert_eq!(account.name, "Bob");
        assert_eq!(account.tier, Tier::Free);
    }

    #[test]
    fn test_strict_fails_row() {
        let mut mapper = RowMapper::<Account>::new(MappingMode::Strict);
        let err = mapper
            .map(&row(vec![
                Value::String("not a number".into()),
                Value::Null,
                Value::Null,
                Value::Null,
                Value::Null,
                Value::Null,
            ]))
            .unwrap_err();
        assert!(matches!(err, Error::TypeConversion { .. }));
        assert!(err.to_string().contains("Id"));
    }

    #[test]
    fn test_missing_columns_are_skipped() {
        let mut mapper = RowMapper::<Account>::new(MappingMode::Strict);
        let account = mapper
            .map(&Row::new(vec!["NAME".into()], vec![Value::String("Cy".into())]))
            .unwrap();
        assert_eq!(account.name, "Cy");
        assert_eq!(account.id, 0);
    }

    #[test]
    fn test_binding_table_is_cached() {
        let a = bindings_for::<Account>();
        let b = bindings_for::<Account>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn test_scalar_from_row() {
        let r = Row::new(vec!["c".into()], vec![Value::Null]);
        assert_eq!(scalar_from_row::<i64>(Some(&r)).unwrap(), 0);
        assert_eq!(scalar_from_row::<String>(None).unwrap(), "");
        let r = Row::new(vec!["c".into()], vec![Value::Int32(5)]);
        assert_eq!(scalar_from_row::<i64>(Some(&r)).unwrap(), 5);
    }
}
