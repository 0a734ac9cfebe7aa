use crate::error::CleanError;
use crate::process::{date_parser, utils};
use arrow::{
    array::{
        new_null_array, Array, ArrayRef, BooleanArray, Date32Builder, Float64Array, StringArray,
    },
    compute::{cast, filter_record_batch},
    datatypes::{DataType, Date32Type, Field, FieldRef, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::sync::Arc;

pub const PRICE_COLUMN: &str = "price";
pub const LAST_REVIEW_COLUMN: &str = "last_review";

/// Inclusive price bounds. An inverted range (`min > max`) is accepted and matches nothing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceRange {
    min: f64,
    max: f64,
}

impl PriceRange {
    pub fn new(min_price: f64, max_price: f64) -> Result<Self, CleanError> {
        if !min_price.is_finite() || !max_price.is_finite() {
            return Err(CleanError::Range(format!(
                "price bounds must be finite, got [{}, {}]",
                min_price, max_price
            )));
        }
        Ok(Self {
            min: min_price,
            max: max_price,
        })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min <= price && price <= self.max
    }
}

/// Keep the rows whose `price` lies inside `range`, then re-type `last_review` as a date.
///
/// A null price never matches. A price cell that is present but not a number, or a
/// `last_review` cell on a kept row that is not a date, fails the whole call. Null
/// review dates stay null. Row order and column order are preserved.
pub fn clean(batch: &RecordBatch, range: &PriceRange) -> Result<RecordBatch, CleanError> {
    let price_idx = column_index(batch, PRICE_COLUMN)?;
    let review_idx = column_index(batch, LAST_REVIEW_COLUMN)?;

    let prices = price_values(batch.column(price_idx))?;
    let keep: Vec<bool> = prices
        .iter()
        .map(|p| p.is_some_and(|v| range.contains(v)))
        .collect();
    let source_rows: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter_map(|(row, &k)| k.then_some(row))
        .collect();

    let filtered = filter_record_batch(batch, &BooleanArray::from(keep))?;
    let dates = to_dates(filtered.column(review_idx), &source_rows)?;

    let schema = filtered.schema();
    let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
    let review_field = Field::new(schema.field(review_idx).name(), DataType::Date32, true);
    fields[review_idx] = Arc::new(review_field);
    let mut columns = filtered.columns().to_vec();
    columns[review_idx] = dates;

    let options = RecordBatchOptions::new().with_row_count(Some(filtered.num_rows()));
    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
    Ok(RecordBatch::try_new_with_options(
        Arc::new(schema),
        columns,
        &options,
    )?)
}

fn column_index(batch: &RecordBatch, name: &str) -> Result<usize, CleanError> {
    batch
        .schema()
        .column_with_name(name)
        .map(|(idx, _)| idx)
        .ok_or_else(|| CleanError::Schema {
            column: name.to_string(),
        })
}

fn column_type_error(col: &ArrayRef, column: &str, expected: &'static str) -> CleanError {
    CleanError::ColumnType {
        column: column.to_string(),
        data_type: col.data_type().to_string(),
        expected,
    }
}

/// Price column as f64. Text cells are parsed one by one so a bad cell can be reported.
fn price_values(col: &ArrayRef) -> Result<Float64Array, CleanError> {
    match col.data_type() {
        DataType::Null => Ok(Float64Array::new_null(col.len())),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(col, &DataType::Utf8)?;
            let text = text
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| column_type_error(col, PRICE_COLUMN, "a number"))?;
            text.iter()
                .enumerate()
                .map(|(row, cell)| {
                    let Some(raw) = cell else { return Ok(None) };
                    let cleaned = utils::clean_str(raw);
                    if cleaned.is_empty() {
                        return Ok(None);
                    }
                    cleaned
                        .parse::<f64>()
                        .map(Some)
                        .map_err(|_| CleanError::Format {
                            column: PRICE_COLUMN.to_string(),
                            row,
                            value: raw.to_string(),
                            expected: "a number",
                        })
                })
                .collect()
        }
        dt if dt.is_numeric() => {
            let floats = cast(col, &DataType::Float64)?;
            floats
                .as_any()
                .downcast_ref::<Float64Array>()
                .cloned()
                .ok_or_else(|| column_type_error(col, PRICE_COLUMN, "a number"))
        }
        _ => Err(column_type_error(col, PRICE_COLUMN, "a number")),
    }
}

/// Review column as `Date32`. `source_rows[i]` is the input row of filtered row `i`.
fn to_dates(col: &ArrayRef, source_rows: &[usize]) -> Result<ArrayRef, CleanError> {
    match col.data_type() {
        DataType::Date32 => Ok(col.clone()),
        DataType::Date64 | DataType::Timestamp(_, _) => Ok(cast(col, &DataType::Date32)?),
        DataType::Null => Ok(new_null_array(&DataType::Date32, col.len())),
        dt if dt.is_numeric()
            || matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View) =>
        {
            let text = cast(col, &DataType::Utf8)?;
            let text = text
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| column_type_error(col, LAST_REVIEW_COLUMN, "a date"))?;

            let mut b = Date32Builder::with_capacity(text.len());
            for (i, cell) in text.iter().enumerate() {
                let cleaned = cell.map(utils::clean_str).filter(|s| !s.is_empty());
                let Some(cleaned) = cleaned else {
                    b.append_null();
                    continue;
                };
                let date = date_parser::parse_date(&cleaned).ok_or_else(|| CleanError::Format {
                    column: LAST_REVIEW_COLUMN.to_string(),
                    row: source_rows.get(i).copied().unwrap_or(i),
                    value: cell.unwrap_or_default().to_string(),
                    expected: "a date",
                })?;
                b.append_value(Date32Type::from_naive_date(date));
            }
            Ok(Arc::new(b.finish()))
        }
        _ => Err(column_type_error(col, LAST_REVIEW_COLUMN, "a date")),
    }
}
