use crate::process::raw_table::RawTable;
use crate::process::utils;
use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::sync::Arc;

/// Type every column of a raw table and assemble a record batch.
pub fn raw_to_record_batch(raw: &RawTable) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(raw.headers.len());
    let mut columns = Vec::with_capacity(raw.headers.len());

    for (i, name) in raw.headers.iter().enumerate() {
        let dtype = utils::infer_column_dtype(raw.column_cells(i));
        let col: ArrayRef = match dtype {
            DataType::Int64 => {
                let mut b = Int64Builder::with_capacity(raw.rows.len());
                for cell in raw.column_cells(i) {
                    b.append_option(cell.and_then(|s| s.trim().parse().ok()));
                }
                Arc::new(b.finish())
            }
            DataType::Float64 => {
                let mut b = Float64Builder::with_capacity(raw.rows.len());
                for cell in raw.column_cells(i) {
                    b.append_option(cell.and_then(|s| s.trim().parse().ok()));
                }
                Arc::new(b.finish())
            }
            _ => {
                let mut b = StringBuilder::new();
                for cell in raw.column_cells(i) {
                    b.append_option(cell);
                }
                Arc::new(b.finish())
            }
        };
        fields.push(Field::new(name, col.data_type().clone(), true));
        columns.push(col);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(raw.rows.len()));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)
        .context("assembling record batch from csv")
}
