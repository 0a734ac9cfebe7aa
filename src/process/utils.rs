use arrow::datatypes::DataType;

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Infer the narrowest Arrow dtype for a single value; surrounding whitespace is ignored.
pub fn infer_arrow_dtype_from_str(s: &str) -> DataType {
    let s = s.trim();
    if s.parse::<i64>().is_ok() {
        DataType::Int64
    } else if s.parse::<f64>().is_ok() {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

/// Widen two inferred dtypes into one that can hold both.
pub fn widen(current: Option<DataType>, next: DataType) -> DataType {
    match (current, next) {
        (None, ty) => ty,
        (Some(DataType::Utf8), _) | (_, DataType::Utf8) => DataType::Utf8,
        (Some(DataType::Float64), _) | (_, DataType::Float64) => DataType::Float64,
        _ => DataType::Int64,
    }
}

/// Infer a column dtype from its cells; empty cells are ignored, an all-empty column is text.
pub fn infer_column_dtype<'a>(cells: impl IntoIterator<Item = Option<&'a str>>) -> DataType {
    cells
        .into_iter()
        .flatten()
        .fold(None, |acc, cell| Some(widen(acc, infer_arrow_dtype_from_str(cell))))
        .unwrap_or(DataType::Utf8)
}
