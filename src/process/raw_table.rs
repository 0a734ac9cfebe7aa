/// A CSV file as read from disk, before any typing.
#[derive(Debug, Default)]
pub struct RawTable {
    /// Column names, from the header row.
    pub headers: Vec<String>,
    /// Each data row, one cleaned cell per header. Empty cells are `None`.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn column_cells(&self, idx: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(idx).and_then(|c| c.as_deref()))
    }
}
