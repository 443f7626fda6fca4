//! Typed view over one Procmon CSV row.

use std::sync::Arc;

pub const TIME_OF_DAY: &str = "Time of Day";
pub const PROCESS_NAME: &str = "Process Name";
pub const PID: &str = "PID";
pub const OPERATION: &str = "Operation";
pub const PATH: &str = "Path";
pub const RESULT: &str = "Result";
pub const DETAIL: &str = "Detail";

/// Column layout of one export, resolved once from the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    headers: Vec<String>,
    pub time_of_day: Option<usize>,
    pub process_name: Option<usize>,
    pub pid: Option<usize>,
    pub operation: Option<usize>,
    pub path: Option<usize>,
    pub result: Option<usize>,
    pub detail: Option<usize>,
    dedup: Vec<usize>,
}

impl Schema {
    pub fn new(headers: Vec<String>) -> Self {
        let mut schema = Self {
            headers,
            time_of_day: None,
            process_name: None,
            pid: None,
            operation: None,
            path: None,
            result: None,
            detail: None,
            dedup: Vec::new(),
        };
        schema.time_of_day = schema.index_of(TIME_OF_DAY);
        schema.process_name = schema.index_of(PROCESS_NAME);
        schema.pid = schema.index_of(PID);
        schema.operation = schema.index_of(OPERATION);
        schema.path = schema.index_of(PATH);
        schema.result = schema.index_of(RESULT);
        schema.detail = schema.index_of(DETAIL);
        schema.dedup = [
            schema.time_of_day,
            schema.process_name,
            schema.pid,
            schema.operation,
            schema.path,
        ]
        .into_iter()
        .flatten()
        .collect();
        schema
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Exact match first, then ASCII case-insensitive.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .or_else(|| self.headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
    }

    /// Indices hashed for duplicate detection, in canonical order.
    pub fn dedup_indices(&self) -> &[usize] {
        &self.dedup
    }
}

/// One data row. Values are positional against the shared [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based line on which the row starts (header is line 1)
    pub line: u64,
    schema: Arc<Schema>,
    values: Vec<String>,
}

impl Record {
    pub fn new(line: u64, schema: Arc<Schema>, values: Vec<String>) -> Self {
        Self {
            line,
            schema,
            values,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [String] {
        &mut self.values
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.schema.index_of(name).and_then(|i| self.at(i))
    }

    pub fn at(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).map(String::as_str)
    }

    fn column(&self, idx: Option<usize>) -> Option<&str> {
        idx.and_then(|i| self.at(i))
    }

    pub fn time_of_day(&self) -> Option<&str> {
        self.column(self.schema.time_of_day)
    }

    pub fn process_name(&self) -> Option<&str> {
        self.column(self.schema.process_name)
    }

    pub fn pid(&self) -> Option<&str> {
        self.column(self.schema.pid)
    }

    pub fn operation(&self) -> Option<&str> {
        self.column(self.schema.operation)
    }

    pub fn path(&self) -> Option<&str> {
        self.column(self.schema.path)
    }

    pub fn result(&self) -> Option<&str> {
        self.column(self.schema.result)
    }

    pub fn detail(&self) -> Option<&str> {
        self.column(self.schema.detail)
    }

    /// Rough heap footprint, used for working-set accounting.
    pub fn approx_bytes(&self) -> usize {
        self.values.iter().map(|v| v.capacity()).sum::<usize>()
            + self.values.capacity() * std::mem::size_of::<String>()
    }
}
