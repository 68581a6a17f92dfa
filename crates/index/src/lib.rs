use std::io::Write;

use anyhow::Result;
use serde::Serialize;

/// Writes one JSON document per line; used for chunk and page dumps.
pub struct JsonlWriter<W> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        self.written += 1;
        Ok(())
    }

    pub fn write_all<'a, T, I>(&mut self, records: I) -> Result<usize>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let before = self.written;
        for record in records {
            self.write_record(record)?;
        }
        Ok(self.written - before)
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
