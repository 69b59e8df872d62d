//! Line source: turns an input stream into numbered [`LineJob`]s.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::iter::FusedIterator;
use std::path::Path;

use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::types::LineJob;

/// Lazy, non-restartable sequence of lines from a reader.
///
/// Lines are split on `\n`; the terminator and a trailing `\r` are removed.
/// Bytes that are not valid UTF-8 are replaced rather than rejected, so any
/// encoding that splits cleanly on `\n` is accepted. After the first read
/// error the source yields that error once and then ends.
pub struct LineSource<R> {
    reader: R,
    next_order: usize,
    buf: Vec<u8>,
    done: bool,
}

impl LineSource<BufReader<File>> {
    /// Open `path` for reading.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|source| PipelineError::OpenInput {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Opened input");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            next_order: 0,
            buf: Vec::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LineSource<R> {
    type Item = Result<LineJob, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                let raw = String::from_utf8_lossy(&self.buf).into_owned();
                let job = LineJob::new(self.next_order, raw);
                self.next_order += 1;
                Some(Ok(job))
            }
            Err(source) => {
                self.done = true;
                Some(Err(PipelineError::ReadInput {
                    line: self.next_order,
                    source,
                }))
            }
        }
    }
}

impl<R: BufRead> FusedIterator for LineSource<R> {}
