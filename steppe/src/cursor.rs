use crate::error::DriverError;
use crate::execution::Cursor;
use crate::types::Hint;
use mongodb::bson::Document;
use std::collections::VecDeque;

/// Wraps a cursor and pulls every remaining document out of it on the first
/// `next()`, so the server cursor is released early. Shaping calls made before
/// that point still reach the inner cursor.
pub struct EagerCursor {
    inner: Box<dyn Cursor>,
    buffer: Option<VecDeque<std::result::Result<Document, DriverError>>>,
}

impl EagerCursor {
    pub fn new(inner: Box<dyn Cursor>) -> Self {
        Self {
            inner,
            buffer: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.buffer.is_some()
    }

    fn initialize(&mut self) -> &mut VecDeque<std::result::Result<Document, DriverError>> {
        let inner = &mut self.inner;
        self.buffer.get_or_insert_with(|| {
            let buffer: VecDeque<_> = inner.by_ref().collect();
            log::trace!("eager cursor buffered {} results", buffer.len());
            buffer
        })
    }
}

impl Iterator for EagerCursor {
    type Item = std::result::Result<Document, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.initialize().pop_front()
    }
}

impl Cursor for EagerCursor {
    fn limit(&mut self, limit: i64) {
        self.inner.limit(limit);
    }

    fn skip(&mut self, skip: u64) {
        Cursor::skip(self.inner.as_mut(), skip);
    }

    fn sort(&mut self, sort: &Document) {
        self.inner.sort(sort);
    }

    fn immortal(&mut self, immortal: bool) {
        self.inner.immortal(immortal);
    }

    fn slave_okay(&mut self, slave_okay: bool) {
        self.inner.slave_okay(slave_okay);
    }

    fn snapshot(&mut self) {
        self.inner.snapshot();
    }

    fn hint(&mut self, hint: &Hint) {
        self.inner.hint(hint);
    }
}
