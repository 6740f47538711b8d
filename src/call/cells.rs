//! Side-channel payloads carried alongside the structured message.

use std::fmt;

use bytes::Bytes;

/// Bulk binary data travelling next to a call's parameter or result.
///
/// A side channel is a lazily consumed sequence of byte cells. Whatever
/// backs it (pooled buffers, a decoder cursor) is released when the value is
/// dropped, which is how the cleanup path frees it.
///
/// ```
/// use bytes::Bytes;
/// use callframe::call::SideChannel;
///
/// let mut cells = SideChannel::from_cells(vec![Bytes::from_static(b"a"), Bytes::from_static(b"bc")]);
/// assert_eq!(cells.next().as_deref(), Some(&b"a"[..]));
/// assert_eq!(cells.consumed_bytes(), 1);
/// ```
pub struct SideChannel {
    cells: Box<dyn Iterator<Item = Bytes> + Send>,
    consumed_bytes: u64,
    consumed_cells: u64,
}

impl SideChannel {
    /// Wrap an arbitrary cell iterator.
    pub fn new<I>(cells: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self {
            cells: Box::new(cells.into_iter()),
            consumed_bytes: 0,
            consumed_cells: 0,
        }
    }

    /// Build a side channel over an owned list of cells.
    #[must_use]
    pub fn from_cells(cells: Vec<Bytes>) -> Self { Self::new(cells) }

    /// Total bytes yielded so far.
    #[must_use]
    pub fn consumed_bytes(&self) -> u64 { self.consumed_bytes }

    /// Number of cells yielded so far.
    #[must_use]
    pub fn consumed_cells(&self) -> u64 { self.consumed_cells }
}

impl Iterator for SideChannel {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let cell = self.cells.next()?;
        self.consumed_cells += 1;
        self.consumed_bytes += cell.len() as u64;
        Some(cell)
    }

    fn size_hint(&self) -> (usize, Option<usize>) { self.cells.size_hint() }
}

impl fmt::Debug for SideChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideChannel")
            .field("consumed_cells", &self.consumed_cells)
            .field("consumed_bytes", &self.consumed_bytes)
            .finish_non_exhaustive()
    }
}
