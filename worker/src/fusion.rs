//! A flat address space over many separately owned buffers.
//!
//! Chunks are registered in order and addressed by a single offset running
//! through all of them. A chunk is either a borrowed external slice or a
//! lazy range placed inside one backing buffer on `allocate`.

use std::ops::Range;

#[derive(Debug)]
enum Chunk<'a, T> {
    External(&'a mut [T]),
    Lazy { len: usize, start: Option<usize> },
}

impl<T> Chunk<'_, T> {
    fn len(&self) -> usize {
        match self {
            Chunk::External(slice) => slice.len(),
            Chunk::Lazy { len, .. } => *len,
        }
    }
}

#[derive(Debug)]
enum Backing<'a, T> {
    Unallocated,
    Owned(Vec<T>),
    External(&'a mut [T]),
}

/// One contiguous part of an access, resolved to its chunk.
struct Piece {
    chunk: usize,
    /// The range inside the chunk.
    inner: Range<usize>,
    /// The range inside the accessed span.
    outer: Range<usize>,
}

/// An arena fusing registered buffers into one offset space.
#[derive(Debug)]
pub struct BufferFusion<'a, T> {
    chunks: Vec<Chunk<'a, T>>,
    /// `ends[i]` is the offset one past chunk `i`.
    ends: Vec<usize>,
    backing: Backing<'a, T>,
    lazy_len: usize,
}

impl<T> Default for BufferFusion<'_, T> {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            ends: Vec::new(),
            backing: Backing::Unallocated,
            lazy_len: 0,
        }
    }
}

impl<'a, T: Copy + Default> BufferFusion<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an external buffer to the arena.
    ///
    /// # Returns
    /// The index of the new chunk.
    pub fn register_chunk(&mut self, chunk: &'a mut [T]) -> usize {
        self.push_chunk(Chunk::External(chunk))
    }

    /// Appends a chunk of `len` elements that lives in the backing buffer.
    ///
    /// # Returns
    /// The index of the new chunk.
    pub fn register_lazy(&mut self, len: usize) -> usize {
        assert!(
            matches!(self.backing, Backing::Unallocated),
            "lazy chunks can't be added after allocate"
        );

        self.lazy_len += len;
        self.push_chunk(Chunk::Lazy { len, start: None })
    }

    /// Places every lazy chunk, one after the other, in the backing buffer.
    ///
    /// # Arguments
    /// * `external` - A buffer of exactly the total lazy size to use as
    ///   backing, or `None` to allocate a zeroed one.
    ///
    /// # Panics
    /// If called twice or if `external` has the wrong length.
    pub fn allocate(&mut self, external: Option<&'a mut [T]>) {
        assert!(
            matches!(self.backing, Backing::Unallocated),
            "arena is already allocated"
        );

        self.backing = match external {
            Some(buf) => {
                assert_eq!(
                    buf.len(),
                    self.lazy_len,
                    "external backing doesn't match the lazy size"
                );
                Backing::External(buf)
            }
            None => Backing::Owned(vec![T::default(); self.lazy_len]),
        };

        let mut next = 0;
        for chunk in &mut self.chunks {
            if let Chunk::Lazy { len, start } = chunk {
                *start = Some(next);
                next += *len;
            }
        }
    }

    /// The total amount of addressable elements.
    pub fn size(&self) -> usize {
        self.ends.last().copied().unwrap_or_default()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The `(offset, len)` of every chunk, in registration order.
    pub fn layout(&self) -> Vec<(usize, usize)> {
        let mut start = 0;

        self.ends
            .iter()
            .map(|&end| {
                let span = (start, end - start);
                start = end;
                span
            })
            .collect()
    }

    /// Returns chunk `i`.
    ///
    /// # Panics
    /// If `i` is out of range or the chunk is lazy and the arena isn't allocated.
    pub fn chunk(&self, i: usize) -> &[T] {
        match &self.chunks[i] {
            Chunk::External(slice) => slice,
            Chunk::Lazy { len, start } => {
                let start = start.expect("arena is not allocated");
                &Self::backing_slice(&self.backing)[start..start + len]
            }
        }
    }

    /// Copies `out.len()` elements starting at `offset` into `out`.
    pub fn copy_out(&self, offset: usize, out: &mut [T]) {
        for piece in self.pieces(offset, out.len()) {
            out[piece.outer].copy_from_slice(&self.chunk(piece.chunk)[piece.inner]);
        }
    }

    /// Copies `src` into the arena starting at `offset`.
    pub fn copy_in(&mut self, offset: usize, src: &[T]) {
        for piece in self.pieces(offset, src.len()) {
            self.chunk_mut(piece.chunk)[piece.inner].copy_from_slice(&src[piece.outer]);
        }
    }

    /// Runs `f` over the `len` elements starting at `offset`.
    ///
    /// `f` is called once per chunk the span crosses.
    pub fn transform<F: FnMut(&mut [T])>(&mut self, offset: usize, len: usize, mut f: F) {
        for piece in self.pieces(offset, len) {
            f(&mut self.chunk_mut(piece.chunk)[piece.inner]);
        }
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: T) {
        let size = self.size();
        self.transform(0, size, |piece| piece.fill(value));
    }

    /// Copies the whole arena into a new vector.
    pub fn flatten(&self) -> Vec<T> {
        let mut out = vec![T::default(); self.size()];
        self.copy_out(0, &mut out);
        out
    }

    fn push_chunk(&mut self, chunk: Chunk<'a, T>) -> usize {
        let end = self.size() + chunk.len();
        self.chunks.push(chunk);
        self.ends.push(end);
        self.chunks.len() - 1
    }

    fn chunk_mut(&mut self, i: usize) -> &mut [T] {
        let Self { chunks, backing, .. } = self;

        match &mut chunks[i] {
            Chunk::External(slice) => slice,
            Chunk::Lazy { len, start } => {
                let start = start.expect("arena is not allocated");
                &mut Self::backing_slice_mut(backing)[start..start + *len]
            }
        }
    }

    fn backing_slice<'b>(backing: &'b Backing<'a, T>) -> &'b [T] {
        match backing {
            Backing::Owned(vec) => vec,
            Backing::External(slice) => slice,
            Backing::Unallocated => &[],
        }
    }

    fn backing_slice_mut<'b>(backing: &'b mut Backing<'a, T>) -> &'b mut [T] {
        match backing {
            Backing::Owned(vec) => vec,
            Backing::External(slice) => slice,
            Backing::Unallocated => &mut [],
        }
    }

    /// Splits the span `[offset, offset + len)` at chunk boundaries.
    ///
    /// # Panics
    /// If the span goes past the end of the arena.
    fn pieces(&self, offset: usize, len: usize) -> Vec<Piece> {
        let size = self.size();
        assert!(
            offset + len <= size,
            "span {offset}..{} is out of the arena of size {size}",
            offset + len
        );

        let mut pieces = Vec::new();
        let mut cursor = offset;
        let mut chunk = self.ends.partition_point(|&end| end <= offset);

        while cursor < offset + len {
            let start = self.ends[chunk] - self.chunks[chunk].len();
            let end = self.ends[chunk].min(offset + len);

            pieces.push(Piece {
                chunk,
                inner: cursor - start..end - start,
                outer: cursor - offset..end - offset,
            });

            cursor = end;
            chunk += 1;
        }

        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_chunks_share_one_offset_space() {
        let mut a = [1.0, 2.0];
        let mut b = [3.0, 4.0, 5.0];

        let mut arena = BufferFusion::new();
        arena.register_chunk(&mut a);
        arena.register_chunk(&mut b);
        arena.allocate(None);

        assert_eq!(arena.size(), 5);
        assert_eq!(arena.layout(), [(0, 2), (2, 3)]);

        let mut out = [0.0; 3];
        arena.copy_out(1, &mut out);
        assert_eq!(out, [2.0, 3.0, 4.0]);

        arena.copy_in(1, &[9.0, 8.0]);
        drop(arena);
        assert_eq!(a, [1.0, 9.0]);
        assert_eq!(b[0], 8.0);
    }

    #[test]
    fn test_lazy_chunks_are_placed_in_order() {
        let mut arena = BufferFusion::<f32>::new();
        arena.register_lazy(2);
        arena.register_lazy(3);
        arena.allocate(None);

        arena.copy_in(0, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(arena.chunk(1), [3.0, 4.0, 5.0]);
        assert_eq!(arena.flatten(), [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_mixed_chunks_with_external_backing() {
        let mut backing = [0; 4];
        let mut ext = [7; 2];

        let mut arena = BufferFusion::new();
        arena.register_lazy(1);
        arena.register_chunk(&mut ext);
        arena.register_lazy(3);
        arena.allocate(Some(&mut backing));

        arena.fill(5);
        arena.transform(2, 2, |piece| piece.iter_mut().for_each(|x| *x += 1));

        assert_eq!(arena.flatten(), [5, 5, 6, 6, 5, 5]);
        drop(arena);
        assert_eq!(backing, [5, 6, 5, 5]);
        assert_eq!(ext, [5, 6]);
    }

    #[test]
    fn test_copy_out_reloads_into_a_fresh_arena() {
        let mut first = [0.5f32, -1.25];
        let mut second = [3.0f32; 3];

        let mut source = BufferFusion::new();
        source.register_chunk(&mut first);
        source.register_lazy(2);
        source.register_chunk(&mut second);
        source.register_lazy(1);
        source.allocate(None);
        source.copy_in(2, &[9.0, -0.75]);
        source.copy_in(7, &[42.0]);

        let size = source.size();
        let mut saved = vec![0.0; size];
        source.copy_out(0, &mut saved);

        let mut first_copy = [0.0f32; 2];
        let mut second_copy = [0.0f32; 3];
        let mut reloaded = BufferFusion::new();
        reloaded.register_chunk(&mut first_copy);
        reloaded.register_lazy(2);
        reloaded.register_chunk(&mut second_copy);
        reloaded.register_lazy(1);
        reloaded.allocate(None);
        assert_eq!(reloaded.layout(), source.layout());

        reloaded.copy_in(0, &saved);

        fn bytes(values: &[f32]) -> Vec<u8> {
            values.iter().flat_map(|x| x.to_le_bytes()).collect()
        }

        assert_eq!(bytes(&reloaded.flatten()), bytes(&source.flatten()));
        for i in 0..source.chunk_count() {
            assert_eq!(bytes(reloaded.chunk(i)), bytes(source.chunk(i)));
        }

        drop(reloaded);
        assert_eq!(first_copy, [0.5, -1.25]);
        assert_eq!(second_copy, [3.0; 3]);
    }

    #[test]
    fn test_empty_chunks_are_skipped() {
        let mut arena = BufferFusion::<u8>::new();
        arena.register_lazy(0);
        arena.register_lazy(2);
        arena.register_lazy(0);
        arena.allocate(None);

        arena.copy_in(0, &[1, 2]);
        assert_eq!(arena.chunk(1), [1, 2]);
        assert!(arena.chunk(2).is_empty());
    }

    #[test]
    #[should_panic(expected = "out of the arena")]
    fn test_access_past_the_end_panics() {
        let mut arena = BufferFusion::<f32>::new();
        arena.register_lazy(2);
        arena.allocate(None);
        arena.copy_out(1, &mut [0.0; 2]);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_lazy_access_before_allocate_panics() {
        let mut arena = BufferFusion::<f32>::new();
        arena.register_lazy(2);
        arena.flatten();
    }

    #[test]
    #[should_panic(expected = "doesn't match")]
    fn test_wrong_external_backing_panics() {
        let mut backing = [0.0; 3];
        let mut arena = BufferFusion::<f32>::new();
        arena.register_lazy(2);
        arena.allocate(Some(&mut backing));
    }
}
