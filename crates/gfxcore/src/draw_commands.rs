//! Structure-of-arrays batch for multi-draw submission.
//!
//! Each sub-draw `i` is described by `counts[i]`, `offsets_bytes[i]` and
//! `instance_counts[i]`, laid out the way WebGL's `multiDrawElementsInstanced`
//! consumes them. Offsets are stored in bytes into the index buffer for
//! indexed batches and as first-vertex indices for non-indexed ones.

/// Multi-draw batch builder.
#[derive(Clone, Debug, Default)]
pub struct DrawCommands {
    index_size_bytes: u32,
    counts: Vec<u32>,
    offsets_bytes: Vec<u32>,
    instance_counts: Vec<u32>,
    count: usize,
    primitive_count: u64,
}

impl DrawCommands {
    /// `index_size_bytes` is 1, 2 or 4 for indexed batches and 0 otherwise.
    pub fn new(index_size_bytes: u32) -> Self {
        debug_assert!(
            matches!(index_size_bytes, 0 | 1 | 2 | 4),
            "unsupported index size {index_size_bytes}"
        );
        Self {
            index_size_bytes,
            ..Self::default()
        }
    }

    pub fn index_size_bytes(&self) -> u32 {
        self.index_size_bytes
    }

    pub fn is_indexed(&self) -> bool {
        self.index_size_bytes != 0
    }

    /// Sizes the arrays for `max_count` sub-draws, discarding previous data.
    pub fn allocate(&mut self, max_count: usize) {
        self.counts = vec![0; max_count];
        self.offsets_bytes = vec![0; max_count];
        self.instance_counts = vec![0; max_count];
        self.count = 0;
    }

    /// Resizes the arrays. With `preserve`, the overlapping prefix survives;
    /// resizing to the current capacity with `preserve` is a no-op.
    pub fn resize(&mut self, max_count: usize, preserve: bool) {
        if !preserve {
            self.allocate(max_count);
            return;
        }
        if max_count == self.max_count() {
            return;
        }
        self.counts.resize(max_count, 0);
        self.offsets_bytes.resize(max_count, 0);
        self.instance_counts.resize(max_count, 0);
        self.count = self.count.min(max_count);
    }

    pub fn max_count(&self) -> usize {
        self.counts.len()
    }

    /// Writes sub-draw `i`. `first` is the first index (indexed) or first
    /// vertex (non-indexed).
    pub fn add(&mut self, i: usize, index_or_vertex_count: u32, instance_count: u32, first: u32) {
        debug_assert!(
            i < self.max_count(),
            "draw command {i} out of range ({})",
            self.max_count()
        );
        self.counts[i] = index_or_vertex_count;
        self.offsets_bytes[i] = if self.is_indexed() {
            first * self.index_size_bytes
        } else {
            first
        };
        self.instance_counts[i] = instance_count;
    }

    /// Marks the first `count` sub-draws as the batch and returns the number of
    /// primitives they submit (`Σ count × instances`) for frame statistics.
    pub fn update(&mut self, count: usize) -> u64 {
        self.set_count(count);
        self.primitive_count = self.counts[..self.count]
            .iter()
            .zip(&self.instance_counts[..self.count])
            .map(|(&count, &instances)| u64::from(count) * u64::from(instances))
            .sum();
        self.primitive_count
    }

    /// Marks the first `count` sub-draws as the batch without computing stats.
    pub fn set_count(&mut self, count: usize) {
        debug_assert!(count <= self.max_count());
        self.count = count.min(self.max_count());
    }

    /// Number of sub-draws in the current batch.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn primitive_count(&self) -> u64 {
        self.primitive_count
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts[..self.count]
    }

    pub fn offsets_bytes(&self) -> &[u32] {
        &self.offsets_bytes[..self.count]
    }

    pub fn instance_counts(&self) -> &[u32] {
        &self.instance_counts[..self.count]
    }

    /// First index (or vertex) of sub-draw `i`, recovered from its byte offset.
    pub fn first(&self, i: usize) -> u32 {
        if self.is_indexed() {
            self.offsets_bytes[i] / self.index_size_bytes
        } else {
            self.offsets_bytes[i]
        }
    }

    /// Iterates `(count, first, instances)` for each sub-draw in the batch.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        (0..self.count).map(move |i| (self.counts[i], self.first(i), self.instance_counts[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_offsets_are_scaled_by_index_size() {
        let mut commands = DrawCommands::new(2);
        commands.allocate(4);
        commands.add(0, 6, 1, 100);
        assert_eq!(commands.update(1), 6);
        assert_eq!(commands.offsets_bytes(), &[200]);
        assert_eq!(commands.counts(), &[6]);
        assert_eq!(commands.instance_counts(), &[1]);
        assert_eq!(commands.first(0), 100);
    }

    #[test]
    fn non_indexed_offsets_are_first_vertex() {
        let mut commands = DrawCommands::new(0);
        commands.allocate(2);
        commands.add(0, 3, 2, 9);
        commands.add(1, 6, 1, 12);
        assert_eq!(commands.update(2), 12);
        assert_eq!(commands.offsets_bytes(), &[9, 12]);
        let collected: Vec<_> = commands.iter().collect();
        assert_eq!(collected, vec![(3, 9, 2), (6, 12, 1)]);
    }

    #[test]
    fn resize_preserves_prefix() {
        let mut commands = DrawCommands::new(4);
        commands.allocate(2);
        commands.add(0, 3, 1, 1);
        commands.add(1, 3, 1, 2);
        commands.update(2);

        commands.resize(8, true);
        assert_eq!(commands.max_count(), 8);
        assert_eq!(commands.offsets_bytes(), &[4, 8]);

        commands.resize(1, true);
        assert_eq!(commands.count(), 1);
        assert_eq!(commands.offsets_bytes(), &[4]);

        commands.resize(3, false);
        assert_eq!(commands.count(), 0);
        assert!(commands.counts().is_empty());
    }

    #[test]
    fn preserving_resize_to_same_size_keeps_everything() {
        let mut commands = DrawCommands::new(1);
        commands.allocate(2);
        commands.add(1, 9, 3, 5);
        commands.update(2);
        commands.resize(2, true);
        assert_eq!(commands.count(), 2);
        assert_eq!(commands.counts(), &[0, 9]);
        assert_eq!(commands.primitive_count(), 27);
    }
}
