/// Segments smaller than this are not worth a separate request.
pub const MIN_SEGMENT_SIZE: u64 = 128 * 1024;

/// Partition `[0, size)` into at most `concurrency` contiguous byte ranges.
///
/// The count is capped so no segment falls below [`MIN_SEGMENT_SIZE`] (but is
/// always at least one). All but the last range have length
/// `ceil(size / count)`; the last takes whatever remains. A zero-length chunk
/// yields the single empty range `(0, 0)`.
pub fn split_segments(size: u64, concurrency: usize) -> Vec<(u64, u64)> {
    if size == 0 {
        return vec![(0, 0)];
    }
    let limit = (size / MIN_SEGMENT_SIZE).max(1);
    let count = (concurrency.max(1) as u64).min(limit);
    let segment_size = size.div_ceil(count);

    let mut segments = Vec::with_capacity(count as usize);
    let mut start = 0;
    while start < size {
        let end = (start + segment_size).min(size);
        segments.push((start, end));
        start = end;
    }
    segments
}
