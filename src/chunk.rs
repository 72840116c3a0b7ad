//! Word-boundary text chunker with word overlap.
//!
//! Text is split on whitespace and words are accumulated into a running
//! chunk. Each word counts `len + 1` characters toward the chunk (the `+ 1`
//! is the joining space). Once the running length reaches `chunk_size`, the
//! chunk is closed and the next one is seeded with the closed chunk's last
//! `overlap` words. Whatever remains at the end is flushed as a final,
//! possibly short, chunk, even when it holds only the overlap seed.
//!
//! The function is pure and deterministic; callers assign `chunk_index` from
//! the position in the returned vector.

/// Split `text` into overlapping chunks of roughly `chunk_size` characters.
///
/// Returns an empty vector for empty or whitespace-only input.
///
/// The overlap seed is trimmed from the front until it is shorter than
/// `chunk_size`, so every chunk after the first adds at least one new word.
/// Without that, a seed that already fills a chunk would close a new chunk
/// on every subsequent word.
///
/// # Example
///
/// ```rust
/// use resource_rag::chunk::split_text;
///
/// let chunks = split_text("one two three four five", 10, 1);
/// assert_eq!(chunks, vec!["one two three", "three four", "four five", "five"]);
/// ```
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        current.push(word);
        current_len += word.len() + 1;

        if current_len >= chunk_size {
            chunks.push(current.join(" "));

            let keep = overlap.min(current.len());
            let mut seed = current.split_off(current.len() - keep);
            let mut seed_len: usize = seed.iter().map(|w| w.len() + 1).sum();
            while seed_len >= chunk_size && !seed.is_empty() {
                seed_len -= seed.remove(0).len() + 1;
            }

            current = seed;
            current_len = seed_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}
