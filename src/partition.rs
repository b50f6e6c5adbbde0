//! Splitting a source into contiguous chunks.

use crate::error::{Error, Result};

/// Split `items` into `chunks` contiguous groups.
///
/// Every group but the last holds `items.len() / chunks` items, the last one
/// takes the remainder. With more chunks than items each item becomes its own
/// chunk; empty chunks are never produced.
pub fn partition<T: Clone>(items: &[T], chunks: usize) -> Result<Vec<Vec<T>>> {
    if chunks == 0 {
        return Err(Error::Partition("chunk count must be at least 1".to_string()));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = items.len() / chunks;
    if chunk_size == 0 {
        return Ok(items.iter().map(|item| vec![item.clone()]).collect());
    }

    let split = chunk_size * (chunks - 1);
    let mut out: Vec<Vec<T>> = items[..split]
        .chunks(chunk_size)
        .map(|c| c.to_vec())
        .collect();
    out.push(items[split..].to_vec());
    Ok(out)
}

/// Number of chunks [`partition`] yields for `len` items.
pub fn chunk_count(len: usize, chunks: usize) -> Result<usize> {
    if chunks == 0 {
        return Err(Error::Partition("chunk count must be at least 1".to_string()));
    }
    Ok(len.min(chunks))
}
