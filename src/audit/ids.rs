use std::collections::HashMap;
use thiserror::Error;

pub type ItemId = u64;

pub const DEFAULT_CHUNK_SIZE: usize = 250;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: `{text}` has no item id segment")]
    MissingSegment { line: usize, text: String },
    #[error("line {line}: `{segment}` in `{text}` is not a valid item id")]
    InvalidId {
        line: usize,
        segment: String,
        text: String,
    },
}

/// Extracts the id from a link shaped like `https://host/<digits>/`.
///
/// The id is the segment right before the trailing slash.
pub fn parse_item_link(line: &str) -> Option<Result<ItemId, String>> {
    let segments: Vec<&str> = line.trim().split('/').collect();
    if segments.len() < 2 {
        return None;
    }
    let segment = segments[segments.len() - 2].trim();
    Some(segment.parse::<ItemId>().map_err(|_| segment.to_string()))
}

/// Parses every non-blank line into an item id, keeping input order and
/// repeats. The first bad line aborts the whole submission.
pub fn normalize_lines<'a, I>(lines: I) -> Result<Vec<ItemId>, ParseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ids = Vec::new();
    for (idx, raw) in lines.into_iter().enumerate() {
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        match parse_item_link(text) {
            Some(Ok(id)) => ids.push(id),
            Some(Err(segment)) => {
                return Err(ParseError::InvalidId {
                    line: idx + 1,
                    segment,
                    text: text.to_string(),
                });
            }
            None => {
                return Err(ParseError::MissingSegment {
                    line: idx + 1,
                    text: text.to_string(),
                });
            }
        }
    }
    Ok(ids)
}

pub fn normalize_text(text: &str) -> Result<Vec<ItemId>, ParseError> {
    normalize_lines(text.lines())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub unique: Vec<ItemId>,
    pub duplicates: Vec<ItemId>,
}

/// Splits ids into those submitted exactly once and those submitted more
/// than once. Both lists hold distinct values in first-seen order.
pub fn partition_duplicates(ids: &[ItemId]) -> Partition {
    let mut counts: HashMap<ItemId, usize> = HashMap::with_capacity(ids.len());
    let mut order = Vec::new();
    for id in ids {
        let count = counts.entry(*id).or_insert(0);
        if *count == 0 {
            order.push(*id);
        }
        *count += 1;
    }

    let mut partition = Partition::default();
    for id in order {
        if counts[&id] == 1 {
            partition.unique.push(id);
        } else {
            partition.duplicates.push(id);
        }
    }
    partition
}

/// Consecutive chunks of at most `size` ids. A zero size is treated as one.
pub fn chunk_ids(ids: &[ItemId], size: usize) -> Vec<Vec<ItemId>> {
    ids.chunks(size.max(1)).map(<[ItemId]>::to_vec).collect()
}
