use std::cmp::Ordering;

/// Compares two strings treating embedded runs of digits as numbers, so that
/// `item9` sorts before `item10`.
///
/// Runs with leading zeros are compared digit by digit from the left, so
/// `a015` sorts before `a12`.
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    natord::compare(a, b)
}

/// Sorts in place using [natural_cmp].
pub(crate) fn natural_sort<S: AsRef<str>>(items: &mut [S]) {
    items.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}
