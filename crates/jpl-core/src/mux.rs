//! Cartesian-product multiplexing.
//!
//! Every flavour enumerates combinations in odometer order: the first list
//! varies slowest, the last list fastest. `mux(&[vec![1, 2], vec![3, 4]], f)`
//! calls `f` with `[1, 3]`, `[1, 4]`, `[2, 3]`, `[2, 4]`.
//!
//! No lists at all yield exactly one (empty) combination; any empty list
//! yields none.

use futures::future::try_join_all;
use std::future::Future;

/// Iterator over every combination of one element per list.
pub struct Combinations<'a, T> {
    lists: &'a [Vec<T>],
    cursor: Option<Vec<usize>>,
}

impl<'a, T> Combinations<'a, T> {
    pub fn new(lists: &'a [Vec<T>]) -> Self {
        let cursor = if lists.iter().any(Vec::is_empty) {
            None
        } else {
            Some(vec![0; lists.len()])
        };
        Self { lists, cursor }
    }
}

impl<T: Clone> Iterator for Combinations<'_, T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        let cursor = self.cursor.as_mut()?;
        let combination = cursor
            .iter()
            .zip(self.lists)
            .map(|(&i, list)| list[i].clone())
            .collect();

        let mut exhausted = true;
        for (digit, list) in cursor.iter_mut().zip(self.lists).rev() {
            *digit += 1;
            if *digit < list.len() {
                exhausted = false;
                break;
            }
            *digit = 0;
        }
        if exhausted {
            self.cursor = None;
        }
        Some(combination)
    }
}

/// Call `f` once per combination and collect its results as-is.
pub fn mux<T, R, F>(lists: &[Vec<T>], f: F) -> Vec<R>
where
    T: Clone,
    F: FnMut(Vec<T>) -> R,
{
    Combinations::new(lists).map(f).collect()
}

/// Like [`mux`], splicing every result sequence into one flat list.
pub fn mux_one<T, I, F>(lists: &[Vec<T>], f: F) -> Vec<I::Item>
where
    T: Clone,
    I: IntoIterator,
    F: FnMut(Vec<T>) -> I,
{
    Combinations::new(lists).flat_map(f).collect()
}

/// Run `f` for all combinations concurrently.
///
/// Results keep enumeration order regardless of completion order; the first
/// failure drops every sibling.
pub async fn mux_async<T, R, E, Fut, F>(lists: &[Vec<T>], f: F) -> Result<Vec<R>, E>
where
    T: Clone,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    try_join_all(Combinations::new(lists).map(f)).await
}

/// [`mux_async`] with the per-combination result sequences merged into one.
pub async fn mux_all<T, I, E, Fut, F>(lists: &[Vec<T>], f: F) -> Result<Vec<I::Item>, E>
where
    T: Clone,
    I: IntoIterator,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<I, E>>,
{
    let results = mux_async(lists, f).await?;
    Ok(results.into_iter().flatten().collect())
}
