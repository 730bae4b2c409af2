use crate::{error::DomError, key::Key, proto::CursorRecord};
use std::{cmp::Ordering, collections::VecDeque, future::Future};

///
/// Fetched
///
/// Remote records left after masking, plus how many were masked.
///

#[derive(Debug, Default)]
pub(crate) struct Fetched {
    pub records: Vec<CursorRecord>,
    pub masked: u64,
}

/// Merge two ascending sequences into one, stopping at `limit`.
///
/// On equal heads the cached entry wins and both sides advance. Remote
/// entries the local side already superseded must be removed beforehand.
pub(crate) fn merge_sorted<T>(
    cached: Vec<T>,
    fetched: Vec<T>,
    limit: Option<usize>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Vec<T> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut cached = VecDeque::from(cached);
    let mut fetched = VecDeque::from(fetched);
    let mut out = Vec::with_capacity(limit.min(cached.len() + fetched.len()));

    while out.len() < limit {
        let next = match (cached.front(), fetched.front()) {
            (Some(c), Some(f)) => match cmp(f, c) {
                Ordering::Less => fetched.pop_front(),
                Ordering::Greater => cached.pop_front(),
                Ordering::Equal => {
                    fetched.pop_front();
                    cached.pop_front()
                }
            },
            (Some(_), None) => cached.pop_front(),
            (None, Some(_)) => fetched.pop_front(),
            (None, None) => None,
        };

        match next {
            Some(item) => out.push(item),
            None => break,
        }
    }

    out
}

/// Await a remote page and drop masked records. When masking shrank a
/// full page, ask again from the last record seen for as many records as
/// were dropped, until the page is no longer short.
///
/// `refetch(last, n)` must return up to `n` records starting at `last.key`
/// inclusive; records at or before `last` are skipped.
pub(crate) async fn fetch_unmasked<Fut>(
    first: Fut,
    count: Option<u32>,
    is_masked: impl Fn(&CursorRecord) -> bool,
    refetch: impl Fn(&CursorRecord, u32) -> Fut,
) -> Result<Fetched, DomError>
where
    Fut: Future<Output = Result<Vec<CursorRecord>, DomError>>,
{
    let mut out = Fetched::default();
    let mut requested = count;
    let mut resume: Option<(Key, Key)> = None;
    let mut page = first.await?;

    loop {
        let full = requested.is_some_and(|n| page.len() >= n as usize);
        let Some(last) = page.last().cloned() else {
            break;
        };
        let same_key = page.iter().filter(|r| r.key == last.key).count();

        if let Some((key, primary_key)) = resume.take() {
            page.retain(|r| {
                r.key.cmp(&key).then_with(|| r.primary_key.cmp(&primary_key)) == Ordering::Greater
            });
        }

        let before = page.len();
        page.retain(|r| !is_masked(r));
        let dropped = before - page.len();
        out.masked += dropped as u64;
        out.records.extend(page);

        if dropped == 0 || !full {
            break;
        }

        let n = u32::try_from(dropped + same_key).unwrap_or(u32::MAX);
        requested = Some(n);
        page = refetch(&last, n).await?;
        resume = Some((last.key, last.primary_key));
    }

    Ok(out)
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{FutureExt, future::Ready, future::ready};
    use std::cell::RefCell;

    fn merge(cached: &[(i32, &'static str)], fetched: &[(i32, &'static str)], limit: Option<usize>) -> Vec<(i32, &'static str)> {
        merge_sorted(cached.to_vec(), fetched.to_vec(), limit, |a, b| a.0.cmp(&b.0))
    }

    #[test]
    fn interleaves_and_honours_the_limit() {
        let out = merge(&[(2, "l"), (4, "l"), (6, "l")], &[(1, "r"), (3, "r"), (5, "r")], Some(4));

        assert_eq!(out, vec![(1, "r"), (2, "l"), (3, "r"), (4, "l")]);
    }

    #[test]
    fn equal_keys_prefer_the_cached_entry() {
        let out = merge(&[(1, "l"), (2, "l")], &[(1, "r"), (2, "r"), (3, "r")], None);

        assert_eq!(out, vec![(1, "l"), (2, "l"), (3, "r")]);
    }

    #[test]
    fn remainders_are_appended() {
        assert_eq!(merge(&[], &[(1, "r"), (2, "r")], None), vec![(1, "r"), (2, "r")]);
        assert_eq!(merge(&[(7, "l")], &[], Some(5)), vec![(7, "l")]);
        assert!(merge(&[(1, "l")], &[(0, "r")], Some(0)).is_empty());
    }

    fn rec(key: i32) -> CursorRecord {
        CursorRecord {
            key: Key::from(key),
            primary_key: Key::from(key),
            value: None,
        }
    }

    /// Serve pages out of a sorted remote holding `keys`.
    fn remote(keys: &'static [i32], calls: &RefCell<Vec<(i32, u32)>>) -> impl Fn(&CursorRecord, u32) -> Ready<Result<Vec<CursorRecord>, DomError>> {
        move |last, n| {
            let from = last.key.as_number().unwrap_or_default();
            calls.borrow_mut().push((from as i32, n));
            ready(Ok(keys
                .iter()
                .filter(|k| f64::from(**k) >= from)
                .take(n as usize)
                .map(|k| rec(*k))
                .collect()))
        }
    }

    #[test]
    fn short_pages_are_not_refetched() {
        let calls = RefCell::new(Vec::new());
        let first = ready(Ok(vec![rec(1), rec(2)]));

        let out = fetch_unmasked(first, Some(5), |r| r.key == Key::from(2), remote(&[], &calls))
            .now_or_never()
            .unwrap()
            .unwrap();

        assert_eq!(out.records, vec![rec(1)]);
        assert_eq!(out.masked, 1);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn masked_records_in_a_full_page_are_replaced() {
        let calls = RefCell::new(Vec::new());
        let first = ready(Ok(vec![rec(1), rec(2), rec(3)]));
        let masked = |r: &CursorRecord| r.key == Key::from(2) || r.key == Key::from(4);

        let out = fetch_unmasked(first, Some(3), masked, remote(&[1, 2, 3, 4, 5, 6], &calls))
            .now_or_never()
            .unwrap()
            .unwrap();

        assert_eq!(out.records, vec![rec(1), rec(3), rec(5)]);
        assert_eq!(out.masked, 2);
        assert_eq!(*calls.borrow(), vec![(3, 2), (4, 2)]);
    }
}
