// mcp-client/src/paginate.rs
use std::collections::HashSet;
use std::future::Future;

use crate::error::{Error, Result};

/// Follow a paged listing to exhaustion.
///
/// Fetches with no cursor first, then keeps passing the server-supplied
/// continuation cursor until a page comes back without one, concatenating
/// items in page order. An empty-string cursor counts as exhaustion. A cursor
/// value observed twice aborts with `Error::PaginationLoop` instead of
/// looping forever.
pub(crate) async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>)>>,
{
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        let (page, next) = fetch(cursor.clone()).await?;
        items.extend(page);

        match next.filter(|c| !c.is_empty()) {
            None => return Ok(items),
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(Error::PaginationLoop(next));
                }
                cursor = Some(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concatenates_pages_in_order() {
        let calls = std::sync::Mutex::new(Vec::new());

        let result = collect_pages(|cursor| {
            let page = {
                let mut calls = calls.lock().unwrap();
                calls.push(cursor);
                calls.len()
            };
            async move {
                Ok(match page {
                    1 => (vec!["a", "b"], Some("cursor-1".to_string())),
                    2 => (vec!["c"], Some("cursor-2".to_string())),
                    3 => (Vec::new(), None),
                    _ => panic!("fetched past the final page"),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(result, vec!["a", "b", "c"]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                None,
                Some("cursor-1".to_string()),
                Some("cursor-2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn repeated_cursor_fails_instead_of_looping() {
        let err = collect_pages(|_cursor| async move {
            Ok((vec!["x"], Some("again".to_string())))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::PaginationLoop(cursor) if cursor == "again"));
    }

    #[tokio::test]
    async fn empty_string_cursor_means_exhausted() {
        let result =
            collect_pages(|_cursor| async move { Ok((vec![1, 2], Some(String::new()))) })
                .await
                .unwrap();

        assert_eq!(result, vec![1, 2]);
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        let err = collect_pages(|_cursor| async move {
            Err::<(Vec<u8>, Option<String>), _>(Error::SessionClosed)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::SessionClosed));
    }
}
