//! HTTP plumbing shared by the provider clients

use futures::{Stream, StreamExt};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use super::TextStream;
use crate::error::{Error, Result};

/// Build a pooled reqwest client with a whole-request timeout
pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(5)
        .build()?)
}

/// Retry an operation with exponential backoff (1s, 2s, 4s, ...)
pub async fn retry_request<F, Fut, T>(max_retries: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries => {
                let delay = Duration::from_secs(2u64.pow(attempt));
                tracing::warn!(
                    "Request failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    max_retries + 1,
                    delay,
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turn a non-success response into an error carrying the body
pub async fn ensure_success(
    response: reqwest::Response,
    to_error: fn(String) -> Error,
    what: &str,
) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(to_error(format!("{} failed: HTTP {} - {}", what, status, body)))
}

struct LineState<S> {
    inner: S,
    buf: Vec<u8>,
    done: bool,
}

/// Re-frame a byte stream into text lines (without the line terminator)
///
/// Network chunks do not respect line boundaries, so partial lines are
/// buffered until their newline arrives. A transport error ends the stream.
pub fn lines<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(bytes),
        buf: Vec::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                return Some((Ok(text), st));
            }
            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                return Some((Ok(String::from_utf8_lossy(&rest).into_owned()), st));
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_lines_reassembles_split_chunks() {
        let chunks: Vec<std::result::Result<&'static [u8], Error>> = vec![
            Ok(&b"{\"a\":1}\n{\"b\""[..]),
            Ok(&b":2}\r\n"[..]),
            Ok(&b"tail"[..]),
        ];
        let lines: Vec<String> = lines(stream::iter(chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "tail"]);
    }

    #[tokio::test]
    async fn test_lines_stops_after_error() {
        let chunks: Vec<std::result::Result<&'static [u8], Error>> = vec![
            Ok(&b"one\ntw"[..]),
            Err(Error::llm("connection reset")),
            Ok(&b"o\n"[..]),
        ];
        let items: Vec<Result<String>> = lines(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "one");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = retry_request(0, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(Error::llm("down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
