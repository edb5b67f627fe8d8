//! Run a row source on a worker thread.
//!
//! Rows are sent in chunks through a bounded channel so scanning overlaps
//! with query execution without buffering the whole source.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use sift_error::{Result, ResultExt, SiftError};
use tracing::{trace, warn};

use super::{RowResolver, RowSource};
use crate::cancel::CancellationToken;

type Chunk = Result<Vec<Box<dyn RowResolver>>>;

#[derive(Debug)]
pub struct BackgroundRowSource {
    receiver: Option<Receiver<Chunk>>,
    buffer: VecDeque<Box<dyn RowResolver>>,
    handle: Option<JoinHandle<()>>,
    token: CancellationToken,
}

impl BackgroundRowSource {
    /// Start producing rows from `inner` on a new thread.
    ///
    /// No thread is started if the token is already cancelled.
    pub fn spawn(
        inner: Box<dyn RowSource>,
        capacity: usize,
        chunk_size: usize,
        token: CancellationToken,
    ) -> Result<Self> {
        token.check()?;

        let (sender, receiver) = channel::bounded(capacity.max(1));
        let chunk_size = chunk_size.max(1);
        let worker_token = token.clone();

        let handle = std::thread::Builder::new()
            .name("sift-row-source".to_string())
            .spawn(move || produce(inner, sender, chunk_size, worker_token))
            .context("Failed to spawn row source thread")?;

        Ok(BackgroundRowSource {
            receiver: Some(receiver),
            buffer: VecDeque::new(),
            handle: Some(handle),
            token,
        })
    }

    fn join(&mut self) {
        // Dropping the receiver unblocks a producer waiting on a full channel.
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("row source thread panicked");
            }
        }
    }
}

fn produce(
    mut inner: Box<dyn RowSource>,
    sender: Sender<Chunk>,
    chunk_size: usize,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            trace!("row source producer cancelled");
            return;
        }

        let mut chunk = Vec::with_capacity(chunk_size);
        let mut exhausted = false;

        while chunk.len() < chunk_size {
            let next = panic::catch_unwind(AssertUnwindSafe(|| inner.next_row()));
            match next {
                Ok(Ok(Some(row))) => chunk.push(row),
                Ok(Ok(None)) => {
                    exhausted = true;
                    break;
                }
                Ok(Err(e)) => {
                    let _ = sender.send(Err(e));
                    return;
                }
                Err(_) => {
                    let _ = sender.send(Err(SiftError::execution("Row source panicked")));
                    return;
                }
            }
        }

        if !chunk.is_empty() && sender.send(Ok(chunk)).is_err() {
            // Consumer went away.
            return;
        }
        if exhausted {
            return;
        }
    }
}

impl RowSource for BackgroundRowSource {
    fn next_row(&mut self) -> Result<Option<Box<dyn RowResolver>>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }

            self.token.check()?;

            let Some(receiver) = &self.receiver else {
                return Ok(None);
            };
            match receiver.recv() {
                Ok(Ok(chunk)) => self.buffer.extend(chunk),
                Ok(Err(e)) => {
                    self.join();
                    return Err(e);
                }
                Err(_) => {
                    // Producer finished, or stopped on cancellation.
                    self.join();
                    self.token.check()?;
                    return Ok(None);
                }
            }
        }
    }
}

impl Drop for BackgroundRowSource {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::scalar::ScalarValue;

    #[derive(Debug)]
    struct Counting {
        n: i64,
        limit: i64,
        fail_at: Option<i64>,
    }

    #[derive(Debug)]
    struct Value(i64);

    impl RowResolver for Value {
        fn has_column(&self, name: &str) -> bool {
            name == "v"
        }

        fn get_by_name(&self, name: &str) -> Option<ScalarValue> {
            self.has_column(name).then_some(ScalarValue::Int64(self.0))
        }

        fn get(&self, index: usize) -> Option<ScalarValue> {
            (index == 0).then_some(ScalarValue::Int64(self.0))
        }
    }

    impl RowSource for Counting {
        fn next_row(&mut self) -> Result<Option<Box<dyn RowResolver>>> {
            if Some(self.n) == self.fail_at {
                return Err(SiftError::execution("source failed"));
            }
            if self.n >= self.limit {
                return Ok(None);
            }
            self.n += 1;
            Ok(Some(Box::new(Value(self.n))))
        }
    }

    /// Yields nothing until the token is cancelled, then ends.
    #[derive(Debug)]
    struct EndsOnCancel {
        token: CancellationToken,
    }

    impl RowSource for EndsOnCancel {
        fn next_row(&mut self) -> Result<Option<Box<dyn RowResolver>>> {
            while !self.token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(None)
        }
    }

    fn drain(source: &mut dyn RowSource) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        while let Some(row) = source.next_row()? {
            out.push(row.get(0).unwrap().try_as_i64().unwrap());
        }
        Ok(out)
    }

    #[test]
    fn produces_all_rows_in_order() {
        let inner = Box::new(Counting {
            n: 0,
            limit: 10,
            fail_at: None,
        });
        let mut source =
            BackgroundRowSource::spawn(inner, 2, 3, CancellationToken::new()).unwrap();
        assert_eq!((1..=10).collect::<Vec<_>>(), drain(&mut source).unwrap());
    }

    #[test]
    fn producer_error_forwarded() {
        let inner = Box::new(Counting {
            n: 0,
            limit: 10,
            fail_at: Some(5),
        });
        let mut source =
            BackgroundRowSource::spawn(inner, 1, 2, CancellationToken::new()).unwrap();
        let err = drain(&mut source).unwrap_err();
        assert_eq!("source failed", err.message());
    }

    #[test]
    fn pre_cancelled_spawns_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let inner = Box::new(Counting {
            n: 0,
            limit: 10,
            fail_at: None,
        });
        let err = BackgroundRowSource::spawn(inner, 1, 1, token).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn cancel_mid_stream() {
        let token = CancellationToken::new();
        let inner = Box::new(Counting {
            n: 0,
            limit: 1_000_000,
            fail_at: None,
        });
        let mut source = BackgroundRowSource::spawn(inner, 1, 4, token.clone()).unwrap();
        assert!(source.next_row().unwrap().is_some());

        token.cancel();
        // Buffered rows may still come out, then cancellation is reported.
        let err = loop {
            match source.next_row() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("source should not finish"),
                Err(e) => break e,
            }
        };
        assert!(err.is_cancelled());
        // Dropping joins the worker without hanging.
        drop(source);
    }

    #[test]
    fn cancel_while_waiting_is_not_end_of_source() {
        let token = CancellationToken::new();
        let inner = Box::new(EndsOnCancel {
            token: token.clone(),
        });
        let mut source = BackgroundRowSource::spawn(inner, 1, 4, token.clone()).unwrap();

        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                token.cancel();
            })
        };

        let err = source.next_row().unwrap_err();
        assert!(err.is_cancelled());
        canceller.join().unwrap();
    }
}
