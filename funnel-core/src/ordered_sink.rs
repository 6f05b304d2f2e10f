use log::info;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Errors surfaced by [`OrderedSink`].
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sequence number was submitted before. Submitting a duplicate is a
    /// programming error on the caller side.
    #[error("sequence {0} was already submitted")]
    DuplicateSequence(u64),

    /// The underlying output failed while appending the fragment with this
    /// sequence number. The sink is poisoned afterwards.
    #[error("append of sequence {seq} failed: {source}")]
    Write {
        seq: u64,
        #[source]
        source: io::Error,
    },

    /// A write of the given sequence number failed earlier. Nothing is
    /// appended anymore; the host must build a fresh sink over a fresh output.
    #[error("sink is poisoned by a failed append of sequence {0}")]
    Poisoned(u64),

    /// The sink was closed or aborted.
    #[error("sink is closed")]
    Closed,
}

/// An append-only byte destination with no ordering guarantees of its own.
///
/// Each call either fully succeeds or fails; the sink treats a short append
/// as a failure.
pub trait AppendOutput: Send {
    fn append(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl AppendOutput for File {
    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf)?;
        Ok(buf.len())
    }
}

impl AppendOutput for Vec<u8> {
    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkStatus {
    Running,
    Poisoned(u64),
    Closed,
}

struct SinkState<W> {
    /// The sequence number the sink is waiting for. Advanced only after the
    /// fragment bearing it has been appended.
    next_expected: u64,

    /// Fragments that arrived before their turn, keyed by sequence number.
    /// Each entry belongs to a caller parked in `submit`.
    pending: HashMap<u64, Vec<u8>>,

    status: SinkStatus,

    /// Released on close or poison so the handle is dropped eagerly.
    output: Option<W>,
}

/// `OrderedSink` serializes concurrent fragment delivery into ordered output.
///
/// Any number of workers format chunks concurrently and call `submit` with
/// the sequence number their chunk was given at acceptance time. Fragments
/// reach the underlying output strictly in sequence order, one at a time,
/// no matter in which order the `submit` calls arrive.
///
/// Why not let the output's own lock decide who writes next?
///
/// That is exactly the defect this component exists to rule out. A plain
/// lock grants write turns in whatever order threads happen to acquire it,
/// which under load interleaves later chunks before earlier ones. The sink
/// makes "whose turn is it" an explicit decision driven by one shared
/// counter, `next_expected`, owned by the sink alone.
///
/// Which caller performs the append?
///
/// The waiter itself. A caller whose turn has not come parks its fragment in
/// `pending` and waits on a watch channel carrying `next_expected`. When the
/// cursor reaches its number it removes its own fragment and appends it
/// inside the sink critical section. The pending map therefore never holds
/// the current `next_expected` entry longer than the flush itself.
///
/// A failed append poisons the sink: every parked and every future `submit`
/// fails with [`SinkError::Poisoned`] and nothing is appended anymore. The
/// sink never skips a sequence number, since skipping would reintroduce the
/// interleaving it exists to prevent.
pub struct OrderedSink<W: AppendOutput> {
    state: Mutex<SinkState<W>>,

    /// Publishes `next_expected` to parked callers. Bumped on every cursor
    /// advance and on poison, close and abort.
    cursor_tx: watch::Sender<u64>,
}

impl<W: AppendOutput> OrderedSink<W> {
    /// Create a sink over `output`. The sink takes exclusive ownership of
    /// the handle; nothing else may write to it.
    pub fn new(output: W) -> Self {
        let (cursor_tx, _) = watch::channel(0u64);

        Self {
            state: Mutex::new(SinkState {
                next_expected: 0,
                pending: HashMap::new(),
                status: SinkStatus::Running,
                output: Some(output),
            }),
            cursor_tx,
        }
    }

    /// Deliver the fragment for `seq` and wait until it has been appended.
    ///
    /// Returns once the fragment, and every fragment with a smaller sequence
    /// number, is appended to the output. A caller arriving before its turn
    /// waits until all earlier sequence numbers have been flushed.
    pub async fn submit(&self, seq: u64, fragment: Vec<u8>) -> Result<(), SinkError> {
        let mut cursor_rx = self.cursor_tx.subscribe();

        {
            let mut state = self.state.lock().await;

            match state.status {
                SinkStatus::Poisoned(at) => return Err(SinkError::Poisoned(at)),
                SinkStatus::Closed => return Err(SinkError::Closed),
                SinkStatus::Running => {}
            }

            if seq < state.next_expected || state.pending.contains_key(&seq) {
                return Err(SinkError::DuplicateSequence(seq));
            }

            state.pending.insert(seq, fragment);
        }

        loop {
            // Mark the current cursor version as seen before checking the
            // state, so an advance between the check and the wait below is
            // picked up by `changed` instead of being lost.
            let _ = cursor_rx.borrow_and_update();

            {
                let mut state = self.state.lock().await;

                match state.status {
                    SinkStatus::Poisoned(at) => return Err(SinkError::Poisoned(at)),
                    SinkStatus::Closed => return Err(SinkError::Closed),
                    SinkStatus::Running => {}
                }

                if state.next_expected == seq {
                    return self.flush_own(&mut state, seq);
                }
            }

            if cursor_rx.changed().await.is_err() {
                return Err(SinkError::Closed);
            }
        }
    }

    /// Append the fragment for `seq` and advance the cursor. Runs with the
    /// state lock held, which is what makes the append exclusive.
    fn flush_own(&self, state: &mut SinkState<W>, seq: u64) -> Result<(), SinkError> {
        let fragment = match state.pending.remove(&seq) {
            Some(fragment) => fragment,
            // Pending is cleared only on poison or abort, and both states
            // are reported before reaching here.
            None => return Err(SinkError::Closed),
        };

        let output = match state.output.as_mut() {
            Some(output) => output,
            None => return Err(SinkError::Closed),
        };

        let res = match output.append(&fragment) {
            Ok(n) if n == fragment.len() => Ok(()),
            Ok(n) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short append: {} of {} bytes", n, fragment.len()),
            )),
            Err(e) => Err(e),
        };

        match res {
            Ok(()) => {
                state.next_expected = seq + 1;
                let _ = self.cursor_tx.send(state.next_expected);
                Ok(())
            }
            Err(e) => {
                state.status = SinkStatus::Poisoned(seq);
                state.pending.clear();
                state.output = None;

                // Wake every parked caller so it observes the poisoning.
                let _ = self.cursor_tx.send(state.next_expected);

                Err(SinkError::Write { seq, source: e })
            }
        }
    }

    /// Wait until every submitted sequence number has been flushed, then
    /// release the output.
    ///
    /// Writes happen inside the state critical section, so once the pending
    /// map is observed empty here, no append is in flight. The host must
    /// have submitted a gap-free range before calling `close`, otherwise
    /// parked fragments past the gap can never flush and `close` waits
    /// forever. `submit` after a successful `close` fails with
    /// [`SinkError::Closed`].
    pub async fn close(&self) -> Result<(), SinkError> {
        let mut cursor_rx = self.cursor_tx.subscribe();

        loop {
            let _ = cursor_rx.borrow_and_update();

            {
                let mut state = self.state.lock().await;

                match state.status {
                    SinkStatus::Poisoned(at) => return Err(SinkError::Poisoned(at)),
                    SinkStatus::Closed => return Ok(()),
                    SinkStatus::Running => {
                        if state.pending.is_empty() {
                            info!("ordered sink closed, flushed: {}", state.next_expected);

                            state.status = SinkStatus::Closed;
                            state.output = None;
                            let _ = self.cursor_tx.send(state.next_expected);

                            return Ok(());
                        }
                    }
                }
            }

            if cursor_rx.changed().await.is_err() {
                return Err(SinkError::Closed);
            }
        }
    }

    /// Shut the sink down immediately.
    ///
    /// Parked fragments are discarded without being written and every parked
    /// or later `submit` call is released with [`SinkError::Closed`]. Used
    /// when the host pipeline is aborted, so blocked callers never hang.
    pub async fn abort(&self) {
        let mut state = self.state.lock().await;

        if state.status == SinkStatus::Running {
            info!(
                "ordered sink aborted, flushed: {}, discarded: {}",
                state.next_expected,
                state.pending.len()
            );

            state.status = SinkStatus::Closed;
            state.pending.clear();
            state.output = None;
        }

        let _ = self.cursor_tx.send(state.next_expected);
    }

    /// The sequence number the sink is waiting for.
    pub async fn next_expected(&self) -> u64 {
        self.state.lock().await.next_expected
    }

    /// Number of fragments parked before their turn.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
