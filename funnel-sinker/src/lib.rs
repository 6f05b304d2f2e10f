//! Sinker is the harness layer of funnel. It drives many records through a
//! chunk pipeline and writes them as one JSON array file, using the ordered
//! sink from `funnel-core` to keep concurrent chunk writers from corrupting
//! the output.
//!
//! The shape of the problem: a batch run reads records, groups them into
//! fixed-size chunks, and hands each chunk to one of several worker threads.
//! Each worker formats its chunk into a text fragment and appends it to a
//! shared output file. With a plain lock on the file, the append order is
//! whatever order the workers happen to win the lock, not the order the
//! chunks were produced. The visible symptoms in the file are a separator
//! comma alone on a line, or two records merged onto one line.
//!
//! Why does a lock alone not fix it?
//!
//! The lock makes each append atomic, but it decides nothing about order.
//! Two workers holding fragments for chunk 3 and chunk 4 both reach the
//! lock; whichever wins writes first. Atomicity without ordering is exactly
//! the defect.
//!
//! The fix is to make the order explicit. Every chunk gets its sequence
//! number from `Sequencer` at the moment it is accepted, before any worker
//! touches it. Workers format concurrently and deliver to `OrderedSink`,
//! which releases fragments to the file strictly by sequence number. The
//! worker holding chunk 4 waits until chunk 3 is on disk, no matter how
//! early it finished formatting.
//!
//! The pieces here:
//!
//! 1. `record` models the rows of the exported batch table and generates
//!    deterministic test data in place of a database.
//! 2. `json_formatter` turns one chunk into one self-contained fragment of a
//!    JSON array. Separators belong to the fragment, not to the sink.
//! 3. `chunk_pipeline` assigns sequence numbers, fans chunks out to workers
//!    over a channel, and closes the sink when the input is exhausted.
//! 4. `output_checker` scans a finished file for the defect symptoms, so a
//!    run loop can keep the evidence of a bad run and discard clean ones.

pub mod chunk_pipeline;
pub mod json_formatter;
pub mod output_checker;
pub mod record;
