//! Chunked streaming of archive byte ranges to the datastore

pub mod chunked;
pub mod parallel;
pub mod source;
pub mod transport;

pub use chunked::{
    ChunkLedger, ChunkRange, ChunkedUploader, DEFAULT_CHUNK_SIZE, ItemUpload, ProgressCallback,
    UploadOptions, plan_chunks,
};
pub use parallel::MAX_WORKERS;
pub use source::{ChunkReader, FileRangeSource, RangeSource};
pub use transport::{ChunkTransport, HttpChunkTransport, build_http_client};
