mod api;
mod call;
mod loopback;
mod metadata;
pub mod paths;
mod state;

pub use api::{RemoteApi, RemoteError};
pub use call::{CallId, RemoteCall, RemoteReply, RemoteRequest, ReplyPayload};
pub use loopback::LoopbackStore;
pub use metadata::{FileMetadata, FileType};
pub use state::RequestState;
