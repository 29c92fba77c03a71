pub mod completion;
pub mod credential;
pub mod device_flow;
pub mod error;
pub mod session;
pub mod upstream_client;

pub use completion::{ChunkStream, ChunkStreamError, HandlerError, for_each_chunk, new_completion_id};
pub use credential::{CredentialError, TOKEN_FILE_NAME, TokenFile};
pub use device_flow::{DeviceFlowError, PollTiming, poll_access_token};
pub use error::UpstreamError;
pub use session::{SessionCredential, SessionRefresher, SessionStore, parse_expiry};
pub use upstream_client::{
    ByteStream, ChatResponse, CopilotClient, EditorIdentity, UpstreamClientConfig,
    UpstreamEndpoints,
};
