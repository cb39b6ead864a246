pub mod agent;
pub mod key;
pub mod parser;
pub mod proxy;
pub mod registry;
pub mod state;

pub use agent::GatewayAgent;
pub use key::{CompositeKey, SenderTargetAndSubStrategy, SessionIdStrategy};
pub use parser::SessionParser;
pub use proxy::{EncodingSessionProxy, SessionProxy};
pub use registry::SessionRegistry;
pub use state::{Session, SessionState, TEST_REQ_ID};
