mod document;
mod error;
mod events;
mod options;
mod provider;
mod sync;

pub use document::Document;
pub use error::ProviderError;
pub use options::ProviderOptions;
pub use provider::Provider;

pub use collab_transport::{CertificateHash, ConnectionStatus, TransportError};
