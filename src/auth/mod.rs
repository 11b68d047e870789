mod helpers;
mod middleware;
mod token;

pub use middleware::{AuthError, BasicCredentials, RequireAuth};
pub use token::{CredentialHasher, TokenSigner, generate_secret};
