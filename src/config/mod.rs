mod server;

pub use server::{
    ActivationMode, AuthConfig, DEFAULT_TOKEN_TTL_SECS, DaemonConfig, DatabaseConfig,
    EngineConfig, LogConfig, SomaConfig,
};
