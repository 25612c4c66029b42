pub mod account;
pub mod acme;
pub mod action;
pub mod audit;
pub mod challenge;
pub mod config;
pub mod cooldown;
pub mod dns;
pub mod lifecycle;
pub mod order;
pub mod sweeper;
pub mod testing;

pub use account::{Account, AccountError, AccountStore, PendingAction, Role, SqliteAccountStore};
pub use acme::{AcmeClient, AcmeShTool, ToolError, ToolOutput};
pub use action::{ActionParseError, OrderAction};
pub use challenge::{ArtifactSet, ChallengeCoordinator, ChallengeError, DownloadLink};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config, ConfigError,
};
pub use cooldown::CooldownGuard;
pub use dns::{DnsError, HickoryTxtResolver, TxtResolver};
pub use lifecycle::{ActionResponse, LifecycleEngine, LifecycleError, OrderPage, Outcome};
pub use order::{
    CertOrder, CertType, DnsChallenge, OrderError, OrderFilter, OrderStatus, OrderStore,
    SqliteOrderStore,
};
pub use sweeper::{BatchSweeper, StageCount, SweepReport};
