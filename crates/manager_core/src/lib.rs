//! Shared state and protocol logic for the Manager: the persistent corpus
//! store, the syscall table, the corpus engine, the RPC server, and the
//! supervisor that drives one VM instance through its lifecycle.

pub mod call_table;
pub mod corpus;
pub mod error;
pub mod external;
pub mod rpc;
pub mod store;
pub mod supervisor;

pub use call_table::{CallId, CallTable};
pub use corpus::{CorpusEngine, CorpusEntry, RpcInput};
pub use error::{CoreError, RpcError, StoreError};
pub use external::{LineProgramDeserializer, PriorityModel, ProgramDeserializer, UniformPriorityModel};
pub use store::PersistentStore;
pub use supervisor::{Supervisor, SupervisorTuning};
